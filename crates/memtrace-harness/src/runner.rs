//! Launch a program under the tracer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use memtrace_membrane::config::{ENV_FORMAT, ENV_LOG, ENV_REALLOC_ACCOUNTING, ENV_ZERO_SIZE};
use memtrace_membrane::{LogTarget, TraceConfig};

use crate::error::HarnessError;

/// File name of the preload library produced by `memtrace-abi`.
pub const LIBRARY_FILE_NAME: &str = "libmemtrace_abi.so";

/// Environment override for the library location.
pub const ENV_LIBRARY: &str = "MEMTRACE_LIBRARY";

/// Runs programs with the tracer preloaded.
#[derive(Debug, Clone)]
pub struct TraceRunner {
    /// Path to the preload library.
    pub library: PathBuf,
    /// Configuration passed to the tracer through its environment.
    pub config: TraceConfig,
}

impl TraceRunner {
    #[must_use]
    pub fn new(library: impl Into<PathBuf>, config: TraceConfig) -> Self {
        Self {
            library: library.into(),
            config,
        }
    }

    /// `MEMTRACE_*` variables for this runner's configuration.
    #[must_use]
    pub fn tracer_env(&self) -> Vec<(&'static str, OsString)> {
        let log = match &self.config.target {
            LogTarget::Stderr => OsString::from("-"),
            LogTarget::File(path) => path.clone().into_os_string(),
        };
        vec![
            (ENV_LOG, log),
            (ENV_FORMAT, self.config.format.as_str().into()),
            (
                ENV_REALLOC_ACCOUNTING,
                self.config.realloc_accounting.as_str().into(),
            ),
            (ENV_ZERO_SIZE, self.config.zero_size.as_str().into()),
        ]
    }

    /// `LD_PRELOAD` value with the tracer first, keeping any existing entries.
    #[must_use]
    pub fn preload_value(&self, existing: Option<OsString>) -> OsString {
        let mut value = self.library.clone().into_os_string();
        if let Some(existing) = existing.filter(|v| !v.is_empty()) {
            value.push(":");
            value.push(existing);
        }
        value
    }

    /// Build the command without spawning it.
    pub fn command(&self, argv: &[String]) -> Result<Command, HarnessError> {
        let (program, args) = argv.split_first().ok_or(HarnessError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env(
                "LD_PRELOAD",
                self.preload_value(std::env::var_os("LD_PRELOAD")),
            )
            .envs(self.tracer_env());
        Ok(cmd)
    }

    /// Run `argv` to completion under the tracer.
    pub fn run(&self, argv: &[String]) -> Result<ExitStatus, HarnessError> {
        if !self.library.is_file() {
            return Err(HarnessError::LibraryNotFound(self.library.clone()));
        }
        let mut cmd = self.command(argv)?;
        cmd.status().map_err(|source| HarnessError::Spawn {
            program: argv[0].clone(),
            source,
        })
    }
}

/// Find the preload library.
///
/// Order: explicit path, `MEMTRACE_LIBRARY`, then next to the running
/// executable (the usual `target/<profile>/` layout).
pub fn locate_library(explicit: Option<&Path>) -> Result<PathBuf, HarnessError> {
    let candidate = match explicit {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os(ENV_LIBRARY) {
            Some(path) => PathBuf::from(path),
            None => {
                let exe = std::env::current_exe()?;
                exe.parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(LIBRARY_FILE_NAME)
            }
        },
    };
    if candidate.is_file() {
        Ok(candidate)
    } else {
        Err(HarnessError::LibraryNotFound(candidate))
    }
}
