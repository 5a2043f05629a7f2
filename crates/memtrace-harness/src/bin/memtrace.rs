//! CLI entrypoint for the memtrace allocation tracer.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use memtrace_harness::runner::locate_library;
use memtrace_harness::structured_log::{read_log, validate_log_file};
use memtrace_harness::{HarnessError, SessionSummary, TraceRunner};
use memtrace_membrane::{LogFormat, LogTarget, ReallocAccounting, TraceConfig, ZeroSizePolicy};

/// Allocation tracing for dynamically linked programs.
#[derive(Debug, Parser)]
#[command(name = "memtrace")]
#[command(about = "Trace malloc/calloc/realloc/free of a program via LD_PRELOAD")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a program with the tracer preloaded.
    Run {
        /// Preload library (default: $MEMTRACE_LIBRARY, then next to this binary).
        #[arg(long)]
        library: Option<PathBuf>,
        /// Log file (default: stderr of the traced program).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Log format: `text` or `jsonl`.
        #[arg(long, default_value = "text")]
        format: String,
        /// When realloc credits the old block: `confirmed` or `eager`.
        #[arg(long, default_value = "confirmed")]
        realloc_accounting: String,
        /// What malloc(0) does: `track` or `abort`.
        #[arg(long, default_value = "track")]
        zero_size: String,
        /// Program and arguments.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Summarize a JSONL log.
    Summarize {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Fail if a JSONL log shows illegal frees, double frees or leaks.
    Check {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
        /// Do not fail on leaked blocks.
        #[arg(long)]
        allow_leaks: bool,
    },
    /// Validate a JSONL log against the record schema.
    Validate {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            library,
            log,
            format,
            realloc_accounting,
            zero_size,
            command,
        } => {
            let library = locate_library(library.as_deref())?;
            let config = TraceConfig {
                target: log.map_or(LogTarget::Stderr, LogTarget::File),
                format: LogFormat::from_str_loose(&format),
                realloc_accounting: ReallocAccounting::from_str_loose(&realloc_accounting),
                zero_size: ZeroSizePolicy::from_str_loose(&zero_size),
            };
            let status = TraceRunner::new(library, config).run(&command)?;
            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
        }
        Command::Summarize { log, json } => {
            let summary = SessionSummary::from_records(&read_log(&log)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary.render_text());
            }
        }
        Command::Check { log, allow_leaks } => {
            let summary = SessionSummary::from_records(&read_log(&log)?);
            let violations = summary.violations(allow_leaks);
            if !violations.is_empty() {
                for v in &violations {
                    eprintln!("FAIL: {v}");
                }
                return Err(format!("check failed: {} violation(s)", violations.len()).into());
            }
            eprintln!("OK: {}", log.display());
        }
        Command::Validate { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(HarnessError::Validation(errors.len()).into());
            }
            eprintln!("{lines} line(s) valid");
        }
    }

    Ok(())
}
