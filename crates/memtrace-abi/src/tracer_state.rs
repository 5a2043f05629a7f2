//! Process-wide tracer instance.
//!
//! One [`SharedLifecycle`] per process, activated by the load hook and
//! terminated by the unload hook. ABI entry points reach the tracer through
//! [`with_tracer`], which yields `None` outside the active phase so that
//! pre-load and post-unload calls pass straight through.

use std::fs::File;
use std::io::{self, BufWriter};

use memtrace_membrane::sink::sink_for;
use memtrace_membrane::{
    Binding, EventSink, FinalReport, LogTarget, Phase, SharedLifecycle, TraceConfig, TraceError,
    Tracer, TracerOptions,
};

use crate::real_alloc::LibcAllocator;

pub type GlobalSink = Box<dyn EventSink + Send>;

static LIFECYCLE: SharedLifecycle<LibcAllocator, GlobalSink> = SharedLifecycle::new();

/// Bind the real allocator, open the log and start the session.
pub fn activate(config: &TraceConfig) -> Result<(), TraceError> {
    LIFECYCLE.activate(|| {
        let real = LibcAllocator::bind_next()?;
        Ok(Binding {
            real,
            sink: open_sink(config),
            options: TracerOptions::from(config),
        })
    })
}

/// [`activate`] with configuration from the `MEMTRACE_*` environment.
pub fn activate_from_env() -> Result<(), TraceError> {
    activate(&TraceConfig::from_env())
}

/// End the session and write the final report.
pub fn terminate() -> Result<FinalReport, TraceError> {
    LIFECYCLE.terminate()
}

#[must_use]
pub fn phase() -> Phase {
    LIFECYCLE.phase()
}

#[inline]
pub(crate) fn with_tracer<R, F>(f: F) -> Option<R>
where
    F: FnOnce(&mut Tracer<LibcAllocator, GlobalSink>) -> R,
{
    LIFECYCLE.with_tracer(f)
}

/// Report an unrecoverable tracer error and take the host down.
///
/// Binding failures exit with status 1; contract violations abort.
pub fn fail(err: &TraceError) -> ! {
    eprintln!("memtrace: {err}");
    match err {
        // SAFETY: terminating the process; no Rust state is observed afterwards.
        TraceError::ZeroSizeRequest => unsafe { libc::abort() },
        // SAFETY: as above.
        _ => unsafe { libc::_exit(1) },
    }
}

fn open_sink(config: &TraceConfig) -> GlobalSink {
    match &config.target {
        LogTarget::Stderr => sink_for(config.format, io::stderr()),
        LogTarget::File(path) => match File::create(path) {
            Ok(file) => sink_for(config.format, BufWriter::new(file)),
            Err(err) => {
                eprintln!(
                    "memtrace: cannot open {}: {err}; logging to stderr",
                    path.display()
                );
                sink_for(config.format, io::stderr())
            }
        },
    }
}
