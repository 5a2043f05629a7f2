//! Load/unload state machine.
//!
//! ```text
//! Uninitialized --activate--> Active --terminate--> Terminated
//! ```
//!
//! `activate` binds the real allocator and opens the sink; a binding failure
//! leaves the lifecycle `Uninitialized` and is returned to the caller, which
//! must abort the host. `terminate` emits the final report and destroys the
//! record store. Nothing is tracked after `Terminated`.

use parking_lot::Mutex;

use crate::error::TraceError;
use crate::event::EventSink;
use crate::tracer::{FinalReport, RealAllocator, Tracer, TracerOptions};

/// Observable lifecycle phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    #[default]
    Uninitialized,
    Active,
    Terminated,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Terminated => "terminated",
        }
    }
}

/// Everything `activate` needs to open a session.
#[derive(Debug)]
pub struct Binding<A, S> {
    pub real: A,
    pub sink: S,
    pub options: TracerOptions,
}

#[derive(Debug)]
enum State<A, S> {
    Uninitialized,
    Active(Tracer<A, S>),
    Terminated,
}

/// Owner of the process-scoped tracer.
#[derive(Debug)]
pub struct Lifecycle<A, S> {
    state: State<A, S>,
}

impl<A, S> Lifecycle<A, S> {
    /// A lifecycle that has not been activated yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Uninitialized,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self.state {
            State::Uninitialized => Phase::Uninitialized,
            State::Active(_) => Phase::Active,
            State::Terminated => Phase::Terminated,
        }
    }
}

impl<A, S> Default for Lifecycle<A, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RealAllocator, S: EventSink> Lifecycle<A, S> {
    /// `Uninitialized -> Active`.
    pub fn activate<F>(&mut self, bind: F) -> Result<(), TraceError>
    where
        F: FnOnce() -> Result<Binding<A, S>, TraceError>,
    {
        if !matches!(self.state, State::Uninitialized) {
            return Err(TraceError::AlreadyActive);
        }
        let Binding {
            real,
            sink,
            options,
        } = bind()?;
        self.state = State::Active(Tracer::start(real, sink, options));
        Ok(())
    }

    /// The tracer, if the lifecycle is active.
    pub fn tracer_mut(&mut self) -> Option<&mut Tracer<A, S>> {
        match &mut self.state {
            State::Active(tracer) => Some(tracer),
            _ => None,
        }
    }

    /// `Active -> Terminated`, returning the final report.
    pub fn terminate(&mut self) -> Result<FinalReport, TraceError> {
        match std::mem::replace(&mut self.state, State::Terminated) {
            State::Active(tracer) => Ok(tracer.finish()),
            State::Uninitialized => {
                self.state = State::Uninitialized;
                Err(TraceError::NotActive(Phase::Uninitialized.as_str()))
            }
            State::Terminated => Err(TraceError::NotActive(Phase::Terminated.as_str())),
        }
    }
}

/// [`Lifecycle`] behind a lock, for use from a `static`.
///
/// The traced program is single-threaded by contract; the lock makes the
/// process-wide instance `Sync` and keeps find-then-release sequences atomic
/// if that contract is broken.
#[derive(Debug)]
pub struct SharedLifecycle<A, S> {
    inner: Mutex<Lifecycle<A, S>>,
}

impl<A, S> SharedLifecycle<A, S> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Lifecycle::new()),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.lock().phase()
    }
}

impl<A, S> Default for SharedLifecycle<A, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RealAllocator, S: EventSink> SharedLifecycle<A, S> {
    pub fn activate<F>(&self, bind: F) -> Result<(), TraceError>
    where
        F: FnOnce() -> Result<Binding<A, S>, TraceError>,
    {
        self.inner.lock().activate(bind)
    }

    /// Run `f` against the active tracer. `None` outside the active phase.
    pub fn with_tracer<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Tracer<A, S>) -> R,
    {
        self.inner.lock().tracer_mut().map(f)
    }

    pub fn terminate(&self) -> Result<FinalReport, TraceError> {
        self.inner.lock().terminate()
    }
}
