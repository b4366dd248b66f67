#![forbid(unsafe_code)]

//! Error taxonomy and the process-wide error sink.
//!
//! The engine distinguishes two failure classes:
//!
//! - **Contract violations** (double attach, wrong-parent removal, ambiguous
//!   lookups, factory-chain exhaustion) panic synchronously at the offending
//!   call and are never routed here.
//! - **Hook failures** — `Err` returned from a lifecycle hook or a
//!   synchronizer's attach/detach — are caught per node and routed to the
//!   current [`ErrorSink`], so one failing subtree never blocks sibling or
//!   ancestor lifecycle progress.
//!
//! The sink is thread-local (the engine is single-threaded). The default
//! [`LoggingSink`] logs and swallows; tests install [`RethrowSink`] to turn
//! routed errors into panics.
//!
//! # Invariants
//!
//! 1. Routing never re-enters the sink registry: the sink is cloned out of
//!    the slot before `handle` runs, so a handler may install a new sink.
//! 2. [`with_error_sink`] restores the previous sink when it returns,
//!    including during unwinding if the closure panics.

use std::cell::RefCell;
use std::rc::Rc;

/// Boxed error type produced by lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error>;

/// Result of a lifecycle hook or synchronizer phase.
pub type SyncResult = Result<(), BoxError>;

/// Which lifecycle phase produced a routed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    /// `on_before_attach` mapper hook.
    BeforeAttach,
    /// `on_attach` mapper hook.
    Attach,
    /// `on_detach` mapper hook.
    Detach,
    /// A synchronizer's `attach`.
    SynchronizerAttach,
    /// A synchronizer's `detach`.
    SynchronizerDetach,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BeforeAttach => "on_before_attach",
            Self::Attach => "on_attach",
            Self::Detach => "on_detach",
            Self::SynchronizerAttach => "synchronizer attach",
            Self::SynchronizerDetach => "synchronizer detach",
        };
        f.write_str(name)
    }
}

/// A hook failure caught by the engine and routed to the sink.
#[derive(Debug)]
pub struct HookError {
    /// The phase that failed.
    pub stage: HookStage,
    /// The underlying error.
    pub error: BoxError,
}

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// Receiver for hook failures.
pub trait ErrorSink {
    /// Handle one routed error.
    fn handle(&self, error: HookError);
}

/// Default sink: log via `tracing::error!` and continue.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl ErrorSink for LoggingSink {
    fn handle(&self, error: HookError) {
        tracing::error!(stage = %error.stage, error = %error.error, "lifecycle hook failed");
    }
}

/// Test sink: escalate every routed error to a panic.
#[derive(Debug, Default)]
pub struct RethrowSink;

impl ErrorSink for RethrowSink {
    fn handle(&self, error: HookError) {
        panic!("{error}");
    }
}

thread_local! {
    static CURRENT_SINK: RefCell<Rc<dyn ErrorSink>> = RefCell::new(Rc::new(LoggingSink));
}

/// Install `sink` as the current sink, returning the previous one.
pub fn install_error_sink(sink: Rc<dyn ErrorSink>) -> Rc<dyn ErrorSink> {
    CURRENT_SINK.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), sink))
}

/// Run `f` with `sink` installed, restoring the previous sink afterwards
/// (also on unwind).
pub fn with_error_sink<R>(sink: Rc<dyn ErrorSink>, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Rc<dyn ErrorSink>>);
    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                install_error_sink(previous);
            }
        }
    }
    let _restore = Restore(Some(install_error_sink(sink)));
    f()
}

/// Route a hook failure to the current sink.
pub(crate) fn route(stage: HookStage, error: BoxError) {
    let sink = CURRENT_SINK.with(|slot| Rc::clone(&slot.borrow()));
    sink.handle(HookError { stage, error });
}
