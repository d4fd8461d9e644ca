//! The profiler state machine gating sample capture and dump scheduling.
//!
//! `PgoState` is the one piece of this crate built for heavy concurrent
//! access: mutator/sampling threads, worker-VM threads feeding a shared dump
//! pipeline, and the GC thread all call into the same instance. Every
//! mutation goes through one mutex; blocking waits use one condition variable
//! with broadcast-on-stop and a predicate-guarded wait.
//!
//! All transitions are total: an "invalid" transition is a routine concurrent
//! race, so it is a no-op (or a reported `false` for try-transitions), never
//! an error path.
//!
//! The GC-pause counter and the state enum live under the same lock. Splitting
//! them is the classic bug this design exists to avoid.

use std::sync::{Condvar, Mutex, PoisonError};

/// Where the sampling pipeline currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No sampling/dump in progress.
    Stop,
    /// Sampling/dump running.
    Start,
    /// Was running; a GC asked us to pause.
    PauseByGc,
}

/// Seam for the external dump pipeline: dispatched under the state lock so the
/// `Stop -> Start` transition and the dump scheduling appear atomic.
pub trait DumpScheduler: Send + Sync {
    /// Enqueues (or performs) one dump task.
    fn dispatch_dump(&self);
}

#[derive(Debug)]
struct Inner {
    state: State,
    gc_count: u32,
}

/// Thread-safe profiler state machine, see module docs.
#[derive(Debug)]
pub struct PgoState {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for PgoState {
    fn default() -> Self {
        Self::new()
    }
}

impl PgoState {
    /// Creates a state machine in `Stop` with no pending GC pauses.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Stop,
                gc_count: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic elsewhere; the state data itself is
        // a plain enum + counter and stays coherent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Stop -> Start`; no-op otherwise. Returns whether the transition ran.
    pub fn set_start_if_stop(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == State::Stop {
            inner.state = State::Start;
            true
        } else {
            false
        }
    }

    /// `Stop -> Start` plus dump dispatch, atomic to observers: there is no
    /// window where the state is `Start` but no dump has been scheduled.
    /// A `None` scheduler makes the dispatch a no-op.
    pub fn set_start_if_stop_and_dispatch_dump_task(
        &self,
        scheduler: Option<&dyn DumpScheduler>,
    ) -> bool {
        let mut inner = self.lock();
        if inner.state != State::Stop {
            return false;
        }
        inner.state = State::Start;
        if let Some(scheduler) = scheduler {
            scheduler.dispatch_dump();
        }
        true
    }

    /// `Start -> Stop`, waking every thread blocked in
    /// [`wait_dump_if_start`](Self::wait_dump_if_start). No-op otherwise.
    pub fn set_stop_if_start_and_notify(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == State::Start {
            inner.state = State::Stop;
            // Broadcast: multiple waiters are expected.
            self.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Registers a GC pause. The counter increments unconditionally (GC
    /// pauses nest and can arrive while sampling is stopped); the state moves
    /// to `PauseByGc` only when sampling was running.
    pub fn suspend_by_gc(&self) {
        let mut inner = self.lock();
        inner.gc_count = inner.gc_count.saturating_add(1);
        if inner.state == State::Start {
            inner.state = State::PauseByGc;
        }
    }

    /// Try-transition `Start -> PauseByGc` for racing GC triggers: exactly one
    /// caller observes `true` and becomes the pauser, the rest must not
    /// double-pause.
    pub fn set_pause_if_start_by_gc(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == State::Start {
            inner.state = State::PauseByGc;
            inner.gc_count = inner.gc_count.saturating_add(1);
            true
        } else {
            false
        }
    }

    /// `PauseByGc -> Start`, honoring nesting: the state stays `PauseByGc`
    /// while any other GC pause is still outstanding. Returns whether the
    /// state was `PauseByGc`.
    pub fn set_start_if_pause_by_gc(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != State::PauseByGc {
            return false;
        }
        inner.gc_count = inner.gc_count.saturating_sub(1);
        if inner.gc_count == 0 {
            inner.state = State::Start;
        }
        true
    }

    /// Unregisters one GC pause without forcing a `Start`: sampling that was
    /// stopped before the GC stays stopped.
    pub fn resume_by_gc(&self) {
        let mut inner = self.lock();
        inner.gc_count = inner.gc_count.saturating_sub(1);
        if inner.state == State::PauseByGc && inner.gc_count == 0 {
            inner.state = State::Start;
        }
    }

    /// Blocks until the state leaves `Start`; returns immediately otherwise.
    ///
    /// The wait is predicate-guarded, so spurious wakeups re-check and the
    /// only real exit is some thread running the stop transition. Callers
    /// needing a timeout wrap this externally.
    pub fn wait_dump_if_start(&self) {
        let mut inner = self.lock();
        while inner.state == State::Start {
            inner = self
                .cond
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Current nested GC-pause count.
    pub fn gc_count(&self) -> u32 {
        self.lock().gc_count
    }

    /// Whether sampling is running.
    pub fn is_start(&self) -> bool {
        self.lock().state == State::Start
    }

    /// Whether sampling is stopped.
    pub fn is_stop(&self) -> bool {
        self.lock().state == State::Stop
    }

    /// Whether any GC pause is outstanding.
    pub fn is_gc_waiting(&self) -> bool {
        let inner = self.lock();
        inner.state == State::PauseByGc || inner.gc_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_total_no_ops_when_invalid() {
        let state = PgoState::new();
        assert!(!state.set_stop_if_start_and_notify());
        assert!(!state.set_pause_if_start_by_gc());
        assert!(!state.set_start_if_pause_by_gc());
        state.resume_by_gc(); // below zero stays zero
        assert_eq!(state.gc_count(), 0);
        assert!(state.is_stop());
    }

    #[test]
    fn suspend_while_stopped_counts_but_does_not_start() {
        let state = PgoState::new();
        state.suspend_by_gc();
        assert!(state.is_stop());
        assert!(state.is_gc_waiting());
        state.resume_by_gc();
        assert!(state.is_stop());
        assert!(!state.is_gc_waiting());
    }

    #[test]
    fn nested_pauses_resume_only_at_zero() {
        let state = PgoState::new();
        assert!(state.set_start_if_stop());
        state.suspend_by_gc();
        state.suspend_by_gc();
        assert_eq!(state.gc_count(), 2);
        assert!(state.set_start_if_pause_by_gc());
        assert!(!state.is_start(), "resumed while a pause was outstanding");
        assert!(state.set_start_if_pause_by_gc());
        assert!(state.is_start());
        assert_eq!(state.gc_count(), 0);
    }

    #[test]
    fn pause_try_transition_has_one_winner() {
        let state = PgoState::new();
        assert!(state.set_start_if_stop());
        assert!(state.set_pause_if_start_by_gc());
        assert!(!state.set_pause_if_start_by_gc());
        assert_eq!(state.gc_count(), 1);
    }

    struct CountingScheduler(std::sync::atomic::AtomicUsize);
    impl DumpScheduler for CountingScheduler {
        fn dispatch_dump(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_runs_exactly_when_transition_runs() {
        let state = PgoState::new();
        let scheduler = CountingScheduler(std::sync::atomic::AtomicUsize::new(0));
        assert!(state.set_start_if_stop_and_dispatch_dump_task(Some(&scheduler)));
        assert!(!state.set_start_if_stop_and_dispatch_dump_task(Some(&scheduler)));
        assert_eq!(scheduler.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        // Null queue: transition still runs, dispatch is a no-op.
        assert!(state.set_stop_if_start_and_notify());
        assert!(state.set_start_if_stop_and_dispatch_dump_task(None));
    }
}
