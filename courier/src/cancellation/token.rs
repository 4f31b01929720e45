//! Cancellation token source with deferred action registration.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// An action to run once when cancellation is requested.
pub type CancelAction = Box<dyn FnOnce() + Send + 'static>;

/// A handle that can request cancellation of an in-flight operation.
///
/// This is the only capability handed back to callers of the executor.
/// Registering cancel actions stays with the [`CancellationToken`].
pub trait Cancelable: Send + Sync {
    /// Requests cancellation. Calling this more than once has no further effect.
    fn cancel(&self);
}

enum State {
    Active(Vec<CancelAction>),
    Cancelled,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock(), State::Cancelled)
    }
}

/// Owner of a single cancellation signal.
///
/// The source starts active and moves to cancelled at most once. Actions
/// registered through its [`CancellationToken`] run exactly once: either when
/// [`cancel`](Self::cancel) is called, or immediately at registration if the
/// source is already cancelled.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct CancellationTokenSource {
    shared: Arc<Shared>,
}

impl CancellationTokenSource {
    /// Creates a new active source with no registered actions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Active(Vec::new())),
            }),
        }
    }

    /// Creates a source together with its token.
    #[must_use]
    pub fn new_pair() -> (Self, CancellationToken) {
        let source = Self::new();
        let token = source.token();
        (source, token)
    }

    /// Returns a token viewing this source's state.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Returns the number of actions waiting for cancellation.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        match &*self.shared.state.lock() {
            State::Active(actions) => actions.len(),
            State::Cancelled => 0,
        }
    }

    /// Moves the source to the cancelled state and runs every registered
    /// action once, in registration order.
    ///
    /// Idempotent. Actions run after the lock is released, so an action may
    /// call back into the source.
    pub fn cancel(&self) {
        let actions = {
            let mut state = self.shared.state.lock();
            match std::mem::replace(&mut *state, State::Cancelled) {
                State::Active(actions) => actions,
                State::Cancelled => return,
            }
        };

        for action in actions {
            run_action(action);
        }
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancelable for CancellationTokenSource {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl std::fmt::Debug for CancellationTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationTokenSource")
            .field("cancelled", &self.is_cancelled())
            .field("pending_actions", &self.pending_actions())
            .finish()
    }
}

/// A restricted view of a [`CancellationTokenSource`].
///
/// Can query the cancellation state and register actions, but cannot cancel.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Registers an action to run on cancellation.
    ///
    /// If the source is still active the action is stored. If it is already
    /// cancelled the action runs synchronously before this call returns.
    pub fn register<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let action: CancelAction = Box::new(action);
        let immediate = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Active(actions) => {
                    actions.push(action);
                    None
                }
                State::Cancelled => Some(action),
            }
        };

        if let Some(action) = immediate {
            run_action(action);
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn run_action(action: CancelAction) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(action)) {
        warn!("Cancel action panicked: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn counter_action(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_source_default_not_cancelled() {
        let (source, token) = CancellationTokenSource::new_pair();
        assert!(!source.is_cancelled());
        assert!(!token.is_cancelled());
        assert_eq!(source.pending_actions(), 0);
    }

    #[test]
    fn test_cancel_sets_state_on_token() {
        let (source, token) = CancellationTokenSource::new_pair();
        source.cancel();
        assert!(source.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_register_then_cancel_runs_once() {
        let (source, token) = CancellationTokenSource::new_pair();
        let counter = Arc::new(AtomicUsize::new(0));

        token.register(counter_action(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(source.pending_actions(), 1);

        source.cancel();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
        assert_eq!(source.pending_actions(), 0);
    }

    #[test]
    fn test_cancel_then_register_runs_synchronously() {
        let (source, token) = CancellationTokenSource::new_pair();
        source.cancel();

        let counter = Arc::new(AtomicUsize::new(0));
        token.register(counter_action(&counter));

        // Ran inside register, before it returned
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(source.pending_actions(), 0);
    }

    #[test]
    fn test_actions_run_in_registration_order() {
        let (source, token) = CancellationTokenSource::new_pair();
        let order = Arc::new(PlMutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            token.register(move || order.lock().push(i));
        }

        source.cancel();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cancel_idempotent() {
        let (source, token) = CancellationTokenSource::new_pair();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        token.register(counter_action(&first));
        token.register(counter_action(&second));

        for _ in 0..4 {
            source.cancel();
        }

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_with_no_actions() {
        let source = CancellationTokenSource::new();
        source.cancel();
        assert!(source.is_cancelled());
    }

    #[test]
    fn test_cancel_through_cancelable_trait() {
        let (source, token) = CancellationTokenSource::new_pair();
        let counter = Arc::new(AtomicUsize::new(0));
        token.register(counter_action(&counter));

        let cancelable: Arc<dyn Cancelable> = Arc::new(source);
        cancelable.cancel();
        cancelable.cancel();

        assert!(token.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_action_does_not_stop_others() {
        let (source, token) = CancellationTokenSource::new_pair();
        let counter = Arc::new(AtomicUsize::new(0));

        token.register(|| panic!("Intentional panic"));
        token.register(counter_action(&counter));

        source.cancel();
        assert!(source.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_action_may_reenter_source() {
        let (source, token) = CancellationTokenSource::new_pair();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_source = source.clone();
        let inner_token = token.clone();
        let inner_counter = counter.clone();
        token.register(move || {
            inner_source.cancel();
            inner_token.register(counter_action(&inner_counter));
        });

        source.cancel();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_source_drops_pending_actions() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let (_source, token) = CancellationTokenSource::new_pair();
            token.register(counter_action(&counter));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_register_and_cancel_runs_exactly_once() {
        for _ in 0..500 {
            let (source, token) = CancellationTokenSource::new_pair();
            let counter = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(2));

            let registering = {
                let barrier = barrier.clone();
                let action = counter_action(&counter);
                thread::spawn(move || {
                    barrier.wait();
                    token.register(action);
                })
            };
            let cancelling = {
                let barrier = barrier.clone();
                let source = source.clone();
                thread::spawn(move || {
                    barrier.wait();
                    source.cancel();
                })
            };

            registering.join().unwrap();
            cancelling.join().unwrap();

            assert!(source.is_cancelled());
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_concurrent_cancels_run_each_action_once() {
        let (source, token) = CancellationTokenSource::new_pair();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            token.register(counter_action(&counter));
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = source.clone();
                thread::spawn(move || source.cancel())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
