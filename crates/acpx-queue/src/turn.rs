//! Turn controller
//!
//! A small state machine serializing what may happen to the currently
//! running prompt: `idle -> starting -> active -> idle`, with `closing`
//! as the terminal state once shutdown begins. Transitions are
//! non-blocking; the blocking work (the actual `session/cancel` round
//! trip) happens behind the attached controller, outside the lock.

use std::sync::{Arc, Mutex, Weak};

/// The cancel view of the live ACP client
///
/// Held weakly: the queue owner owns the client, the turn controller
/// only borrows its cancel path and is cleared when the client closes.
pub trait ActiveController: Send + Sync {
    /// Fire-and-forget cancellation of the active prompt
    fn request_cancel(&self);
}

/// Lifecycle of the owner's current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Starting,
    Active,
    Closing,
}

struct TurnState {
    lifecycle: Lifecycle,
    pending_cancel: bool,
    active: Weak<dyn ActiveController>,
}

/// Coordinates cancellation and control requests against the running turn
pub struct TurnController {
    state: Mutex<TurnState>,
}

impl Default for TurnController {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TurnState {
                lifecycle: Lifecycle::Idle,
                pending_cancel: false,
                active: Weak::<Never>::new() as Weak<dyn ActiveController>,
            }),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().unwrap().lifecycle
    }

    pub fn is_closing(&self) -> bool {
        self.lifecycle() == Lifecycle::Closing
    }

    /// idle -> starting; refused while closing
    pub fn begin_turn(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.lifecycle {
            Lifecycle::Idle => {
                state.lifecycle = Lifecycle::Starting;
                true
            }
            _ => false,
        }
    }

    /// starting -> active, applying any cancel that arrived early
    pub fn mark_prompt_active(&self) {
        let fire = {
            let mut state = self.state.lock().unwrap();
            if state.lifecycle != Lifecycle::Starting {
                return;
            }
            state.lifecycle = Lifecycle::Active;
            take_pending(&mut state)
        };
        if let Some(controller) = fire {
            controller.request_cancel();
        }
    }

    /// starting|active -> idle; clears the pending-cancel flag
    pub fn end_turn(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(state.lifecycle, Lifecycle::Starting | Lifecycle::Active) {
            state.lifecycle = Lifecycle::Idle;
        }
        state.pending_cancel = false;
    }

    /// any -> closing; control operations are refused from here on
    pub fn begin_closing(&self) {
        let mut state = self.state.lock().unwrap();
        state.lifecycle = Lifecycle::Closing;
        state.pending_cancel = false;
    }

    /// Attach the live client's cancel view; fires a cancel that was
    /// accepted before the controller existed
    pub fn attach_active_controller(&self, controller: Weak<dyn ActiveController>) {
        let fire = {
            let mut state = self.state.lock().unwrap();
            state.active = controller;
            if state.lifecycle == Lifecycle::Active {
                take_pending(&mut state)
            } else {
                None
            }
        };
        if let Some(controller) = fire {
            controller.request_cancel();
        }
    }

    /// Drop the controller reference (the client is closing)
    pub fn clear_active_controller(&self) {
        self.state.lock().unwrap().active = Weak::<Never>::new() as Weak<dyn ActiveController>;
    }

    /// Accept or refuse a cancel request
    ///
    /// Active: fires immediately through the controller. Starting: sets
    /// the pending flag, applied at the `starting -> active` transition.
    /// Idle or closing: nothing to cancel.
    pub fn request_cancel(&self) -> bool {
        let fire = {
            let mut state = self.state.lock().unwrap();
            match state.lifecycle {
                Lifecycle::Active => match state.active.upgrade() {
                    Some(controller) => Some(controller),
                    None => {
                        // Controller not attached yet; treat like starting.
                        state.pending_cancel = true;
                        None
                    }
                },
                Lifecycle::Starting => {
                    state.pending_cancel = true;
                    None
                }
                Lifecycle::Idle | Lifecycle::Closing => return false,
            }
        };
        if let Some(controller) = fire {
            controller.request_cancel();
        }
        true
    }

    /// Apply a pending cancel if one is set and a controller is attached
    pub fn apply_pending_cancel(&self) {
        let fire = {
            let mut state = self.state.lock().unwrap();
            take_pending(&mut state)
        };
        if let Some(controller) = fire {
            controller.request_cancel();
        }
    }
}

fn take_pending(state: &mut TurnState) -> Option<Arc<dyn ActiveController>> {
    if !state.pending_cancel {
        return None;
    }
    match state.active.upgrade() {
        Some(controller) => {
            state.pending_cancel = false;
            Some(controller)
        }
        None => None,
    }
}

/// Placeholder type for an empty weak slot
struct Never;

impl ActiveController for Never {
    fn request_cancel(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        fired: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fired: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.fired.load(Ordering::SeqCst)
        }
    }

    impl ActiveController for Counting {
        fn request_cancel(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_turn_transitions() {
        let turn = TurnController::new();
        assert_eq!(turn.lifecycle(), Lifecycle::Idle);

        assert!(turn.begin_turn());
        assert_eq!(turn.lifecycle(), Lifecycle::Starting);
        // A second begin while one is running is refused.
        assert!(!turn.begin_turn());

        turn.mark_prompt_active();
        assert_eq!(turn.lifecycle(), Lifecycle::Active);

        turn.end_turn();
        assert_eq!(turn.lifecycle(), Lifecycle::Idle);
    }

    #[test]
    fn test_cancel_while_idle_is_refused() {
        let turn = TurnController::new();
        assert!(!turn.request_cancel());
    }

    #[test]
    fn test_cancel_while_active_fires_immediately() {
        let turn = TurnController::new();
        let controller = Counting::new();
        turn.begin_turn();
        turn.attach_active_controller(Arc::downgrade(&controller) as Weak<dyn ActiveController>);
        turn.mark_prompt_active();

        assert!(turn.request_cancel());
        assert_eq!(controller.count(), 1);
    }

    #[test]
    fn test_cancel_while_starting_is_applied_on_activation() {
        let turn = TurnController::new();
        let controller = Counting::new();
        turn.begin_turn();
        turn.attach_active_controller(Arc::downgrade(&controller) as Weak<dyn ActiveController>);

        assert!(turn.request_cancel());
        assert_eq!(controller.count(), 0);

        turn.mark_prompt_active();
        assert_eq!(controller.count(), 1);
    }

    #[test]
    fn test_pending_cancel_applied_when_controller_attaches() {
        let turn = TurnController::new();
        let controller = Counting::new();
        turn.begin_turn();
        assert!(turn.request_cancel());
        turn.mark_prompt_active();
        // Nothing fired yet: no controller.
        assert_eq!(controller.count(), 0);

        turn.attach_active_controller(Arc::downgrade(&controller) as Weak<dyn ActiveController>);
        assert_eq!(controller.count(), 1);
    }

    #[test]
    fn test_end_turn_clears_pending() {
        let turn = TurnController::new();
        let controller = Counting::new();
        turn.begin_turn();
        assert!(turn.request_cancel());
        turn.end_turn();

        turn.begin_turn();
        turn.attach_active_controller(Arc::downgrade(&controller) as Weak<dyn ActiveController>);
        turn.mark_prompt_active();
        // The cancel accepted in the previous turn must not leak in.
        assert_eq!(controller.count(), 0);
    }

    #[test]
    fn test_closing_refuses_everything() {
        let turn = TurnController::new();
        turn.begin_closing();
        assert!(turn.is_closing());
        assert!(!turn.begin_turn());
        assert!(!turn.request_cancel());
    }

    #[test]
    fn test_dropped_controller_is_inert() {
        let turn = TurnController::new();
        turn.begin_turn();
        {
            let controller = Counting::new();
            turn.attach_active_controller(
                Arc::downgrade(&controller) as Weak<dyn ActiveController>
            );
        }
        turn.mark_prompt_active();
        // Upgrade fails silently; cancel stays pending but cannot fire.
        assert!(turn.request_cancel());
    }
}
