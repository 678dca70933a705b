//! Ticket-ordered admission with a concurrency cap.
//!
//! A reader with ticket `t` may start only when fewer than `threads` readers
//! are running and ticket `t - 1` has already been admitted. Waiting readers
//! poll on a fixed interval instead of being woken, so admission latency is
//! bounded by the poll interval.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

/// Process-wide admission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionState {
    pub running_count: usize,
    /// Increases by exactly one per admission.
    pub last_admitted_ticket: u64,
}

/// Gate deciding whether a waiting reader may begin cluster I/O.
#[derive(Debug)]
pub struct AdmissionGate {
    threads: usize,
    state: Mutex<AdmissionState>,
}

impl AdmissionGate {
    /// Create a gate admitting at most `threads` readers at once (minimum 1).
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            state: Mutex::new(AdmissionState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `ticket` if a slot is free and its predecessor was admitted.
    ///
    /// Returns `false` without touching the state otherwise.
    pub fn try_admit(&self, ticket: u64) -> bool {
        let mut state = self.lock();
        if state.running_count < self.threads && state.last_admitted_ticket + 1 == ticket {
            state.running_count += 1;
            state.last_admitted_ticket = ticket;
            true
        } else {
            false
        }
    }

    /// Give back a running slot. Never touches `last_admitted_ticket`.
    pub fn release(&self) {
        let mut state = self.lock();
        state.running_count = state.running_count.saturating_sub(1);
    }

    pub fn state(&self) -> AdmissionState {
        *self.lock()
    }

    /// Number of readers currently holding a slot.
    pub fn running(&self) -> usize {
        self.lock().running_count
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Poll every `poll` until `ticket` is admitted.
    ///
    /// The returned slot releases itself when dropped, including when the
    /// owning task is aborted mid-read.
    pub async fn admit(self: &Arc<Self>, ticket: u64, poll: Duration) -> AdmissionSlot {
        let mut attempts: u64 = 0;
        while !self.try_admit(ticket) {
            attempts += 1;
            tokio::time::sleep(poll).await;
        }
        debug!(ticket, attempts, "admitted");
        AdmissionSlot {
            gate: Arc::clone(self),
            ticket,
        }
    }
}

/// A held concurrency slot.
#[derive(Debug)]
pub struct AdmissionSlot {
    gate: Arc<AdmissionGate>,
    ticket: u64,
}

impl AdmissionSlot {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_in_ticket_order_only() {
        let gate = AdmissionGate::new(5);
        assert!(!gate.try_admit(2));
        assert!(gate.try_admit(1));
        assert!(!gate.try_admit(3));
        assert!(gate.try_admit(2));
        assert!(gate.try_admit(3));
        assert_eq!(
            gate.state(),
            AdmissionState {
                running_count: 3,
                last_admitted_ticket: 3
            }
        );
    }

    #[test]
    fn test_refusal_leaves_state_untouched() {
        let gate = AdmissionGate::new(1);
        assert!(gate.try_admit(1));
        let before = gate.state();
        assert!(!gate.try_admit(2));
        assert!(!gate.try_admit(7));
        assert_eq!(gate.state(), before);
    }

    #[test]
    fn test_running_count_capped_by_threads() {
        let gate = AdmissionGate::new(2);
        assert!(gate.try_admit(1));
        assert!(gate.try_admit(2));
        assert!(!gate.try_admit(3));
        assert_eq!(gate.running(), 2);

        gate.release();
        assert!(gate.try_admit(3));
        assert_eq!(gate.running(), 2);
    }

    #[test]
    fn test_release_keeps_last_ticket() {
        let gate = AdmissionGate::new(1);
        assert!(gate.try_admit(1));
        gate.release();
        assert_eq!(gate.state().last_admitted_ticket, 1);
        assert_eq!(gate.running(), 0);
        // A released ticket is never admitted again.
        assert!(!gate.try_admit(1));
        assert!(gate.try_admit(2));
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let gate = AdmissionGate::new(1);
        gate.release();
        assert_eq!(gate.running(), 0);
    }

    #[test]
    fn test_zero_threads_treated_as_one() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.threads(), 1);
        assert!(gate.try_admit(1));
        assert!(!gate.try_admit(2));
    }

    #[test]
    fn test_free_slot_does_not_bypass_ticket_order() {
        // threads=2: ticket 3 waits for ticket 2 even though a slot is free.
        let gate = AdmissionGate::new(2);
        assert!(gate.try_admit(1));
        assert!(!gate.try_admit(3));
        assert!(gate.try_admit(2));
        gate.release();
        assert!(gate.try_admit(3));
    }

    #[tokio::test]
    async fn test_slot_drop_unblocks_next_ticket() {
        let gate = Arc::new(AdmissionGate::new(1));
        let first = gate.admit(1, Duration::from_millis(5)).await;
        assert_eq!(first.ticket(), 1);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.admit(2, Duration::from_millis(5)).await.ticket() })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let admitted = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("second ticket never admitted")
            .unwrap();
        assert_eq!(admitted, 2);
        // The waiter's slot was dropped when its task returned.
        assert_eq!(gate.running(), 0);
    }
}
