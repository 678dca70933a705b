//! Zero-capacity handoff between readers and the coordinator.
//!
//! `send` completes only once the receiver has taken the unit, so a reader
//! can never run ahead of the sink by more than the unit it holds. At most
//! one unit sits in the channel slot, and its sender is still parked waiting
//! for the receiver's acknowledgement.

use esrollup_core::TransferUnit;
use tokio::sync::{mpsc, oneshot};

/// The receiving side went away before taking the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("handoff receiver closed")]
pub struct HandoffClosed;

struct Delivery {
    unit: TransferUnit,
    taken: oneshot::Sender<()>,
}

/// Create a connected rendezvous pair.
pub fn channel() -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

/// Cloneable sending half, one clone per reader.
#[derive(Clone)]
pub struct HandoffSender {
    tx: mpsc::Sender<Delivery>,
}

impl HandoffSender {
    /// Hand `unit` over, waiting until the receiver has taken it.
    pub async fn send(&self, unit: TransferUnit) -> Result<(), HandoffClosed> {
        let (taken, acked) = oneshot::channel();
        self.tx
            .send(Delivery { unit, taken })
            .await
            .map_err(|_| HandoffClosed)?;
        acked.await.map_err(|_| HandoffClosed)
    }
}

/// Receiving half, owned by the coordinator.
pub struct HandoffReceiver {
    rx: mpsc::Receiver<Delivery>,
}

impl HandoffReceiver {
    /// Take the next unit. `None` once every sender is gone.
    ///
    /// Cancel safe: a unit is acknowledged only in the same poll that
    /// returns it.
    pub async fn recv(&mut self) -> Option<TransferUnit> {
        let delivery = self.rx.recv().await?;
        // The sender may have been aborted meanwhile; the unit is still ours.
        let _ = delivery.taken.send(());
        Some(delivery.unit)
    }
}
