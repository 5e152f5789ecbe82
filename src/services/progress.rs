//! Fire-and-forget progress reporting.
//!
//! Producers call [`ProgressSink::emit`] and move on; a sink never blocks and
//! never reports failure. Whatever adapts snapshots to a transport (socket,
//! log line, UI) sits on the receiving end of a channel.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{error::TrySendError, Sender, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub principal: f64,
    pub win_count: u32,
    pub fail_count: u32,
    pub max_principal: f64,
    pub min_principal: f64,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, snapshot: ProgressSnapshot);
}

/// Bounded channel: a full buffer drops the snapshot.
impl ProgressSink for Sender<ProgressSnapshot> {
    fn emit(&self, snapshot: ProgressSnapshot) {
        match self.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("progress buffer full, snapshot dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl ProgressSink for UnboundedSender<ProgressSnapshot> {
    fn emit(&self, snapshot: ProgressSnapshot) {
        // receiver gone = nobody is watching
        let _ = self.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn snap(p: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            principal: p,
            win_count: 0,
            fail_count: 0,
            max_principal: p,
            min_principal: p,
        }
    }

    #[test]
    fn bounded_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.emit(snap(1.0));
        tx.emit(snap(2.0));
        assert_eq!(rx.try_recv().unwrap().principal, 1.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_sinks_are_silent() {
        let (tx, rx) = mpsc::channel::<ProgressSnapshot>(4);
        drop(rx);
        tx.emit(snap(1.0));

        let (utx, urx) = mpsc::unbounded_channel::<ProgressSnapshot>();
        drop(urx);
        utx.emit(snap(1.0));
    }
}
