//! Blocking rendezvous wires.
//!
//! Units whose internal behavior spans several phases run as their own
//! threads of control; pulses travel to and from them over wires with
//! handshake semantics.  The sender transmits a value together with a
//! private acknowledgement channel and blocks until the receiver
//! signals that it has applied the pulse.  That keeps at most one
//! pulse in flight per wire and gives a total order of effects even
//! though the receiver is independently scheduled: a slow receiver
//! stalls its sender, exactly as a real wire cannot queue pulses.
//!
//! A depth-zero channel is already a rendezvous, so the wire is a thin
//! wrapper over [`std::sync::mpsc::sync_channel`] with capacity zero.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

/// A pulse in flight on a handshake wire: the value on the wire plus
/// the sender's private acknowledgement channel.
pub struct Pulse {
    pub value: u16,
    ack: Option<SyncSender<()>>,
}

impl Pulse {
    /// Releases the sender.  Dropping the pulse without acknowledging
    /// also releases it (the sender treats a closed ack channel as
    /// completion), but an explicit ack marks the point the pulse's
    /// effect has been applied.
    pub fn ack(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

/// The sending end of a handshake wire.
pub struct Wire {
    source: String,
    sink: String,
    tx: SyncSender<Pulse>,
}

/// The receiving end of a handshake wire.
pub struct WireSink {
    rx: Receiver<Pulse>,
}

/// Creates a wire from `source` to `sink`.  Unlike patch cables,
/// handshake wires are directed: information travels only from source
/// to sink.
#[must_use]
pub fn wire(source: &str, sink: &str) -> (Wire, WireSink) {
    let (tx, rx) = sync_channel(0);
    (
        Wire {
            source: source.to_string(),
            sink: sink.to_string(),
            tx,
        },
        WireSink { rx },
    )
}

impl Wire {
    /// Sends `value` and blocks until the receiver acknowledges.
    /// Returns false when the far end is gone, which corresponds to
    /// an unplugged wire: the pulse simply produces no signal.
    pub fn handshake(&self, value: u16) -> bool {
        let (ack_tx, ack_rx) = sync_channel(0);
        if self
            .tx
            .send(Pulse {
                value,
                ack: Some(ack_tx),
            })
            .is_err()
        {
            return false;
        }
        // A closed ack channel means the receiver finished (or died)
        // without an explicit ack; either way the pulse is no longer
        // in flight.
        let _ = ack_rx.recv();
        true
    }

    #[must_use]
    pub fn label(&self) -> String {
        format!("[{}->{}]", self.source, self.sink)
    }
}

impl WireSink {
    /// Blocks for the next pulse; `None` once every sender is gone.
    pub fn recv(&self) -> Option<Pulse> {
        self.rx.recv().ok()
    }

    /// Non-blocking variant for receivers polling several wires.
    pub fn try_recv(&self) -> Option<Pulse> {
        self.rx.try_recv().ok()
    }
}
