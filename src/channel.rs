//! Duplex session channel.
//!
//! A session is three channels: inbound packets (network to logic), outbound
//! packets (logic to network), and a termination signal carrying the error
//! that ended the session. The transport pumps hold one side, the session
//! state machine the other; dropping either side stops the peer tasks.

use crate::error::{Result, TunError};
use crate::packet::Packet;
use tokio::sync::mpsc;

/// Per-channel buffer depth. One slot: a pump hands over a packet only when
/// the session logic is ready for it, so backpressure reaches the socket.
const CHANNEL_CAPACITY: usize = 1;

/// Session-logic side of a session: consume inbound, produce outbound,
/// observe termination.
pub struct SessionChannel {
    pub inbound: mpsc::Receiver<Packet>,
    pub outbound: mpsc::Sender<Packet>,
    pub termination: mpsc::Receiver<TunError>,
}

/// Transport side of a session, split between the two pump tasks.
pub struct TransportSide {
    /// Read pump pushes decoded packets here.
    pub inbound: mpsc::Sender<Packet>,
    /// Write pump drains packets from here.
    pub outbound: mpsc::Receiver<Packet>,
    /// Either pump reports the first fatal error here; `try_send` only, so
    /// whoever loses the race simply drops its error.
    pub termination: mpsc::Sender<TunError>,
}

/// Create the paired halves of a fresh session.
pub fn session_pair() -> (SessionChannel, TransportSide) {
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (termination_tx, termination_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        SessionChannel {
            inbound: inbound_rx,
            outbound: outbound_tx,
            termination: termination_rx,
        },
        TransportSide {
            inbound: inbound_tx,
            outbound: outbound_rx,
            termination: termination_tx,
        },
    )
}

impl SessionChannel {
    /// Receive the next inbound packet during the handshake phase.
    ///
    /// Honors the termination channel so a transport failure while waiting
    /// for the peer's reply fails the handshake instead of blocking forever.
    /// Inbound is polled first: a reply that arrived before the transport
    /// died is still delivered, and the buffered error is only consulted
    /// once the inbound side is closed and drained.
    pub async fn recv(&mut self) -> Result<Packet> {
        tokio::select! {
            biased;
            packet = self.inbound.recv() => match packet {
                Some(packet) => Ok(packet),
                None => Err(self.termination.try_recv().unwrap_or_else(|_| {
                    TunError::Protocol("session closed before reply".into())
                })),
            },
            err = self.termination.recv() => Err(err.unwrap_or_else(|| {
                TunError::Protocol("session closed before reply".into())
            })),
        }
    }

    /// Send one packet to the write pump.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.outbound
            .send(packet)
            .await
            .map_err(|_| TunError::Protocol("session closed while sending".into()))
    }
}
