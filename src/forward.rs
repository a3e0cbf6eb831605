//! Bidirectional forward loop.
//!
//! Once a session is authenticated, both endpoints run the same loop: merge
//! inbound session packets, interface reads and the termination signal, and
//! shuttle payloads between the session and the virtual interface until one
//! side ends. Client and server differ only in how the interface was
//! configured beforehand.

use crate::channel::SessionChannel;
use crate::error::Result;
use crate::packet::{Packet, PacketKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Upper bound on a single interface read. Comfortably above any MTU the
/// tunnel will be configured with.
const READ_BUFFER_LEN: usize = 65536;

/// Drive one session until it terminates.
///
/// Spawns a dedicated reader task for the interface (reads block until a
/// packet arrives) and then serves three event sources as they become
/// ready, with no priority between the two packet directions:
/// - inbound session packets: P2P payloads go to the interface, anything
///   else ends the session cleanly;
/// - interface reads: wrapped as P2P packets and pushed outbound;
/// - the termination signal: its error is propagated.
///
/// Returns `Ok(())` on clean closure (peer shutdown, channel closed, or
/// interface gone) and the first transport/protocol error otherwise.
pub async fn run<R, W>(mut session: SessionChannel, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Unpin,
{
    let (packets_tx, mut packets_rx) = mpsc::channel::<Vec<u8>>(1);
    let reader_task = tokio::spawn(read_interface(reader, packets_tx));

    let result = loop {
        tokio::select! {
            packet = session.inbound.recv() => match packet {
                Some(packet) if packet.kind == PacketKind::P2p => {
                    if let Err(err) = writer.write_all(&packet.data).await {
                        break Err(err.into());
                    }
                }
                // Shutdown or Unknown ends the session cleanly; only P2P
                // traffic keeps it alive.
                Some(_) => break Ok(()),
                // Transport gone: surface its error if it reported one.
                None => break match session.termination.try_recv() {
                    Ok(err) => Err(err),
                    Err(_) => Ok(()),
                },
            },
            data = packets_rx.recv() => match data {
                Some(data) => {
                    if session.outbound.send(Packet::p2p(data)).await.is_err() {
                        break Ok(());
                    }
                }
                None => {
                    // Interface is gone; tell the peer before leaving.
                    let _ = session.outbound.send(Packet::shutdown()).await;
                    break Ok(());
                }
            },
            err = session.termination.recv() => match err {
                // A Shutdown the read pump delivered just before the
                // connection dropped still counts as a clean close.
                Some(err) => break if drain_inbound(&mut session.inbound, &mut writer).await {
                    Ok(())
                } else {
                    Err(err)
                },
                None => break Ok(()),
            },
        }
    };

    reader_task.abort();
    result
}

/// Flush packets already sitting in the inbound channel after the transport
/// reported an error. Returns true when a clean end-of-session marker was
/// among them.
async fn drain_inbound<W>(inbound: &mut mpsc::Receiver<Packet>, writer: &mut W) -> bool
where
    W: AsyncWrite + Unpin,
{
    while let Ok(packet) = inbound.try_recv() {
        match packet.kind {
            PacketKind::P2p => {
                if writer.write_all(&packet.data).await.is_err() {
                    return false;
                }
            }
            _ => return true,
        }
    }
    false
}

/// Interface reader: one datagram per channel message. Stops on EOF, read
/// error, or when the forward loop is gone; dropping the sender is the
/// loop's signal that the interface closed.
async fn read_interface<R>(mut reader: R, packets: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_LEN];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if packets.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                log::debug!("interface read failed: {err}");
                break;
            }
        }
    }
}
