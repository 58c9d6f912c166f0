//! # hub
//!
//! Telemetry hub — receives race event datagrams from the session feed via
//! UDP, validates them, and forwards typed events to the director task.
//!
//! ## Architecture
//! Runs as a separate Tokio task (tokio::spawn) alongside the director and
//! the HTTP surface. It:
//!   1. Binds a UDP socket (port from `PITWALL_TELEMETRY_PORT`)
//!   2. Receives JSON envelopes, one event per datagram
//!   3. Validates sequence numbers (duplicate/replay detection)
//!   4. Forwards accepted events over the mpsc channel to the director
//!
//! UDP errors never take the broadcast down: a failed bind simply means no
//! feed for this run, and recv errors are logged and skipped.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use race_types::{Envelope, RaceEvent};

/// Backward jumps larger than this are treated as a replayed feed.
const SEQ_BACKWARD_WINDOW: u32 = 1000;

// ── Sequence guard (duplicate/replay protection) ──────────────────────────────

/// Tracks the last seen sequence number on the feed. Rejects exact
/// duplicates and large backward jumps; small gaps are fine (UDP drops).
struct SeqGuard {
    last_seq: Option<u32>,
}

impl SeqGuard {
    fn new() -> Self {
        Self { last_seq: None }
    }

    /// Seat the guard at `seq` without judging the jump. Used when the feed
    /// announces a fresh session and restarts its counter.
    fn reseat(&mut self, seq: u32) {
        self.last_seq = Some(seq);
    }

    fn accept(&mut self, seq: u32) -> bool {
        let Some(last) = self.last_seq else {
            // First datagram of the run seats the guard wherever the feed is
            self.last_seq = Some(seq);
            return true;
        };
        let diff = seq.wrapping_sub(last);
        if diff == 0 || diff > SEQ_BACKWARD_WINDOW {
            warn!("telemetry: rejected datagram seq {seq} (last: {last})");
            return false;
        }
        self.last_seq = Some(seq);
        true
    }
}

// ── Main UDP listener task ────────────────────────────────────────────────────

/// Run the telemetry listener until the director goes away. Never returns
/// an error; a dead socket is logged and the task ends.
pub async fn run_telemetry_hub(port: u16, events_tx: mpsc::Sender<RaceEvent>) {
    let addr = format!("0.0.0.0:{port}");
    let socket = match UdpSocket::bind(&addr).await {
        Ok(s) => {
            info!("📡 telemetry hub listening on UDP {addr}");
            s
        }
        Err(e) => {
            warn!("telemetry hub: could not bind UDP {addr}: {e} (no feed for this run)");
            return;
        }
    };

    let mut guard = SeqGuard::new();
    let mut buf = vec![0u8; 8192];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                if let Some(event) = parse_datagram(&buf[..len], src, &mut guard) {
                    if events_tx.send(event).await.is_err() {
                        warn!("telemetry hub: director gone — stopping listener");
                        return;
                    }
                }
            }
            Err(e) => {
                // Never crash — log and keep listening
                warn!("telemetry hub: UDP recv error: {e}");
            }
        }
    }
}

fn parse_datagram(data: &[u8], src: SocketAddr, guard: &mut SeqGuard) -> Option<RaceEvent> {
    let envelope: Envelope = match serde_json::from_slice(data) {
        Ok(e) => e,
        Err(e) => {
            debug!("telemetry: malformed datagram from {src}: {e}");
            return None;
        }
    };

    // A fresh session restarts the feed's counter; seat the guard there
    // instead of judging the jump
    if matches!(envelope.event, RaceEvent::SessionUp) {
        guard.reseat(envelope.seq);
        return Some(envelope.event);
    }

    if !guard.accept(envelope.seq) {
        return None;
    }
    Some(envelope.event)
}
