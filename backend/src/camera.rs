//! # camera
//!
//! Outbound UDP link to the spectator viewer. Camera commands go out as
//! JSON datagrams, fire-and-forget; a viewer that is not listening just
//! drops them on the floor.

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use race_types::CameraCommand;

/// Forward camera commands to the viewer address until the director goes
/// away. A failed bind drains the channel instead of stalling the director.
pub async fn run_camera_link(mut commands: mpsc::Receiver<CameraCommand>, viewer_addr: String) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("camera link: could not open UDP socket: {e} — cuts will be dropped");
            while commands.recv().await.is_some() {}
            return;
        }
    };

    while let Some(cmd) = commands.recv().await {
        let payload = match serde_json::to_vec(&cmd) {
            Ok(p) => p,
            Err(e) => {
                warn!("camera link: encode failed: {e}");
                continue;
            }
        };
        match socket.send_to(&payload, viewer_addr.as_str()).await {
            Ok(_) => debug!("camera link: {cmd:?} → {viewer_addr}"),
            Err(e) => warn!("camera link: send to {viewer_addr} failed: {e}"),
        }
    }
}
