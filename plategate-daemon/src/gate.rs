//! Gate controller wire protocol.
//!
//! One door-open is one TCP session: connect, write an 8-byte frame, wait for
//! a single response buffer, close. Sessions are never pooled or reused.
//!
//! ```text
//! 0x00 0x5C 0x01 <receptor> <door> 0x01 0x01 <checksum>
//! ```
//!
//! `checksum` is the sum of the first seven bytes modulo 256. The response is
//! opaque; receiving any bytes counts as success.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::GateError;

pub const FRAME_LEN: usize = 8;
const COMMAND_PREFIX: [u8; 3] = [0x00, 0x5C, 0x01];
const COMMAND_SUFFIX: [u8; 2] = [0x01, 0x01];
const RESPONSE_BUF: usize = 256;

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// The door-open command for one receptor/door pair, checksum appended.
pub fn door_open_frame(receptor_id: u8, door_id: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..3].copy_from_slice(&COMMAND_PREFIX);
    frame[3] = receptor_id;
    frame[4] = door_id;
    frame[5..7].copy_from_slice(&COMMAND_SUFFIX);
    frame[7] = checksum(&frame[..7]);
    frame
}

/// Where and what to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorOpen {
    pub address: String,
    pub port: u16,
    pub receptor_id: u8,
    pub door_id: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct GateTimeouts {
    pub connect: Duration,
    pub response: Duration,
}

impl From<&plategate_core::config::GateConfig> for GateTimeouts {
    fn from(config: &plategate_core::config::GateConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            response: config.response_timeout(),
        }
    }
}

/// Send one door-open frame and return the raw response.
pub async fn open_door(request: &DoorOpen, timeouts: GateTimeouts) -> Result<Vec<u8>, GateError> {
    let target = format!("{}:{}", request.address, request.port);
    let frame = door_open_frame(request.receptor_id, request.door_id);

    tracing::info!(
        gate = %target,
        receptor = request.receptor_id,
        door = request.door_id,
        "sending door-open command",
    );

    let mut stream = match timeout(timeouts.connect, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(GateError::Connect { addr: target, source }),
        Err(_) => return Err(GateError::ConnectTimeout { addr: target }),
    };
    let peer = stream.peer_addr().map_err(|source| GateError::Address {
        address: target.clone(),
        source,
    })?;

    stream
        .write_all(&frame)
        .await
        .map_err(|source| GateError::Write { addr: peer, source })?;

    let mut buf = [0u8; RESPONSE_BUF];
    let read = match timeout(timeouts.response, stream.read(&mut buf)).await {
        Ok(Ok(0)) => return Err(GateError::ClosedBeforeResponse { addr: peer }),
        Ok(Ok(n)) => n,
        Ok(Err(source)) => return Err(GateError::Read { addr: peer, source }),
        Err(_) => return Err(GateError::ResponseTimeout { addr: peer }),
    };

    // The response is already in hand; a failed FIN changes nothing.
    let _ = stream.shutdown().await;

    tracing::debug!(gate = %peer, bytes = read, "gate responded");
    Ok(buf[..read].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn timeouts() -> GateTimeouts {
        GateTimeouts {
            connect: Duration::from_secs(2),
            response: Duration::from_secs(2),
        }
    }

    #[test]
    fn frame_layout_and_checksum() {
        let frame = door_open_frame(3, 2);
        assert_eq!(&frame[..7], &[0x00, 0x5C, 0x01, 3, 2, 0x01, 0x01]);
        assert_eq!(frame[7], 0x66);
    }

    #[test]
    fn checksum_byte_is_sum_of_prefix_mod_256_for_every_id_pair() {
        for receptor in 0..=u8::MAX {
            for door in [0u8, 1, 2, 4, 127, 200, 255] {
                let frame = door_open_frame(receptor, door);
                let sum: u32 = frame[..7].iter().map(|b| u32::from(*b)).sum();
                assert_eq!(u32::from(frame[7]), sum % 256);
                assert_eq!(frame[..7].iter().fold(0u8, |a, b| a.wrapping_add(*b)).wrapping_sub(frame[7]), 0);
            }
        }
    }

    #[tokio::test]
    async fn open_door_sends_frame_and_returns_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let peer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut frame = [0u8; FRAME_LEN];
            socket.read_exact(&mut frame).await.expect("read frame");
            socket.write_all(&[0xAA, 0x01]).await.expect("respond");
            frame
        });

        let response = open_door(
            &DoorOpen {
                address: "127.0.0.1".to_string(),
                port,
                receptor_id: 1,
                door_id: 4,
            },
            timeouts(),
        )
        .await
        .expect("door opened");

        assert_eq!(response, vec![0xAA, 0x01]);
        assert_eq!(peer.await.expect("join"), door_open_frame(1, 4));
    }

    #[tokio::test]
    async fn peer_closing_without_response_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut frame = [0u8; FRAME_LEN];
            let _ = socket.read_exact(&mut frame).await;
        });

        let err = open_door(
            &DoorOpen {
                address: "127.0.0.1".to_string(),
                port,
                receptor_id: 1,
                door_id: 1,
            },
            timeouts(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GateError::ClosedBeforeResponse { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn unreachable_peer_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = open_door(
            &DoorOpen {
                address: "127.0.0.1".to_string(),
                port,
                receptor_id: 1,
                door_id: 1,
            },
            timeouts(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GateError::Connect { .. }), "got: {err}");
    }
}
