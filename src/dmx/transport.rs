// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("short send: {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },
}

/// Sends frames to the lighting network.
pub trait Transport: Send {
    /// Sends a frame without waiting for delivery.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Best-effort UDP output on a non-blocking socket.
pub struct UdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Binds an ephemeral local port for sending to the destination.
    pub fn bind(destination: SocketAddr, broadcast: bool) -> Result<UdpTransport, TransportError> {
        let local: SocketAddr = if destination.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(broadcast)?;
        info!(%destination, broadcast, "Art-Net output ready.");

        Ok(UdpTransport {
            socket,
            destination,
        })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let sent = self.socket.send_to(frame, self.destination)?;
        if sent != frame.len() {
            return Err(TransportError::ShortSend {
                sent,
                expected: frame.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub use mock::MockTransport;

#[cfg(test)]
mod mock {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use parking_lot::Mutex;

    use super::*;

    /// Records frames instead of sending them. Clones share their recordings.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        should_fail: Arc<AtomicBool>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport::default()
        }

        /// Makes every following send fail.
        pub fn set_should_fail(&self, should_fail: bool) {
            self.should_fail.store(should_fail, Ordering::Relaxed);
        }

        pub fn frame_count(&self) -> usize {
            self.frames.lock().len()
        }

        pub fn last_frame(&self) -> Option<Vec<u8>> {
            self.frames.lock().last().cloned()
        }

        pub fn frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().clone()
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if self.should_fail.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "mock failure").into());
            }
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }
    }
}
