//! Network sink for camera streaming
//!
//! A plain TCP server: bind, accept one client at a time and write
//! concatenated JPEG frames until the client leaves, a reload is requested or
//! the session stops.

use std::io::{ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pinode_core::error::{PinodeError, PinodeResult};

use super::CameraDriver;

const ACCEPT_POLL: Duration = Duration::from_millis(25);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the stream server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub host: String,
    pub port: u16,
}

impl StreamTarget {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    /// Bind a non-blocking listener
    pub fn bind(&self) -> PinodeResult<TcpListener> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).map_err(|e| {
            PinodeError::unavailable(format!(
                "Cannot listen on {}:{}: {}",
                self.host, self.port, e
            ))
        })?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

impl Default for StreamTarget {
    fn default() -> Self {
        Self::new("localhost", 8052)
    }
}

/// Accept loop. Returns once `stop` is raised.
pub(crate) fn serve(
    listener: TcpListener,
    driver: Arc<Mutex<CameraDriver>>,
    stop: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
) {
    let interval = driver.lock().frame_interval();
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((client, peer)) => {
                log::info!("Stream client connected from {}", peer);
                reload.store(false, Ordering::SeqCst);
                match send_frames(client, &driver, &stop, &reload, interval) {
                    Ok(()) => log::info!("Stream client {} dropped", peer),
                    Err(e) => log::info!("Stream client {} gone: {}", peer, e),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                log::warn!("Stream accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    log::debug!("Stream server stopped");
}

fn send_frames(
    mut client: TcpStream,
    driver: &Mutex<CameraDriver>,
    stop: &AtomicBool,
    reload: &AtomicBool,
    interval: Duration,
) -> PinodeResult<()> {
    client.set_nonblocking(false)?;
    client.set_write_timeout(Some(WRITE_TIMEOUT))?;
    client.set_nodelay(true)?;

    loop {
        if stop.load(Ordering::SeqCst) || reload.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let frame = driver.lock().capture_frame()?;
        client.write_all(&frame)?;
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}
