//! Camera state machine
//!
//! ```text
//!          start                 warm-up
//!   Idle ─────────▶ Previewing ───────────▶ Capturing | Recording | Streaming
//!    ▲                                                    │
//!    └──────────────────────── stop ──────────────────────┘
//! ```
//!
//! Starting acquires the camera lock and keeps it until the session returns
//! to Idle. Starting from any state but Idle fails with `DeviceBusy`. `stop`
//! always releases the lock, even when the driver fails to stop; that failure
//! is only logged.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pinode_core::error::{PinodeError, PinodeResult};
use pinode_core::{BusLock, BusLockGuard};
use serde::Serialize;

use super::stream::{self, StreamTarget};
use super::{CameraDriver, PreviewSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CameraState {
    #[default]
    Idle,
    Previewing,
    Capturing,
    Recording,
    Streaming,
}

impl CameraState {
    pub const NAMES: [&'static str; 5] =
        ["Idle", "Previewing", "Capturing", "Recording", "Streaming"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Previewing => "Previewing",
            Self::Capturing => "Capturing",
            Self::Recording => "Recording",
            Self::Streaming => "Streaming",
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Shared {
    state: CameraState,
    guard: Option<BusLockGuard>,
    /// Bumped by every start and every explicit stop. A worker only tears the
    /// session down if nothing happened since it was spawned.
    generation: u64,
}

/// Stop the driver, drop the lock, back to Idle
fn release(shared: &mut Shared, driver: &Mutex<CameraDriver>) {
    if let Err(e) = driver.lock().stop_preview() {
        log::warn!("Camera stop failed, releasing anyway: {}", e);
    }
    shared.guard = None;
    shared.state = CameraState::Idle;
}

struct Worker {
    stop: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct CameraSession {
    holder: String,
    lock: BusLock,
    driver: Arc<Mutex<CameraDriver>>,
    shared: Arc<Mutex<Shared>>,
    worker: Option<Worker>,
    warmup: Duration,
    preview: PreviewSettings,
}

impl CameraSession {
    pub fn new(holder: &str, lock: BusLock, driver: CameraDriver, warmup: Duration) -> Self {
        Self {
            holder: holder.to_string(),
            lock,
            driver: Arc::new(Mutex::new(driver)),
            shared: Arc::new(Mutex::new(Shared {
                state: CameraState::Idle,
                guard: None,
                generation: 0,
            })),
            worker: None,
            warmup,
            preview: PreviewSettings::default(),
        }
    }

    pub fn driver(&self) -> Arc<Mutex<CameraDriver>> {
        Arc::clone(&self.driver)
    }

    pub fn lock(&self) -> &BusLock {
        &self.lock
    }

    pub fn state(&self) -> CameraState {
        self.shared.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == CameraState::Idle
    }

    pub fn preview(&self) -> &PreviewSettings {
        &self.preview
    }

    /// Applied from the next start on
    pub fn set_preview(&mut self, preview: PreviewSettings) {
        self.preview = preview;
    }

    pub fn warmup(&self) -> Duration {
        self.warmup
    }

    fn busy(&self, state: CameraState) -> PinodeError {
        PinodeError::busy(&self.holder, format!("camera is {}", state))
    }

    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.handle.join().is_err() {
                log::error!("Camera worker of '{}' panicked", self.holder);
            }
        }
    }

    /// Idle → Previewing → `target`. Returns the session generation.
    fn begin(&mut self, target: CameraState) -> PinodeResult<u64> {
        let state = self.state();
        if state != CameraState::Idle {
            return Err(self.busy(state));
        }
        // A finished recording worker may still be exiting
        self.reap();

        let generation = {
            let mut shared = self.shared.lock();
            let guard = self.lock.acquire(&self.holder)?;
            self.driver
                .lock()
                .start_preview(&self.preview)
                .map_err(PinodeError::into_unavailable)?;
            shared.guard = Some(guard);
            shared.state = CameraState::Previewing;
            shared.generation += 1;
            shared.generation
        };
        log::debug!("Camera warming up for {:?}", self.warmup);
        thread::sleep(self.warmup);
        self.shared.lock().state = target;
        Ok(generation)
    }

    fn finish(&self) {
        let mut shared = self.shared.lock();
        shared.generation += 1;
        release(&mut shared, &self.driver);
    }

    /// Capture one JPEG to `path`, then return to Idle
    pub fn snapshot(&mut self, path: &Path) -> PinodeResult<()> {
        self.begin(CameraState::Capturing)?;
        let result = self
            .driver
            .lock()
            .capture_frame()
            .and_then(|frame| std::fs::write(path, frame).map_err(PinodeError::from));
        self.finish();
        result
    }

    /// Record MJPEG to `path` for `duration`. Returns immediately; the session
    /// goes back to Idle by itself when the time is up.
    pub fn record(&mut self, path: &Path, duration: Duration) -> PinodeResult<()> {
        let file = {
            let state = self.state();
            if state != CameraState::Idle {
                return Err(self.busy(state));
            }
            File::create(path)?
        };
        let generation = self.begin(CameraState::Recording)?;

        let stop = Arc::new(AtomicBool::new(false));
        let driver = Arc::clone(&self.driver);
        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name(format!("{}-record", self.holder))
            .spawn(move || {
                record_frames(file, &driver, &stop_flag, duration);
                if !stop_flag.load(Ordering::SeqCst) {
                    let mut shared = shared.lock();
                    if shared.generation == generation && shared.state != CameraState::Idle {
                        log::info!("Recording finished");
                        release(&mut shared, &driver);
                    }
                }
            });
        self.attach_worker(spawned, stop)
    }

    /// Start serving frames on `target`
    pub fn stream(&mut self, target: &StreamTarget) -> PinodeResult<()> {
        let state = self.state();
        if state != CameraState::Idle {
            return Err(self.busy(state));
        }
        let listener = target.bind()?;
        self.begin(CameraState::Streaming)?;
        log::info!("Streaming on {}:{}", target.host, target.port);

        let stop = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));
        let driver = Arc::clone(&self.driver);
        let (stop_flag, reload_flag) = (Arc::clone(&stop), Arc::clone(&reload));
        let spawned = thread::Builder::new()
            .name(format!("{}-stream", self.holder))
            .spawn(move || stream::serve(listener, driver, stop_flag, reload_flag));
        self.worker_with_reload(spawned, stop, reload)
    }

    /// Drop the current stream client and wait for the next one
    pub fn reload_stream(&mut self) -> PinodeResult<()> {
        match (&self.worker, self.state()) {
            (Some(worker), CameraState::Streaming) => {
                worker.reload.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(PinodeError::invalid("stream", "no stream is running")),
        }
    }

    fn attach_worker(
        &mut self,
        spawned: std::io::Result<JoinHandle<()>>,
        stop: Arc<AtomicBool>,
    ) -> PinodeResult<()> {
        self.worker_with_reload(spawned, stop, Arc::new(AtomicBool::new(false)))
    }

    fn worker_with_reload(
        &mut self,
        spawned: std::io::Result<JoinHandle<()>>,
        stop: Arc<AtomicBool>,
        reload: Arc<AtomicBool>,
    ) -> PinodeResult<()> {
        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    stop,
                    reload,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                self.finish();
                Err(PinodeError::driver(format!("Failed to spawn camera worker: {}", e)))
            }
        }
    }

    /// Back to Idle from any state. A no-op when already Idle.
    pub fn stop(&mut self) -> PinodeResult<()> {
        let active = {
            let mut shared = self.shared.lock();
            if shared.state != CameraState::Idle {
                shared.generation += 1;
            }
            shared.state != CameraState::Idle
        };
        if let Some(worker) = &self.worker {
            worker.stop.store(true, Ordering::SeqCst);
        }
        self.reap();
        if active {
            let mut shared = self.shared.lock();
            release(&mut shared, &self.driver);
            log::info!("Camera '{}' stopped", self.holder);
        }
        Ok(())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn record_frames(file: File, driver: &Mutex<CameraDriver>, stop: &AtomicBool, duration: Duration) {
    let interval = driver.lock().frame_interval();
    let deadline = Instant::now() + duration;
    let mut out = BufWriter::new(file);
    let mut frames = 0u64;
    while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
        let frame = match driver.lock().capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Recording aborted: {}", e);
                break;
            }
        };
        if let Err(e) = out.write_all(&frame) {
            log::warn!("Recording aborted: {}", e);
            break;
        }
        frames += 1;
        if !interval.is_zero() {
            thread::sleep(interval.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
    if let Err(e) = out.flush() {
        log::warn!("Recording flush failed: {}", e);
    }
    log::debug!("Recorded {} frame(s)", frames);
}
