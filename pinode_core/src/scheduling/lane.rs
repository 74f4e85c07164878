//! One worker thread per device
//!
//! Every blocking hardware read for a device happens on its lane, so a slow
//! sensor only ever delays its own polls.

use super::job::JobCounters;
use crate::communication::{EventSink, PublishMessage, Publisher};
use crate::core::device::DeviceHandle;
use crate::error::{PinodeError, PinodeResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub(crate) enum LaneTask {
    Poll {
        value_id: String,
        in_flight: Arc<AtomicBool>,
        counters: Arc<JobCounters>,
    },
    Shutdown,
}

/// Worker thread owning the hardware access path of one device
pub struct DeviceLane {
    device_id: String,
    tx: Sender<LaneTask>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceLane {
    pub fn spawn(
        device_id: &str,
        device: DeviceHandle,
        publisher: Arc<dyn Publisher>,
    ) -> PinodeResult<Self> {
        let (tx, rx) = channel::unbounded();
        let (done_tx, done_rx) = channel::bounded(1);
        let worker = LaneWorker {
            device_id: device_id.to_string(),
            device,
            events: EventSink::new(device_id, Arc::clone(&publisher)),
            publisher,
        };

        let handle = thread::Builder::new()
            .name(format!("lane-{}", device_id))
            .spawn(move || {
                worker.run(rx);
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                PinodeError::Scheduler(format!("Failed to spawn lane for '{}': {}", device_id, e))
            })?;

        Ok(Self {
            device_id: device_id.to_string(),
            tx,
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn sender(&self) -> Sender<LaneTask> {
        self.tx.clone()
    }

    /// Ask the lane to close its device and exit.
    ///
    /// Returns false if the lane did not acknowledge before `deadline`; the
    /// thread is then abandoned.
    pub fn shutdown(&mut self, deadline: Instant) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.tx.send(LaneTask::Shutdown);

        match self.done_rx.recv_deadline(deadline) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("Lane '{}' panicked during shutdown", self.device_id);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::error!(
                    "Lane '{}' did not acknowledge shutdown before the deadline, abandoning it",
                    self.device_id
                );
                false
            }
        }
    }
}

impl Drop for DeviceLane {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.tx.send(LaneTask::Shutdown);
        }
    }
}

/// Clears a job's in-flight flag however its poll ends
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct LaneWorker {
    device_id: String,
    device: DeviceHandle,
    events: EventSink,
    publisher: Arc<dyn Publisher>,
}

impl LaneWorker {
    fn run(self, rx: Receiver<LaneTask>) {
        log::debug!("Lane '{}' started", self.device_id);
        for task in rx.iter() {
            match task {
                LaneTask::Poll {
                    value_id,
                    in_flight,
                    counters,
                } => {
                    let _in_flight = InFlight(in_flight);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        self.poll(&value_id, &counters)
                    }));
                    if outcome.is_err() {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        log::error!(
                            "Poll {}/{} panicked, retrying on the next tick",
                            self.device_id,
                            value_id
                        );
                    }
                }
                LaneTask::Shutdown => break,
            }
        }

        let mut device = self.device.lock();
        if let Err(e) = device.close() {
            log::warn!("Closing '{}' failed: {}", self.device_id, e);
        }
        log::debug!("Lane '{}' stopped", self.device_id);
    }

    fn poll(&self, value_id: &str, counters: &JobCounters) {
        let result = {
            let mut device = self.device.lock();
            if !device.is_open() {
                match device.open(self.events.clone()) {
                    Ok(()) => log::info!("Device '{}' reopened", self.device_id),
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "Poll {}/{} skipped, device unavailable: {}",
                            self.device_id,
                            value_id,
                            e
                        );
                        return;
                    }
                }
            }
            device.read(value_id)
        };

        match result {
            Ok(value) => {
                self.publisher
                    .publish(PublishMessage::now(&self.device_id, value_id, value));
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Poll {}/{} failed: {}", self.device_id, value_id, e);
            }
        }
    }
}
