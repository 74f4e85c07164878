//! Gateway runtime
//!
//! Owns the devices, one lane per device, the poll scheduler and the
//! command dispatcher. Startup opens every device (failures are logged and
//! retried by the lane on the next poll); shutdown drains the scheduler, then
//! closes each device on its lane under a global deadline.

use crate::communication::{EventSink, Publisher};
use crate::core::device::{AcquisitionState, Device, DeviceHandle};
use crate::dispatch::{CommandDispatcher, DeviceTable};
use crate::driver::GatewaySettings;
use crate::error::{PinodeError, PinodeResult};
use crate::scheduling::{DeviceLane, PollScheduler};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Health of one device, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct DeviceHealth {
    pub id: String,
    pub kind: String,
    pub state: AcquisitionState,
    pub alive: bool,
}

/// Outcome of `Gateway::stop`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// In-flight polls finished before the scheduler timeout
    pub drained: bool,
    /// Lanes that missed the global deadline
    pub abandoned: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.drained && self.abandoned.is_empty()
    }
}

pub struct Gateway {
    settings: GatewaySettings,
    devices: DeviceTable,
    publisher: Arc<dyn Publisher>,
    scheduler: PollScheduler,
    lanes: HashMap<String, DeviceLane>,
    running: bool,
}

impl Gateway {
    pub fn new(settings: GatewaySettings, publisher: Arc<dyn Publisher>) -> Self {
        let scheduler = PollScheduler::new(settings.scheduler.clone());
        Self {
            settings,
            devices: Arc::new(RwLock::new(BTreeMap::new())),
            publisher,
            scheduler,
            lanes: HashMap::new(),
            running: false,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Register a device. On a running gateway it is started right away.
    pub fn add_device(&mut self, device: Box<dyn Device>) -> PinodeResult<()> {
        let id = device.id().to_string();
        let handle: DeviceHandle = Arc::new(Mutex::new(device));
        {
            let mut devices = self.devices.write();
            if devices.contains_key(&id) {
                return Err(PinodeError::config(format!(
                    "Device '{}' is already registered",
                    id
                )));
            }
            devices.insert(id.clone(), Arc::clone(&handle));
        }
        if self.running {
            self.start_device(&id, handle)?;
        }
        Ok(())
    }

    /// Stop and unregister a device, closing it on its lane
    pub fn remove_device(&mut self, id: &str) -> PinodeResult<()> {
        let handle = self
            .devices
            .write()
            .remove(id)
            .ok_or_else(|| PinodeError::UnknownDevice(id.to_string()))?;

        let removed = self.scheduler.remove_device_jobs(id);
        self.scheduler.detach_lane(id);
        log::debug!("Removed {} poll job(s) of '{}'", removed, id);

        match self.lanes.remove(id) {
            Some(mut lane) => {
                lane.shutdown(Instant::now() + self.settings.shutdown_deadline());
            }
            None => {
                if let Err(e) = handle.lock().close() {
                    log::warn!("Closing '{}' failed: {}", id, e);
                }
            }
        }
        Ok(())
    }

    pub fn device(&self, id: &str) -> Option<DeviceHandle> {
        self.devices.read().get(id).cloned()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// Dispatcher bound to this gateway's devices
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(Arc::clone(&self.devices), Arc::clone(&self.publisher))
    }

    /// Open every device, spawn lanes, register poll jobs and start the scheduler
    pub fn start(&mut self) -> PinodeResult<()> {
        if self.running {
            return Err(PinodeError::Scheduler(
                "Gateway is already running".to_string(),
            ));
        }
        let devices: Vec<(String, DeviceHandle)> = self
            .devices
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();

        for (id, handle) in devices {
            self.start_device(&id, handle)?;
        }
        self.scheduler.start()?;
        self.running = true;
        log::info!(
            "Gateway started with {} device(s), {} poll job(s)",
            self.lanes.len(),
            self.scheduler.job_count()
        );
        Ok(())
    }

    fn start_device(&mut self, id: &str, handle: DeviceHandle) -> PinodeResult<()> {
        let descriptors = {
            let mut device = handle.lock();
            let events = EventSink::new(id, Arc::clone(&self.publisher));
            match device.open(events) {
                Ok(()) => log::info!("Opened '{}' ({})", id, device.kind()),
                Err(e) => log::warn!(
                    "Opening '{}' failed, will retry on the next poll: {}",
                    id,
                    e
                ),
            }
            device.descriptors()
        };

        let lane = DeviceLane::spawn(id, handle, Arc::clone(&self.publisher))?;
        self.scheduler.attach_lane(id, lane.sender());
        self.lanes.insert(id.to_string(), lane);

        for descriptor in descriptors {
            if let Some(interval) = descriptor.poll_interval {
                self.scheduler.add_job(id, &descriptor.name, interval)?;
            }
        }
        Ok(())
    }

    /// Graceful shutdown: drain polls, then close every device on its lane
    pub fn stop(&mut self) -> ShutdownReport {
        if !self.running {
            return ShutdownReport {
                drained: true,
                abandoned: Vec::new(),
            };
        }
        log::info!("Stopping gateway");
        self.running = false;

        let drained = self.scheduler.stop();
        let deadline = Instant::now() + self.settings.shutdown_deadline();

        let mut abandoned = Vec::new();
        let mut lanes: Vec<(String, DeviceLane)> = self.lanes.drain().collect();
        lanes.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, mut lane) in lanes {
            self.scheduler.detach_lane(&id);
            self.scheduler.remove_device_jobs(&id);
            if !lane.shutdown(deadline) {
                log::error!("Device '{}' abandoned at shutdown", id);
                abandoned.push(id);
            }
        }

        ShutdownReport { drained, abandoned }
    }

    /// Heartbeat every device
    pub fn health(&self) -> Vec<DeviceHealth> {
        let devices: Vec<DeviceHandle> = self.devices.read().values().cloned().collect();
        devices
            .into_iter()
            .map(|handle| {
                let mut device = handle.lock();
                let alive = device.check_heartbeat();
                DeviceHealth {
                    id: device.id().to_string(),
                    kind: device.kind().to_string(),
                    state: device.state(),
                    alive,
                }
            })
            .collect()
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if self.running {
            self.stop();
        }
    }
}
