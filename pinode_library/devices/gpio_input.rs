//! GPIO input
//!
//! Publishes `status` on every edge that matches the configured edge kind and
//! falls outside the debounce window. `status` can also be polled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pinode_core::{
    AcquisitionState, Capabilities, Device, DeviceConfig, EventSink, PinodeError, PinodeResult,
    Value, ValueDescriptor, ValueRegistry, ValueType,
};

use crate::drivers::gpio::{Edge, EdgeCallback, GpioContext, Pull};

pub const DEFAULT_BOUNCETIME_MS: u64 = 200;

/// Suppresses edges closer together than the window
pub(crate) struct Debouncer {
    window_ms: AtomicU64,
    last: Mutex<Option<Instant>>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window_ms: AtomicU64::new(window.as_millis() as u64),
            last: Mutex::new(None),
        }
    }

    pub(crate) fn set_window(&self, window: Duration) {
        self.window_ms
            .store(window.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.load(Ordering::SeqCst))
    }

    /// Whether an edge seen now should be reported
    pub(crate) fn accept(&self, now: Instant) -> bool {
        let window = self.window();
        let mut last = self.last.lock();
        match *last {
            Some(previous) if now.saturating_duration_since(previous) < window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub(crate) fn reset(&self) {
        *self.last.lock() = None;
    }
}

pub struct GpioInputDevice {
    id: String,
    gpio: GpioContext,
    pin: u8,
    line: u8,
    pull: Pull,
    edge: Edge,
    debounce: Arc<Debouncer>,
    events: Option<EventSink>,
    state: AcquisitionState,
    registry: Arc<ValueRegistry<Self>>,
}

impl GpioInputDevice {
    /// `pin` is in the context's numbering mode
    pub fn new(id: &str, gpio: GpioContext, pin: u8) -> PinodeResult<Self> {
        let line = gpio.resolve(pin)?;
        Ok(Self {
            id: id.to_string(),
            gpio,
            pin,
            line,
            pull: Pull::Off,
            edge: Edge::Both,
            debounce: Arc::new(Debouncer::new(Duration::from_millis(DEFAULT_BOUNCETIME_MS))),
            events: None,
            state: AcquisitionState::Closed,
            registry: Arc::new(Self::values()),
        })
    }

    /// Build from a `gpio_input` device config
    pub fn from_config(id: &str, config: &DeviceConfig, gpio: GpioContext) -> PinodeResult<Self> {
        let mut device = Self::new(id, gpio, config.require_pin(id)?)?;
        if let Some(pull) = config.get_option("pull") {
            device.pull = pull
                .parse()
                .map_err(|e: PinodeError| PinodeError::config(e.to_string()))?;
        }
        if let Some(edge) = config.get_option("edge") {
            device.edge = edge
                .parse()
                .map_err(|e: PinodeError| PinodeError::config(e.to_string()))?;
        }
        if let Some(ms) = config.get_option_u64("bouncetime") {
            device.debounce.set_window(Duration::from_millis(ms));
        }
        device.registry = Arc::new(
            Self::values().with_poll_intervals(|name, default| config.poll_interval(name, default)),
        );
        Ok(device)
    }

    pub fn with_pull(mut self, pull: Pull) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = edge;
        self
    }

    pub fn with_bouncetime(self, bouncetime: Duration) -> Self {
        self.debounce.set_window(bouncetime);
        self
    }

    /// BCM line actually driven
    pub fn line(&self) -> u8 {
        self.line
    }

    fn values() -> ValueRegistry<Self> {
        ValueRegistry::new()
            .sensor(
                ValueDescriptor::sensor("status", ValueType::Byte)
                    .with_label("Status")
                    .with_help("Level of the input, 0 or 1"),
                |d: &mut Self| {
                    let line = d.line;
                    let level = d.gpio.with_driver(|g| g.read_pin(line))?;
                    Ok(Value::Byte(level as u8))
                },
            )
            .config(
                ValueDescriptor::config("pin", ValueType::int_range(0, 40))
                    .with_help("Pin number in the gateway numbering mode"),
                |d: &mut Self| Ok(Value::Int(d.pin as i64)),
                |d: &mut Self, v| {
                    let pin = v.as_i64().unwrap_or_default() as u8;
                    let line = d
                        .gpio
                        .resolve(pin)
                        .map_err(|e| PinodeError::invalid("pin", e.to_string()))?;
                    d.reconfigure(|d| {
                        d.pin = pin;
                        d.line = line;
                    })
                },
            )
            .config(
                ValueDescriptor::config("pull", ValueType::enumeration(&Pull::NAMES))
                    .with_default(Value::Enum("off".to_string())),
                |d: &mut Self| Ok(Value::Enum(d.pull.to_string())),
                |d: &mut Self, v| {
                    let pull: Pull = v.as_str().unwrap_or_default().parse()?;
                    d.reconfigure(|d| d.pull = pull)
                },
            )
            .config(
                ValueDescriptor::config("edge", ValueType::enumeration(&Edge::NAMES))
                    .with_default(Value::Enum("both".to_string())),
                |d: &mut Self| Ok(Value::Enum(d.edge.to_string())),
                |d: &mut Self, v| {
                    let edge: Edge = v.as_str().unwrap_or_default().parse()?;
                    d.reconfigure(|d| d.edge = edge)
                },
            )
            .config(
                ValueDescriptor::config("bouncetime", ValueType::int_range(0, 60_000))
                    .with_help("Debounce window in milliseconds")
                    .with_default(DEFAULT_BOUNCETIME_MS as i64),
                |d: &mut Self| Ok(Value::Int(d.debounce.window().as_millis() as i64)),
                |d: &mut Self, v| {
                    let ms = v.as_i64().unwrap_or_default().max(0) as u64;
                    d.debounce.set_window(Duration::from_millis(ms));
                    Ok(())
                },
            )
    }

    fn edge_callback(&self, events: EventSink) -> EdgeCallback {
        let debounce = Arc::clone(&self.debounce);
        let status = self.registry.descriptor("status").cloned();
        Arc::new(move |level: bool| {
            if !debounce.accept(Instant::now()) {
                log::trace!("{}: edge suppressed by debounce", events.device_id());
                return;
            }
            let value = Value::Byte(level as u8);
            if let Some(ref status) = status {
                status.set_last(value.clone());
            }
            events.emit("status", value);
        })
    }

    fn setup_hardware(&mut self) -> PinodeResult<()> {
        let callback = self
            .events
            .clone()
            .map(|events| self.edge_callback(events));
        let (line, pull, edge) = (self.line, self.pull, self.edge);
        self.gpio.with_driver(|g| {
            g.setup_input(line, pull)?;
            if let Some(callback) = callback {
                g.set_interrupt(line, edge, callback)?;
            }
            Ok(())
        })
    }

    fn release_hardware(&mut self) {
        let line = self.line;
        if let Err(e) = self.gpio.with_driver(|g| {
            g.clear_interrupt(line)?;
            g.release_pin(line)
        }) {
            log::warn!("{}: releasing GPIO {} failed: {}", self.id, line, e);
        }
        self.debounce.reset();
    }

    /// Apply a settings change, re-arming the pin if the device is open.
    /// On failure the previous settings are restored and re-armed.
    fn reconfigure(&mut self, change: impl FnOnce(&mut Self)) -> PinodeResult<()> {
        if !self.state.is_open() {
            change(self);
            return Ok(());
        }
        let previous = (self.pin, self.line, self.pull, self.edge);
        self.release_hardware();
        change(self);
        self.setup_hardware().map_err(|e| {
            self.release_hardware();
            (self.pin, self.line, self.pull, self.edge) = previous;
            if let Err(restore) = self.setup_hardware() {
                log::error!("{}: re-arming GPIO {} failed: {}", self.id, self.line, restore);
            }
            e
        })
    }
}

impl Device for GpioInputDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "gpio_input"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::sensor().with_events()
    }

    fn state(&self) -> AcquisitionState {
        self.state
    }

    fn open(&mut self, events: EventSink) -> PinodeResult<()> {
        if self.state.is_open() {
            return Ok(());
        }
        self.events = Some(events);
        self.setup_hardware().map_err(PinodeError::into_unavailable)?;
        self.state = AcquisitionState::Free;
        log::debug!(
            "{}: input on GPIO {} (pull {}, edge {})",
            self.id,
            self.line,
            self.pull,
            self.edge
        );
        Ok(())
    }

    fn close(&mut self) -> PinodeResult<()> {
        if self.state.is_open() {
            self.release_hardware();
            self.state = AcquisitionState::Closed;
        }
        Ok(())
    }

    registry_values!();
}
