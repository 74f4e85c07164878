use pinode_core::{
    AcquisitionState, BusLock, BusLockGuard, Capabilities, Command, Device, EventSink, Gateway,
    GatewaySettings, MemoryPublisher, PinodeError, PinodeResult, SchedulerConfig, Value,
    ValueDescriptor, ValueRegistry, ValueType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A dimmer on a shared bus. Holds the bus for its whole session while
/// `exclusive` is set, otherwise only per transaction.
struct Dimmer {
    id: String,
    bus: BusLock,
    exclusive: bool,
    present: Arc<AtomicBool>,
    read_delay: Duration,
    state: AcquisitionState,
    session: Option<BusLockGuard>,
    level: i64,
    registry: Arc<ValueRegistry<Dimmer>>,
}

impl Dimmer {
    fn new(id: &str, bus: BusLock, poll: Option<Duration>) -> Self {
        let registry = ValueRegistry::new()
            .sensor(
                ValueDescriptor::sensor("power", ValueType::float()).with_poll_interval(poll),
                |d: &mut Dimmer| {
                    let _guard = d.transaction()?;
                    thread::sleep(d.read_delay);
                    Ok(Value::Float(d.level as f64 * 0.6))
                },
            )
            .config(
                ValueDescriptor::config("level", ValueType::int_range(0, 100)).with_default(0i64),
                |d: &mut Dimmer| Ok(Value::Int(d.level)),
                |d: &mut Dimmer, v| {
                    let _guard = d.transaction()?;
                    d.level = v.as_i64().unwrap_or(d.level);
                    Ok(())
                },
            )
            .action(
                ValueDescriptor::action("switch", ValueType::enumeration(&["on", "off"])),
                |d: &mut Dimmer, payload| {
                    d.level = match payload.as_ref().and_then(|p| p.as_str()) {
                        Some("on") => 100,
                        _ => 0,
                    };
                    Ok(Some(Value::Int(d.level)))
                },
            );
        Self {
            id: id.to_string(),
            bus,
            exclusive: false,
            present: Arc::new(AtomicBool::new(true)),
            read_delay: Duration::ZERO,
            state: AcquisitionState::Closed,
            session: None,
            level: 0,
            registry: Arc::new(registry),
        }
    }

    fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    fn slow(mut self, read_delay: Duration) -> Self {
        self.read_delay = read_delay;
        self
    }

    fn transaction(&self) -> PinodeResult<Option<BusLockGuard>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.bus.acquire(&self.id).map(Some)
    }
}

impl Device for Dimmer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "dimmer"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::actuator()
    }

    fn state(&self) -> AcquisitionState {
        self.state
    }

    fn descriptors(&self) -> Vec<ValueDescriptor> {
        self.registry.descriptors()
    }

    fn open(&mut self, _events: EventSink) -> PinodeResult<()> {
        if !self.present.load(Ordering::SeqCst) {
            return Err(PinodeError::unavailable(format!("{} not responding", self.id)));
        }
        let guard = self.bus.acquire(&self.id)?;
        if self.exclusive {
            self.session = Some(guard);
            self.state = AcquisitionState::Locked;
        } else {
            self.state = AcquisitionState::Free;
        }
        Ok(())
    }

    fn close(&mut self) -> PinodeResult<()> {
        self.session = None;
        self.state = AcquisitionState::Closed;
        Ok(())
    }

    fn read(&mut self, value_id: &str) -> PinodeResult<Value> {
        let registry = Arc::clone(&self.registry);
        registry.read(self, value_id)
    }

    fn write(&mut self, value_id: &str, value: Value) -> PinodeResult<()> {
        let registry = Arc::clone(&self.registry);
        registry.write(self, value_id, value)
    }

    fn action(&mut self, value_id: &str, payload: Option<Value>) -> PinodeResult<Option<Value>> {
        let registry = Arc::clone(&self.registry);
        registry.act(self, value_id, payload)
    }
}

fn settings() -> GatewaySettings {
    GatewaySettings {
        lock_timeout_ms: 50,
        shutdown_deadline_ms: 2000,
        scheduler: SchedulerConfig::default()
            .with_min_poll_interval(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_secs(1)),
        ..GatewaySettings::default()
    }
}

fn bus() -> BusLock {
    BusLock::new("i2c-1", Duration::from_millis(50))
}

fn wait_for<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_close_leaves_no_lock_held() {
    let bus = bus();
    let mut holder = Dimmer::new("holder", bus.clone(), None).exclusive();
    let mut other = Dimmer::new("other", bus.clone(), None);

    holder.open(EventSink::detached("holder")).unwrap();
    let err = other.open(EventSink::detached("other")).unwrap_err();
    assert!(matches!(err, PinodeError::ResourceUnavailable(_)));

    holder.close().unwrap();
    holder.close().unwrap();

    let start = Instant::now();
    other.open(EventSink::detached("other")).unwrap();
    assert!(start.elapsed() < Duration::from_millis(20));
    assert!(!bus.is_locked());
}

#[test]
fn test_dispatcher_round_trip_and_rejections() {
    let memory = MemoryPublisher::new();
    let mut gateway = Gateway::new(settings(), Arc::new(memory.clone()));
    gateway
        .add_device(Box::new(Dimmer::new("dimmer", bus(), None)))
        .unwrap();
    gateway.start().unwrap();
    let dispatcher = gateway.dispatcher();

    for level in [0i64, 42, 100] {
        dispatcher
            .dispatch(&Command::set("dimmer", "level", Value::Int(level)))
            .unwrap();
        let read = dispatcher.dispatch(&Command::get("dimmer", "level")).unwrap();
        assert_eq!(read, Some(Value::Int(level)));
    }

    let err = dispatcher
        .dispatch(&Command::set("dimmer", "level", Value::Int(101)))
        .unwrap_err();
    assert!(matches!(err, PinodeError::InvalidValue { .. }));
    assert_eq!(
        dispatcher.dispatch(&Command::get("dimmer", "level")).unwrap(),
        Some(Value::Int(100))
    );

    assert!(matches!(
        dispatcher.dispatch(&Command::get("dimmer", "voltage")),
        Err(PinodeError::UnknownValue(_))
    ));
    assert!(matches!(
        dispatcher.dispatch(&Command::get("lamp", "level")),
        Err(PinodeError::UnknownDevice(_))
    ));
    assert!(matches!(
        dispatcher.dispatch(&Command::set("dimmer", "power", Value::Float(1.0))),
        Err(PinodeError::InvalidValue { .. })
    ));

    // Config writes are published
    let published = memory.messages_for("dimmer", "level");
    assert_eq!(published.len(), 3);
    assert_eq!(published[2].value, Value::Int(100));

    let response = dispatcher.handle(&Command::action("dimmer", "switch", "off"));
    assert!(response.success);
    assert_eq!(response.result, Some(Value::Int(0)));

    assert!(gateway.stop().is_clean());
}

#[test]
fn test_slow_poll_does_not_delay_other_devices() {
    let mut gateway = Gateway::new(settings(), Arc::new(MemoryPublisher::new()));
    gateway
        .add_device(Box::new(
            Dimmer::new("slow", bus(), Some(Duration::from_millis(20)))
                .slow(Duration::from_millis(500)),
        ))
        .unwrap();
    gateway
        .add_device(Box::new(Dimmer::new("fast", bus(), None)))
        .unwrap();
    gateway.start().unwrap();
    let dispatcher = gateway.dispatcher();

    assert!(wait_for(Duration::from_secs(1), || {
        gateway
            .scheduler()
            .job_info("slow", "power")
            .map_or(false, |info| info.in_flight)
    }));

    let start = Instant::now();
    let read = dispatcher.dispatch(&Command::get("fast", "level")).unwrap();
    let elapsed = start.elapsed();
    assert_eq!(read, Some(Value::Int(0)));
    assert!(elapsed < Duration::from_millis(100), "get took {:?}", elapsed);

    let start = Instant::now();
    dispatcher
        .dispatch(&Command::set("fast", "level", Value::Int(30)))
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));

    gateway.stop();
}

#[test]
fn test_dispatch_to_closed_device_is_not_ready() {
    let mut gateway = Gateway::new(settings(), Arc::new(MemoryPublisher::new()));
    let dimmer = Dimmer::new("dimmer", bus(), None);
    dimmer.present.store(false, Ordering::SeqCst);
    gateway.add_device(Box::new(dimmer)).unwrap();
    gateway.start().unwrap();

    let err = gateway
        .dispatcher()
        .dispatch(&Command::action("dimmer", "switch", "on"))
        .unwrap_err();
    assert!(matches!(err, PinodeError::DeviceNotReady(_)));

    // Unknown values are reported before readiness
    let err = gateway
        .dispatcher()
        .dispatch(&Command::get("dimmer", "nope"))
        .unwrap_err();
    assert!(matches!(err, PinodeError::UnknownValue(_)));
}

#[test]
fn test_unreachable_device_is_retried_on_later_polls() {
    let memory = MemoryPublisher::new();
    let mut gateway = Gateway::new(settings(), Arc::new(memory.clone()));
    let dimmer = Dimmer::new("dimmer", bus(), Some(Duration::from_millis(40)));
    let present = Arc::clone(&dimmer.present);
    present.store(false, Ordering::SeqCst);
    gateway.add_device(Box::new(dimmer)).unwrap();
    gateway.start().unwrap();

    assert!(wait_for(Duration::from_secs(1), || {
        gateway
            .scheduler()
            .job_info("dimmer", "power")
            .map_or(false, |info| info.stats.failed >= 2)
    }));
    assert!(memory.messages_for("dimmer", "power").is_empty());
    assert!(gateway.scheduler().is_running());

    present.store(true, Ordering::SeqCst);
    assert!(wait_for(Duration::from_secs(1), || {
        !memory.messages_for("dimmer", "power").is_empty()
    }));

    let health = gateway.health();
    assert_eq!(health.len(), 1);
    assert!(health[0].alive);

    assert!(gateway.stop().is_clean());
}

#[test]
fn test_stop_closes_devices_and_releases_bus() {
    let bus = bus();
    let mut gateway = Gateway::new(settings(), Arc::new(MemoryPublisher::new()));
    gateway
        .add_device(Box::new(Dimmer::new("holder", bus.clone(), None).exclusive()))
        .unwrap();
    gateway.start().unwrap();
    assert!(bus.is_locked());

    let report = gateway.stop();
    assert!(report.is_clean());
    assert!(!bus.is_locked());

    let handle = gateway.device("holder").unwrap();
    assert_eq!(handle.lock().state(), AcquisitionState::Closed);
}

#[test]
fn test_devices_can_join_and_leave_a_running_gateway() {
    let memory = MemoryPublisher::new();
    let mut gateway = Gateway::new(settings(), Arc::new(memory.clone()));
    gateway.start().unwrap();

    gateway
        .add_device(Box::new(Dimmer::new(
            "late",
            bus(),
            Some(Duration::from_millis(30)),
        )))
        .unwrap();
    assert_eq!(gateway.scheduler().job_count(), 1);
    assert!(wait_for(Duration::from_secs(1), || {
        !memory.messages_for("late", "power").is_empty()
    }));

    gateway.remove_device("late").unwrap();
    assert_eq!(gateway.scheduler().job_count(), 0);
    assert!(gateway.device("late").is_none());

    assert!(matches!(
        gateway.remove_device("late"),
        Err(PinodeError::UnknownDevice(_))
    ));
    gateway.stop();
}
