use pinode_core::{
    AcquisitionState, BoardMode, Command, Device, DeviceConfig, GatewayConfig, GatewaySettings,
    MemoryPublisher, PinodeError, SchedulerConfig, Value,
};
use pinode_library::drivers::barometer::bmp085;
use pinode_library::{build_gateway, build_gateway_with, DeviceFactory};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn settings(home: &TempDir) -> GatewaySettings {
    let mut settings = GatewaySettings::default();
    settings.home_dir = home.path().to_path_buf();
    settings.gpio.board_mode = BoardMode::Bcm;
    settings.lock_timeout_ms = 200;
    settings.shutdown_deadline_ms = 2000;
    settings.scheduler = SchedulerConfig::default()
        .with_min_poll_interval(Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_millis(500));
    settings
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
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
fn test_gpio_edge_is_published() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device(
        "gpio1",
        DeviceConfig::gpio("gpio_input", 17)
            .with_option("edge", "both")
            .with_option("bouncetime", 0)
            .with_poll("status", 0.0),
    );

    let factory = DeviceFactory::new(&config.gateway);
    let memory = MemoryPublisher::new();
    let mut gateway = build_gateway_with(&factory, &config, Arc::new(memory.clone())).unwrap();
    gateway.start().unwrap();

    let chip = factory.gpio().unwrap().simulated_chip().unwrap();
    chip.set_input_level(17, true);

    let published = memory.messages_for("gpio1", "status");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].device_id, "gpio1");
    assert_eq!(published[0].value, Value::Byte(1));

    chip.set_input_level(17, false);
    assert_eq!(memory.messages_for("gpio1", "status").len(), 2);

    assert!(gateway.stop().is_clean());
    assert!(!chip.has_interrupt(17));
}

#[test]
fn test_gpio_debounce_suppresses_bursts() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device(
        "button",
        DeviceConfig::gpio("gpio_input", 27)
            .with_option("pull", "up")
            .with_option("edge", "falling")
            .with_option("bouncetime", 10_000),
    );

    let factory = DeviceFactory::new(&config.gateway);
    let memory = MemoryPublisher::new();
    let mut gateway = build_gateway_with(&factory, &config, Arc::new(memory.clone())).unwrap();
    gateway.start().unwrap();

    let chip = factory.gpio().unwrap().simulated_chip().unwrap();
    for _ in 0..5 {
        chip.set_input_level(27, false);
        chip.set_input_level(27, true);
    }
    let published = memory.messages_for("button", "status");
    let edges: Vec<_> = published
        .iter()
        .filter(|m| m.value == Value::Byte(0))
        .collect();
    assert_eq!(edges.len(), 1);
    gateway.stop();
}

#[test]
fn test_bmp085_readings_through_dispatcher() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device("baro", DeviceConfig::i2c("bmp085", 1, 0x77));

    let memory = MemoryPublisher::new();
    let mut gateway = build_gateway(&config, Arc::new(memory.clone())).unwrap();
    gateway.start().unwrap();
    let dispatcher = gateway.dispatcher();

    let response = dispatcher.handle(&Command::get("baro", "temperature"));
    assert!(response.success);
    assert_eq!(response.result, Some(Value::Float(15.0)));

    let response = dispatcher.handle(&Command::get("baro", "pressure"));
    assert_eq!(response.result, Some(Value::Int(69962)));

    let response = dispatcher.handle(&Command::set("baro", "mode", 0i64));
    assert!(response.success);
    assert_eq!(
        memory.messages_for("baro", "mode").last().map(|m| m.value.clone()),
        Some(Value::Int(0))
    );
    let response = dispatcher.handle(&Command::get("baro", "pressure"));
    assert_eq!(response.result, Some(Value::Int(69964)));

    let response = dispatcher.handle(&Command::get("baro", "humidity"));
    assert!(!response.success);

    // First polls are due immediately
    assert!(wait_for(Duration::from_secs(2), || {
        !memory.messages_for("baro", "altitude").is_empty()
    }));
    gateway.stop();
}

#[test]
fn test_unreachable_sensor_recovers() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device(
        "baro",
        DeviceConfig::i2c("bmp085", 1, 0x77)
            .with_poll("pressure", 0.02)
            .with_poll("temperature", 0.0)
            .with_poll("altitude", 0.0)
            .with_poll("sealevel_pressure", 0.0),
    );

    let factory = DeviceFactory::new(&config.gateway);
    let memory = MemoryPublisher::new();
    let mut gateway = build_gateway_with(&factory, &config, Arc::new(memory.clone())).unwrap();

    let bus = factory.i2c_bus(1).unwrap();
    bus.with_simulation(|sim| sim.remove_device(0x77));
    gateway.start().unwrap();

    thread::sleep(Duration::from_millis(100));
    assert!(memory.messages_for("baro", "pressure").is_empty());
    let state = gateway.device("baro").unwrap().lock().state();
    assert_eq!(state, AcquisitionState::Closed);

    let response = gateway.dispatcher().handle(&Command::get("baro", "pressure"));
    assert!(!response.success);

    bus.with_simulation(|sim| bmp085::simulate(sim, 0x77));
    assert!(wait_for(Duration::from_secs(2), || {
        !memory.messages_for("baro", "pressure").is_empty()
    }));
    assert_eq!(
        memory.messages_for("baro", "pressure")[0].value,
        Value::Int(69962)
    );

    let info = gateway.scheduler().job_info("baro", "pressure").unwrap();
    assert!(info.stats.failed > 0);
    assert!(gateway.stop().is_clean());
}

#[test]
fn test_bno055_and_bmp085_share_bus() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device("baro", DeviceConfig::i2c("bmp085", 1, 0x77));
    config.add_device("imu", DeviceConfig::i2c("bno055", 1, 0x28));

    let factory = DeviceFactory::new(&config.gateway);
    let mut gateway =
        build_gateway_with(&factory, &config, Arc::new(MemoryPublisher::new())).unwrap();
    gateway.start().unwrap();
    let dispatcher = gateway.dispatcher();

    let response = dispatcher.handle(&Command::get("imu", "temperature"));
    assert_eq!(response.result, Some(Value::Float(25.0)));

    // A held bus times out instead of hanging
    let guard = factory.i2c_bus(1).unwrap().lock().acquire("maintenance").unwrap();
    let started = Instant::now();
    let response = dispatcher.handle(&Command::get("imu", "temperature"));
    assert!(!response.success);
    assert!(response.error.unwrap().contains("unavailable"));
    assert!(started.elapsed() < Duration::from_secs(2));
    drop(guard);

    let response = dispatcher.handle(&Command::get("baro", "temperature"));
    assert!(response.success);
    assert!(gateway.health().iter().all(|h| h.alive));
    gateway.stop();
}

#[test]
fn test_pwm_and_output_commands() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device("fan", DeviceConfig::gpio("gpio_pwm", 12));
    config.add_device("led", DeviceConfig::gpio("gpio_output", 18));

    let factory = DeviceFactory::new(&config.gateway);
    let memory = MemoryPublisher::new();
    let mut gateway = build_gateway_with(&factory, &config, Arc::new(memory.clone())).unwrap();
    gateway.start().unwrap();
    let dispatcher = gateway.dispatcher();
    let chip = factory.gpio().unwrap().simulated_chip().unwrap();

    let response = dispatcher.handle(&Command::set("fan", "frequency", 20_000.0));
    assert!(!response.success);
    let response = dispatcher.handle(&Command::get("fan", "frequency"));
    assert_eq!(response.result, Some(Value::Float(50.0)));

    dispatcher.handle(&Command::set("fan", "duty_cycle", 40.0));
    let response = dispatcher.handle(&Command::action("fan", "switch", "on"));
    assert_eq!(response.result, Some(Value::Enum("on".to_string())));
    let (frequency, duty) = chip.pwm(12).unwrap();
    assert_eq!(frequency, 50.0);
    assert!((duty - 0.4).abs() < 1e-9);

    let response = dispatcher.handle(&Command::set("led", "state", true));
    assert!(response.success);
    assert_eq!(chip.level(18), Some(true));
    assert_eq!(
        memory.messages_for("led", "state").last().map(|m| m.value.clone()),
        Some(Value::Bool(true))
    );

    gateway.stop();
    assert_eq!(chip.pwm(12), None);
}

#[test]
fn test_camera_through_dispatcher() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device(
        "picam",
        DeviceConfig::new("camera")
            .with_option("warmup_ms", 5)
            .with_option("video_duration", 60),
    );

    let factory = DeviceFactory::new(&config.gateway);
    let mut gateway =
        build_gateway_with(&factory, &config, Arc::new(MemoryPublisher::new())).unwrap();
    gateway.start().unwrap();
    let dispatcher = gateway.dispatcher();

    let response = dispatcher.handle(&Command::action("picam", "snapshot", "run"));
    let path = match response.result {
        Some(Value::Text(path)) => path,
        other => panic!("unexpected snapshot result {:?}", other),
    };
    assert!(std::path::Path::new(&path).is_file());

    let response = dispatcher.handle(&Command::action("picam", "video", "run"));
    assert!(response.success);
    assert!(factory.locks().lock_for("camera").is_locked());

    let response = dispatcher.handle(&Command::action("picam", "snapshot", "run"));
    assert!(!response.success);
    assert!(response.error.unwrap().contains("busy"));

    let response = dispatcher.handle(&Command::get("picam", "state"));
    assert_eq!(response.result, Some(Value::Enum("Recording".to_string())));

    // Shutdown closes the camera, which releases its lock
    assert!(gateway.stop().is_clean());
    assert!(factory.locks().held().is_empty());
}

#[test]
fn test_config_errors() {
    let home = TempDir::new().unwrap();
    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.gateway.gpio.board_mode = BoardMode::Board;
    // Header pin 2 is 5V
    config.add_device("gpio1", DeviceConfig::gpio("gpio_input", 2));
    assert!(matches!(
        build_gateway(&config, Arc::new(MemoryPublisher::new())),
        Err(PinodeError::Config(_))
    ));

    let mut config = GatewayConfig::new();
    config.gateway = settings(&home);
    config.add_device("x", DeviceConfig::new("hygrometer"));
    assert!(matches!(
        build_gateway(&config, Arc::new(MemoryPublisher::new())),
        Err(PinodeError::Config(_))
    ));
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
gateway:
  gpio:
    board_mode: BOARD
  lock_timeout_ms: 500
devices:
  door:
    kind: gpio_input
    pin: 11
    pull: up
    edge: falling
  baro:
    kind: bmp085
    mode: 3
    poll:
      pressure: 60
  spare:
    kind: gpio_output
    pin: 12
    enabled: false
"#;
    let config = GatewayConfig::from_yaml(yaml).unwrap();
    let factory = DeviceFactory::new(&config.gateway);
    let gateway = build_gateway_with(&factory, &config, Arc::new(MemoryPublisher::new())).unwrap();
    assert_eq!(gateway.device_ids(), vec!["baro".to_string(), "door".to_string()]);

    let baro = gateway.device("baro").unwrap();
    let pressure = baro.lock().descriptor("pressure").unwrap();
    assert_eq!(pressure.poll_interval, Some(Duration::from_secs(60)));
    let temperature = baro.lock().descriptor("temperature").unwrap();
    assert_eq!(temperature.poll_interval, Some(Duration::from_secs(300)));
}
