//! Camera
//!
//! Wraps a [`CameraSession`]. Photos and videos land under
//! `<home>/public/picamera/`, named after the capture time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pinode_core::{
    AcquisitionState, BusLock, Capabilities, Device, DeviceConfig, EventSink, PinodeError,
    PinodeResult, Value, ValueDescriptor, ValueRegistry, ValueType,
};

use crate::drivers::camera::{
    CameraDriver, CameraSession, CameraState, PreviewSettings, StreamTarget,
};

pub const DEFAULT_WARMUP: Duration = Duration::from_millis(2000);
pub const DEFAULT_VIDEO_DURATION: i64 = 10;

const PHOTO_DIR: &str = "photo/snapshot";
const SEQUENCE_DIR: &str = "photo/sequence";
const VIDEO_DIR: &str = "video/snapshot";
const TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";

pub struct CameraDevice {
    id: String,
    /// `<home>/public/picamera`
    media_dir: PathBuf,
    session: CameraSession,
    video_duration: Duration,
    stream_target: StreamTarget,
    state: AcquisitionState,
    registry: Arc<ValueRegistry<Self>>,
}

impl CameraDevice {
    pub fn new(
        id: &str,
        home: &Path,
        driver: CameraDriver,
        lock: BusLock,
        warmup: Duration,
    ) -> Self {
        Self {
            id: id.to_string(),
            media_dir: home.join("public").join("picamera"),
            session: CameraSession::new(id, lock, driver, warmup),
            video_duration: Duration::from_secs(DEFAULT_VIDEO_DURATION as u64),
            stream_target: StreamTarget::default(),
            state: AcquisitionState::Closed,
            registry: Arc::new(Self::values()),
        }
    }

    pub fn from_config(
        id: &str,
        config: &DeviceConfig,
        home: &Path,
        driver: CameraDriver,
        lock: BusLock,
    ) -> PinodeResult<Self> {
        let warmup = config
            .get_option_u64("warmup_ms")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WARMUP);
        let mut device = Self::new(id, home, driver, lock, warmup);

        let registry =
            Self::values().with_poll_intervals(|name, default| config.poll_interval(name, default));
        // Static values for the writable configs, checked like runtime writes
        for name in ["led", "hflip", "vflip", "video_duration", "host", "port"] {
            let raw = match config.options.get(name) {
                Some(raw) => raw,
                None => continue,
            };
            let value = yaml_to_value(raw).ok_or_else(|| {
                PinodeError::config(format!("{}: unsupported value for '{}'", id, name))
            })?;
            registry
                .write(&mut device, name, value)
                .map_err(|e| PinodeError::config(format!("{}: {}", id, e)))?;
        }
        device.registry = Arc::new(registry);
        Ok(device)
    }

    pub fn camera_state(&self) -> CameraState {
        self.session.state()
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn stream_target(&self) -> &StreamTarget {
        &self.stream_target
    }

    fn timestamped(&self, dir: &str, ext: &str) -> PathBuf {
        let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
        self.media_dir.join(dir).join(format!("{}.{}", stamp, ext))
    }

    fn update_preview(&mut self, change: impl FnOnce(&mut PreviewSettings)) {
        let mut preview = self.session.preview().clone();
        change(&mut preview);
        self.session.set_preview(preview);
    }

    fn snapshot(&mut self) -> PinodeResult<Value> {
        let path = self.timestamped(PHOTO_DIR, "jpg");
        self.session.snapshot(&path)?;
        log::info!("{}: photo saved to {}", self.id, path.display());
        Ok(Value::Text(path.display().to_string()))
    }

    fn video(&mut self) -> PinodeResult<Value> {
        let path = self.timestamped(VIDEO_DIR, "mjpeg");
        self.session.record(&path, self.video_duration)?;
        log::info!(
            "{}: recording {:?} to {}",
            self.id,
            self.video_duration,
            path.display()
        );
        Ok(Value::Text(path.display().to_string()))
    }

    fn stream(&mut self, command: &str) -> PinodeResult<()> {
        match command {
            "start" => self.session.stream(&self.stream_target),
            "reload" => self.session.reload_stream(),
            _ => {
                if self.session.state() != CameraState::Streaming {
                    return Err(PinodeError::invalid("stream", "no stream is running"));
                }
                self.session.stop()
            }
        }
    }

    fn values() -> ValueRegistry<Self> {
        ValueRegistry::new()
            .sensor(
                ValueDescriptor::sensor("state", ValueType::enumeration(&CameraState::NAMES))
                    .with_label("State")
                    .with_help("Camera state machine position"),
                |d: &mut Self| Ok(Value::Enum(d.session.state().to_string())),
            )
            .config(
                ValueDescriptor::config("led", ValueType::Bool)
                    .with_help("Camera LED on while previewing")
                    .with_default(true),
                |d: &mut Self| Ok(Value::Bool(d.session.preview().led)),
                |d: &mut Self, v| {
                    let on = v.as_bool().unwrap_or(true);
                    d.update_preview(|p| p.led = on);
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("hflip", ValueType::Bool)
                    .with_help("Flip the image horizontally")
                    .with_default(false),
                |d: &mut Self| Ok(Value::Bool(d.session.preview().hflip)),
                |d: &mut Self, v| {
                    let flip = v.as_bool().unwrap_or_default();
                    d.update_preview(|p| p.hflip = flip);
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("vflip", ValueType::Bool)
                    .with_help("Flip the image vertically")
                    .with_default(false),
                |d: &mut Self| Ok(Value::Bool(d.session.preview().vflip)),
                |d: &mut Self, v| {
                    let flip = v.as_bool().unwrap_or_default();
                    d.update_preview(|p| p.vflip = flip);
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("video_duration", ValueType::int_range(1, 3600))
                    .with_help("Length of a video in seconds")
                    .with_default(DEFAULT_VIDEO_DURATION),
                |d: &mut Self| Ok(Value::Int(d.video_duration.as_secs() as i64)),
                |d: &mut Self, v| {
                    let secs = v.as_i64().unwrap_or(DEFAULT_VIDEO_DURATION).max(1) as u64;
                    d.video_duration = Duration::from_secs(secs);
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("host", ValueType::Text)
                    .with_help("Address the stream server binds to")
                    .with_default(Value::Text(StreamTarget::default().host)),
                |d: &mut Self| Ok(Value::Text(d.stream_target.host.clone())),
                |d: &mut Self, v| {
                    let host = v.as_str().unwrap_or_default().trim();
                    if host.is_empty() {
                        return Err(PinodeError::invalid("host", "host must not be empty"));
                    }
                    d.stream_target.host = host.to_string();
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("port", ValueType::int_range(1, 65_535))
                    .with_help("Port the stream server listens on")
                    .with_default(StreamTarget::default().port as i64),
                |d: &mut Self| Ok(Value::Int(d.stream_target.port as i64)),
                |d: &mut Self, v| {
                    let port = v.as_i64().unwrap_or_default();
                    d.stream_target.port = u16::try_from(port).map_err(|_| {
                        PinodeError::invalid("port", format!("{} is not a port", port))
                    })?;
                    Ok(())
                },
            )
            .action(
                ValueDescriptor::action("snapshot", ValueType::Text)
                    .with_help("Take a photo; returns the file name"),
                |d: &mut Self, _| d.snapshot().map(Some),
            )
            .action(
                ValueDescriptor::action("video", ValueType::Text)
                    .with_help("Record a video of video_duration seconds; returns the file name"),
                |d: &mut Self, _| d.video().map(Some),
            )
            .action(
                ValueDescriptor::action(
                    "stream",
                    ValueType::enumeration(&["start", "stop", "reload"]),
                )
                .with_help("Control the network stream"),
                |d: &mut Self, payload| {
                    let command = payload
                        .as_ref()
                        .and_then(|p| p.as_str())
                        .unwrap_or("start")
                        .to_string();
                    d.stream(&command)?;
                    Ok(Some(Value::Enum(d.session.state().to_string())))
                },
            )
            .action(
                ValueDescriptor::action("stop", ValueType::Text)
                    .with_help("Stop whatever the camera is doing"),
                |d: &mut Self, _| {
                    d.session.stop()?;
                    Ok(Some(Value::Enum(CameraState::Idle.to_string())))
                },
            )
    }
}

fn yaml_to_value(raw: &serde_yaml::Value) -> Option<Value> {
    match raw {
        serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float)),
        serde_yaml::Value::String(s) => Some(Value::Text(s.clone())),
        _ => None,
    }
}

impl Device for CameraDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "camera"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::actuator()
    }

    fn state(&self) -> AcquisitionState {
        match self.state {
            AcquisitionState::Closed => AcquisitionState::Closed,
            _ if self.session.is_idle() => AcquisitionState::Free,
            _ => AcquisitionState::Locked,
        }
    }

    fn open(&mut self, _events: EventSink) -> PinodeResult<()> {
        if self.state.is_open() {
            return Ok(());
        }
        self.session
            .driver()
            .lock()
            .init()
            .map_err(PinodeError::into_unavailable)?;
        for dir in [PHOTO_DIR, SEQUENCE_DIR, VIDEO_DIR] {
            std::fs::create_dir_all(self.media_dir.join(dir)).map_err(|e| {
                PinodeError::unavailable(format!("{}: {}", self.media_dir.display(), e))
            })?;
        }
        self.state = AcquisitionState::Free;
        Ok(())
    }

    fn close(&mut self) -> PinodeResult<()> {
        if self.state.is_open() {
            self.session.stop()?;
            if let Err(e) = self.session.driver().lock().shutdown() {
                log::warn!("{}: camera shutdown failed: {}", self.id, e);
            }
            self.state = AcquisitionState::Closed;
        }
        Ok(())
    }

    fn check_heartbeat(&mut self) -> bool {
        self.state.is_open() && self.session.driver().lock().is_available()
    }

    registry_values!();
}
