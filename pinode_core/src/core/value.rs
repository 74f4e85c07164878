//! Typed values and the descriptors that expose them
//!
//! A [`ValueDescriptor`] declares one externally visible attribute of a
//! device. The [`ValueRegistry`] binds each descriptor to typed accessor
//! closures over the concrete device, so a device's `read`/`write` are a
//! single table lookup instead of a per-attribute `match`.

use crate::error::{PinodeError, PinodeResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A typed reading or setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int(i64),
    Float(f64),
    /// One item of an enumerated list
    Enum(String),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Byte(b) => Some(*b != 0),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Byte(b) => Some(*b as f64),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Enum(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Byte(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Enum(s) | Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Semantic type of a descriptor, with its constraints
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    Bool,
    Byte,
    Int { min: Option<i64>, max: Option<i64> },
    Float { min: Option<f64>, max: Option<f64> },
    Enum(Vec<String>),
    Text,
}

impl ValueType {
    pub fn int() -> Self {
        ValueType::Int {
            min: None,
            max: None,
        }
    }

    pub fn int_range(min: i64, max: i64) -> Self {
        ValueType::Int {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn float() -> Self {
        ValueType::Float {
            min: None,
            max: None,
        }
    }

    pub fn float_range(min: f64, max: f64) -> Self {
        ValueType::Float {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn enumeration(items: &[&str]) -> Self {
        ValueType::Enum(items.iter().map(|s| s.to_string()).collect())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Byte => "byte",
            ValueType::Int { .. } => "int",
            ValueType::Float { .. } => "float",
            ValueType::Enum(_) => "enum",
            ValueType::Text => "text",
        }
    }
}

/// How a descriptor is produced or consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Read-only reading
    Sensor,
    /// Read-write setting
    Config,
    /// Write-only side effect
    Action,
}

impl AccessMode {
    pub fn is_readable(&self) -> bool {
        !matches!(self, AccessMode::Action)
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, AccessMode::Sensor)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Sensor => write!(f, "sensor"),
            AccessMode::Config => write!(f, "config"),
            AccessMode::Action => write!(f, "action"),
        }
    }
}

/// One exposed attribute of a device
///
/// Immutable once built, except for the cached last value which is shared
/// between clones.
#[derive(Debug, Clone)]
pub struct ValueDescriptor {
    pub name: String,
    pub label: String,
    pub help: String,
    pub value_type: ValueType,
    pub access: AccessMode,
    pub poll_interval: Option<Duration>,
    pub default: Option<Value>,
    last: Arc<Mutex<Option<Value>>>,
}

impl ValueDescriptor {
    fn new(name: &str, value_type: ValueType, access: AccessMode) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            help: String::new(),
            value_type,
            access,
            poll_interval: None,
            default: None,
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn sensor(name: &str, value_type: ValueType) -> Self {
        Self::new(name, value_type, AccessMode::Sensor)
    }

    pub fn config(name: &str, value_type: ValueType) -> Self {
        Self::new(name, value_type, AccessMode::Config)
    }

    pub fn action(name: &str, value_type: ValueType) -> Self {
        Self::new(name, value_type, AccessMode::Action)
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn with_poll(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default<V: Into<Value>>(mut self, default: V) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Check type and range, returning the value normalised to this descriptor's type
    pub fn validate(&self, value: Value) -> PinodeResult<Value> {
        let invalid = |message: String| PinodeError::invalid(self.name.as_str(), message);

        match (&self.value_type, value) {
            (ValueType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ValueType::Bool, v @ (Value::Byte(0 | 1) | Value::Int(0 | 1))) => {
                Ok(Value::Bool(v.as_bool().unwrap_or(false)))
            }
            (ValueType::Byte, Value::Byte(b)) => Ok(Value::Byte(b)),
            (ValueType::Byte, Value::Int(i)) => u8::try_from(i)
                .map(Value::Byte)
                .map_err(|_| invalid(format!("{} is outside 0..=255", i))),
            (ValueType::Int { min, max }, v @ (Value::Int(_) | Value::Byte(_))) => {
                let i = v.as_i64().unwrap_or_default();
                if min.map_or(false, |m| i < m) || max.map_or(false, |m| i > m) {
                    return Err(invalid(format!(
                        "{} is outside {}..={}",
                        i,
                        min.map_or("-inf".to_string(), |m| m.to_string()),
                        max.map_or("inf".to_string(), |m| m.to_string())
                    )));
                }
                Ok(Value::Int(i))
            }
            (
                ValueType::Float { min, max },
                v @ (Value::Float(_) | Value::Int(_) | Value::Byte(_)),
            ) => {
                let f = v.as_f64().unwrap_or_default();
                if !f.is_finite() {
                    return Err(invalid("not a finite number".to_string()));
                }
                if min.map_or(false, |m| f < m) || max.map_or(false, |m| f > m) {
                    return Err(invalid(format!(
                        "{} is outside {}..={}",
                        f,
                        min.map_or("-inf".to_string(), |m| m.to_string()),
                        max.map_or("inf".to_string(), |m| m.to_string())
                    )));
                }
                Ok(Value::Float(f))
            }
            (ValueType::Enum(items), Value::Enum(s) | Value::Text(s)) => {
                match items.iter().find(|item| item.eq_ignore_ascii_case(&s)) {
                    Some(item) => Ok(Value::Enum(item.clone())),
                    None => Err(invalid(format!(
                        "'{}' is not one of [{}]",
                        s,
                        items.join(", ")
                    ))),
                }
            }
            (ValueType::Text, Value::Text(s) | Value::Enum(s)) => Ok(Value::Text(s)),
            (expected, got) => Err(invalid(format!(
                "expected {}, got {:?}",
                expected.name(),
                got
            ))),
        }
    }

    /// Most recent successfully read or written value
    pub fn last(&self) -> Option<Value> {
        self.last.lock().clone()
    }

    pub fn set_last(&self, value: Value) {
        *self.last.lock() = Some(value);
    }
}

type Reader<D> = Box<dyn Fn(&mut D) -> PinodeResult<Value> + Send + Sync>;
type Writer<D> = Box<dyn Fn(&mut D, Value) -> PinodeResult<()> + Send + Sync>;
type ActionFn<D> = Box<dyn Fn(&mut D, Option<Value>) -> PinodeResult<Option<Value>> + Send + Sync>;

struct Entry<D> {
    descriptor: ValueDescriptor,
    reader: Option<Reader<D>>,
    writer: Option<Writer<D>>,
    action: Option<ActionFn<D>>,
}

/// Flat name → accessor table for one device type
///
/// Devices keep the registry behind an `Arc` and clone the handle before
/// calling in, so the closures can take `&mut self`.
pub struct ValueRegistry<D> {
    entries: Vec<Entry<D>>,
}

impl<D> Default for ValueRegistry<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D> ValueRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, entry: Entry<D>) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.descriptor.name == entry.descriptor.name)
        {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Register a read-only sensor
    pub fn sensor<R>(mut self, descriptor: ValueDescriptor, reader: R) -> Self
    where
        R: Fn(&mut D) -> PinodeResult<Value> + Send + Sync + 'static,
    {
        self.push(Entry {
            descriptor,
            reader: Some(Box::new(reader)),
            writer: None,
            action: None,
        });
        self
    }

    /// Register a read-write config value
    pub fn config<R, W>(mut self, descriptor: ValueDescriptor, reader: R, writer: W) -> Self
    where
        R: Fn(&mut D) -> PinodeResult<Value> + Send + Sync + 'static,
        W: Fn(&mut D, Value) -> PinodeResult<()> + Send + Sync + 'static,
    {
        self.push(Entry {
            descriptor,
            reader: Some(Box::new(reader)),
            writer: Some(Box::new(writer)),
            action: None,
        });
        self
    }

    /// Register a write-only action
    pub fn action<A>(mut self, descriptor: ValueDescriptor, action: A) -> Self
    where
        A: Fn(&mut D, Option<Value>) -> PinodeResult<Option<Value>> + Send + Sync + 'static,
    {
        self.push(Entry {
            descriptor,
            reader: None,
            writer: None,
            action: Some(Box::new(action)),
        });
        self
    }

    /// Apply configured poll intervals; `resolve` receives the name and default interval
    pub fn with_poll_intervals<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&str, Option<Duration>) -> Option<Duration>,
    {
        for entry in &mut self.entries {
            if entry.descriptor.access.is_readable() {
                let interval = resolve(&entry.descriptor.name, entry.descriptor.poll_interval);
                entry.descriptor.poll_interval = interval;
            }
        }
        self
    }

    pub fn descriptor(&self, name: &str) -> Option<&ValueDescriptor> {
        self.entry(name).map(|e| &e.descriptor)
    }

    /// Descriptors in registration order
    pub fn descriptors(&self) -> Vec<ValueDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Option<&Entry<D>> {
        self.entries.iter().find(|e| e.descriptor.name == name)
    }

    fn require(&self, name: &str) -> PinodeResult<&Entry<D>> {
        self.entry(name)
            .ok_or_else(|| PinodeError::UnknownValue(name.to_string()))
    }

    /// Read a sensor or config value, caching it on success
    pub fn read(&self, device: &mut D, name: &str) -> PinodeResult<Value> {
        let entry = self.require(name)?;
        let reader = entry.reader.as_ref().ok_or_else(|| {
            PinodeError::invalid(name, format!("'{}' is write-only", name))
        })?;
        let value = reader(device).map_err(|e| e.into_read(name))?;
        entry.descriptor.set_last(value.clone());
        Ok(value)
    }

    /// Validate and write a config value. On any failure the cached value is unchanged.
    pub fn write(&self, device: &mut D, name: &str, value: Value) -> PinodeResult<()> {
        let entry = self.require(name)?;
        let writer = entry.writer.as_ref().ok_or_else(|| {
            PinodeError::invalid(name, format!("'{}' is not writable", name))
        })?;
        let value = entry.descriptor.validate(value)?;
        writer(device, value.clone()).map_err(|e| e.into_write(name))?;
        entry.descriptor.set_last(value);
        Ok(())
    }

    /// Run an action. The payload is validated against the descriptor type when present.
    pub fn act(
        &self,
        device: &mut D,
        name: &str,
        payload: Option<Value>,
    ) -> PinodeResult<Option<Value>> {
        let entry = self.require(name)?;
        let action = entry.action.as_ref().ok_or_else(|| {
            PinodeError::invalid(name, format!("'{}' is not an action", name))
        })?;
        let payload = payload
            .map(|p| entry.descriptor.validate(p))
            .transpose()?;
        let result = action(device, payload).map_err(|e| e.into_write(name))?;
        if let Some(ref value) = result {
            entry.descriptor.set_last(value.clone());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thermostat {
        setpoint: f64,
        mode: String,
        fired: u32,
    }

    fn registry() -> ValueRegistry<Thermostat> {
        ValueRegistry::new()
            .sensor(
                ValueDescriptor::sensor("temperature", ValueType::float())
                    .with_poll(Duration::from_secs(30)),
                |_| Ok(Value::Float(21.5)),
            )
            .config(
                ValueDescriptor::config("setpoint", ValueType::float_range(5.0, 30.0))
                    .with_default(20.0),
                |t: &mut Thermostat| Ok(Value::Float(t.setpoint)),
                |t: &mut Thermostat, v| {
                    t.setpoint = v.as_f64().unwrap_or(t.setpoint);
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("mode", ValueType::enumeration(&["heat", "off"])),
                |t: &mut Thermostat| Ok(Value::Enum(t.mode.clone())),
                |t: &mut Thermostat, v| {
                    t.mode = v.as_str().unwrap_or("off").to_string();
                    Ok(())
                },
            )
            .action(
                ValueDescriptor::action("boost", ValueType::Bool),
                |t: &mut Thermostat, _| {
                    t.fired += 1;
                    Ok(None)
                },
            )
    }

    fn thermostat() -> Thermostat {
        Thermostat {
            setpoint: 20.0,
            mode: "off".into(),
            fired: 0,
        }
    }

    #[test]
    fn test_config_round_trip() {
        let registry = registry();
        let mut t = thermostat();

        for input in [5.0, 12.25, 30.0] {
            registry.write(&mut t, "setpoint", Value::Float(input)).unwrap();
            assert_eq!(
                registry.read(&mut t, "setpoint").unwrap(),
                Value::Float(input)
            );
        }

        // Integer input is accepted for float descriptors
        registry.write(&mut t, "setpoint", Value::Int(18)).unwrap();
        assert_eq!(registry.read(&mut t, "setpoint").unwrap(), Value::Float(18.0));
    }

    #[test]
    fn test_out_of_range_leaves_previous_value() {
        let registry = registry();
        let mut t = thermostat();
        registry.write(&mut t, "setpoint", Value::Float(22.0)).unwrap();

        let err = registry
            .write(&mut t, "setpoint", Value::Float(99.0))
            .unwrap_err();
        assert!(matches!(err, PinodeError::InvalidValue { .. }));
        assert_eq!(t.setpoint, 22.0);
        assert_eq!(
            registry.descriptor("setpoint").unwrap().last(),
            Some(Value::Float(22.0))
        );

        let err = registry
            .write(&mut t, "mode", Value::Enum("cool".into()))
            .unwrap_err();
        assert!(matches!(err, PinodeError::InvalidValue { .. }));
        assert_eq!(t.mode, "off");
    }

    #[test]
    fn test_enum_matching_is_case_insensitive() {
        let registry = registry();
        let mut t = thermostat();
        registry
            .write(&mut t, "mode", Value::Text("HEAT".into()))
            .unwrap();
        assert_eq!(t.mode, "heat");
    }

    #[test]
    fn test_access_rules() {
        let registry = registry();
        let mut t = thermostat();

        assert!(matches!(
            registry.read(&mut t, "nope"),
            Err(PinodeError::UnknownValue(_))
        ));
        assert!(registry.read(&mut t, "boost").is_err());
        assert!(registry
            .write(&mut t, "temperature", Value::Float(1.0))
            .is_err());

        registry.act(&mut t, "boost", None).unwrap();
        assert_eq!(t.fired, 1);
    }

    #[test]
    fn test_descriptor_order_and_poll_override() {
        let registry = registry().with_poll_intervals(|name, default| {
            if name == "setpoint" {
                Some(Duration::from_secs(60))
            } else {
                default
            }
        });
        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["temperature", "setpoint", "mode", "boost"]);
        assert_eq!(
            registry.descriptor("setpoint").unwrap().poll_interval,
            Some(Duration::from_secs(60))
        );
        assert_eq!(registry.descriptor("boost").unwrap().poll_interval, None);
    }

    #[test]
    fn test_byte_validation() {
        let d = ValueDescriptor::sensor("status", ValueType::Byte);
        assert_eq!(d.validate(Value::Int(1)).unwrap(), Value::Byte(1));
        assert!(d.validate(Value::Int(256)).is_err());
    }

    #[test]
    fn test_bool_accepts_only_zero_or_one() {
        let d = ValueDescriptor::config("enabled", ValueType::Bool);
        assert_eq!(d.validate(Value::Byte(1)).unwrap(), Value::Bool(true));
        assert_eq!(d.validate(Value::Byte(0)).unwrap(), Value::Bool(false));
        assert_eq!(d.validate(Value::Int(1)).unwrap(), Value::Bool(true));
        assert!(matches!(
            d.validate(Value::Byte(5)),
            Err(PinodeError::InvalidValue { .. })
        ));
        assert!(d.validate(Value::Int(2)).is_err());

        // JSON `5` deserializes as a byte
        let parsed: Value = serde_json::from_str("5").unwrap();
        assert!(d.validate(parsed).is_err());
    }
}
