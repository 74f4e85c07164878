//! Check command - validate a gateway config without touching hardware state

use anyhow::{Context, Result};
use colored::*;
use pinode_core::{AccessMode, Device, GatewayConfig, NullPublisher};
use std::path::PathBuf;
use std::sync::Arc;

/// One value of a configured device
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSummary {
    pub name: String,
    pub access: AccessMode,
    pub value_type: &'static str,
    /// Seconds between polls, if polled
    pub poll_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    pub id: String,
    pub kind: String,
    pub values: Vec<ValueSummary>,
}

pub fn run_check(config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path.as_deref()).context("loading gateway config")?;
    let devices = describe(&config)?;

    println!("{}", "Gateway configuration".green().bold());
    println!(
        "  {} {}",
        format!("{:14}", "GPIO").cyan(),
        format!(
            "{} backend, {} numbering",
            config.gateway.gpio.backend, config.gateway.gpio.board_mode
        )
    );
    println!(
        "  {} {} backend",
        format!("{:14}", "I2C").cyan(),
        config.gateway.i2c_backend
    );
    println!(
        "  {} {}",
        format!("{:14}", "Home").cyan(),
        config.gateway.home_dir.display()
    );
    println!(
        "  {} {} ms",
        format!("{:14}", "Bus timeout").cyan(),
        config.gateway.lock_timeout_ms
    );
    println!();

    for device in &devices {
        println!("{} {}", device.id.bold(), format!("({})", device.kind).dimmed());
        for value in &device.values {
            let poll = match value.poll_secs {
                Some(secs) => format!("every {}s", secs),
                None => "-".to_string(),
            };
            println!(
                "    {:20} {:8} {:6} {}",
                value.name,
                value.access.to_string(),
                value.value_type,
                poll.dimmed()
            );
        }
    }
    println!();
    println!("{} {} device(s) OK", "[OK]".green(), devices.len());
    Ok(())
}

/// Build every enabled device (without opening it) and list its values
pub fn describe(config: &GatewayConfig) -> Result<Vec<DeviceSummary>> {
    let gateway = pinode_library::build_gateway(config, Arc::new(NullPublisher))?;
    let mut devices = Vec::new();
    for id in gateway.device_ids() {
        let handle = match gateway.device(&id) {
            Some(handle) => handle,
            None => continue,
        };
        let device = handle.lock();
        devices.push(DeviceSummary {
            id: id.clone(),
            kind: device.kind().to_string(),
            values: device
                .descriptors()
                .into_iter()
                .map(|d| ValueSummary {
                    value_type: d.value_type.name(),
                    poll_secs: d.poll_interval.map(|i| i.as_secs_f64()),
                    access: d.access,
                    name: d.name,
                })
                .collect(),
        });
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_yaml() {
        let config = GatewayConfig::from_yaml(
            r#"
gateway:
  gpio:
    board_mode: BCM
devices:
  baro:
    kind: bmp085
    poll:
      temperature: 30
      altitude: 0
  fan:
    kind: gpio_pwm
    pin: 18
"#,
        )
        .unwrap();
        let devices = describe(&config).unwrap();
        assert_eq!(devices.len(), 2);

        let baro = &devices[0];
        assert_eq!(baro.kind, "bmp085");
        let temperature = baro.values.iter().find(|v| v.name == "temperature").unwrap();
        assert_eq!(temperature.poll_secs, Some(30.0));
        let altitude = baro.values.iter().find(|v| v.name == "altitude").unwrap();
        assert_eq!(altitude.poll_secs, None);

        let fan = &devices[1];
        let switch = fan.values.iter().find(|v| v.name == "switch").unwrap();
        assert_eq!(switch.access, AccessMode::Action);
    }

    #[test]
    fn test_describe_rejects_unknown_kind() {
        let config = GatewayConfig::from_yaml(
            r#"
devices:
  x:
    kind: thermocouple
"#,
        )
        .unwrap();
        assert!(describe(&config).is_err());
    }
}
