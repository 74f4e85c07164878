//! Doctor command - Host diagnostics for PINODE
//!
//! Checks that the device nodes the hardware backends need are present and
//! that a gateway config can be found.

use colored::*;
use pinode_core::GatewayConfig;
use pinode_library::{CameraDriverBackend, GpioDriverBackend, I2cDriverBackend};
use std::fs;
use std::path::Path;

/// Represents a diagnostic check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

/// Run all diagnostic checks
pub fn run_doctor(verbose: bool) -> anyhow::Result<()> {
    println!("{}", "PINODE System Diagnostics".green().bold());
    println!();

    let mut warnings = 0;
    let mut errors = 0;

    let (status, msg) = check_architecture(verbose);
    print_check("Architecture", status, &msg, &mut warnings, &mut errors);

    let (status, msg) = check_gpio(Path::new("/dev"), verbose);
    print_check("GPIO", status, &msg, &mut warnings, &mut errors);

    let (status, msg) = check_i2c(Path::new("/dev"), verbose);
    print_check("I2C", status, &msg, &mut warnings, &mut errors);

    let (status, msg) = check_camera(Path::new("/dev"), verbose);
    print_check("Camera", status, &msg, &mut warnings, &mut errors);

    let (status, msg) = check_config(verbose);
    print_check("Config", status, &msg, &mut warnings, &mut errors);

    let (status, msg) = check_home_dir(verbose);
    print_check("Home directory", status, &msg, &mut warnings, &mut errors);

    // Summary
    println!();
    println!("{}", summary(warnings, errors));
    if errors > 0 {
        println!(
            "  {} Run `pinode doctor --verbose` for more details",
            "Tip:".dimmed()
        );
    } else if warnings > 0 {
        println!(
            "  {} Simulation backends still work without hardware",
            "Note:".dimmed()
        );
    }

    Ok(())
}

fn summary(warnings: i32, errors: i32) -> String {
    if errors > 0 {
        format!("{} {} error(s), {} warning(s)", "[ERR]".red(), errors, warnings)
    } else if warnings > 0 {
        format!("{} {} warning(s), no errors", "[WARN]".yellow(), warnings)
    } else {
        format!("{} All checks passed!", "[OK]".green())
    }
}

fn print_check(name: &str, status: CheckStatus, msg: &str, warnings: &mut i32, errors: &mut i32) {
    let (icon, color_msg) = match status {
        CheckStatus::Ok => ("[OK]".green(), msg.normal()),
        CheckStatus::Warning => {
            *warnings += 1;
            ("[WARN]".yellow(), msg.yellow())
        }
        CheckStatus::Error => {
            *errors += 1;
            ("[ERR]".red(), msg.red())
        }
    };
    println!("  {} {} {}", icon, format!("{:20}", name).cyan(), color_msg);
}

fn check_architecture(_verbose: bool) -> (CheckStatus, String) {
    let arch = std::env::consts::ARCH;
    match arch {
        "arm" | "aarch64" => (CheckStatus::Ok, arch.to_string()),
        _ => (
            CheckStatus::Warning,
            format!("{} (not a Raspberry Pi, simulation only)", arch),
        ),
    }
}

/// Names under `dev` starting with `prefix`, sorted
pub fn device_nodes(dev: &Path, prefix: &str) -> Vec<String> {
    let mut nodes: Vec<String> = match fs::read_dir(dev) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with(prefix))
            .collect(),
        Err(_) => Vec::new(),
    };
    nodes.sort();
    nodes
}

fn backends_note(available: Vec<&'static str>, verbose: bool) -> String {
    if verbose {
        format!(" [backends: {}]", available.join(", "))
    } else {
        String::new()
    }
}

pub fn check_gpio(dev: &Path, verbose: bool) -> (CheckStatus, String) {
    let note = backends_note(GpioDriverBackend::available(), verbose);
    if dev.join("gpiomem").exists() {
        (CheckStatus::Ok, format!("/dev/gpiomem present{}", note))
    } else {
        (CheckStatus::Warning, format!("/dev/gpiomem missing{}", note))
    }
}

pub fn check_i2c(dev: &Path, verbose: bool) -> (CheckStatus, String) {
    let note = backends_note(I2cDriverBackend::available(), verbose);
    let buses = device_nodes(dev, "i2c-");
    if buses.is_empty() {
        (
            CheckStatus::Warning,
            format!("No I2C bus found (enable it with raspi-config){}", note),
        )
    } else {
        (CheckStatus::Ok, format!("{}{}", buses.join(", "), note))
    }
}

pub fn check_camera(dev: &Path, verbose: bool) -> (CheckStatus, String) {
    let note = backends_note(CameraDriverBackend::available(), verbose);
    let videos = device_nodes(dev, "video");
    if videos.is_empty() {
        (CheckStatus::Warning, format!("No video device found{}", note))
    } else {
        (CheckStatus::Ok, format!("{}{}", videos.join(", "), note))
    }
}

fn check_config(verbose: bool) -> (CheckStatus, String) {
    let found = GatewayConfig::search_paths().into_iter().find(|p| p.exists());
    let path = match found {
        Some(path) => path,
        None => {
            return (
                CheckStatus::Warning,
                "No pinode.yaml or pinode.toml found".to_string(),
            )
        }
    };
    match GatewayConfig::from_file(&path) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                let mut msg = format!("{}", path.display());
                if verbose {
                    msg.push_str(&format!(" ({} device(s))", config.enabled_devices().len()));
                }
                (CheckStatus::Ok, msg)
            }
            Err(e) => (CheckStatus::Error, format!("{}: {}", path.display(), e)),
        },
        Err(e) => (CheckStatus::Error, format!("{}: {}", path.display(), e)),
    }
}

fn check_home_dir(_verbose: bool) -> (CheckStatus, String) {
    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return (CheckStatus::Warning, "No home directory".to_string()),
    };
    let media = home.join("public");
    match fs::metadata(&home) {
        Ok(meta) if meta.permissions().readonly() => (
            CheckStatus::Error,
            format!("{} is read-only, camera captures will fail", home.display()),
        ),
        Ok(_) => (
            CheckStatus::Ok,
            format!("captures go to {}", media.join("picamera").display()),
        ),
        Err(e) => (CheckStatus::Error, format!("{}: {}", home.display(), e)),
    }
}
