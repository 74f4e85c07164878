//! Backends command - list what this build can drive

use colored::*;
use pinode_library::{CameraDriverBackend, GpioDriverBackend, I2cDriverBackend, DEVICE_KINDS};

pub fn run_backends() {
    println!("{}", "Compiled backends".green().bold());
    print_row("GPIO", &GpioDriverBackend::available());
    print_row("I2C", &I2cDriverBackend::available());
    print_row("Camera", &CameraDriverBackend::available());
    println!();
    println!("{}", "Device kinds".green().bold());
    print_row("Kinds", &DEVICE_KINDS);
}

fn print_row(name: &str, items: &[&str]) {
    println!("  {} {}", format!("{:10}", name).cyan(), items.join(", "));
}
