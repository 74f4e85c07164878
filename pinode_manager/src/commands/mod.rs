pub mod backends;
pub mod check;
pub mod doctor;
pub mod run;

use pinode_core::{GatewayConfig, PinodeResult};
use std::path::Path;

/// Load `path`, or search the standard locations when no path is given
pub fn load_config(path: Option<&Path>) -> PinodeResult<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::from_file(path),
        None => GatewayConfig::find_and_load(),
    }
}
