//! Layered service configuration.
//!
//! Sources, lowest precedence first:
//!
//! | Source                  | Example                   |
//! |-------------------------|---------------------------|
//! | struct defaults         | `tick_rate_hz = 20`       |
//! | optional TOML/JSON file | `overlay.toml`            |
//! | `OVERLAY_*` environment | `OVERLAY_TICK_RATE_HZ=10` |

use crate::error::Result;
use crate::types::OverlayServiceConfig;
use ::config::{Config, Environment, File};
use log::debug;
use std::path::Path;

/// Environment prefix; `OVERLAY_SESSION` sets `session`.
pub const ENV_PREFIX: &str = "OVERLAY";

/// Builds the service config. A missing file is not an error.
pub fn load(path: Option<&Path>) -> Result<OverlayServiceConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        debug!("Reading overlay config from {}", path.display());
        builder = builder.add_source(File::from(path).required(false));
    }
    let config = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?
        .try_deserialize()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("overlay-blocks-absent-config.toml");
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.geometry_cache_capacity, 500);
        assert_eq!(config.fatigue_amplifier, 127);
        assert!(config.bounding_boxes_path.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let path = std::env::temp_dir().join(format!("overlay-blocks-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "session = \"arena\"").unwrap();
        writeln!(file, "geometry_cache_capacity = 64").unwrap();
        writeln!(file, "bounding_boxes_path = \"data/boxes.json\"").unwrap();
        drop(file);

        let config = load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.session, "arena");
        assert_eq!(config.geometry_cache_capacity, 64);
        assert_eq!(config.default_min_height, -64);
        assert_eq!(
            config.bounding_boxes_path.as_deref(),
            Some(Path::new("data/boxes.json"))
        );
    }
}
