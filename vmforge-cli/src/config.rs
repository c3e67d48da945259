//! Build config files.
//!
//! A config file is YAML (`.yaml`/`.yml`) or JSON with a `type` field
//! selecting the builder:
//!
//! ```yaml
//! type: iso
//! build_name: ubuntu
//! iso_url: file:///isos/ubuntu-24.04-arm64.iso
//! iso_checksum: none
//! ssh_username: ubuntu
//! shutdown_command: sudo shutdown -h now
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use vmforge::builder::{Builder, BundleBuilder, BundleConfig, IsoBuilder, IsoConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BuildConfig {
    /// Create a VM and install it from an ISO.
    Iso(IsoConfig),
    /// Start from an existing `.utm` bundle.
    Utm(BundleConfig),
}

impl BuildConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))?
        };
        Ok(config)
    }

    /// Validate, returning the builder ready to run plus any warnings.
    pub fn prepare(self) -> anyhow::Result<(Box<dyn Builder>, Vec<String>)> {
        let mut builder: Box<dyn Builder> = match self {
            BuildConfig::Iso(c) => Box::new(IsoBuilder::new(c)),
            BuildConfig::Utm(c) => Box::new(BundleBuilder::new(c)),
        };
        let warnings = builder.prepare()?;
        Ok((builder, warnings))
    }
}

pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("Warning: {warning}");
    }
}
