//! Configuration assembly for the CLI
//!
//! The stack description comes from an optional JSON file; a few fields can
//! be overridden on the command line. Overrides are re-validated.

use std::path::Path;
use std::time::Duration;
use tracing::debug;
use webfleet_common::ConfigError;

pub use webfleet_common::StackConfig;

/// Command-line overrides applied on top of the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub stack_name: Option<String>,
    pub region: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut StackConfig) {
        if let Some(name) = &self.stack_name {
            config.stack_name = name.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
    }

    fn is_empty(&self) -> bool {
        self.stack_name.is_none() && self.region.is_none()
    }
}

/// AWS access settings for deploy and destroy
#[derive(Debug, Clone)]
pub struct AwsSettings {
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub profile: Option<String>,
    /// Bucket for staging templates too large to send inline
    pub staging_bucket: Option<String>,
}

/// Runtime behavior flags
#[derive(Debug, Clone)]
pub struct RuntimeFlags {
    /// Wait for stack operations to finish
    pub wait: bool,
    /// Give up waiting after this long
    pub timeout: Duration,
}

/// Load the stack configuration, falling back to the stock stack when no
/// file is given
pub fn load_stack_config(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<StackConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading stack configuration");
            StackConfig::load(path)?
        }
        None => StackConfig::default(),
    };

    if !overrides.is_empty() {
        overrides.apply(&mut config);
        config.check()?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = load_stack_config(None, &Overrides::default()).unwrap();
        assert_eq!(config, StackConfig::default());
    }

    #[test]
    fn test_overrides_applied() {
        let overrides = Overrides {
            stack_name: Some("StagingWeb".to_string()),
            region: Some("eu-west-1".to_string()),
        };
        let config = load_stack_config(None, &overrides).unwrap();
        assert_eq!(config.stack_name, "StagingWeb");
        assert_eq!(config.region, "eu-west-1");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = Overrides {
            stack_name: Some("not a stack name".to_string()),
            region: None,
        };
        let err = load_stack_config(None, &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_file_sets_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webfleet.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"stack_name": "FromFile"}}"#).unwrap();

        let config = load_stack_config(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(config.stack_name, "FromFile");
        assert_eq!(config.base_dir, dir.path());
    }

    #[test]
    fn test_missing_file() {
        let err = load_stack_config(
            Some(Path::new("/nonexistent/webfleet.json")),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
