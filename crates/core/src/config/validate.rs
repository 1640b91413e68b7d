use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Controller intervals are not 0
/// - Profile ids are present and unique
/// - Profile descriptions are not empty
/// - The default profile exists
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.controller.start_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "controller.start_timeout_ms cannot be 0".to_string(),
        ));
    }
    if config.controller.progress_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "controller.progress_interval_ms cannot be 0".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for profile in &config.profiles {
        if profile.id.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "profile '{}' has an empty id",
                profile.name
            )));
        }
        if profile.pipeline.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "profile '{}' has an empty pipeline",
                profile.id
            )));
        }
        if !seen.insert(profile.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate profile id '{}'",
                profile.id
            )));
        }
    }

    if !seen.contains(config.default_profile.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "default_profile '{}' is not a configured profile",
            config.default_profile
        )));
    }

    Ok(())
}
