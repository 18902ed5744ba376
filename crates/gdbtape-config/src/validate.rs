use crate::config::Config;
use crate::error::ConfigError;

/// Validate a [`Config`], returning every violation found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config
        .reproducer
        .path
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        errors.push(ConfigError::Validation {
            field: "reproducer.path".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    if config.reproducer.force && !config.reproducer.generate {
        errors.push(ConfigError::Validation {
            field: "reproducer.force".to_string(),
            message: "only applies when reproducer.generate is true".to_string(),
        });
    }

    if config.history.capacity == 0 {
        errors.push(ConfigError::Validation {
            field: "history.capacity".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Collapse [`validate`] into its first error.
pub(crate) fn validate_first(config: &Config) -> Result<(), ConfigError> {
    validate(config).map_err(|errors| {
        errors
            .into_iter()
            .next()
            .unwrap_or_else(|| ConfigError::Validation {
                field: "unknown".to_string(),
                message: "validation failed".to_string(),
            })
    })
}
