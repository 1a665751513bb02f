use super::{
    types::{Settings, StorageBackend},
    ConfigError,
};

/// Validate settings
/// Currently validates:
/// - public URL prefix is set
/// - the selected storage backend has its section
/// - compression parameters are in range
/// - progress weights are not all zero
pub fn validate_config(settings: &Settings) -> Result<(), ConfigError> {
    let storage = &settings.storage;

    if storage.public_url_prefix.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.public_url_prefix cannot be empty".to_string(),
        ));
    }

    if storage.bucket.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.bucket cannot be empty".to_string(),
        ));
    }

    match storage.backend {
        StorageBackend::Http => match &storage.http {
            Some(http) if !http.endpoint.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::ValidationError(
                    "storage.http.endpoint is required for the http backend".to_string(),
                ))
            }
        },
        StorageBackend::Filesystem => {
            if storage.filesystem.is_none() {
                return Err(ConfigError::ValidationError(
                    "storage.filesystem section is required for the filesystem backend"
                        .to_string(),
                ));
            }
        }
    }

    let compression = &settings.compression;
    if !(1..=100).contains(&compression.image_quality) {
        return Err(ConfigError::ValidationError(format!(
            "compression.image_quality must be within 1..=100, got {}",
            compression.image_quality
        )));
    }
    if compression.video_crf > 51 {
        return Err(ConfigError::ValidationError(format!(
            "compression.video_crf must be within 0..=51, got {}",
            compression.video_crf
        )));
    }
    if compression.image_max_dimension == 0 || compression.video_max_dimension == 0 {
        return Err(ConfigError::ValidationError(
            "compression max dimensions cannot be 0".to_string(),
        ));
    }
    if compression.max_parallel_images == 0 || compression.max_parallel_videos == 0 {
        return Err(ConfigError::ValidationError(
            "compression parallelism bounds cannot be 0".to_string(),
        ));
    }

    if settings.progress.is_zero() {
        return Err(ConfigError::ValidationError(
            "progress weights cannot all be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionConfig;
    use crate::config::{FsStorageConfig, HttpStorageConfig, StorageConfig, VaultConfig};
    use crate::progress::ProgressWeights;
    use std::path::PathBuf;

    fn valid_settings() -> Settings {
        Settings {
            vault: VaultConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::Filesystem,
                bucket: "media".to_string(),
                subfolder: "attachments".to_string(),
                public_url_prefix: "https://cdn.example".to_string(),
                http: None,
                filesystem: Some(FsStorageConfig {
                    root: PathBuf::from("/srv"),
                    buffer_size: 1024,
                }),
            },
            compression: CompressionConfig::default(),
            progress: ProgressWeights::default(),
        }
    }

    #[test]
    fn test_validate_valid_settings() {
        assert!(validate_config(&valid_settings()).is_ok());
    }

    #[test]
    fn test_validate_empty_url_prefix_fails() {
        let mut settings = valid_settings();
        settings.storage.public_url_prefix = "  ".to_string();
        let result = validate_config(&settings);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_http_backend_requires_endpoint() {
        let mut settings = valid_settings();
        settings.storage.backend = StorageBackend::Http;
        assert!(validate_config(&settings).is_err());

        settings.storage.http = Some(HttpStorageConfig {
            endpoint: "https://s3.example.com".to_string(),
            token: None,
            timeout_secs: 0,
        });
        assert!(validate_config(&settings).is_ok());
    }

    #[test]
    fn test_validate_quality_out_of_range() {
        let mut settings = valid_settings();
        settings.compression.image_quality = 0;
        assert!(validate_config(&settings).is_err());

        settings.compression.image_quality = 101;
        assert!(validate_config(&settings).is_err());
    }

    #[test]
    fn test_validate_crf_out_of_range() {
        let mut settings = valid_settings();
        settings.compression.video_crf = 52;
        assert!(validate_config(&settings).is_err());
    }

    #[test]
    fn test_validate_zero_weights() {
        let mut settings = valid_settings();
        settings.progress = ProgressWeights {
            image_multiplier: 0,
            video_multiplier: 0,
            upload_multiplier: 0,
            link_work: 0,
        };
        assert!(validate_config(&settings).is_err());
    }
}
