use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub display: DisplayConfig,
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub allow_test_pattern: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub blur_radius: u32,
    pub segment_command: String,
    pub segment_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub photo_dir: PathBuf,
    pub background_dir: PathBuf,
    pub config_file: PathBuf,
    pub default_user: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: DisplayConfig {
                width: 1920,
                height: 1080,
                fullscreen: true,
            },
            camera: CameraConfig {
                width: 1280,
                height: 720,
                quality: 85,
                allow_test_pattern: true,
            },
            pipeline: PipelineConfig {
                blur_radius: 14,
                segment_command: "photobooth-segment".to_string(),
                segment_timeout_secs: 5,
            },
            storage: StorageConfig {
                photo_dir: PathBuf::from("photos"),
                background_dir: PathBuf::from("backgrounds"),
                config_file: PathBuf::from("photobooth.toml"),
                default_user: "guest".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("photobooth.toml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save()?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(&self.storage.config_file)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        // Validate display settings
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow::anyhow!("Invalid display dimensions"));
        }

        // Validate camera settings
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow::anyhow!("Invalid camera dimensions"));
        }

        if self.camera.quality == 0 || self.camera.quality > 100 {
            return Err(anyhow::anyhow!(
                "Camera quality must be between 1 and 100, got {}",
                self.camera.quality
            ));
        }

        // Validate pipeline settings
        if self.pipeline.blur_radius == 0 || self.pipeline.blur_radius > 64 {
            return Err(anyhow::anyhow!(
                "Blur radius must be between 1 and 64, got {}",
                self.pipeline.blur_radius
            ));
        }

        if self.pipeline.segment_command.trim().is_empty() {
            return Err(anyhow::anyhow!("Segmentation command must not be empty"));
        }

        if self.pipeline.segment_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Segmentation timeout must be at least 1s"));
        }

        if self.storage.default_user.trim().is_empty() {
            return Err(anyhow::anyhow!("Default user must not be empty"));
        }

        Ok(())
    }

    pub fn create_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.photo_dir)
            .with_context(|| format!("Failed to create photo directory: {}",
                self.storage.photo_dir.display()))?;

        std::fs::create_dir_all(&self.storage.background_dir)
            .with_context(|| format!("Failed to create background directory: {}",
                self.storage.background_dir.display()))?;

        log::info!("Created necessary directories");
        Ok(())
    }

    // Helper methods for common operations
    pub fn segment_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pipeline.segment_timeout_secs)
    }
}

// Configuration builder for easier setup
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn display_size(mut self, width: u32, height: u32) -> Self {
        self.config.display.width = width;
        self.config.display.height = height;
        self
    }

    pub fn fullscreen(mut self, enabled: bool) -> Self {
        self.config.display.fullscreen = enabled;
        self
    }

    pub fn camera_size(mut self, width: u32, height: u32) -> Self {
        self.config.camera.width = width;
        self.config.camera.height = height;
        self
    }

    pub fn blur_radius(mut self, radius: u32) -> Self {
        self.config.pipeline.blur_radius = radius;
        self
    }

    pub fn allow_test_pattern(mut self, allowed: bool) -> Self {
        self.config.camera.allow_test_pattern = allowed;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Environment-specific configuration presets
impl Config {
    pub fn kiosk_1080p() -> Self {
        Config {
            display: DisplayConfig {
                width: 1920,
                height: 1080,
                fullscreen: true,
            },
            ..Default::default()
        }
    }

    pub fn development_desktop() -> Self {
        Config {
            display: DisplayConfig {
                width: 1280,
                height: 800,
                fullscreen: false,
            },
            camera: CameraConfig {
                width: 640,
                height: 480,
                allow_test_pattern: true,
                ..Config::default().camera
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.blur_radius, 14);
        assert!(config.camera.allow_test_pattern);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .display_size(1280, 800)
            .fullscreen(false)
            .camera_size(640, 480)
            .blur_radius(20)
            .allow_test_pattern(false)
            .build()
            .unwrap();

        assert_eq!(config.display.width, 1280);
        assert!(!config.display.fullscreen);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.pipeline.blur_radius, 20);
        assert!(!config.camera.allow_test_pattern);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Test invalid blur radius
        config.pipeline.blur_radius = 0;
        assert!(config.validate().is_err());

        // Test invalid camera quality
        config.pipeline.blur_radius = 14;
        config.camera.quality = 0;
        assert!(config.validate().is_err());

        // Test empty segmentation command
        config.camera.quality = 85;
        config.pipeline.segment_command = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let original_config = Config::development_desktop();
        original_config.save_to_file(&config_path).unwrap();

        let loaded_config = Config::load_from_file(&config_path).unwrap();

        assert_eq!(original_config.display.width, loaded_config.display.width);
        assert_eq!(original_config.camera.width, loaded_config.camera.width);
        assert_eq!(
            original_config.pipeline.segment_command,
            loaded_config.pipeline.segment_command
        );
    }

    #[test]
    fn test_preset_configs() {
        assert!(Config::kiosk_1080p().validate().is_ok());
        assert!(Config::development_desktop().validate().is_ok());
    }
}
