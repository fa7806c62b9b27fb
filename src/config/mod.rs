//! Application Configuration
//!
//! User settings stored in TOML format, plus the typed engine configuration
//! that is handed to the engine as a flat JSON document at init time.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::capture::frame::{PixelFormat, Rotation};
use crate::errors::{MrzError, MrzResult};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine configuration forwarded to `init`
    pub engine: EngineConfig,
    /// Capture settings
    pub capture: CaptureSettings,
    /// Frame pipeline settings
    pub pipeline: PipelineSettings,
    /// Overlay settings
    pub overlay: OverlaySettings,
}

impl AppConfig {
    /// Validate every section
    pub fn validate(&self) -> MrzResult<()> {
        self.engine.validate()?;
        self.capture.validate()?;
        Ok(())
    }
}

/// Engine log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    Verbose,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl DebugLevel {
    /// Matching `tracing` filter directive
    pub fn as_filter(&self) -> &'static str {
        match self {
            DebugLevel::Verbose => "trace",
            DebugLevel::Info => "info",
            DebugLevel::Warn => "warn",
            DebugLevel::Error | DebugLevel::Fatal => "error",
        }
    }
}

/// Accuracy tier of the zone segmenter. Higher tiers are slower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmenterAccuracy {
    VeryHigh,
    #[default]
    High,
    Medium,
    Low,
    VeryLow,
}

/// Interpolation used when the engine resizes the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
}

const fn is_arm() -> bool {
    cfg!(any(target_arch = "arm", target_arch = "aarch64"))
}

/// Engine settings. Serialized as-is into the init document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine log verbosity
    pub debug_level: DebugLevel,
    /// Dump every input image into `debug_internal_data_path`
    pub debug_write_input_image_enabled: bool,
    /// Folder used for debug dumps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_internal_data_path: Option<String>,
    /// Worker threads inside the engine, -1 lets the engine decide
    pub num_threads: i32,
    /// Use the GPU when one is available
    pub gpgpu_enabled: bool,
    /// Split work between CPU and GPU
    pub gpgpu_workload_balancing_enabled: bool,
    /// Feed recognition results back into the segmenter
    pub backpropagation_enabled: bool,
    /// Second pass over vertically oriented text
    pub vertical_check_enabled: bool,
    /// Improved edge and line detection
    pub ielcd_enabled: bool,
    /// Segmenter accuracy tier
    pub segmenter_accuracy: SegmenterAccuracy,
    /// Gamma correction, -1 for automatic
    pub gamma: f32,
    /// Resize interpolation
    pub interpolation: Interpolation,
    /// Minimum lines a zone must contain to be reported
    pub min_num_lines: u32,
    /// Region of interest as [left, right, top, bottom]. All zeros means the whole image.
    pub roi: [f32; 4],
    /// Minimum zone score in [0, 1]
    pub min_score: f32,
    /// Folder holding the engine models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_folder: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_level: DebugLevel::Info,
            debug_write_input_image_enabled: false,
            debug_internal_data_path: None,
            num_threads: -1,
            gpgpu_enabled: true,
            gpgpu_workload_balancing_enabled: is_arm(),
            backpropagation_enabled: !is_arm(),
            vertical_check_enabled: !is_arm(),
            ielcd_enabled: !is_arm(),
            segmenter_accuracy: SegmenterAccuracy::High,
            gamma: -1.0,
            interpolation: Interpolation::Bilinear,
            min_num_lines: 2,
            roi: [0.0; 4],
            min_score: 0.0,
            assets_folder: None,
        }
    }
}

impl EngineConfig {
    /// Check ranges the engine would otherwise reject at init
    pub fn validate(&self) -> MrzResult<()> {
        if self.num_threads < -1 {
            return Err(MrzError::Configuration(format!(
                "num_threads must be -1 or greater, got {}",
                self.num_threads
            )));
        }
        if !self.gamma.is_finite() || (self.gamma != -1.0 && self.gamma <= 0.0) {
            return Err(MrzError::Configuration(format!(
                "gamma must be -1 (auto) or greater than zero, got {}",
                self.gamma
            )));
        }
        if self.min_num_lines == 0 {
            return Err(MrzError::Configuration(
                "min_num_lines must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(MrzError::Configuration(format!(
                "min_score must be within [0, 1], got {}",
                self.min_score
            )));
        }
        if self.has_roi() {
            let [left, right, top, bottom] = self.roi;
            if self.roi.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(MrzError::Configuration(format!(
                    "roi values must be finite and non-negative, got {:?}",
                    self.roi
                )));
            }
            if left >= right || top >= bottom {
                return Err(MrzError::Configuration(format!(
                    "roi must satisfy left < right and top < bottom, got {:?}",
                    self.roi
                )));
            }
        }
        Ok(())
    }

    /// Whether a detection region narrower than the full image is configured
    pub fn has_roi(&self) -> bool {
        self.roi.iter().any(|v| *v != 0.0)
    }

    /// Validate and render the flat JSON document passed to `init`
    pub fn to_json(&self) -> MrzResult<String> {
        self.validate()?;
        serde_json::to_string(self).map_err(|e| MrzError::Configuration(e.to_string()))
    }
}

/// Camera capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Layout of the frames the camera delivers
    pub pixel_format: PixelFormat,
    /// Sensor frame width
    pub width: u32,
    /// Sensor frame height
    pub height: u32,
    /// Frames delivered per second
    pub fps: u32,
    /// Sensor rotation relative to the display, in degrees
    pub rotation_degrees: u32,
    /// Number of frame buffers the camera may have outstanding
    pub pool_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Yuv420p,
            width: 1280,
            height: 720,
            fps: 30,
            rotation_degrees: 0,
            pool_size: 3,
        }
    }
}

impl CaptureSettings {
    pub fn validate(&self) -> MrzResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MrzError::Configuration(format!(
                "capture size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(MrzError::Configuration("capture fps must be non-zero".to_string()));
        }
        if self.pool_size == 0 {
            return Err(MrzError::Configuration(
                "capture pool_size must be at least 1".to_string(),
            ));
        }
        self.rotation()?;
        Ok(())
    }

    /// Sensor rotation as a typed value
    pub fn rotation(&self) -> MrzResult<Rotation> {
        Rotation::from_degrees(self.rotation_degrees).ok_or_else(|| {
            MrzError::Configuration(format!(
                "rotation must be 0, 90, 180 or 270, got {}",
                self.rotation_degrees
            ))
        })
    }
}

/// Frame pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Name given to the engine worker thread
    pub worker_name: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_name: "mrz-engine".to_string(),
        }
    }
}

/// Overlay-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Zone border stroke width in points
    pub stroke_width: f32,
    /// Recognized line text size
    pub text_size: f32,
    /// Confidence label text size
    pub confidence_text_size: f32,
    /// Processing time label text size
    pub timing_text_size: f32,
    /// Draw the configured detection region
    pub draw_roi: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            stroke_width: 3.0,
            text_size: 12.0,
            confidence_text_size: 10.0,
            timing_text_size: 10.0,
            draw_roi: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.engine.debug_level, DebugLevel::Info);
        assert_eq!(config.engine.num_threads, -1);
        assert!(config.engine.gpgpu_enabled);
        assert_eq!(config.engine.segmenter_accuracy, SegmenterAccuracy::High);
        assert_eq!(config.engine.interpolation, Interpolation::Bilinear);
        assert_eq!(config.engine.min_num_lines, 2);
        assert!(!config.engine.has_roi());

        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.capture.pool_size, 3);
        assert_eq!(config.pipeline.worker_name, "mrz-engine");
        assert!((config.overlay.stroke_width - 3.0).abs() < 0.01);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_arch_dependent_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.gpgpu_workload_balancing_enabled, is_arm());
        assert_eq!(engine.ielcd_enabled, !is_arm());
        assert_eq!(engine.backpropagation_enabled, !is_arm());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.engine.segmenter_accuracy = SegmenterAccuracy::VeryHigh;
        config.engine.roi = [10.0, 500.0, 20.0, 300.0];
        config.capture.rotation_degrees = 90;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.engine, parsed.engine);
        assert_eq!(parsed.capture.rotation().unwrap(), Rotation::Deg90);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [engine]
            debug_level = "verbose"
            interpolation = "bicubic"

            [capture]
            pixel_format = "nv21"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.engine.debug_level, DebugLevel::Verbose);
        assert_eq!(parsed.engine.interpolation, Interpolation::Bicubic);
        assert_eq!(parsed.engine.min_num_lines, 2);
        assert_eq!(parsed.capture.width, 1280);
        assert_eq!(parsed.capture.pixel_format, PixelFormat::Nv21);
    }

    #[test]
    fn test_engine_json_is_flat() {
        let mut engine = EngineConfig::default();
        engine.assets_folder = Some("/opt/mrz/assets".to_string());

        let json = engine.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["debug_level"], "info");
        assert_eq!(value["segmenter_accuracy"], "high");
        assert_eq!(value["num_threads"], -1);
        assert_eq!(value["assets_folder"], "/opt/mrz/assets");
        assert_eq!(value["roi"].as_array().unwrap().len(), 4);
        assert!(value.get("debug_internal_data_path").is_none());
    }

    #[test]
    fn test_invalid_engine_values_rejected() {
        let cases: Vec<Box<dyn Fn(&mut EngineConfig)>> = vec![
            Box::new(|c| c.num_threads = -2),
            Box::new(|c| c.gamma = 0.0),
            Box::new(|c| c.gamma = f32::NAN),
            Box::new(|c| c.min_num_lines = 0),
            Box::new(|c| c.min_score = 1.5),
            Box::new(|c| c.roi = [100.0, 50.0, 0.0, 10.0]),
            Box::new(|c| c.roi = [-1.0, 50.0, 0.0, 10.0]),
        ];

        for mutate in cases {
            let mut engine = EngineConfig::default();
            mutate(&mut engine);
            let err = engine.to_json().unwrap_err();
            assert!(matches!(err, MrzError::Configuration(_)), "{err}");
        }
    }

    #[test]
    fn test_debug_level_filter() {
        assert_eq!(DebugLevel::Verbose.as_filter(), "trace");
        assert_eq!(DebugLevel::Fatal.as_filter(), "error");
    }

    #[test]
    fn test_invalid_capture_rotation() {
        let mut config = AppConfig::default();
        config.capture.rotation_degrees = 45;
        assert!(matches!(config.validate(), Err(MrzError::Configuration(_))));
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.engine, loaded.engine);
        assert_eq!(config.capture.fps, loaded.capture.fps);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
