use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{AlignError, AlignResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub orb: OrbConfig,
    pub ransac: RansacConfig,
    pub output: OutputConfig,
}

/// Base thresholds and the bounds of the threshold perturbation grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub reference_threshold: u8,
    pub target_threshold: u8,
    pub threshold_step: u32,
    pub threshold_max_change: u32,
    pub scale_factor_bounds: ScaleBounds,
}

/// Closed interval of acceptable scale factors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScaleBounds {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrbConfig {
    pub max_features: usize,
    pub n_levels: u8,
    pub scale_factor: f32,
    pub fast_threshold: u8,
    pub edge_threshold: u32,
    pub harris_k: f32,
    pub blur_sigma: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RansacConfig {
    pub max_iterations: usize,
    pub homography_threshold: f64,
    pub homography_confidence: f64,
    pub similarity_threshold: f64,
    pub similarity_confidence: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Write a reference/transformed blend under `overlap/`.
    pub overlay: bool,
    /// Worker threads across pairs; 1 keeps the batch sequential.
    pub jobs: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            reference_threshold: 128,
            target_threshold: 128,
            threshold_step: 2,
            threshold_max_change: 20,
            scale_factor_bounds: ScaleBounds::default(),
        }
    }
}

impl Default for ScaleBounds {
    fn default() -> Self {
        Self {
            low: 0.95,
            high: 1.05,
        }
    }
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            max_features: 5000,
            n_levels: 8,
            scale_factor: 1.2,
            fast_threshold: 20,
            edge_threshold: 31,
            harris_k: 0.04,
            blur_sigma: 2.0,
        }
    }
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            homography_threshold: 5.0,
            homography_confidence: 0.995,
            similarity_threshold: 3.0,
            similarity_confidence: 0.99,
            seed: 0x5eed_a11c,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            overlay: true,
            jobs: 1,
        }
    }
}

impl ScaleBounds {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, scale_factor: f64) -> bool {
        self.low <= scale_factor && scale_factor <= self.high
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(self.low >= 0.0) {
            errors.push("the lower scale factor boundary should not be smaller than 0".to_string());
        }
        if !(self.low < self.high) {
            errors.push(
                "the upper scale factor boundary should be greater than the lower boundary"
                    .to_string(),
            );
        }
        errors
    }
}

/// Parses `low,high`, e.g. `0.95,1.05`.
impl FromStr for ScaleBounds {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return Err("please provide a lower and an upper boundary, e.g. 0.95,1.05".to_string());
        }
        let low = parts[0]
            .parse::<f64>()
            .map_err(|e| format!("invalid lower boundary '{}': {}", parts[0], e))?;
        let high = parts[1]
            .parse::<f64>()
            .map_err(|e| format!("invalid upper boundary '{}': {}", parts[1], e))?;
        Ok(Self { low, high })
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AlignResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let parsed = if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|reason| {
            AlignError::InvalidConfig(vec![format!("{}: {}", path.display(), reason)])
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> AlignResult<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| AlignError::InvalidConfig(vec![e.to_string()]))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| AlignError::InvalidConfig(vec![e.to_string()]))?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.search.threshold_step == 0 {
            errors.push("threshold step must be a positive integer".to_string());
        }

        if self.search.threshold_max_change == 0 {
            errors.push("threshold max change must be a positive integer".to_string());
        }

        errors.extend(self.search.scale_factor_bounds.problems());

        if self.orb.max_features == 0 {
            errors.push("ORB max_features must be positive".to_string());
        }

        if self.orb.n_levels == 0 {
            errors.push("ORB n_levels must be at least 1".to_string());
        }

        if self.orb.scale_factor <= 1.0 {
            errors.push("ORB scale_factor must be greater than 1.0".to_string());
        }

        if self.ransac.max_iterations == 0 {
            errors.push("RANSAC max_iterations must be positive".to_string());
        }

        if self.ransac.homography_threshold <= 0.0 || self.ransac.similarity_threshold <= 0.0 {
            errors.push("RANSAC reprojection thresholds must be positive".to_string());
        }

        for confidence in [self.ransac.homography_confidence, self.ransac.similarity_confidence] {
            if !(confidence > 0.0 && confidence < 1.0) {
                errors.push(format!("RANSAC confidence {} must lie in (0, 1)", confidence));
            }
        }

        if self.output.jobs == 0 {
            errors.push("jobs must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validated copy, or every violated rule as one error.
    pub fn validated(self) -> AlignResult<Self> {
        self.validate().map_err(AlignError::InvalidConfig)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let config = Config::default();
        assert_eq!(config.search.threshold_step, 2);
        assert_eq!(config.search.threshold_max_change, 20);
        assert_eq!(config.search.scale_factor_bounds, ScaleBounds::new(0.95, 1.05));
        assert_eq!(config.orb.max_features, 5000);
        assert_eq!(config.ransac.homography_threshold, 5.0);
        assert!(config.output.overlay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scale_bounds_parsing() {
        let bounds: ScaleBounds = "0.9, 1.1".parse().unwrap();
        assert_eq!(bounds, ScaleBounds::new(0.9, 1.1));
        assert!("0.9".parse::<ScaleBounds>().is_err());
        assert!("0.9,1.1,1.2".parse::<ScaleBounds>().is_err());
        assert!("a,1.1".parse::<ScaleBounds>().is_err());
    }

    #[test]
    fn test_scale_bounds_are_inclusive() {
        let bounds = ScaleBounds::new(0.95, 1.05);
        assert!(bounds.contains(0.95));
        assert!(bounds.contains(1.05));
        assert!(bounds.contains(1.0));
        assert!(!bounds.contains(0.9499));
        assert!(!bounds.contains(-1.0));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = Config::default();
        config.search.threshold_step = 0;
        config.search.scale_factor_bounds = ScaleBounds::new(-0.5, -1.0);
        config.output.jobs = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(Config::default().validated().is_ok());
    }

    #[test]
    fn test_round_trip_through_toml_and_json() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.search.reference_threshold = 90;
        config.output.overlay = false;

        let toml_path = dir.path().join("aligner.toml");
        config.save_to_file(&toml_path, ConfigFormat::Toml).unwrap();
        assert_eq!(Config::load_from_file(&toml_path).unwrap(), config);

        let json_path = dir.path().join("aligner.json");
        config.save_to_file(&json_path, ConfigFormat::Json).unwrap();
        assert_eq!(Config::load_from_file(&json_path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[search]\nthreshold_step = 4\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.search.threshold_step, 4);
        assert_eq!(config.search.threshold_max_change, 20);
        assert_eq!(config.orb, OrbConfig::default());
    }
}
