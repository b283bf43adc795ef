//! JSON configuration and report helpers for marker tracking.

use std::{fs, path::Path};

use marker_track_codes::CodeError;
use serde::{Deserialize, Serialize};

use crate::{DetectorError, DetectorParams, Marker, MarkerDetector, TrackedMarker};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Code(#[from] CodeError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
}

/// A marker to register, as written in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerSpec {
    Square { id: u32 },
    Qr { name: String },
}

impl MarkerSpec {
    pub fn build(&self) -> Result<Marker, CodeError> {
        match self {
            MarkerSpec::Square { id } => Marker::square(*id),
            MarkerSpec::Qr { name } => Ok(Marker::qr(name.clone())),
        }
    }
}

fn default_channels() -> usize {
    3
}

/// Frame geometry, detector parameters and the markers to track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub frame_width: u32,
    pub frame_height: u32,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub detector: DetectorParams,
    #[serde(default)]
    pub markers: Vec<MarkerSpec>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 480,
            channels: default_channels(),
            detector: DetectorParams::default(),
            markers: vec![MarkerSpec::Square { id: 0 }],
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build a detector with every configured marker registered.
    pub fn build_detector(&self) -> Result<MarkerDetector, ConfigError> {
        let mut detector = MarkerDetector::new(
            self.frame_width,
            self.frame_height,
            self.channels,
            self.detector.clone(),
        )?;
        for spec in &self.markers {
            detector.add_marker(spec.build()?)?;
        }
        Ok(detector)
    }
}

/// Markers found on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub timestamp: f64,
    #[serde(default)]
    pub image_path: Option<String>,
    pub markers: Vec<TrackedMarker>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingReport {
    pub config_path: String,
    pub frames: Vec<FrameReport>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TrackingReport {
    pub fn new(config_path: &Path) -> Self {
        Self {
            config_path: config_path.to_string_lossy().into_owned(),
            frames: Vec::new(),
            error: None,
        }
    }

    /// Record a fatal error that stopped the run.
    pub fn set_error(&mut self, err: impl std::fmt::Display) {
        self.error = Some(err.to_string());
    }

    /// Load a report from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tracker.json");
        let cfg = TrackerConfig {
            markers: vec![
                MarkerSpec::Square { id: 5 },
                MarkerSpec::Qr { name: "door".into() },
            ],
            ..TrackerConfig::default()
        };
        cfg.write_json(&path).expect("write");
        let back = TrackerConfig::load_json(&path).expect("load");
        assert_eq!(back.markers, cfg.markers);
        assert_eq!(back.frame_width, 640);
        let det = back.build_detector().expect("detector");
        assert_eq!(det.len(), 2);
    }

    #[test]
    fn minimal_json_uses_defaults() {
        let cfg: TrackerConfig = serde_json::from_str(
            r#"{ "frame_width": 320, "frame_height": 240,
                 "markers": [{ "kind": "square", "id": 7 }] }"#,
        )
        .expect("parse");
        assert_eq!(cfg.channels, 3);
        assert_eq!(cfg.detector.max_scale, 1);
        assert_eq!(cfg.markers, vec![MarkerSpec::Square { id: 7 }]);
    }

    #[test]
    fn bad_configs_fail_to_build() {
        let out_of_range = TrackerConfig {
            markers: vec![MarkerSpec::Square { id: 40 }],
            ..TrackerConfig::default()
        };
        assert!(matches!(
            out_of_range.build_detector(),
            Err(ConfigError::Code(CodeError::IdOutOfRange { .. }))
        ));
        let duplicate = TrackerConfig {
            markers: vec![MarkerSpec::Square { id: 1 }, MarkerSpec::Square { id: 1 }],
            ..TrackerConfig::default()
        };
        assert!(matches!(
            duplicate.build_detector(),
            Err(ConfigError::Detector(DetectorError::DuplicateMarker(_)))
        ));
    }
}
