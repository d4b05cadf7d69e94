// SPDX-License-Identifier: CEPL-1.0
//! `drakon.toml` model.
//!
//! Every field has a default, so a missing file, a missing table or a missing
//! key all fall back to the same values the engine uses without any file.

use serde::Deserialize;
use std::{fs, io, path::Path};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "drakon.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WindowCfg {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    #[serde(default)]
    pub validation: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            frames_in_flight: default_frames_in_flight(),
            vsync: default_vsync(),
            validation: false,
        }
    }
}

impl RenderCfg {
    /// Frames in flight, never below one.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.max(1)
    }
}

fn default_title() -> String {
    "Drakon Game".to_owned()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_clear() -> [f32; 4] {
    [0.1, 0.12, 0.18, 1.0]
}
fn default_frames_in_flight() -> usize {
    2
}
fn default_vsync() -> bool {
    true
}

pub fn parse_config(text: &str) -> Result<AppCfg, ConfigError> {
    Ok(toml::from_str::<AppCfg>(text)?)
}

fn read_config(path: &Path) -> Result<Option<AppCfg>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    parse_config(&text).map(Some)
}

/// Loads `path`, falling back to defaults when it is absent or unreadable.
pub fn load_config(path: &Path) -> AppCfg {
    match read_config(path) {
        Ok(Some(cfg)) => {
            debug!("loaded config from {}", path.display());
            cfg
        }
        Ok(None) => AppCfg::default(),
        Err(e) => {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.title, "Drakon Game");
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.clear_color, [0.1, 0.12, 0.18, 1.0]);
        assert!(cfg.render.vsync);
        assert!(!cfg.render.validation);
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let cfg = parse_config(
            r#"
            [window]
            title = "Hello"

            [render]
            frames_in_flight = 3
            vsync = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "Hello");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.render.frames_in_flight(), 3);
        assert!(!cfg.render.vsync);
        assert_eq!(cfg.render.clear_color, [0.1, 0.12, 0.18, 1.0]);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let cfg = parse_config("[render]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(cfg.render.frames_in_flight, 0);
        assert_eq!(cfg.render.frames_in_flight(), 1);
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = parse_config("[render]\nclear_color = \"red\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("drakon-config-that-does-not-exist.toml");
        assert_eq!(load_config(&path), AppCfg::default());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("drakon-cfg-{}.toml", std::process::id()));
        fs::write(&path, "[window]\nwidth = 640\nheight = 480\n").unwrap();
        let cfg = load_config(&path);
        let _ = fs::remove_file(&path);
        assert_eq!((cfg.window.width, cfg.window.height), (640, 480));
    }
}
