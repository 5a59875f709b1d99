use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_SOURCE: &str = "stub://lot_camera";
const DEFAULT_MODEL: &str = "stub://vehicles";
const DEFAULT_LOT_ID: i64 = 1;
const DEFAULT_LOT_NAME: &str = "Main Lot";
const DEFAULT_FPS: f64 = 30.0;
const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_DB_PATH: &str = "lotwatch.db";

#[derive(Debug, Deserialize, Default)]
struct LotwatchdConfigFile {
    source: Option<String>,
    model: Option<String>,
    lot: Option<LotConfigFile>,
    capture: Option<CaptureConfigFile>,
    storage: Option<StorageConfigFile>,
    debug: Option<DebugConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct LotConfigFile {
    id: Option<i64>,
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    db_path: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DebugConfigFile {
    window: Option<bool>,
    dump_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LotwatchdConfig {
    pub source: String,
    pub model: String,
    pub lot_id: i64,
    pub lot_name: String,
    pub capture: CaptureSettings,
    pub storage: StorageSettings,
    pub debug_window: bool,
    pub debug_dump_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub db_path: String,
    pub enabled: bool,
}

impl LotwatchdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LOTWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LotwatchdConfigFile) -> Self {
        let lot = file.lot.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let debug = file.debug.unwrap_or_default();
        Self {
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            lot_id: lot.id.unwrap_or(DEFAULT_LOT_ID),
            lot_name: lot.name.unwrap_or_else(|| DEFAULT_LOT_NAME.to_string()),
            capture: CaptureSettings {
                fps: capture.fps.unwrap_or(DEFAULT_FPS),
                width: capture.width.unwrap_or(DEFAULT_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_HEIGHT),
            },
            storage: StorageSettings {
                db_path: storage
                    .db_path
                    .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
                enabled: storage.enabled.unwrap_or(true),
            },
            debug_window: debug.window.unwrap_or(false),
            debug_dump_dir: debug
                .dump_dir
                .unwrap_or_else(|| PathBuf::from(crate::engine::DEFAULT_DEBUG_DIR)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("LOTWATCH_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(model) = std::env::var("LOTWATCH_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        if let Ok(lot_id) = std::env::var("LOTWATCH_LOT_ID") {
            self.lot_id = lot_id
                .trim()
                .parse()
                .map_err(|_| anyhow!("LOTWATCH_LOT_ID must be an integer"))?;
        }
        if let Ok(name) = std::env::var("LOTWATCH_LOT_NAME") {
            if !name.trim().is_empty() {
                self.lot_name = name;
            }
        }
        if let Ok(fps) = std::env::var("LOTWATCH_FPS") {
            self.capture.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("LOTWATCH_FPS must be a number"))?;
        }
        if let Ok(path) = std::env::var("LOTWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.storage.db_path = path;
            }
        }
        if let Ok(window) = std::env::var("LOTWATCH_DEBUG_WINDOW") {
            self.debug_window = parse_flag(&window)
                .ok_or_else(|| anyhow!("LOTWATCH_DEBUG_WINDOW must be true/false/1/0"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.lot_name.trim().is_empty() {
            return Err(anyhow!("lot name must not be empty"));
        }
        if !(self.capture.fps.is_finite() && self.capture.fps > 0.0) {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.storage.enabled && self.storage.db_path.trim().is_empty() {
            return Err(anyhow!("db path must not be empty when storage is enabled"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<LotwatchdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
