use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::{Display, EnumString};

use crate::error::StartupError;

const DEFAULT_CONFIG_PATH: &str = "config/plantguard.yaml";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub format: ModelFormat,
    pub device: DevicePreference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ModelFormat {
    /// A traced or scripted module saved with `torch.jit.save`.
    TorchScript,
    /// Bare ResNet-18 weights with a 3-class head, in `.safetensors` or `.ot` form.
    ///
    /// A PyTorch `.pth` state dict is not readable here. Convert it once with
    /// `safetensors.torch.save_file(torch.load("model.pth"), "model.safetensors")`.
    #[serde(rename = "resnet18")]
    #[strum(serialize = "resnet18")]
    ResNet18,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DevicePreference {
    Auto,
    Cpu,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            workers: None,
            static_dir: default_static_dir(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("plantguard_model.pt"),
            format: ModelFormat::TorchScript,
            device: DevicePreference::Auto,
        }
    }
}

fn default_static_dir() -> PathBuf {
    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        PathBuf::from(format!("{}/../static", manifest_dir))
    } else {
        PathBuf::from("static")
    }
}

impl Config {
    /// Reads the optional YAML file named by `PLANTGUARD_CONFIG`, then applies
    /// environment overrides. `.env` is expected to be loaded already.
    pub fn load() -> Result<Self, StartupError> {
        let explicit = std::env::var("PLANTGUARD_CONFIG").ok();
        let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
        let mut config = if Path::new(path).exists() {
            log::info!("Loading configuration from {}", path);
            Self::from_yaml(&std::fs::read_to_string(path)?)?
        } else if explicit.is_some() {
            return Err(StartupError::Config(format!(
                "Config file {} does not exist",
                path
            )));
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(source: &str) -> Result<Self, StartupError> {
        let config: Config = serde_yaml::from_str(source)?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), StartupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_var("PORT", &port)?;
        }
        if let Some(workers) = lookup("WORKERS") {
            self.workers = Some(parse_var("WORKERS", &workers)?);
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            self.static_dir = PathBuf::from(dir);
        }
        if let Some(limit) = lookup("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", &limit)?;
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(format) = lookup("MODEL_FORMAT") {
            self.model.format = parse_var("MODEL_FORMAT", &format)?;
        }
        if let Some(device) = lookup("MODEL_DEVICE") {
            self.model.device = parse_var("MODEL_DEVICE", &device)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if self.max_upload_bytes == 0 {
            return Err(StartupError::Config(
                "max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(StartupError::Config(
                "workers must be greater than zero".to_string(),
            ));
        }
        if self.model.format == ModelFormat::ResNet18
            && self.model.path.extension().is_some_and(|ext| ext == "pth")
        {
            return Err(StartupError::Config(format!(
                "{} is a PyTorch state dict; convert it to .safetensors for the resnet18 format",
                self.model.path.display()
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, StartupError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| StartupError::Config(format!("Invalid {} value {:?}: {}", key, value, e)))
}
