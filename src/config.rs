use std::path::PathBuf;
use std::sync::Arc;

use nix::errno::Errno;
use parking_lot::RwLock;
use thiserror::Error;

pub type ConfigRef = Arc<RwLock<CacheConfig>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown option: {0}")]
    NotFound(String),
    #[error("Invalid value for {option}: {value}")]
    InvalidValue { option: String, value: String },
}

impl ConfigError {
    pub fn errno(&self) -> i32 {
        match self {
            ConfigError::NotFound(_) => Errno::ENOENT as i32,
            ConfigError::InvalidValue { .. } => Errno::EINVAL as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Root of the local mirror of the bucket.
    pub cache_dir: PathBuf,
    /// Permission bits for directories created under the cache root.
    pub dir_mode: u32,
    /// Keep the cache root itself when purging it.
    pub preserve_root: bool,
    /// Purge the cache root during preflight.
    pub purge_on_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/var/cache/s3cachefs"),
            dir_mode: 0o700,
            preserve_root: true,
            purge_on_start: false,
        }
    }
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            option: option.to_string(),
            value: value.to_string(),
        }),
    }
}

impl CacheConfig {
    /// Applies one `-o` option, `key=value` or a bare `key` meaning true.
    pub fn apply_option(&mut self, option: &str) -> Result<(), ConfigError> {
        let (key, value) = option.split_once('=').unwrap_or((option, ""));
        match key {
            "use_cache" | "cache_dir" => {
                if value.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        option: key.to_string(),
                        value: value.to_string(),
                    });
                }
                self.cache_dir = PathBuf::from(value);
            }
            "dir_mode" => {
                let digits = value.trim_start_matches("0o");
                self.dir_mode = u32::from_str_radix(digits, 8)
                    .ok()
                    .filter(|mode| *mode <= 0o7777)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        option: key.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "preserve_root" => self.preserve_root = parse_bool(key, value)?,
            "purge" | "del_cache" => self.purge_on_start = parse_bool(key, value)?,
            _ => return Err(ConfigError::NotFound(key.to_string())),
        }
        Ok(())
    }
}

pub fn create_config(config: CacheConfig) -> ConfigRef {
    Arc::new(RwLock::new(config))
}
