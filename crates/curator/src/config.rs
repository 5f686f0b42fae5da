use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use common::DEFAULT_AUDIO_EXTENSIONS;
use library::DEFAULT_JUNK_FILENAMES;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 2;
pub const CONFIG_ENV: &str = "CURATOR_CONFIG";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CuratorConfig {
    pub version: u32,
    pub downloads_root: String,
    pub library_root: String,
    pub overlay_root: String,
    pub backup_root: String,
    /// Empty disables the secondary mirror.
    pub mirror_root: String,
    pub audio_extensions: Vec<String>,
    pub junk_filenames: Vec<String>,
    pub clean_empty_download_dirs: bool,
    pub mirror_exclude_dirs: Vec<String>,
    pub web_art_lookup_enabled: bool,
    pub web_lookup_timeout_secs: u64,
    pub web_lookup_retries: u32,
    pub musicbrainz_user_agent: String,
    pub release_lookup_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            downloads_root: "downloads".to_string(),
            library_root: "".to_string(),
            overlay_root: "overlay".to_string(),
            backup_root: "backups".to_string(),
            mirror_root: "".to_string(),
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            junk_filenames: DEFAULT_JUNK_FILENAMES.iter().map(|s| s.to_string()).collect(),
            clean_empty_download_dirs: true,
            mirror_exclude_dirs: vec![".thumbnails".to_string()],
            web_art_lookup_enabled: true,
            web_lookup_timeout_secs: 4,
            web_lookup_retries: 3,
            musicbrainz_user_agent: format!("curator/{}", env!("CARGO_PKG_VERSION")),
            release_lookup_enabled: false,
            summary_path: None,
        }
    }
}

impl CuratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.library_root.trim().is_empty() {
            return Err(ConfigError::Invalid("library_root is not set".to_string()));
        }
        if self.audio_extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(ConfigError::Invalid("audio_extensions is empty".to_string()));
        }
        Ok(())
    }
}

/// Configured directories, resolved against the config file location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roots {
    pub downloads: Option<PathBuf>,
    pub library: PathBuf,
    pub overlay: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub mirror: Option<PathBuf>,
}

impl Roots {
    pub fn resolve(config_path: &Path, config: &CuratorConfig) -> Self {
        Self {
            downloads: resolve_optional(config_path, &config.downloads_root),
            library: resolve_path(config_path, config.library_root.trim()),
            overlay: resolve_optional(config_path, &config.overlay_root),
            backup: resolve_optional(config_path, &config.backup_root),
            mirror: resolve_optional(config_path, &config.mirror_root),
        }
    }

    /// No other root may be the library, sit inside it or contain it.
    /// Paths are compared after lexical normalization, so `/music/` and
    /// `/music/./` are both `/music`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let library = normalize(&self.library);
        let others = [
            ("downloads_root", &self.downloads),
            ("overlay_root", &self.overlay),
            ("backup_root", &self.backup),
            ("mirror_root", &self.mirror),
        ];
        for (name, root) in others {
            let root = match root {
                Some(root) => normalize(root),
                None => continue,
            };
            if root == library {
                return Err(ConfigError::Invalid(format!("{} must differ from library_root", name)));
            }
            if root.starts_with(&library) {
                return Err(ConfigError::Invalid(format!("{} must not be inside library_root", name)));
            }
            if library.starts_with(&root) {
                return Err(ConfigError::Invalid(format!("{} must not contain library_root", name)));
            }
        }
        Ok(())
    }
}

/// Absolute form of `path` with `.` dropped and `..` applied, without
/// touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Load the config at `path`, writing a default one when there is none.
/// The flag is true when the file was just created.
pub fn load_or_create_config(path: &Path) -> Result<(CuratorConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: CuratorConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.web_lookup_timeout_secs == 0 {
            config.web_lookup_timeout_secs = 4;
        }
        if config.musicbrainz_user_agent.trim().is_empty() {
            config.musicbrainz_user_agent = CuratorConfig::default().musicbrainz_user_agent;
        }
        if config.junk_filenames.is_empty() {
            config.junk_filenames = CuratorConfig::default().junk_filenames;
        }
        return Ok((config, false));
    }

    let config = CuratorConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &CuratorConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_optional(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}
