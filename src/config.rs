//! Persistent application configuration model, defaults and loading.

use std::path::{Path, PathBuf};

use log::{info, warn};

pub const DEFAULT_HISTORY_COLLECTION: &str = "historySessionItems";
pub const DEFAULT_LOCATIONS_COLLECTION: &str = "localMediaItemLocations";
const COVER_FILE_NAME: &str = "current_cover.jpg";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Media library database access.
    pub source: SourceConfig,
    #[serde(default)]
    /// Read-only state server.
    pub server: ServerConfig,
    #[serde(default)]
    /// Overlay display toggles, passed through to readers untouched.
    pub display: DisplayConfig,
    #[serde(default)]
    /// Cover-art extraction.
    pub artwork: ArtworkConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SourceConfig {
    /// Path to djay's `MediaLibrary.db`. Empty means auto-discover.
    #[serde(default)]
    pub db_path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// SQLite busy timeout for every read-only query.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_history_collections")]
    pub history_collections: Vec<String>,
    #[serde(default = "default_locations_collection")]
    pub locations_collection: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Overlay toggles served alongside the state as `settings`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub show_source: bool,
    #[serde(default = "default_true")]
    pub show_history: bool,
    #[serde(default = "default_true")]
    pub show_history_time: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ArtworkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where the current cover is written. Empty means the user cache dir.
    #[serde(default)]
    pub cover_path: String,
    #[serde(default)]
    pub path_style: PathStyle,
}

/// How `file://` URIs from the library are turned into filesystem paths.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathStyle {
    /// Follow the host this process runs on.
    #[default]
    Native,
    /// Drive-letter paths with `\` separators.
    Windows,
    /// Rooted paths with `/` separators.
    Posix,
}

impl PathStyle {
    /// Collapses `Native` into the concrete style of the running host.
    pub fn resolve(self) -> Self {
        match self {
            Self::Native if cfg!(windows) => Self::Windows,
            Self::Native => Self::Posix,
            other => other,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            history_collections: default_history_collections(),
            locations_collection: default_locations_collection(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_source: true,
            show_history: true,
            show_history_time: true,
        }
    }
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cover_path: String::new(),
            path_style: PathStyle::Native,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_query_timeout_ms() -> u64 {
    1_000
}

fn default_history_collections() -> Vec<String> {
    vec![DEFAULT_HISTORY_COLLECTION.to_string()]
}

fn default_locations_collection() -> String {
    DEFAULT_LOCATIONS_COLLECTION.to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Clamps numeric settings into workable ranges and restores empty collections.
pub fn sanitize_config(config: Config) -> Config {
    let mut source = config.source;
    source.poll_interval_ms = source.poll_interval_ms.clamp(50, 60_000);
    source.query_timeout_ms = source.query_timeout_ms.clamp(100, 10_000);
    source.history_collections.retain(|name| !name.trim().is_empty());
    if source.history_collections.is_empty() {
        source.history_collections = default_history_collections();
    }
    if source.locations_collection.trim().is_empty() {
        source.locations_collection = default_locations_collection();
    }

    Config { source, ..config }
}

/// Reads `path`, creating it with defaults first when it does not exist.
///
/// A file that fails to parse is reported and replaced by defaults in memory;
/// the file itself is left untouched.
pub fn load_or_create_config(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    err
                )
            })?;
        }
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        let default_text = toml::to_string(&Config::default())
            .map_err(|err| format!("Failed to serialize default config: {err}"))?;
        std::fs::write(path, default_text)
            .map_err(|err| format!("Failed to write config {}: {}", path.display(), err))?;
    }

    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {}", path.display(), err))?;
    let config = match toml::from_str::<Config>(&content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Config {} is invalid, using defaults: {}",
                path.display(),
                err
            );
            Config::default()
        }
    };
    Ok(sanitize_config(config))
}

/// Default config location, honouring the `DECKWATCH_CONFIG` override.
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os("DECKWATCH_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir().map(|path| path.join("deckwatch").join("config.toml"))
}

/// Where djay keeps its library database for the current user.
pub fn default_library_db_path() -> Option<PathBuf> {
    let music_dir = dirs::home_dir()?.join("Music").join("djay");
    let library_dir = if cfg!(target_os = "macos") {
        music_dir.join("djay Media Library.djayMediaLibrary")
    } else {
        music_dir.join("djay Media Library")
    };
    Some(library_dir.join("MediaLibrary.db"))
}

/// Picks the configured database if it exists, else the default location.
pub fn resolve_db_path(config: &Config) -> Option<PathBuf> {
    let configured = config.source.db_path.trim();
    if !configured.is_empty() {
        let path = PathBuf::from(configured);
        if path.exists() {
            return Some(path);
        }
        warn!(
            "Configured database {} does not exist; trying the default location",
            path.display()
        );
    }

    default_library_db_path().filter(|path| path.exists())
}

pub fn resolve_cover_path(config: &Config) -> Option<PathBuf> {
    let configured = config.artwork.cover_path.trim();
    if !configured.is_empty() {
        return Some(PathBuf::from(configured));
    }
    dirs::cache_dir().map(|path| path.join("deckwatch").join(COVER_FILE_NAME))
}
