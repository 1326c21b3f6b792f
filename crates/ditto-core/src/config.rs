use config::{Config, ConfigError, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

/// Worker counts for the scan pipeline stages.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanWorkers {
    #[serde(default = "default_walkers")]
    pub walkers: usize,
    #[serde(default = "default_cache_checkers")]
    pub cache_checkers: usize,
    #[serde(default = "default_partial_hashers")]
    pub partial_hashers: usize,
    #[serde(default = "default_full_hashers")]
    pub full_hashers: usize,
}

fn default_walkers() -> usize {
    4
}
fn default_cache_checkers() -> usize {
    4
}
fn default_partial_hashers() -> usize {
    4
}
fn default_full_hashers() -> usize {
    2
}
fn default_batch_size() -> usize {
    1000
}
fn default_db_path() -> String {
    "ditto.db".to_string()
}

impl Default for ScanWorkers {
    fn default() -> Self {
        ScanWorkers {
            walkers: default_walkers(),
            cache_checkers: default_cache_checkers(),
            partial_hashers: default_partial_hashers(),
            full_hashers: default_full_hashers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scan_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub scan_workers: ScanWorkers,
    /// Rows per write transaction in the DB writer's cache-flush path.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            scan_paths: Vec::new(),
            exclude_paths: Vec::new(),
            scan_workers: ScanWorkers::default(),
            batch_size: default_batch_size(),
            db_path: default_db_path(),
        }
    }
}

/// Load configuration from `Config.{toml,yaml,json}` in the working
/// directory. Missing file yields defaults; unknown fields are ignored.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Collapse the configured scan roots so no root is nested inside another.
/// Walking both `/volume1/photos` and `/volume1/photos/2019` would emit the
/// nested subtree twice and inflate every counter.
///
/// Sorting first guarantees an ancestor path always precedes its
/// descendants (an ancestor is a strict string prefix), so one forward pass
/// suffices. Duplicates collapse for the same reason. Comparison is
/// component-wise, so `/data/media` does not swallow `/data/media2`.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut sorted = dirs;
    sorted.sort();

    let mut roots: Vec<String> = Vec::new();
    for dir in sorted {
        let nested = roots
            .iter()
            .any(|root| Path::new(&dir).starts_with(Path::new(root)));
        if !nested {
            roots.push(dir);
        }
    }
    roots
}
