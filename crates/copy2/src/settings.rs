use copy2_core::DEFAULT_REPOSITORY;
use copy2_platform::AppPaths;
use copy2_store::{Capacity, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    #[serde(default)]
    pub session_only: bool,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default)]
    pub check_updates_on_start: bool,

    #[serde(default = "default_update_repository")]
    pub update_repository: String,

    #[serde(default = "default_asset_hint")]
    pub asset_hint: Option<String>,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

fn default_max_history() -> usize {
    DEFAULT_CAPACITY
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_update_repository() -> String {
    DEFAULT_REPOSITORY.to_string()
}

fn default_asset_hint() -> Option<String> {
    copy2_core::default_asset_hint().map(ToString::to_string)
}

fn default_http_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    300
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            session_only: false,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            check_updates_on_start: false,
            update_repository: default_update_repository(),
            asset_hint: default_asset_hint(),
            http_timeout_secs: default_http_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

impl AppSettings {
    /// Missing or corrupt settings fall back to defaults.
    pub fn load(paths: &AppPaths) -> Self {
        let settings_path = paths.settings_file();
        let mut settings: Self = if settings_path.exists() {
            match std::fs::read_to_string(&settings_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                    log::warn!(
                        "Ignoring corrupt settings file {}: {error}",
                        settings_path.display()
                    );
                    Self::default()
                }),
                Err(_) => Self::default(),
            }
        } else {
            Self::default()
        };

        settings.max_history = settings.capacity().soft();
        settings
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&paths.config_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        copy2_store::write_atomic(&paths.settings_file(), content.as_bytes())
    }

    pub fn capacity(&self) -> Capacity {
        Capacity::configured(self.max_history)
    }
}
