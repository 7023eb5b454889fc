use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for geo-tagger.
///
/// Controls where spreadsheet rows come from, how locations are looked up,
/// how files are processed, and where logs and caches live.
///
/// # Loading
///
/// ```rust,no_run
/// use geo_tagger::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.processing.max_workers = 8;
/// config.processing.create_backup = false;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Google Sheets source of photo rows.
    pub sheet: SheetConfig,
    /// Reverse geocoding (location enrichment).
    pub geocoding: GeocodingConfig,
    /// Worker pool, backups, and file selection.
    pub processing: ProcessingConfig,
    /// Dry run and log/cache directories.
    pub output: OutputConfig,
}

/// Google Sheets `values` API source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    pub spreadsheet_id: String,
    /// A1 range to read; the first row must hold the headers.
    pub range: String,
    pub api_key: String,
}

/// Reverse geocoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Fill missing location columns from the coordinates.
    pub enabled: bool,
    pub user_agent: String,
    /// Total attempts per lookup when the service times out.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_secs: u64,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

/// Per-file processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Size of the worker pool.
    pub max_workers: usize,
    /// Copy each file to `<name><backup_suffix>` before modifying it.
    pub create_backup: bool,
    pub backup_suffix: String,
    /// Extensions eligible for tagging, matched case-insensitively.
    pub supported_extensions: Vec<String>,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, merge tags in memory but never write or back up files.
    pub dry_run: bool,
    pub log_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            range: "A1:Z".to_string(),
            api_key: String::new(),
        }
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_agent: "GeoPhotoTagger/1.0".to_string(),
            max_retries: 3,
            retry_delay_secs: 1,
            timeout_secs: 10,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            create_backup: true,
            backup_suffix: ".backup".to_string(),
            supported_extensions: vec!["jpg".to_string(), "jpeg".to_string()],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            log_dir: PathBuf::from("logs"),
            cache_dir: PathBuf::from("cache"),
        }
    }
}

impl ProcessingConfig {
    /// Check whether a path carries one of the supported extensions.
    pub fn is_supported(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.supported_extensions
            .iter()
            .any(|s| s.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SPREADSHEET_ID") {
            self.sheet.spreadsheet_id = v;
        }
        if let Some(v) = lookup("GOOGLE_SHEETS_API_KEY") {
            self.sheet.api_key = v;
        }
        if let Some(v) = lookup("NOMINATIM_USER_AGENT") {
            self.geocoding.user_agent = v;
        }
        override_parsed(&lookup, "MAX_RETRIES", &mut self.geocoding.max_retries);
        override_parsed(&lookup, "RETRY_DELAY", &mut self.geocoding.retry_delay_secs);
        override_parsed(&lookup, "MAX_WORKERS", &mut self.processing.max_workers);
        if let Some(v) = lookup("CREATE_BACKUP") {
            self.processing.create_backup = v.trim().eq_ignore_ascii_case("true");
        }
    }

    /// Create the log and cache directories.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.output.log_dir, &self.output.cache_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => log::warn!("Ignoring {key}={raw:?}: not a valid number"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.processing.max_workers, 4);
        assert!(config.processing.create_backup);
        assert_eq!(config.processing.backup_suffix, ".backup");
        assert_eq!(config.geocoding.max_retries, 3);
        assert_eq!(config.geocoding.retry_delay_secs, 1);
        assert!(!config.output.dry_run);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.processing.max_workers = 9;
        config.sheet.spreadsheet_id = "abc".into();
        config.save(Some(&path)).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.processing.max_workers, 9);
        assert_eq!(loaded.sheet.spreadsheet_id, "abc");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"processing": {"max_workers": 2}}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.processing.max_workers, 2);
        assert!(config.processing.create_backup);
        assert_eq!(config.sheet.range, "A1:Z");
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.json"))).unwrap();
        assert_eq!(config.processing.max_workers, 4);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("MAX_WORKERS", "12"),
            ("MAX_RETRIES", "many"),
            ("CREATE_BACKUP", "False"),
            ("SPREADSHEET_ID", "sheet-1"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.processing.max_workers, 12);
        assert_eq!(config.geocoding.max_retries, 3);
        assert!(!config.processing.create_backup);
        assert_eq!(config.sheet.spreadsheet_id, "sheet-1");
    }

    #[test]
    fn supported_extensions_are_case_insensitive() {
        let mut processing = ProcessingConfig::default();
        assert!(processing.is_supported(Path::new("a.JPG")));
        assert!(processing.is_supported(Path::new("a.jpeg")));
        assert!(!processing.is_supported(Path::new("a.png")));
        assert!(!processing.is_supported(Path::new("noext")));

        processing.supported_extensions = vec![".PNG".into()];
        assert!(processing.is_supported(Path::new("a.png")));
    }
}
