/*
 * Application configuration for the assembly engine. Settings are plain
 * key-value pairs resolved with override precedence: the user-writable config
 * file wins over the packaged defaults, and a key missing from the user file
 * simply falls back to its default. The engine never reads configuration
 * storage directly; everything goes through `ConfigManagerOperations`, which
 * also resolves metadata templates by name and version.
 *
 * On first use the packaged defaults are written out as the user file; when
 * an existing user file lacks keys that the packaged set has since gained,
 * the missing keys are merged in and the file is rewritten.
 */
use crate::core::path_utils;
use crate::core::walker::DEFAULT_PAGE_SIZE;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CONFIG_FILE_NAME: &str = "config.json";

pub const KEY_LOAD_MORE_SIZE: &str = "explorer.load_more_size";
pub const KEY_TEMPLATE_LIST: &str = "metadata.templates";
pub const KEY_APP_LANGUAGE: &str = "app.language";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Serde(serde_json::Error),
    NoConfigDirectory,
    UnknownTemplate { name: String, version: String },
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serde(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {e}"),
            ConfigError::Serde(e) => write!(f, "Configuration parse error: {e}"),
            ConfigError::NoConfigDirectory => {
                write!(f, "Could not determine a configuration directory")
            }
            ConfigError::UnknownTemplate { name, version } => {
                write!(f, "No configured template '{name}' version '{version}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn packaged_defaults() -> HashMap<String, String> {
    let mut defaults = HashMap::new();
    defaults.insert(KEY_LOAD_MORE_SIZE.to_string(), DEFAULT_PAGE_SIZE.to_string());
    defaults.insert(KEY_TEMPLATE_LIST.to_string(), "ead".to_string());
    defaults.insert(
        "metadata.template.ead.2002.file".to_string(),
        "ead2002.xml".to_string(),
    );
    defaults.insert(
        "metadata.template.ead.2002.schema".to_string(),
        "ead2002.xsd".to_string(),
    );
    defaults.insert(KEY_APP_LANGUAGE.to_string(), "en".to_string());
    defaults
}

fn template_key(name: &str, version: &str, suffix: &str) -> String {
    format!("metadata.template.{name}.{version}.{suffix}")
}

pub trait ConfigManagerOperations: Send + Sync {
    fn get_config(&self, key: &str) -> Option<String>;
    fn set_config(&self, key: &str, value: &str);
    fn save(&self) -> Result<()>;

    /// Skeleton document of a named, versioned metadata template.
    fn template_content(&self, name: &str, version: &str) -> Result<String>;

    /// Location of the schema file of a named, versioned metadata template.
    fn template_schema_path(&self, name: &str, version: &str) -> Result<PathBuf>;

    /// Page size for incremental directory loading.
    fn load_more_size(&self) -> usize {
        self.get_config(KEY_LOAD_MORE_SIZE)
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Names of the configured metadata templates (comma-separated key).
    fn template_names(&self) -> Vec<String> {
        self.get_config(KEY_TEMPLATE_LIST)
            .map(|raw| {
                raw.split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct CoreConfigManager {
    storage_dir: Option<PathBuf>,
    defaults: HashMap<String, String>,
    overrides: Mutex<HashMap<String, String>>,
}

impl CoreConfigManager {
    pub fn new(app_name: &str) -> Self {
        Self::with_storage_dir(path_utils::app_config_dir(app_name))
    }

    /*
     * Builds a manager over an explicit storage directory (or none, which
     * leaves only the packaged defaults active). Loads the user file if it
     * exists, creates it from the defaults if it does not, and merges in any
     * packaged keys an older user file is missing.
     */
    pub fn with_storage_dir(storage_dir: Option<PathBuf>) -> Self {
        let defaults = packaged_defaults();
        let manager = CoreConfigManager {
            storage_dir,
            defaults,
            overrides: Mutex::new(HashMap::new()),
        };

        if let Err(err) = manager.bootstrap() {
            log::warn!("CoreConfigManager: falling back to packaged defaults: {err}");
        }
        manager
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    fn config_file_path(&self) -> Option<PathBuf> {
        self.storage_dir.as_ref().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    fn bootstrap(&self) -> Result<()> {
        let Some(file_path) = self.config_file_path() else {
            return Ok(());
        };

        if !file_path.exists() {
            {
                let mut overrides = self.overrides_guard();
                *overrides = self.defaults.clone();
            }
            self.save()?;
            log::debug!("CoreConfigManager: wrote initial config file {file_path:?}");
            return Ok(());
        }

        let raw = fs::read_to_string(&file_path)?;
        let mut loaded: HashMap<String, String> = serde_json::from_str(&raw)?;

        let mut merged_any = false;
        for (key, value) in &self.defaults {
            if !loaded.contains_key(key) {
                loaded.insert(key.clone(), value.clone());
                merged_any = true;
            }
        }

        {
            let mut overrides = self.overrides_guard();
            *overrides = loaded;
        }
        if merged_any {
            self.save()?;
            log::debug!("CoreConfigManager: merged new packaged keys into {file_path:?}");
        }
        Ok(())
    }

    fn overrides_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.overrides.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn template_file_name(&self, name: &str, version: &str, suffix: &str) -> Result<String> {
        self.get_config(&template_key(name, version, suffix))
            .ok_or_else(|| ConfigError::UnknownTemplate {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

impl ConfigManagerOperations for CoreConfigManager {
    fn get_config(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides_guard().get(key) {
            return Some(value.clone());
        }
        self.defaults.get(key).cloned()
    }

    fn set_config(&self, key: &str, value: &str) {
        self.overrides_guard()
            .insert(key.to_string(), value.to_string());
    }

    fn save(&self) -> Result<()> {
        let file_path = self.config_file_path().ok_or(ConfigError::NoConfigDirectory)?;
        let snapshot = self.overrides_guard().clone();
        let serialized = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&file_path, serialized)?;
        log::trace!("CoreConfigManager: saved configuration to {file_path:?}");
        Ok(())
    }

    /*
     * Reads the skeleton document of a template. The file name comes from the
     * `metadata.template.<name>.<version>.file` key and is resolved inside
     * the storage directory, where the packaged templates are installed.
     */
    fn template_content(&self, name: &str, version: &str) -> Result<String> {
        let file_name = self.template_file_name(name, version, "file")?;
        let dir = self
            .storage_dir
            .as_ref()
            .ok_or(ConfigError::NoConfigDirectory)?;
        let content = fs::read_to_string(dir.join(&file_name))?;
        Ok(content)
    }

    fn template_schema_path(&self, name: &str, version: &str) -> Result<PathBuf> {
        let file_name = self.template_file_name(name, version, "schema")?;
        let dir = self
            .storage_dir
            .as_ref()
            .ok_or(ConfigError::NoConfigDirectory)?;
        Ok(dir.join(file_name))
    }
}
