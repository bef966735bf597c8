/*
 * Path helpers for locating the application's configuration directory. Kept
 * separate from the config manager so other parts of the core (template
 * storage, log files) can resolve the same base directory.
 */
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/*
 * Returns the platform-specific local configuration directory for the given
 * application name, creating it when absent. `None` means the platform gave
 * us no usable location or the directory could not be created; callers treat
 * that as "no user overrides available".
 */
pub fn app_config_dir(app_name: &str) -> Option<PathBuf> {
    ProjectDirs::from("", "", app_name).and_then(|dirs| {
        let config_path = dirs.config_local_dir();
        if !config_path.exists() {
            if let Err(err) = fs::create_dir_all(config_path) {
                log::error!("PathUtils: failed to create config directory {config_path:?}: {err}");
                return None;
            }
            log::debug!("PathUtils: created config directory {config_path:?}");
        }
        Some(config_path.to_path_buf())
    })
}
