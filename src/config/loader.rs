// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::registry::{discover_packaged, merge_packaged, EngineInstance, PackagedEngine};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run static validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks scheduler values and every `[[engine]]` record.
///
/// Executables and remote hosts are not touched here; that happens when the
/// engines are handed to the registry.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Render a configuration back to TOML, e.g. after the instance list was
/// edited.
pub fn save_to_string(config: &ConfigFile) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

/// Configured engines plus whatever packaged engines the install directory
/// holds. Without `[packaged].install_dir` the configured list is returned
/// as is.
pub fn engines_with_packaged(config: &ConfigFile, fs: &dyn FileSystem) -> Result<Vec<EngineInstance>> {
    let Some(dir) = &config.packaged.install_dir else {
        return Ok(config.engines.clone());
    };
    let packaged = discover_packaged(dir, fs, &PackagedEngine::defaults())?;
    Ok(merge_packaged(config.engines.clone(), packaged))
}

/// Helper to resolve a default config path.
///
/// Currently this just returns `Enginesched.toml` in the current working
/// directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Enginesched.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn saved_config_loads_back() {
        let raw: RawConfigFile = toml::from_str(
            r#"
[scheduler]
debounce_ms = 250

[[engine]]
name = "remote"
address = "10.0.0.5"
port_start = 6000
port_end = 6003
thread_safe = true
"#,
        )
        .unwrap();
        let cfg = ConfigFile::try_from(raw).unwrap();

        let text = save_to_string(&cfg).unwrap();
        let again = ConfigFile::try_from(toml::from_str::<RawConfigFile>(&text).unwrap()).unwrap();

        assert_eq!(again.scheduler.debounce_ms, 250);
        assert_eq!(again.engines, cfg.engines);
        assert!(!again.engines[0].is_local);
    }

    #[test]
    fn packaged_engines_are_appended_when_install_dir_is_set() {
        let fs = MockFileSystem::new();
        fs.add_executable("/opt/ecdar/bin/Reveaal");

        let mut raw = RawConfigFile::default();
        raw.packaged.install_dir = Some(PathBuf::from("/opt/ecdar"));
        let cfg = ConfigFile::try_from(raw).unwrap();

        let engines = engines_with_packaged(&cfg, &fs).unwrap();
        assert_eq!(engines.len(), 1);
        assert_eq!(engines[0].name, "Reveaal");
        assert!(engines[0].is_default && engines[0].is_locked);
    }
}
