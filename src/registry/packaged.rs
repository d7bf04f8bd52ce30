// src/registry/packaged.rs

//! Discovery of engines shipped with the application.
//!
//! The install directory (plus its `lib/` and `bin/` subdirectories) is
//! scanned for known file names. Every engine that is found becomes a locked
//! local instance; engines without a matching file are left out.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::registry::EngineInstance;

const SEARCH_SUBDIRS: &[&str] = &["lib", "bin"];

/// Description of an engine that may ship with the application.
#[derive(Debug, Clone)]
pub struct PackagedEngine {
    pub name: String,
    /// File-name globs, e.g. `Reveaal` or `Reveaal*.exe`.
    pub patterns: Vec<String>,
    pub is_thread_safe: bool,
    pub ports: (u32, u32),
}

impl PackagedEngine {
    pub fn new(name: &str, patterns: &[&str], is_thread_safe: bool, ports: (u32, u32)) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            is_thread_safe,
            ports,
        }
    }

    /// Engines bundled with a standard installation.
    pub fn defaults() -> Vec<Self> {
        vec![
            PackagedEngine::new("Reveaal", &["Reveaal", "Reveaal.exe"], false, (5032, 5040)),
            PackagedEngine::new("j-Ecdar", &["j-Ecdar", "j-Ecdar.bat"], false, (5042, 5050)),
        ]
    }

    fn glob_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid pattern '{pattern}' for engine '{}'", self.name))?;
            builder.add(glob);
        }
        builder
            .build()
            .with_context(|| format!("building patterns for engine '{}'", self.name))
    }
}

/// Mark an instance as shipped with the application.
pub fn lock_instance(inst: &mut EngineInstance) {
    inst.is_locked = true;
}

/// Scan `install_dir` for the given engines and return one locked instance
/// per engine that was found, in the order of `engines`.
pub fn discover_packaged(
    install_dir: &Path,
    fs: &dyn FileSystem,
    engines: &[PackagedEngine],
) -> Result<Vec<EngineInstance>> {
    let candidates = candidate_files(install_dir, fs);
    debug!(
        dir = ?install_dir,
        files = candidates.len(),
        "scanning install directory for packaged engines"
    );

    let mut found = Vec::new();
    for engine in engines {
        let globs = engine.glob_set()?;
        let hit = candidates.iter().find(|path| {
            path.file_name()
                .is_some_and(|name| globs.is_match(Path::new(name)))
        });

        match hit {
            Some(path) => {
                info!(engine = %engine.name, path = ?path, "found packaged engine");
                let mut inst = EngineInstance::local(&engine.name, path.clone(), engine.ports);
                inst.is_thread_safe = engine.is_thread_safe;
                lock_instance(&mut inst);
                found.push(inst);
            }
            None => {
                debug!(engine = %engine.name, "packaged engine not found; omitting");
            }
        }
    }

    Ok(found)
}

/// Executable files directly inside the install dir and its search subdirs,
/// sorted for deterministic matching.
fn candidate_files(install_dir: &Path, fs: &dyn FileSystem) -> Vec<PathBuf> {
    let mut dirs = vec![install_dir.to_path_buf()];
    dirs.extend(SEARCH_SUBDIRS.iter().map(|d| install_dir.join(d)));

    let mut files: Vec<PathBuf> = dirs
        .iter()
        .filter(|d| fs.is_dir(d))
        .filter_map(|d| fs.read_dir(d).ok())
        .flatten()
        .filter(|p| fs.is_executable(p))
        .collect();
    files.sort();
    files
}

/// Merge packaged instances into configured ones.
///
/// A configured instance with the same name keeps its ports and flags but
/// takes the discovered location along with the lock. If no instance is
/// marked default afterwards, the first packaged one becomes it.
pub fn merge_packaged(
    mut configured: Vec<EngineInstance>,
    packaged: Vec<EngineInstance>,
) -> Vec<EngineInstance> {
    let had_default = configured.iter().any(|i| i.is_default);
    let mut first_packaged = None;

    for pkg in packaged {
        match configured.iter_mut().find(|c| c.name == pkg.name) {
            Some(existing) => {
                if existing.location_differs(&pkg) {
                    debug!(
                        engine = %pkg.name,
                        path = ?pkg.executable_path,
                        "configured engine moved to packaged location"
                    );
                }
                existing.is_local = pkg.is_local;
                existing.address = pkg.address;
                existing.executable_path = pkg.executable_path;
                lock_instance(existing);
            }
            None => {
                first_packaged.get_or_insert(configured.len());
                configured.push(pkg);
            }
        }
    }

    if !had_default {
        if let Some(idx) = first_packaged {
            configured[idx].is_default = true;
        }
    }
    configured
}
