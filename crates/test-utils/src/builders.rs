#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use enginesched::config::{ConfigFile, RawConfigFile};
use enginesched::exec::EngineConnector;
use enginesched::fs::mock::MockFileSystem;
use enginesched::registry::EngineInstance;
use enginesched::service::QueryService;

/// Builder for `EngineInstance` to simplify test setup.
pub struct EngineInstanceBuilder {
    inst: EngineInstance,
}

impl EngineInstanceBuilder {
    /// Local engine with executable `/fake/bin/<name>` and a single port.
    pub fn local(name: &str) -> Self {
        Self {
            inst: EngineInstance::local(name, format!("/fake/bin/{name}"), (5040, 5040)),
        }
    }

    pub fn remote(name: &str, address: &str) -> Self {
        Self {
            inst: EngineInstance::remote(name, address, (6000, 6000)),
        }
    }

    pub fn ports(mut self, start: u32, end: u32) -> Self {
        self.inst.port_range_start = start;
        self.inst.port_range_end = end;
        self
    }

    pub fn thread_safe(mut self) -> Self {
        self.inst.is_thread_safe = true;
        self
    }

    pub fn default_instance(mut self) -> Self {
        self.inst.is_default = true;
        self
    }

    pub fn locked(mut self) -> Self {
        self.inst.is_locked = true;
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.inst.executable_path = Some(path.into());
        self
    }

    pub fn build(self) -> EngineInstance {
        self.inst
    }
}

/// Builder for `ConfigFile`.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_engine(mut self, inst: EngineInstance) -> Self {
        self.config.engines.push(inst);
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.scheduler.debounce_ms = ms;
        self
    }

    pub fn worker_pool_size(mut self, n: usize) -> Self {
        self.config.scheduler.worker_pool_size = n;
        self
    }

    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.packaged.install_dir = Some(dir.into());
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory filesystem holding an executable for every local instance.
pub fn fs_with_executables(instances: &[EngineInstance]) -> MockFileSystem {
    let fs = MockFileSystem::new();
    for inst in instances.iter().filter(|i| i.is_local) {
        if let Some(path) = &inst.executable_path {
            fs.add_executable(path);
        }
    }
    fs
}

/// A service over `connector` with `instances` installed.
pub async fn service_with(
    instances: Vec<EngineInstance>,
    connector: Arc<dyn EngineConnector>,
) -> QueryService {
    let cfg = ConfigFileBuilder::new().build();
    let fs = fs_with_executables(&instances);
    let service = QueryService::new(&cfg.scheduler, Arc::new(fs), connector);
    service
        .replace_instances(instances)
        .await
        .expect("test instances should validate");
    service
}
