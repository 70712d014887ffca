use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use log::debug;

use crate::config::EngineConfig;
use crate::engine::{CpuEngine, Engine, EngineKind, OpenclEngine, RuntimeKind};
use crate::error::{EngineError, Result};
use crate::registry::KernelRegistry;
use crate::sync::{lock_mutex, read_lock, write_lock};

/// Constructs the engine for one (kind, runtime) pair.
pub type EngineBuilder = fn(&EngineConfig, Arc<KernelRegistry>) -> Result<Arc<dyn Engine>>;

static PROCESS: OnceLock<EngineFactory> = OnceLock::new();

fn build_cpu(config: &EngineConfig, kernels: Arc<KernelRegistry>) -> Result<Arc<dyn Engine>> {
    config.validate()?;
    Ok(Arc::new(CpuEngine::new(config, kernels)))
}

fn build_opencl(config: &EngineConfig, kernels: Arc<KernelRegistry>) -> Result<Arc<dyn Engine>> {
    config.validate()?;
    Ok(Arc::new(OpenclEngine::new(config, kernels)))
}

/// Resolves (engine kind, runtime kind) to a shared engine instance.
///
/// Each pair is constructed at most once per factory: the first `create`
/// for a pair builds the engine while holding the table lock, and every
/// later call, from any thread, gets a clone of the same `Arc`. Engines live
/// as long as the factory.
///
/// ```
/// use std::sync::Arc;
/// use ke_core::{EngineConfig, EngineFactory, EngineKind, RuntimeKind};
///
/// let factory = EngineFactory::new(EngineConfig::default());
/// let a = factory.create(EngineKind::Cpu, RuntimeKind::Undef).unwrap();
/// let b = factory.create(EngineKind::Cpu, RuntimeKind::Undef).unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct EngineFactory {
    config: EngineConfig,
    kernels: Arc<KernelRegistry>,
    builders: RwLock<HashMap<(EngineKind, RuntimeKind), EngineBuilder>>,
    engines: Mutex<HashMap<(EngineKind, RuntimeKind), Arc<dyn Engine>>>,
    created: AtomicUsize,
}

impl EngineFactory {
    /// A factory knowing the CPU and OpenCL engines and the builtin kernels.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, Arc::new(KernelRegistry::with_builtins()))
    }

    /// Like [`EngineFactory::new`], with engines resolving kernels through
    /// `kernels`.
    pub fn with_registry(config: EngineConfig, kernels: Arc<KernelRegistry>) -> Self {
        let factory = Self {
            config,
            kernels,
            builders: RwLock::new(HashMap::new()),
            engines: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        };
        factory.register(EngineKind::Cpu, RuntimeKind::Undef, build_cpu);
        factory.register(EngineKind::Gpu, RuntimeKind::Opencl, build_opencl);
        factory
    }

    /// The process-wide factory, configured from the environment on first
    /// use.
    pub fn process() -> &'static EngineFactory {
        PROCESS.get_or_init(|| EngineFactory::new(EngineConfig::from_env()))
    }

    /// Add or replace the builder for a pair. Engines already created for
    /// the pair are kept.
    pub fn register(&self, kind: EngineKind, runtime: RuntimeKind, builder: EngineBuilder) {
        write_lock(&self.builders).insert((kind, runtime), builder);
    }

    /// The engine for `(kind, runtime)`, built on first request.
    ///
    /// # Errors
    /// `UnsupportedBackend` when no builder is registered for the pair, or
    /// the builder's own error. A failed build caches nothing.
    pub fn create(&self, kind: EngineKind, runtime: RuntimeKind) -> Result<Arc<dyn Engine>> {
        let mut engines = lock_mutex(&self.engines);
        if let Some(engine) = engines.get(&(kind, runtime)) {
            return Ok(Arc::clone(engine));
        }
        let builder = read_lock(&self.builders)
            .get(&(kind, runtime))
            .copied()
            .ok_or(EngineError::UnsupportedBackend {
                engine: kind,
                runtime,
            })?;
        let engine = builder(&self.config, Arc::clone(&self.kernels))?;
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!("factory created {} engine {}", engine.name(), engine.id());
        engines.insert((kind, runtime), Arc::clone(&engine));
        Ok(engine)
    }

    /// Number of engines constructed so far.
    pub fn engines_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn kernels(&self) -> &Arc<KernelRegistry> {
        &self.kernels
    }
}

impl fmt::Debug for EngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = lock_mutex(&self.engines)
            .keys()
            .map(|(k, r)| format!("{}/{}", k, r))
            .collect();
        keys.sort();
        f.debug_struct("EngineFactory")
            .field("config", &self.config)
            .field("engines", &keys)
            .finish()
    }
}
