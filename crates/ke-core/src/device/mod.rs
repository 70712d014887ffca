//! Simulated OpenCL runtime.
//!
//! Device memory lives in host allocations that are accounted against a
//! fixed device budget, command queues are worker threads that run commands
//! in submission order, and programs are OpenCL C sources whose entry points
//! are executed by Rust work-group emulations. Only this module would change
//! to bind a real `cl_*` driver.

pub mod program;
pub mod queue;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::sync::lock_mutex;

pub use program::{ClProgram, NdRange};
pub use queue::{Command, CommandQueue};

/// Static properties of the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub global_mem_bytes: usize,
    pub max_alloc_bytes: usize,
    pub compute_units: u32,
    pub max_work_group_size: usize,
    /// Square tile edge that tiled programs are built with.
    pub preferred_tile: usize,
}

impl DeviceInfo {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            name: "Simulated OpenCL GPU".to_string(),
            vendor: "ke".to_string(),
            global_mem_bytes: config.gpu_global_mem_bytes,
            max_alloc_bytes: config.gpu_max_alloc_bytes,
            compute_units: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            max_work_group_size: 256,
            preferred_tile: config.gpu_tile,
        }
    }
}

/// Device memory budget shared by all buffers of one device.
#[derive(Debug)]
struct MemoryPool {
    capacity: usize,
    used: Mutex<usize>,
}

impl MemoryPool {
    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut used = lock_mutex(&self.used);
        let available = self.capacity - *used;
        if bytes > available {
            return Err(EngineError::OutOfMemory {
                requested: bytes,
                available,
            });
        }
        *used += bytes;
        Ok(())
    }

    fn release(&self, bytes: usize) {
        let mut used = lock_mutex(&self.used);
        *used = used.saturating_sub(bytes);
    }
}

/// One device allocation. The bytes go back to the pool on drop.
#[derive(Debug)]
pub struct ClBuffer {
    data: Mutex<Vec<u8>>,
    size: usize,
    pool: Arc<MemoryPool>,
}

impl ClBuffer {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy the first `len` bytes out of the buffer.
    pub fn read(&self, len: usize) -> Vec<u8> {
        let data = lock_mutex(&self.data);
        data[..len].to_vec()
    }

    /// Overwrite the start of the buffer with `src`.
    pub fn write(&self, src: &[u8]) {
        let mut data = lock_mutex(&self.data);
        data[..src.len()].copy_from_slice(src);
    }
}

impl Drop for ClBuffer {
    fn drop(&mut self) {
        self.pool.release(self.size);
    }
}

/// An opened device: memory budget plus a cache of built programs.
#[derive(Debug)]
pub struct ClDevice {
    info: DeviceInfo,
    pool: Arc<MemoryPool>,
    programs: Mutex<HashMap<(String, String), Arc<ClProgram>>>,
}

impl ClDevice {
    /// Open the device described by `config`.
    ///
    /// # Errors
    /// Returns `Device` when the configuration hides the device.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        if config.gpu_disabled {
            return Err(EngineError::Device(
                "no OpenCL GPU device available".to_string(),
            ));
        }
        let info = DeviceInfo::from_config(config);
        debug!(
            "opened {} ({} bytes global, {} bytes max alloc)",
            info.name, info.global_mem_bytes, info.max_alloc_bytes
        );
        Ok(Self {
            pool: Arc::new(MemoryPool {
                capacity: info.global_mem_bytes,
                used: Mutex::new(0),
            }),
            info,
            programs: Mutex::new(HashMap::new()),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Bytes currently allocated on the device.
    pub fn used_bytes(&self) -> usize {
        *lock_mutex(&self.pool.used)
    }

    /// Allocate a zero-filled device buffer.
    pub fn alloc(&self, bytes: usize) -> Result<ClBuffer> {
        if bytes == 0 {
            return Err(EngineError::OutOfMemory {
                requested: 0,
                available: self.info.max_alloc_bytes,
            });
        }
        if bytes > self.info.max_alloc_bytes {
            return Err(EngineError::OutOfMemory {
                requested: bytes,
                available: self.info.max_alloc_bytes,
            });
        }
        self.pool.reserve(bytes)?;
        let mut data = Vec::new();
        if data.try_reserve_exact(bytes).is_err() {
            self.pool.release(bytes);
            return Err(EngineError::OutOfMemory {
                requested: bytes,
                available: 0,
            });
        }
        data.resize(bytes, 0);
        Ok(ClBuffer {
            data: Mutex::new(data),
            size: bytes,
            pool: Arc::clone(&self.pool),
        })
    }

    /// Build `source` with `options`, reusing an earlier build when the same
    /// pair was built before.
    pub fn build_program(
        &self,
        source: &'static str,
        entry: &str,
        options: &str,
    ) -> Result<Arc<ClProgram>> {
        let key = (source.to_string(), options.to_string());
        let mut programs = lock_mutex(&self.programs);
        if let Some(program) = programs.get(&key) {
            if program.has_kernel(entry) {
                return Ok(Arc::clone(program));
            }
        }
        let mut program = ClProgram::new(source, options);
        program.build(&[entry])?;
        debug!("built OpenCL program for '{}' with options '{}'", entry, options);
        let program = Arc::new(program);
        programs.insert(key, Arc::clone(&program));
        Ok(program)
    }

    /// Number of distinct programs built so far.
    pub fn cached_programs(&self) -> usize {
        lock_mutex(&self.programs).len()
    }
}
