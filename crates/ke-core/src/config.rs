use log::warn;

use crate::error::{EngineError, Result};

/// Largest accepted matmul tile edge. Its square is already above the
/// work-group limit of any OpenCL device.
pub const MAX_GPU_TILE: usize = 64;

/// Engine-wide settings shared by every engine a factory builds.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Pretend no OpenCL device is present.
    pub gpu_disabled: bool,
    /// Global memory of the simulated OpenCL device.
    pub gpu_global_mem_bytes: usize,
    /// Largest single device allocation.
    pub gpu_max_alloc_bytes: usize,
    /// Largest single host allocation.
    pub host_max_alloc_bytes: usize,
    /// Edge of the square work-group tile used by device matmul, in
    /// `1..=MAX_GPU_TILE`.
    pub gpu_tile: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let gpu_global_mem_bytes = 256 << 20;
        Self {
            gpu_disabled: false,
            gpu_global_mem_bytes,
            gpu_max_alloc_bytes: gpu_global_mem_bytes / 4,
            host_max_alloc_bytes: 1 << 30,
            gpu_tile: 8,
        }
    }
}

impl EngineConfig {
    /// Read overrides from `KE_*` environment variables.
    ///
    /// - `KE_GPU_DISABLE`: `1`/`true` hides the OpenCL device
    /// - `KE_GPU_MEM_BYTES`: device global memory
    /// - `KE_GPU_MAX_ALLOC_BYTES`: largest device allocation (default: a quarter of global memory)
    /// - `KE_HOST_MAX_ALLOC_BYTES`: largest host allocation
    /// - `KE_GPU_TILE`: matmul tile edge
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`EngineConfig::from_env`], with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("KE_GPU_DISABLE") {
            config.gpu_disabled = matches!(v.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(bytes) = parse_usize(&lookup, "KE_GPU_MEM_BYTES") {
            config.gpu_global_mem_bytes = bytes;
            config.gpu_max_alloc_bytes = bytes / 4;
        }
        if let Some(bytes) = parse_usize(&lookup, "KE_GPU_MAX_ALLOC_BYTES") {
            config.gpu_max_alloc_bytes = bytes.min(config.gpu_global_mem_bytes);
        }
        if let Some(bytes) = parse_usize(&lookup, "KE_HOST_MAX_ALLOC_BYTES") {
            config.host_max_alloc_bytes = bytes;
        }
        if let Some(tile) = parse_usize(&lookup, "KE_GPU_TILE") {
            if tile == 0 || tile > MAX_GPU_TILE {
                warn!(
                    "KE_GPU_TILE must be in 1..={}, keeping {}",
                    MAX_GPU_TILE, config.gpu_tile
                );
            } else {
                config.gpu_tile = tile;
            }
        }
        config
    }

    /// Check settings that engines cannot work around.
    ///
    /// # Errors
    /// Returns `InvalidConfig` when `gpu_tile` is outside `1..=MAX_GPU_TILE`.
    pub fn validate(&self) -> Result<()> {
        if self.gpu_tile == 0 || self.gpu_tile > MAX_GPU_TILE {
            return Err(EngineError::InvalidConfig(format!(
                "gpu_tile must be in 1..={}, got {}",
                MAX_GPU_TILE, self.gpu_tile
            )));
        }
        Ok(())
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.gpu_max_alloc_bytes, config.gpu_global_mem_bytes / 4);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("KE_GPU_DISABLE", "1"),
            ("KE_GPU_MEM_BYTES", "4096"),
            ("KE_GPU_TILE", "4"),
        ]));
        assert!(config.gpu_disabled);
        assert_eq!(config.gpu_global_mem_bytes, 4096);
        assert_eq!(config.gpu_max_alloc_bytes, 1024);
        assert_eq!(config.gpu_tile, 4);
    }

    #[test]
    fn test_max_alloc_clamped_to_global() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("KE_GPU_MEM_BYTES", "1000"),
            ("KE_GPU_MAX_ALLOC_BYTES", "5000"),
        ]));
        assert_eq!(config.gpu_max_alloc_bytes, 1000);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("KE_GPU_MEM_BYTES", "lots"),
            ("KE_GPU_TILE", "0"),
        ]));
        assert_eq!(config.gpu_global_mem_bytes, EngineConfig::default().gpu_global_mem_bytes);
        assert_eq!(config.gpu_tile, 8);
    }

    #[test]
    fn test_oversized_tile_is_ignored_from_env() {
        let config = EngineConfig::from_lookup(lookup(&[("KE_GPU_TILE", "8589934592")]));
        assert_eq!(config.gpu_tile, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tile_out_of_range() {
        for gpu_tile in [0, MAX_GPU_TILE + 1, 1 << 33] {
            let config = EngineConfig {
                gpu_tile,
                ..EngineConfig::default()
            };
            assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
        }
        let config = EngineConfig {
            gpu_tile: MAX_GPU_TILE,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
