use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::device::ClDevice;
use crate::dtype::DataType;
use crate::engine::EngineKind;
use crate::error::{EngineError, Result};
use crate::format::FormatType;
use crate::kernel::KernelVariant;
use crate::kernels;
use crate::op_desc::{KernelKind, OperatorDesc};
use crate::sync::{read_lock, write_lock};

/// What a kernel is being built for.
#[derive(Debug, Clone, Copy)]
pub enum BuildTarget<'a> {
    Host,
    Device(&'a ClDevice),
}

/// Turns a descriptor into a kernel variant for one target.
pub type KernelBuilder = fn(&OperatorDesc, BuildTarget<'_>) -> Result<KernelVariant>;

/// Lookup key of the registration table. `dtype` and `format` are those of
/// the operator's first tensor descriptor; every other operand must share
/// the layout and every input the dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub kind: KernelKind,
    pub dtype: DataType,
    pub format: FormatType,
    pub engine: EngineKind,
}

impl KernelKey {
    pub fn new(kind: KernelKind, dtype: DataType, format: FormatType, engine: EngineKind) -> Self {
        Self {
            kind,
            dtype,
            format,
            engine,
        }
    }

    /// Key for `desc` on `engine`.
    ///
    /// # Errors
    /// Returns `UnsupportedOperator` when the operands mix layouts or the
    /// inputs mix dtypes, since no registered kernel handles either.
    pub fn for_desc(desc: &OperatorDesc, engine: EngineKind) -> Result<Self> {
        let first = &desc.tensor_descs()[0];
        if let Some(odd) = desc
            .tensor_descs()
            .iter()
            .find(|d| d.format() != first.format())
        {
            return Err(EngineError::UnsupportedOperator(format!(
                "{} with mixed layouts {} and {}",
                desc.kind(),
                first.format(),
                odd.format()
            )));
        }
        if let Some(odd) = desc
            .input_descs()
            .into_iter()
            .find(|d| d.dtype() != first.dtype())
        {
            return Err(EngineError::UnsupportedOperator(format!(
                "{} with mixed input dtypes {} and {}",
                desc.kind(),
                first.dtype(),
                odd.dtype()
            )));
        }
        Ok(Self::new(desc.kind(), first.dtype(), first.format(), engine))
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.kind, self.dtype, self.format, self.engine
        )
    }
}

/// Registration table mapping (kind, dtype, layout, engine) to a builder.
#[derive(Default)]
pub struct KernelRegistry {
    builders: RwLock<HashMap<KernelKey, KernelBuilder>>,
}

impl KernelRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding every kernel this crate ships.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        kernels::register_builtins(&registry);
        registry
    }

    /// Add or replace the builder for `key`.
    pub fn register(&self, key: KernelKey, builder: KernelBuilder) {
        write_lock(&self.builders).insert(key, builder);
    }

    pub fn contains(&self, key: &KernelKey) -> bool {
        read_lock(&self.builders).contains_key(key)
    }

    pub fn len(&self) -> usize {
        read_lock(&self.builders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build the kernel registered for `desc` on `engine`.
    ///
    /// # Errors
    /// Returns `UnsupportedOperator` when the operands have no single key or
    /// nothing is registered for it, or whatever the builder itself reports.
    pub fn resolve(
        &self,
        desc: &OperatorDesc,
        engine: EngineKind,
        target: BuildTarget<'_>,
    ) -> Result<KernelVariant> {
        let key = KernelKey::for_desc(desc, engine)?;
        let builder = read_lock(&self.builders).get(&key).copied();
        match builder {
            Some(build) => build(desc, target),
            None => Err(EngineError::UnsupportedOperator(format!(
                "no kernel registered for {}",
                key
            ))),
        }
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let builders = read_lock(&self.builders);
        let mut keys: Vec<String> = builders.keys().map(|k| k.to_string()).collect();
        keys.sort();
        f.debug_struct("KernelRegistry").field("keys", &keys).finish()
    }
}
