use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use crate::context::ExecContext;
use crate::device::{ClProgram, Command, NdRange};
use crate::engine::{EngineId, EngineKind};
use crate::error::{EngineError, Result};
use crate::op_desc::OperatorDesc;
use crate::storage::MemoryStorage;
use crate::stream::Stream;
use crate::sync::lock_mutex;
use crate::tensor_desc::TensorDesc;

/// Host routine: reads the staged input bytes, fills the output buffers.
pub type HostKernelFn = fn(&OperatorDesc, &[&[u8]], &mut [Vec<u8>]) -> Result<()>;

/// Device routine: emulates one launch of a built program over `NdRange`.
pub type DeviceKernelFn = fn(&OperatorDesc, &NdRange, &[&[u8]], &mut [Vec<u8>]) -> Result<()>;

#[derive(Clone)]
pub struct HostKernel {
    pub name: &'static str,
    pub run: HostKernelFn,
}

#[derive(Clone)]
pub struct DeviceKernel {
    pub name: &'static str,
    pub program: Arc<ClProgram>,
    pub range: NdRange,
    pub run: DeviceKernelFn,
}

/// The backend-specific realization of an operator descriptor.
#[derive(Clone)]
pub enum KernelVariant {
    Host(HostKernel),
    Device(DeviceKernel),
}

impl KernelVariant {
    pub fn name(&self) -> &'static str {
        match self {
            KernelVariant::Host(k) => k.name,
            KernelVariant::Device(k) => k.name,
        }
    }

    fn run(&self, desc: &OperatorDesc, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> Result<()> {
        match self {
            KernelVariant::Host(k) => (k.run)(desc, inputs, outputs),
            KernelVariant::Device(k) => (k.run)(desc, &k.range, inputs, outputs),
        }
    }
}

impl fmt::Debug for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelVariant::Host(k) => f.debug_struct("Host").field("name", &k.name).finish(),
            KernelVariant::Device(k) => f
                .debug_struct("Device")
                .field("name", &k.name)
                .field("options", &k.program.options())
                .field("range", &k.range)
                .finish(),
        }
    }
}

/// Where a kernel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Uninitialized,
    Initialized,
    Executed,
}

#[derive(Debug)]
struct Binding {
    stream: Stream,
    inputs: Vec<MemoryStorage>,
    outputs: Vec<MemoryStorage>,
    executions: u64,
}

/// A compiled kernel for one operator descriptor on one engine.
///
/// Obtained from [`Engine::create_kernel`](crate::Engine::create_kernel) and
/// shared through `Arc`. Call [`Kernel::init`] with a context, then
/// [`Kernel::execute`] any number of times; `init` may be called again to
/// rebind to a new context without recompiling.
#[derive(Debug)]
pub struct Kernel {
    desc: Arc<OperatorDesc>,
    owner: EngineId,
    engine: EngineKind,
    variant: KernelVariant,
    binding: Mutex<Option<Binding>>,
}

impl Kernel {
    pub(crate) fn new(
        desc: Arc<OperatorDesc>,
        owner: EngineId,
        engine: EngineKind,
        variant: KernelVariant,
    ) -> Self {
        Self {
            desc,
            owner,
            engine,
            variant,
            binding: Mutex::new(None),
        }
    }

    pub fn desc(&self) -> &Arc<OperatorDesc> {
        &self.desc
    }

    pub fn name(&self) -> &'static str {
        self.variant.name()
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine
    }

    pub fn variant(&self) -> &KernelVariant {
        &self.variant
    }

    pub fn state(&self) -> KernelState {
        match &*lock_mutex(&self.binding) {
            None => KernelState::Uninitialized,
            Some(b) if b.executions == 0 => KernelState::Initialized,
            Some(_) => KernelState::Executed,
        }
    }

    /// Executions since the last successful `init`.
    pub fn executions(&self) -> u64 {
        lock_mutex(&self.binding)
            .as_ref()
            .map_or(0, |b| b.executions)
    }

    /// Bind the kernel to the stream and storages of `ctx`.
    ///
    /// Any previous binding is dropped first, so a failed `init` leaves the
    /// kernel uninitialized.
    ///
    /// # Errors
    /// Returns `ContextMismatch` if the stream or a storage belongs to another
    /// engine, the number of inputs or outputs differs from the operator's
    /// role layout, or a storage is smaller than its tensor.
    pub fn init(&self, ctx: &ExecContext<'_>) -> Result<()> {
        let mut binding = lock_mutex(&self.binding);
        *binding = None;
        let bound = self.bind(ctx)?;
        debug!(
            "{}: bound {} inputs and {} outputs on stream #{}",
            self.name(),
            bound.inputs.len(),
            bound.outputs.len(),
            bound.stream.id()
        );
        *binding = Some(bound);
        Ok(())
    }

    /// Run the kernel on its bound stream.
    ///
    /// Host kernels have finished when this returns. Device kernels are only
    /// enqueued; a blocking read or [`Stream::synchronize`] on the same stream
    /// observes completion and reports failures.
    ///
    /// # Errors
    /// Returns `InvalidState` before a successful `init`. If the launch fails
    /// synchronously, the binding is dropped and `init` must be called again.
    pub fn execute(&self) -> Result<()> {
        let mut guard = lock_mutex(&self.binding);
        let binding = guard.as_mut().ok_or_else(|| {
            EngineError::InvalidState(format!("{} executed before init", self.name()))
        })?;
        let command = self.command(binding);
        match binding.stream.submit(command) {
            Ok(()) => {
                binding.executions += 1;
                trace!(
                    "{}: launch #{} on stream #{}",
                    self.name(),
                    binding.executions,
                    binding.stream.id()
                );
                Ok(())
            }
            Err(err) => {
                *guard = None;
                Err(err)
            }
        }
    }

    fn command(&self, binding: &Binding) -> Command {
        let variant = self.variant.clone();
        let desc = Arc::clone(&self.desc);
        let inputs = binding.inputs.clone();
        let outputs = binding.outputs.clone();
        Box::new(move || run_bound(&variant, &desc, &inputs, &outputs))
    }

    fn bind(&self, ctx: &ExecContext<'_>) -> Result<Binding> {
        let stream = ctx.stream();
        if stream.owner() != self.owner {
            return Err(EngineError::ContextMismatch(format!(
                "stream #{} belongs to engine {}, kernel {} to engine {}",
                stream.id(),
                stream.owner(),
                self.name(),
                self.owner
            )));
        }
        let inputs = self.bind_slots("input", ctx.inputs(), &self.desc.input_descs())?;
        let outputs = self.bind_slots("output", ctx.outputs(), &self.desc.output_descs())?;
        Ok(Binding {
            stream: stream.clone(),
            inputs,
            outputs,
            executions: 0,
        })
    }

    fn bind_slots(
        &self,
        what: &str,
        storages: &[&MemoryStorage],
        descs: &[&TensorDesc],
    ) -> Result<Vec<MemoryStorage>> {
        if storages.len() != descs.len() {
            return Err(EngineError::ContextMismatch(format!(
                "{} expects {} {}s, context has {}",
                self.desc.kind(),
                descs.len(),
                what,
                storages.len()
            )));
        }
        for (slot, (storage, desc)) in storages.iter().zip(descs).enumerate() {
            if storage.owner() != self.owner {
                return Err(EngineError::ContextMismatch(format!(
                    "{} {} lives on engine {}, kernel on engine {}",
                    what,
                    slot,
                    storage.owner(),
                    self.owner
                )));
            }
            if storage.capacity() < desc.size_in_bytes() {
                return Err(EngineError::ContextMismatch(format!(
                    "{} {} holds {} bytes, tensor {} needs {}",
                    what,
                    slot,
                    storage.capacity(),
                    desc,
                    desc.size_in_bytes()
                )));
            }
        }
        Ok(storages.iter().map(|s| (*s).clone()).collect())
    }
}

fn run_bound(
    variant: &KernelVariant,
    desc: &OperatorDesc,
    inputs: &[MemoryStorage],
    outputs: &[MemoryStorage],
) -> Result<()> {
    // Inputs are snapshotted so a storage bound as both input and output
    // is never locked twice.
    let staged: Vec<Vec<u8>> = inputs
        .iter()
        .zip(desc.input_descs())
        .map(|(s, d)| s.load(d.size_in_bytes()))
        .collect();
    let views: Vec<&[u8]> = staged.iter().map(Vec::as_slice).collect();
    let mut results: Vec<Vec<u8>> = desc
        .output_descs()
        .iter()
        .map(|d| vec![0u8; d.size_in_bytes()])
        .collect();
    variant.run(desc, &views, &mut results)?;
    for (storage, bytes) in outputs.iter().zip(&results) {
        storage.store(bytes);
    }
    Ok(())
}
