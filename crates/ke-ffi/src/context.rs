use ke_core::{ExecContext, Kernel, MemoryStorage, Stream};

/// Opaque execution context handle.
///
/// Holds its own references to the stream and storages, so destroying the
/// stream or storage handles first is allowed.
pub struct KeContext {
    pub(crate) stream: Stream,
    pub(crate) inputs: Vec<MemoryStorage>,
    pub(crate) outputs: Vec<MemoryStorage>,
}

impl KeContext {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Bind `kernel` to this context's stream and storages.
    pub(crate) fn init(&self, kernel: &Kernel) -> ke_core::Result<()> {
        let mut ctx = ExecContext::new(&self.stream);
        for storage in &self.inputs {
            ctx.add_input(storage);
        }
        for storage in &self.outputs {
            ctx.add_output(storage);
        }
        kernel.init(&ctx)
    }
}
