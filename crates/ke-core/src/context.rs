use crate::storage::MemoryStorage;
use crate::stream::Stream;

/// Binds ordered input and output storages to a stream for one kernel
/// invocation.
///
/// Nothing is checked while the context is being filled in; the kernel
/// validates slot counts and sizes in [`Kernel::init`](crate::Kernel::init).
/// The context borrows its storages and cannot outlive them.
#[derive(Debug)]
pub struct ExecContext<'a> {
    stream: &'a Stream,
    inputs: Vec<&'a MemoryStorage>,
    outputs: Vec<&'a MemoryStorage>,
}

impl<'a> ExecContext<'a> {
    pub fn new(stream: &'a Stream) -> Self {
        Self {
            stream,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn add_input(&mut self, storage: &'a MemoryStorage) {
        self.inputs.push(storage);
    }

    pub fn add_output(&mut self, storage: &'a MemoryStorage) {
        self.outputs.push(storage);
    }

    pub fn stream(&self) -> &'a Stream {
        self.stream
    }

    pub fn inputs(&self) -> &[&'a MemoryStorage] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[&'a MemoryStorage] {
        &self.outputs
    }
}
