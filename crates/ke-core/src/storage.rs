use std::fmt;
use std::sync::{mpsc, Arc, Mutex};

use bytemuck::Pod;
use log::{debug, trace};

use crate::device::ClBuffer;
use crate::engine::{EngineId, EngineKind};
use crate::error::{EngineError, Result};
use crate::stream::Stream;
use crate::sync::lock_mutex;

/// Where a storage's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Host,
    Device,
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Residency::Host => write!(f, "host"),
            Residency::Device => write!(f, "device"),
        }
    }
}

/// Direction of a copy between caller memory and a storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl CopyDirection {
    pub fn from_id(id: u32) -> Option<CopyDirection> {
        match id {
            0 => Some(CopyDirection::HostToHost),
            1 => Some(CopyDirection::HostToDevice),
            2 => Some(CopyDirection::DeviceToHost),
            3 => Some(CopyDirection::DeviceToDevice),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            CopyDirection::HostToHost => 0,
            CopyDirection::HostToDevice => 1,
            CopyDirection::DeviceToHost => 2,
            CopyDirection::DeviceToDevice => 3,
        }
    }
}

impl fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyDirection::HostToHost => write!(f, "host_to_host"),
            CopyDirection::HostToDevice => write!(f, "host_to_device"),
            CopyDirection::DeviceToHost => write!(f, "device_to_host"),
            CopyDirection::DeviceToDevice => write!(f, "device_to_device"),
        }
    }
}

/// The caller side of a copy.
pub enum CopyBuffer<'a> {
    /// Bytes flow from this buffer into the storage.
    From(&'a [u8]),
    /// Bytes flow from the storage into this buffer.
    Into(&'a mut [u8]),
    /// Bytes flow from another storage into this one.
    Storage(&'a MemoryStorage),
}

enum Block {
    Host(Mutex<Vec<u8>>),
    Device(ClBuffer),
}

struct StorageInner {
    engine: EngineKind,
    owner: EngineId,
    capacity: usize,
    block: Block,
}

/// Handle to a block of memory on one engine.
///
/// Clones share the allocation; it is released when the last handle drops.
/// Execution contexts borrow storages and never own them.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<StorageInner>,
}

impl MemoryStorage {
    /// Allocate zeroed host memory.
    pub(crate) fn host(
        engine: EngineKind,
        owner: EngineId,
        capacity: usize,
        max_alloc: usize,
    ) -> Result<Self> {
        if capacity > max_alloc {
            return Err(EngineError::OutOfMemory {
                requested: capacity,
                available: max_alloc,
            });
        }
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| EngineError::OutOfMemory {
                requested: capacity,
                available: 0,
            })?;
        data.resize(capacity, 0);
        debug!("allocated {} host bytes on {} engine {}", capacity, engine, owner);
        Ok(Self::wrap(engine, owner, capacity, Block::Host(Mutex::new(data))))
    }

    pub(crate) fn device(engine: EngineKind, owner: EngineId, buffer: ClBuffer) -> Self {
        let capacity = buffer.size();
        debug!("allocated {} device bytes on {} engine {}", capacity, engine, owner);
        Self::wrap(engine, owner, capacity, Block::Device(buffer))
    }

    fn wrap(engine: EngineKind, owner: EngineId, capacity: usize, block: Block) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                engine,
                owner,
                capacity,
                block,
            }),
        }
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.inner.engine
    }

    pub fn owner(&self) -> EngineId {
        self.inner.owner
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn residency(&self) -> Residency {
        match self.inner.block {
            Block::Host(_) => Residency::Host,
            Block::Device(_) => Residency::Device,
        }
    }

    pub fn same_as(&self, other: &MemoryStorage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy `byte_size` bytes between `buffer` and this storage.
    ///
    /// With a stream the copy is ordered after everything already submitted
    /// to it. Data read from a `From` buffer is staged before this returns, so
    /// the caller may reuse the buffer at once. `Into` copies wait until the
    /// stream has drained through the copy. Without a stream the copy happens
    /// immediately.
    ///
    /// # Errors
    /// - `InvalidCopyDirection` if `direction` does not fit the residency of
    ///   the storages involved or the kind of `buffer`
    /// - `CopySize` if `byte_size` exceeds either side
    /// - `Device` if the stream belongs to another engine, or a transfer
    ///   queued earlier on the stream failed
    pub fn copy(
        &self,
        buffer: CopyBuffer<'_>,
        byte_size: usize,
        direction: CopyDirection,
        stream: Option<&Stream>,
    ) -> Result<()> {
        self.check_direction(&buffer, direction)?;
        self.check_size(byte_size, self.capacity())?;
        if let Some(stream) = stream {
            if self.residency() == Residency::Device && stream.owner() != self.owner() {
                return Err(EngineError::Device(format!(
                    "stream #{} belongs to engine {}, storage to engine {}",
                    stream.id(),
                    stream.owner(),
                    self.owner()
                )));
            }
        }
        trace!(
            "{} copy of {} bytes (capacity {}, stream {:?})",
            direction,
            byte_size,
            self.capacity(),
            stream.map(Stream::id)
        );

        match buffer {
            CopyBuffer::From(src) => {
                self.check_size(byte_size, src.len())?;
                let staged = src[..byte_size].to_vec();
                let target = self.clone();
                run(stream, Box::new(move || {
                    target.store(&staged);
                    Ok(())
                }))
            }
            CopyBuffer::Into(dst) => {
                self.check_size(byte_size, dst.len())?;
                match stream {
                    Some(stream) => {
                        let (tx, rx) = mpsc::channel();
                        let source = self.clone();
                        stream.submit(Box::new(move || {
                            let _ = tx.send(source.load(byte_size));
                            Ok(())
                        }))?;
                        stream.synchronize()?;
                        let bytes = rx.try_recv().map_err(|_| {
                            EngineError::Device("device-to-host copy did not complete".to_string())
                        })?;
                        dst[..byte_size].copy_from_slice(&bytes);
                    }
                    None => dst[..byte_size].copy_from_slice(&self.load(byte_size)),
                }
                Ok(())
            }
            CopyBuffer::Storage(src) => {
                if src.owner() != self.owner() {
                    return Err(EngineError::Device(format!(
                        "device-to-device copy across engines {} and {}",
                        src.owner(),
                        self.owner()
                    )));
                }
                self.check_size(byte_size, src.capacity())?;
                let source = src.clone();
                let target = self.clone();
                run(stream, Box::new(move || {
                    let bytes = source.load(byte_size);
                    target.store(&bytes);
                    Ok(())
                }))
            }
        }
    }

    /// Upload `data` to the start of the storage.
    pub fn write_slice<T: Pod>(&self, data: &[T], stream: Option<&Stream>) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let direction = match self.residency() {
            Residency::Host => CopyDirection::HostToHost,
            Residency::Device => CopyDirection::HostToDevice,
        };
        self.copy(CopyBuffer::From(bytes), bytes.len(), direction, stream)
    }

    /// Download the first `count` elements of the storage.
    pub fn read_vec<T: Pod>(&self, count: usize, stream: Option<&Stream>) -> Result<Vec<T>> {
        let mut bytes = vec![0u8; count * std::mem::size_of::<T>()];
        let direction = match self.residency() {
            Residency::Host => CopyDirection::HostToHost,
            Residency::Device => CopyDirection::DeviceToHost,
        };
        let len = bytes.len();
        self.copy(CopyBuffer::Into(&mut bytes), len, direction, stream)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Copy of the first `len` bytes. `len` must not exceed the capacity.
    pub(crate) fn load(&self, len: usize) -> Vec<u8> {
        match &self.inner.block {
            Block::Host(data) => lock_mutex(data)[..len].to_vec(),
            Block::Device(buffer) => buffer.read(len),
        }
    }

    /// Overwrite the start of the storage. `src` must fit the capacity.
    pub(crate) fn store(&self, src: &[u8]) {
        match &self.inner.block {
            Block::Host(data) => lock_mutex(data)[..src.len()].copy_from_slice(src),
            Block::Device(buffer) => buffer.write(src),
        }
    }

    fn check_size(&self, requested: usize, capacity: usize) -> Result<()> {
        if requested > capacity {
            return Err(EngineError::CopySize {
                requested,
                capacity,
            });
        }
        Ok(())
    }

    fn check_direction(&self, buffer: &CopyBuffer<'_>, direction: CopyDirection) -> Result<()> {
        let residency = self.residency();
        let ok = match (direction, buffer) {
            (CopyDirection::HostToHost, CopyBuffer::From(_) | CopyBuffer::Into(_)) => {
                residency == Residency::Host
            }
            (CopyDirection::HostToDevice, CopyBuffer::From(_)) => residency == Residency::Device,
            (CopyDirection::DeviceToHost, CopyBuffer::Into(_)) => residency == Residency::Device,
            (CopyDirection::DeviceToDevice, CopyBuffer::Storage(src)) => {
                residency == Residency::Device && src.residency() == Residency::Device
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::InvalidCopyDirection {
                direction,
                residency,
            })
        }
    }
}

fn run(stream: Option<&Stream>, command: crate::device::Command) -> Result<()> {
    match stream {
        Some(stream) => stream.submit(command),
        None => command(),
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("engine", &self.inner.engine)
            .field("owner", &self.inner.owner)
            .field("residency", &self.residency())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
