use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use crate::device::{Command, CommandQueue};
use crate::engine::{EngineId, EngineKind};
use crate::error::Result;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Ordered execution queue bound to one engine.
///
/// Cloning a `Stream` yields another handle to the same queue. Work submitted
/// to one stream runs in submission order; nothing orders two streams against
/// each other. Host streams run work inline at submission.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: u64,
    engine: EngineKind,
    owner: EngineId,
    queue: Option<CommandQueue>,
}

impl Stream {
    pub(crate) fn host(engine: EngineKind, owner: EngineId) -> Self {
        Self::with_queue(engine, owner, None)
    }

    pub(crate) fn device(engine: EngineKind, owner: EngineId, queue: CommandQueue) -> Self {
        Self::with_queue(engine, owner, Some(queue))
    }

    fn with_queue(engine: EngineKind, owner: EngineId, queue: Option<CommandQueue>) -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "created {} stream #{} on {} engine {}",
            if queue.is_some() { "async" } else { "inline" },
            id,
            engine,
            owner
        );
        Self {
            inner: Arc::new(StreamInner {
                id,
                engine,
                owner,
                queue,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.inner.engine
    }

    /// The engine instance that created this stream.
    pub fn owner(&self) -> EngineId {
        self.inner.owner
    }

    /// True when submitted work may still be running after `submit` returns.
    pub fn is_async(&self) -> bool {
        self.inner.queue.is_some()
    }

    /// Run `command` after everything submitted before it.
    ///
    /// On a host stream the command runs now and its error is returned
    /// directly. On a device stream the command is queued and its error, if
    /// any, surfaces from the next [`Stream::synchronize`].
    pub(crate) fn submit(&self, command: Command) -> Result<()> {
        match &self.inner.queue {
            Some(queue) => queue.enqueue(command),
            None => command(),
        }
    }

    /// Block until all submitted work has completed.
    pub fn synchronize(&self) -> Result<()> {
        match &self.inner.queue {
            Some(queue) => queue.finish(),
            None => Ok(()),
        }
    }

    pub fn same_as(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("engine", &self.inner.engine)
            .field("owner", &self.inner.owner)
            .field("async", &self.is_async())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::Mutex;

    #[test]
    fn test_host_stream_runs_inline() {
        let s = Stream::host(EngineKind::Cpu, EngineId::next());
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        s.submit(Box::new(move || {
            *h.lock().unwrap() += 1;
            Ok(())
        }))
        .unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert!(!s.is_async());
        assert!(s
            .submit(Box::new(|| Err(EngineError::Device("x".to_string()))))
            .is_err());
    }

    #[test]
    fn test_device_stream_defers_errors_to_synchronize() {
        let queue = CommandQueue::spawn("s".to_string()).unwrap();
        let s = Stream::device(EngineKind::Gpu, EngineId::next(), queue);
        assert!(s.is_async());
        s.submit(Box::new(|| Err(EngineError::Device("late".to_string()))))
            .unwrap();
        assert!(matches!(s.synchronize(), Err(EngineError::Device(_))));
        assert!(s.synchronize().is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let owner = EngineId::next();
        let a = Stream::host(EngineKind::Cpu, owner);
        let b = Stream::host(EngineKind::Cpu, owner);
        assert_ne!(a.id(), b.id());
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}
