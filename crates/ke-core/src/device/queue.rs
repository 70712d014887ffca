use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{trace, warn};

use crate::error::{EngineError, Result};
use crate::sync::lock_mutex;

/// A unit of work run on a queue worker.
pub type Command = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Message {
    Run(Command),
    Barrier(mpsc::Sender<()>),
}

/// In-order command queue backed by one worker thread.
///
/// Commands run strictly in the order they were enqueued. The first failure
/// is recorded and reported by the next [`CommandQueue::finish`]; later
/// commands still run.
pub struct CommandQueue {
    name: String,
    sender: Option<mpsc::Sender<Message>>,
    worker: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<EngineError>>>,
    enqueued: AtomicU64,
}

impl CommandQueue {
    pub fn spawn(name: String) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Message>();
        let failure = Arc::new(Mutex::new(None));
        let worker_failure = Arc::clone(&failure);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(receiver, worker_failure))
            .map_err(|e| EngineError::Device(format!("failed to start command queue: {}", e)))?;
        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            failure,
            enqueued: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of commands enqueued so far.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.send(Message::Run(command))?;
        let n = self.enqueued.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("{}: enqueued command #{}", self.name, n);
        Ok(())
    }

    /// Block until every command enqueued before this call has run.
    ///
    /// Returns the first failure recorded since the previous `finish`.
    pub fn finish(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.send(Message::Barrier(tx))?;
        rx.recv().map_err(|_| {
            EngineError::Device(format!("{}: worker exited before the barrier", self.name))
        })?;
        match lock_mutex(&self.failure).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn send(&self, message: Message) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EngineError::Device(format!("{}: queue is shut down", self.name)))?;
        sender
            .send(message)
            .map_err(|_| EngineError::Device(format!("{}: worker is gone", self.name)))
    }
}

fn run_worker(receiver: mpsc::Receiver<Message>, failure: Arc<Mutex<Option<EngineError>>>) {
    for message in receiver {
        match message {
            Message::Run(command) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(command))
                    .unwrap_or_else(|_| Err(EngineError::Device("command panicked".to_string())));
                if let Err(err) = outcome {
                    warn!("queued command failed: {}", err);
                    let mut slot = lock_mutex(&failure);
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            }
            Message::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is left and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.name)
            .field("enqueued", &self.enqueued())
            .finish()
    }
}
