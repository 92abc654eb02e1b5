//! The command queue: bounded FIFO dispatch with an optional consumer
//! thread.
//!
//! [`Dispatcher`] is the single enqueue surface. In threaded mode commands
//! travel over a bounded channel to the consumer thread; a full queue
//! blocks the producer (backpressure) rather than failing. With threading
//! disabled the same API executes commands inline — callers cannot tell
//! the difference apart from timing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::command::{Command, CompletionToken};
use crate::device::GfxDevice;
use crate::worker::{self, Executor};

/// Enqueue-side failure. Device-call failures never surface here; these
/// are contract conditions of the queue itself.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The queue has been shut down; the command was not enqueued.
    #[error("command queue is closed")]
    Closed,

    /// Enqueue from the consumer thread itself — the consumer cannot wait
    /// on work behind its own cursor.
    #[error("re-entrant enqueue from the consumer thread")]
    Reentrant,

    /// The command was dropped before producing an output.
    #[error("command canceled before completion")]
    Canceled,
}

enum Mode {
    Threaded {
        tx: mpsc::Sender<Command>,
        consumer: ThreadId,
        worker: Mutex<Option<JoinHandle<()>>>,
    },
    Direct {
        executor: Mutex<Executor>,
    },
}

/// Producer-facing dispatch handle. Shared (`Arc`) between the context and
/// any color-buffer readers it hands out.
pub struct Dispatcher {
    mode: Mode,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Threaded mode: spawn the consumer and connect it with a bounded
    /// FIFO channel of `capacity` records.
    pub fn threaded(device: Box<dyn GfxDevice>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = worker::spawn(device, rx);
        let consumer = handle.thread().id();
        Self {
            mode: Mode::Threaded {
                tx,
                consumer,
                worker: Mutex::new(Some(handle)),
            },
            closed: AtomicBool::new(false),
        }
    }

    /// Direct mode: no queue, no thread; commands execute inline on the
    /// caller's thread through the same executor.
    pub fn direct(device: Box<dyn GfxDevice>) -> Self {
        Self {
            mode: Mode::Direct {
                executor: Mutex::new(Executor::new(device)),
            },
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded { .. })
    }

    /// Fire-and-forget enqueue. Returns as soon as the record is appended
    /// (threaded) or executed (direct); the caller must not assume
    /// execution has happened.
    pub fn submit(&self, cmd: Command) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }
        match &self.mode {
            Mode::Threaded { tx, consumer, .. } => {
                if std::thread::current().id() == *consumer {
                    return Err(DispatchError::Reentrant);
                }
                tx.blocking_send(cmd).map_err(|_| DispatchError::Closed)
            }
            Mode::Direct { executor } => {
                executor.lock().execute(cmd);
                Ok(())
            }
        }
    }

    /// Blocking enqueue: append the record, then suspend until its
    /// completion token is signaled. The command must carry the sender
    /// half created alongside `token`.
    pub fn submit_wait<T>(
        &self,
        cmd: Command,
        token: CompletionToken<T>,
    ) -> Result<T, DispatchError> {
        self.submit(cmd)?;
        token.wait()
    }

    /// Ordered shutdown: every command enqueued before this call executes,
    /// nothing enqueued after it does. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Mode::Threaded { tx, worker, .. } = &self.mode {
            // The stop sentinel rides the same FIFO, so it drains the queue.
            let _ = tx.blocking_send(Command::Stop);
            if let Some(handle) = worker.lock().take() {
                if handle.join().is_err() {
                    tracing::warn!("consumer thread panicked during shutdown");
                }
            }
        }
        tracing::debug!("dispatcher closed");
    }

    #[cfg(test)]
    pub(crate) fn pretend_current_thread_is_consumer(&mut self) {
        if let Mode::Threaded { consumer, .. } = &mut self.mode {
            *consumer = std::thread::current().id();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
