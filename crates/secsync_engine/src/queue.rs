//! Single-consumer event queue.
//!
//! Producers on any thread enqueue [`SecurityEvent`]s without blocking; one
//! dedicated worker thread hands them, in arrival order, to a
//! [`SecurityEventHandler`]. The worker finishes an event, including every
//! retry the handler performs, before it takes the next one, so no two
//! events are ever processed at the same time.
//!
//! ```rust,ignore
//! let queue = SecurityEventQueue::start("secsync-updater", handler)?;
//! queue.enqueue(SecurityEvent::new(Some(info), None))?;
//! queue.wait_until_idle(Duration::from_secs(5));
//! ```

use crate::error::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex};
use secsync_core::SecurityInfo;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// A change in what is known about an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEvent {
    /// Current security info. `None` if the application disappeared.
    pub new_info: Option<SecurityInfo>,
    /// Security info before the change. `None` if the application is new.
    pub old_info: Option<SecurityInfo>,
}

impl SecurityEvent {
    /// Creates a new event.
    pub fn new(new_info: Option<SecurityInfo>, old_info: Option<SecurityInfo>) -> Self {
        Self { new_info, old_info }
    }
}

/// Processes events taken from the queue.
pub trait SecurityEventHandler: Send + Sync + 'static {
    /// Handles one event. Errors are logged by the queue and otherwise
    /// ignored.
    fn handle_task(&self, event: SecurityEvent) -> SyncResult<()>;
}

/// Book-keeping shared between producers and the worker.
#[derive(Default)]
struct QueueState {
    /// Events enqueued but not yet fully processed.
    pending: Mutex<usize>,
    idle: Condvar,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl QueueState {
    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// FIFO queue drained by a single worker thread.
pub struct SecurityEventQueue {
    sender: Mutex<Option<Sender<SecurityEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<QueueState>,
}

impl SecurityEventQueue {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WorkerSpawn`] if the thread cannot be created.
    pub fn start<H: SecurityEventHandler>(name: &str, handler: Arc<H>) -> SyncResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let state = Arc::new(QueueState::default());
        let worker_state = Arc::clone(&state);

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(receiver, handler, worker_state))
            .map_err(|e| SyncError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            state,
        })
    }

    /// Adds an event to the back of the queue. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueClosed`] after [`shutdown`](Self::shutdown).
    pub fn enqueue(&self, event: SecurityEvent) -> SyncResult<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(SyncError::QueueClosed)?;

        *self.state.pending.lock() += 1;
        if sender.send(event).is_err() {
            self.state.finish_one();
            return Err(SyncError::QueueClosed);
        }
        Ok(())
    }

    /// Returns the number of events queued or in progress.
    pub fn pending(&self) -> usize {
        *self.state.pending.lock()
    }

    /// Returns the number of events handled so far, failed ones included.
    pub fn processed(&self) -> u64 {
        self.state.processed.load(Ordering::SeqCst)
    }

    /// Returns the number of events whose handler failed or panicked.
    pub fn failed(&self) -> u64 {
        self.state.failed.load(Ordering::SeqCst)
    }

    /// Waits until every enqueued event has been processed.
    ///
    /// Returns false if the timeout expired first.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            if self
                .state
                .idle
                .wait_until(&mut pending, deadline)
                .timed_out()
            {
                return *pending == 0;
            }
        }
        true
    }

    /// Stops accepting events, lets the worker drain what is queued and
    /// joins it.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("security event worker terminated abnormally");
            }
        }
    }

    /// Returns true once the queue no longer accepts events.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Drop for SecurityEventQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<H: SecurityEventHandler>(
    receiver: Receiver<SecurityEvent>,
    handler: Arc<H>,
    state: Arc<QueueState>,
) {
    debug!("security event worker started");
    for event in receiver {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle_task(event)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                state.failed.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "security event failed");
            }
            Err(_) => {
                state.failed.fetch_add(1, Ordering::SeqCst);
                error!("security event handler panicked");
            }
        }
        state.processed.fetch_add(1, Ordering::SeqCst);
        state.finish_one();
    }
    debug!("security event worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use secsync_core::{ApplicationState, KeyInfo};
    use std::sync::atomic::AtomicUsize;

    fn event(id: u8) -> SecurityEvent {
        SecurityEvent::new(
            Some(SecurityInfo::new(
                format!(":1.{id}"),
                KeyInfo::from_key_id(vec![id]),
                ApplicationState::Claimed,
            )),
            None,
        )
    }

    fn id_of(event: &SecurityEvent) -> u8 {
        event.new_info.as_ref().map_or(0, |info| info.key_info.key_id[0])
    }

    /// Records the order events arrive in and how many run at once.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u8>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl SecurityEventHandler for Recorder {
        fn handle_task(&self, event: SecurityEvent) -> SyncResult<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            self.seen.lock().push(id_of(&event));
            self.running.fetch_sub(1, Ordering::SeqCst);
            match id_of(&event) {
                13 => Err(SyncError::ApplicationNotFound),
                66 => panic!("handler blew up"),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn events_are_processed_in_order() {
        let recorder = Arc::new(Recorder::default());
        let queue = SecurityEventQueue::start("test-queue", Arc::clone(&recorder)).unwrap();

        for id in 1..=20 {
            queue.enqueue(event(id)).unwrap();
        }
        assert!(queue.wait_until_idle(Duration::from_secs(5)));

        assert_eq!(*recorder.seen.lock(), (1..=20).collect::<Vec<u8>>());
        assert_eq!(recorder.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(queue.processed(), 20);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn producers_on_many_threads() {
        let recorder = Arc::new(Recorder::default());
        let queue = Arc::new(SecurityEventQueue::start("test-queue", Arc::clone(&recorder)).unwrap());

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..5u8 {
                        queue.enqueue(event(t * 10 + i + 1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(queue.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(recorder.seen.lock().len(), 20);
        assert_eq!(recorder.max_running.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_do_not_stall_the_queue() {
        let recorder = Arc::new(Recorder::default());
        let queue = SecurityEventQueue::start("test-queue", Arc::clone(&recorder)).unwrap();

        queue.enqueue(event(13)).unwrap();
        queue.enqueue(event(66)).unwrap();
        queue.enqueue(event(2)).unwrap();
        assert!(queue.wait_until_idle(Duration::from_secs(5)));

        assert_eq!(*recorder.seen.lock(), vec![13, 66, 2]);
        assert_eq!(queue.failed(), 2);
        assert_eq!(queue.processed(), 3);
    }

    #[test]
    fn enqueue_after_shutdown_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let queue = SecurityEventQueue::start("test-queue", Arc::clone(&recorder)).unwrap();

        queue.enqueue(event(1)).unwrap();
        queue.shutdown();
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(event(2)), Err(SyncError::QueueClosed));

        // Events queued before shutdown are still delivered.
        assert_eq!(*recorder.seen.lock(), vec![1]);
    }

    #[test]
    fn idle_queue_returns_immediately() {
        let queue = SecurityEventQueue::start("test-queue", Arc::new(Recorder::default())).unwrap();
        assert!(queue.wait_until_idle(Duration::from_millis(1)));
    }
}
