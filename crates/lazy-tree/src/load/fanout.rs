//! Progress and cancellation fan-out for a running load.
//!
//! A [`ProgressFanout`] has one producer (the loader) and any number of
//! observers that may come and go while the load runs. Events are delivered
//! to a snapshot of the observer set, so attaching or detaching during a
//! broadcast never disturbs the broadcast itself.
//!
//! Each observer has its own delivery gate. `detach` closes the gate and then
//! takes it, which means it waits for a delivery already in progress to that
//! observer and prevents every later one. The gate is reentrant, so an
//! observer may detach itself from inside its own callback. A detach issued
//! from inside any observer callback does not wait for other observers'
//! deliveries, since two such waits on different threads could deadlock.

use crate::error::Cancelled;
use crate::load::task::TaskStatus;
use derive_more::Display;
use log::{debug, trace};
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One progress report from a loader
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display(fmt = "{}/{}", done, total)]
pub struct ProgressEvent {
    /// Units of work finished so far
    pub done: u64,
    /// Total units of work, 0 when unknown
    pub total: u64,
    /// Optional human-readable detail (e.g. the entry just loaded)
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Create a progress event without a message
    pub fn new(done: u64, total: u64) -> Self {
        Self {
            done,
            total,
            message: None,
        }
    }

    /// Attach a message to this event
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Completion percentage, or `None` when the total is unknown
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let done = self.done.min(self.total);
        Some((done * 100 / self.total) as u8)
    }
}

/// Receiver of progress and cancellation notifications
///
/// Callbacks run on the reporting thread (usually the loader's thread) and
/// must return promptly.
pub trait ProgressObserver: Send + Sync {
    /// A progress event was reported
    fn on_progress(&self, event: &ProgressEvent);

    /// Cancellation was requested for the load
    fn on_cancel_requested(&self) {}

    /// The load reached a terminal status; no further calls follow
    fn on_complete(&self, _status: &TaskStatus) {}
}

/// Token identifying one attachment of an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(fmt = "ObserverId({})", _0)]
pub struct ObserverId(u64);

/// Notification forwarded by a [`ChannelObserver`]
#[derive(Debug, Clone)]
pub enum FanoutEvent {
    /// A progress report
    Progress(ProgressEvent),
    /// Cancellation was requested
    CancelRequested,
    /// The load finished with this status
    Completed(TaskStatus),
}

impl FanoutEvent {
    /// The progress event, if this is a progress notification
    pub fn as_progress(&self) -> Option<&ProgressEvent> {
        match self {
            FanoutEvent::Progress(event) => Some(event),
            _ => None,
        }
    }
}

/// Observer that forwards every notification into a `flume` channel
///
/// Useful for consumers (UIs, tests) that prefer pulling events on their own
/// thread instead of reacting inside the loader's thread.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: flume::Sender<FanoutEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn channel() -> (Arc<Self>, flume::Receiver<FanoutEvent>) {
        let (tx, rx) = flume::unbounded();
        (Arc::new(Self { tx }), rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(FanoutEvent::Progress(event.clone()));
    }

    fn on_cancel_requested(&self) {
        let _ = self.tx.send(FanoutEvent::CancelRequested);
    }

    fn on_complete(&self, status: &TaskStatus) {
        let _ = self.tx.send(FanoutEvent::Completed(status.clone()));
    }
}

thread_local! {
    /// Number of observer callbacks running on this thread
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as inside an observer callback
struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        DELIVERING.with(|depth| depth.set(depth.get() + 1));
        DeliveryScope
    }

    fn active() -> bool {
        DELIVERING.with(|depth| depth.get() > 0)
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING.with(|depth| depth.set(depth.get() - 1));
    }
}

struct Entry {
    id: ObserverId,
    observer: Arc<dyn ProgressObserver>,
    /// True while the observer is attached
    open: AtomicBool,
    /// Held for the duration of every delivery
    gate: ReentrantMutex<()>,
}

impl Entry {
    fn deliver(&self, f: impl FnOnce(&dyn ProgressObserver)) {
        let _gate = self.gate.lock();
        if self.open.load(Ordering::Acquire) {
            let _scope = DeliveryScope::enter();
            f(self.observer.as_ref());
        }
    }

    fn deliver_last(&self, f: impl FnOnce(&dyn ProgressObserver)) {
        let _gate = self.gate.lock();
        if self.open.swap(false, Ordering::AcqRel) {
            let _scope = DeliveryScope::enter();
            f(self.observer.as_ref());
        }
    }

    /// Stop deliveries, returning whether the entry was still open
    ///
    /// Outside of observer callbacks this also waits for a delivery already
    /// in progress.
    fn close(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        if !DeliveryScope::active() {
            drop(self.gate.lock());
        }
        was_open
    }
}

#[derive(Default)]
struct Members {
    entries: Vec<Arc<Entry>>,
    /// Entries taken by `complete` that are still receiving `on_complete`
    draining: Vec<Arc<Entry>>,
    next_id: u64,
    completed: bool,
}

/// Broadcasts progress and cancellation from one load to many observers
#[derive(Default)]
pub struct ProgressFanout {
    members: RwLock<Members>,
    cancel_requested: AtomicBool,
}

impl ProgressFanout {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering events to `observer`
    ///
    /// Returns `None` without attaching once the fan-out has completed.
    pub fn attach(&self, observer: Arc<dyn ProgressObserver>) -> Option<ObserverId> {
        let mut members = self.members.write();
        if members.completed {
            trace!("ignoring attach to a completed fan-out");
            return None;
        }
        let id = ObserverId(members.next_id);
        members.next_id += 1;
        members.entries.push(Arc::new(Entry {
            id,
            observer,
            open: AtomicBool::new(true),
            gate: ReentrantMutex::new(()),
        }));
        trace!("attached observer {}", id);
        Some(id)
    }

    /// Stop delivering events to the observer attached as `id`
    ///
    /// Once this returns, the observer receives nothing further, including a
    /// final `on_complete` that is being broadcast concurrently. Returns false
    /// if `id` is not attached or has already received `on_complete`.
    ///
    /// Called from inside an observer callback, this does not wait for a
    /// delivery in progress on another thread.
    pub fn detach(&self, id: ObserverId) -> bool {
        let entry = {
            let mut members = self.members.write();
            if let Some(position) = members.entries.iter().position(|entry| entry.id == id) {
                members.entries.remove(position)
            } else if let Some(entry) = members.draining.iter().find(|entry| entry.id == id) {
                Arc::clone(entry)
            } else {
                return false;
            }
        };
        let detached = entry.close();
        if detached {
            trace!("detached observer {}", id);
        }
        detached
    }

    /// Deliver `event` to every attached observer
    pub fn report(&self, event: ProgressEvent) {
        let Some(snapshot) = self.snapshot() else {
            trace!("dropping progress {} reported after completion", event);
            return;
        };
        for entry in &snapshot {
            entry.deliver(|observer| observer.on_progress(&event));
        }
    }

    /// Ask the load to stop early
    ///
    /// Cancellation is advisory: the loader has to poll
    /// [`is_cancel_requested`](Self::is_cancel_requested). Only the first
    /// request notifies observers.
    pub fn request_cancel(&self) {
        if self.cancel_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(snapshot) = self.snapshot() else {
            return;
        };
        debug!("cancellation requested, notifying {} observers", snapshot.len());
        for entry in &snapshot {
            entry.deliver(|observer| observer.on_cancel_requested());
        }
    }

    /// Returns true once cancellation has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn ensure_not_cancelled(&self) -> Result<(), Cancelled> {
        if self.is_cancel_requested() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Deliver the final status and drop every observer
    ///
    /// Called once by the owning task. Later calls, attaches and reports are
    /// ignored.
    pub fn complete(&self, status: &TaskStatus) {
        let drained = {
            let mut members = self.members.write();
            if members.completed {
                return;
            }
            members.completed = true;
            members.draining = std::mem::take(&mut members.entries);
            members.draining.clone()
        };
        trace!("completing fan-out for {} observers", drained.len());
        for entry in &drained {
            entry.deliver_last(|observer| observer.on_complete(status));
        }
        self.members.write().draining.clear();
    }

    /// Returns true once [`complete`](Self::complete) has run
    pub fn is_completed(&self) -> bool {
        self.members.read().completed
    }

    /// Number of currently attached observers
    pub fn observer_count(&self) -> usize {
        self.members.read().entries.len()
    }

    fn snapshot(&self) -> Option<Vec<Arc<Entry>>> {
        let members = self.members.read();
        if members.completed {
            None
        } else {
            Some(members.entries.clone())
        }
    }
}

impl std::fmt::Debug for ProgressFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members = self.members.read();
        f.debug_struct("ProgressFanout")
            .field("observers", &members.entries.len())
            .field("completed", &members.completed)
            .field("cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}
