//! Completion Event
//!
//! Level-triggered event shared between the service context, which creates it,
//! and the guest, which waits on its readable side. Signaling an already
//! signaled event changes nothing; only the owner of the readable side clears it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug)]
pub struct KernelEvent {
    name: String,
    signaled: AtomicBool,
    signal_count: AtomicU64,
    notify: Notify,
}

impl KernelEvent {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            signaled: AtomicBool::new(false),
            signal_count: AtomicU64::new(0),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the event; waiters registered before this call wake up
    pub fn signal(&self) {
        self.signal_count.fetch_add(1, Ordering::SeqCst);
        if !self.signaled.swap(true, Ordering::SeqCst) {
            trace!(event = %self.name, "Event signaled");
        }
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.signaled.store(false, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Total number of `signal` calls, including ones that found the event set
    pub fn signal_count(&self) -> u64 {
        self.signal_count.load(Ordering::SeqCst)
    }
}

/// Waitable side of a [`KernelEvent`]
#[derive(Debug, Clone)]
pub struct ReadableEvent {
    event: Arc<KernelEvent>,
}

impl ReadableEvent {
    pub fn new(event: &Arc<KernelEvent>) -> Self {
        Self {
            event: Arc::clone(event),
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.event.is_signaled()
    }

    pub fn clear(&self) {
        self.event.clear();
    }

    /// Wait until signaled; returns immediately when already set
    pub async fn wait(&self) {
        loop {
            let notified = self.event.notify.notified();
            if self.event.is_signaled() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_same_event(&self, other: &ReadableEvent) -> bool {
        Arc::ptr_eq(&self.event, &other.event)
    }
}
