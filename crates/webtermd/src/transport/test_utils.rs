//! Test helpers for the transport module.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use super::{ConnectionHandler, TrackedConnection};

/// Counts connections and keeps them open until told otherwise.
pub(crate) struct HoldingHandler {
    count: Arc<AtomicUsize>,
    held: Mutex<Vec<TrackedConnection>>,
}

impl HoldingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
            held: Mutex::new(Vec::new()),
        });
        (count, handler)
    }

    /// Closes every held connection.
    pub(crate) fn release_all(&self) {
        let held = std::mem::take(&mut *self.held.lock().expect("held lock"));
        for connection in held {
            connection.close().expect("close held connection");
        }
    }
}

impl ConnectionHandler for HoldingHandler {
    fn handle(&self, connection: TrackedConnection) {
        self.held.lock().expect("held lock").push(connection);
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
