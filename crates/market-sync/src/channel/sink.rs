//! Update sink trait and implementations.

use std::sync::{Arc, Mutex};

use crate::errors::SyncError;

/// Receiver of values delivered by a realtime channel.
///
/// # Design Rules
///
/// - Callbacks must be fast and non-blocking
/// - Values arrive in non-decreasing `last_updated` order
/// - Nothing is delivered after the subscription is closed
/// - A callback may unsubscribe or drop its own handle; delivery stops there
pub trait UpdateSink<T>: Send + Sync {
    /// A new value arrived.
    fn on_update(&self, value: T);

    /// The channel failed, or a recomputation triggered by a push failed.
    fn on_error(&self, error: SyncError);
}

/// No-op implementation for contexts that only need the subscription.
#[derive(Clone, Default)]
pub struct NoOpUpdateSink;

impl<T> UpdateSink<T> for NoOpUpdateSink {
    fn on_update(&self, _value: T) {}

    fn on_error(&self, _error: SyncError) {}
}

/// Mock sink for testing - collects delivered values and errors.
#[derive(Clone)]
pub struct MockUpdateSink<T> {
    updates: Arc<Mutex<Vec<T>>>,
    errors: Arc<Mutex<Vec<SyncError>>>,
}

impl<T> Default for MockUpdateSink<T> {
    fn default() -> Self {
        Self {
            updates: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> MockUpdateSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all delivered values.
    pub fn updates(&self) -> Vec<T> {
        self.updates.lock().unwrap().clone()
    }

    /// Returns all reported errors.
    pub fn errors(&self) -> Vec<SyncError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.lock().unwrap().is_empty()
    }
}

impl<T: Send> UpdateSink<T> for MockUpdateSink<T> {
    fn on_update(&self, value: T) {
        self.updates.lock().unwrap().push(value);
    }

    fn on_error(&self, error: SyncError) {
        self.errors.lock().unwrap().push(error);
    }
}
