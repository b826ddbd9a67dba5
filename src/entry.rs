use std::sync::Arc;
use std::time::Instant;

use crate::error::FetchError;
use crate::types::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// What the store keeps for a key. Cheap to clone: the payload is shared.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub(crate) status:      EntryStatus,
    pub(crate) payload:     Option<Arc<Payload>>,
    pub(crate) error:       Option<FetchError>,
    pub(crate) version:     u64,
    pub(crate) fetched_at:  Option<Instant>,
    pub(crate) stale:       bool,
    pub(crate) subscribers: usize,
}

impl CacheEntry {
    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_deref()
    }

    pub fn shared_payload(&self) -> Option<Arc<Payload>> {
        self.payload.clone()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    /// Monotonic within a store; bumped by every write to the entry.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
    }

    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    /// A successful, non-invalidated result that can be served without going to the network.
    pub fn is_fresh(&self) -> bool {
        self.status == EntryStatus::Success && !self.stale && self.payload.is_some()
    }

    pub(crate) fn loading(mut self) -> Self {
        self.status = EntryStatus::Loading;
        self
    }

    pub(crate) fn succeeded(mut self, payload: Payload) -> Self {
        self.status = EntryStatus::Success;
        self.payload = Some(Arc::new(payload));
        self.error = None;
        self.stale = false;
        self.fetched_at = Some(Instant::now());
        self
    }

    // The last good payload is kept so consumers can keep showing it next to the error.
    pub(crate) fn failed(mut self, error: FetchError) -> Self {
        self.status = EntryStatus::Error;
        self.error = Some(error);
        self
    }

    pub(crate) fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Everything a rollback has to bring back.
    pub(crate) fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            status:  self.status,
            payload: self.payload.clone(),
            error:   self.error.clone(),
            stale:   self.stale,
        }
    }

    pub(crate) fn restore(mut self, snapshot: &EntrySnapshot) -> Self {
        self.status = snapshot.status;
        self.payload = snapshot.payload.clone();
        self.error = snapshot.error.clone();
        self.stale = snapshot.stale;
        self
    }
}

/// Pre-image of an entry taken right before an optimistic write. Subscriber counts and versions are not part of it.
#[derive(Debug, Clone)]
pub(crate) struct EntrySnapshot {
    pub(crate) status:  EntryStatus,
    pub(crate) payload: Option<Arc<Payload>>,
    pub(crate) error:   Option<FetchError>,
    pub(crate) stale:   bool,
}

impl EntrySnapshot {
    pub(crate) fn payload(&self) -> Option<&Payload> {
        self.payload.as_deref()
    }
}
