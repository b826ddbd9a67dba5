use crate::entry::EntrySnapshot;
use crate::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

struct PatchedKey {
    key:     CacheKey,
    before:  EntrySnapshot,
    // Version the entry got from the optimistic write. Anything else at settle time means someone else wrote in between.
    version: u64,
}

/// Outcome of a rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored:  Vec<CacheKey>,
    /// Keys whose interleaved writes were overwritten by the snapshot.
    pub conflicts: Vec<CacheKey>,
}

impl RollbackReport {
    pub fn into_result(self) -> Result<Vec<CacheKey>> {
        if self.conflicts.is_empty() {
            Ok(self.restored)
        }
        else {
            Err(CacheError::StaleRollbackConflict { keys: self.conflicts })
        }
    }
}

/// A speculative write owned by one in-flight mutation. It must be settled exactly once, by either [`commit`],
/// [`commit_with`], or [`rollback`]; all three consume it.
///
/// [`commit`]: PendingPatch::commit
/// [`commit_with`]: PendingPatch::commit_with
/// [`rollback`]: PendingPatch::rollback
pub struct PendingPatch<E>
where
    E: QueryExecutor,
{
    store:   Arc<QueryStore<E>>,
    label:   String,
    patched: Vec<PatchedKey>,
    settled: bool,
}

impl<E> PendingPatch<E>
where
    E: QueryExecutor,
{
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Keys that actually received the optimistic write.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.patched.iter().map(|p| p.key.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.patched.is_empty()
    }

    /// Pre-patch payload of a key, if the key was patched.
    pub fn snapshot_of(&self, key: &CacheKey) -> Option<Option<&Payload>> {
        self.patched.iter().find(|p| &p.key == key).map(|p| p.before.payload())
    }

    /// Keeps the optimistic state as final.
    pub async fn commit(mut self) {
        self.settled = true;
        log::debug!("[{}] Patch '{}' committed as is", self.store.name(), self.label);
    }

    /// Keeps the optimistic state, then runs `reconcile` over the current payload of every patched key. Returning
    /// `None` leaves a key alone.
    pub async fn commit_with<F>(mut self, mut reconcile: F)
    where
        F: FnMut(&CacheKey, &Payload) -> Option<Payload> + Send,
    {
        self.settled = true;
        for patched in &self.patched {
            let key = &patched.key;
            self.store
                .compute(key, |current| {
                    let current = current?;
                    let next = reconcile(key, current.payload()?)?;
                    Some(current.with_payload(next))
                })
                .await;
        }
        log::debug!("[{}] Patch '{}' committed with reconciliation", self.store.name(), self.label);
    }

    /// Puts every patched key back to its snapshot, whatever happened to it since. Writes made by others in between
    /// are lost; they are reported in [`RollbackReport::conflicts`]. Keys evicted in the meantime stay evicted.
    pub async fn rollback(mut self) -> RollbackReport {
        self.settled = true;
        let mut report = RollbackReport::default();

        for patched in &self.patched {
            let mut interleaved = false;
            let restored = self
                .store
                .compute(&patched.key, |current| {
                    let current = current?;
                    interleaved = current.version() != patched.version;
                    Some(current.restore(&patched.before))
                })
                .await;

            if restored.is_none() {
                // Evicted while the patch was pending. Bringing it back would leave an entry nobody collects.
                log::debug!(
                    "[{}] Patch '{}': {} is gone, nothing to restore",
                    self.store.name(),
                    self.label,
                    patched.key
                );
                continue;
            }
            if interleaved {
                report.conflicts.push(patched.key.clone());
            }
            report.restored.push(patched.key.clone());
        }

        if report.conflicts.is_empty() {
            log::debug!(
                "[{}] Patch '{}' rolled back; {} key(s) restored",
                self.store.name(),
                self.label,
                report.restored.len()
            );
        }
        else {
            log::warn!(
                "[{}] Patch '{}' rolled back over interleaved changes of: {}",
                self.store.name(),
                self.label,
                report
                    .conflicts
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        report
    }
}

impl<E> Drop for PendingPatch<E>
where
    E: QueryExecutor,
{
    fn drop(&mut self) {
        if !self.settled && !self.patched.is_empty() {
            log::warn!(
                "[{}] Patch '{}' dropped unsettled; the optimistic state of {} key(s) stays",
                self.store.name(),
                self.label,
                self.patched.len()
            );
        }
    }
}

impl<E> QueryStore<E>
where
    E: QueryExecutor,
{
    /// Snapshots each target key and writes `predict`'s speculative payload over it, atomically per key. Keys without a
    /// cached payload, and keys `predict` returns `None` for, are left untouched and are not part of the patch.
    pub async fn begin_optimistic_patch<I, F>(
        &self,
        label: impl Into<String>,
        targets: I,
        mut predict: F,
    ) -> Result<PendingPatch<E>>
    where
        I: IntoIterator<Item = CacheKey>,
        F: FnMut(&CacheKey, &Payload) -> Option<Payload> + Send,
    {
        let store = self.myself_or_gone()?;
        let label = label.into();
        let mut seen = HashSet::new();
        let mut patched = Vec::new();

        for key in targets {
            if !seen.insert(key.clone()) {
                continue;
            }

            let mut before = None;
            let written = self
                .compute(&key, |current| {
                    let current = current?;
                    let next = predict(&key, current.payload()?)?;
                    before = Some(current.snapshot());
                    Some(current.with_payload(next))
                })
                .await;

            if let (Some(entry), Some(before)) = (written, before) {
                patched.push(PatchedKey {
                    version: entry.version(),
                    key,
                    before,
                });
            }
        }

        log::debug!(
            "[{}] Patch '{label}' applied optimistically to {} key(s)",
            self.name(),
            patched.len()
        );

        Ok(PendingPatch {
            store,
            label,
            patched,
            settled: false,
        })
    }
}
