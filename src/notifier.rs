use fieldx::fxstruct;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::entry::CacheEntry;
use crate::key::CacheKey;
use crate::traits::CacheObserver;

pub type ObserverId = u64;

// Observers are invoked synchronously by the writer, outside of the registry lock, so an observer is free to
// subscribe or unsubscribe from within its callback.
#[fxstruct(sync)]
pub struct Notifier {
    #[fieldx(lock, private, get, get_mut, default(HashMap::new()))]
    observers: HashMap<CacheKey, Vec<(ObserverId, Arc<dyn CacheObserver>)>>,

    // The last entry version delivered per key. Guards against announcing the same state twice.
    #[fieldx(lock, private, get, get_mut, default(HashMap::new()))]
    delivered: HashMap<CacheKey, u64>,

    #[fieldx(private, default(AtomicU64::new(1)))]
    next_id: AtomicU64,
}

impl Notifier {
    pub fn subscribe(&self, key: &CacheKey, observer: Arc<dyn CacheObserver>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers_mut().entry(key.clone()).or_default().push((id, observer));
        id
    }

    /// Returns the number of observers left on the key. With the last one gone the key's delivery record goes too.
    pub fn unsubscribe(&self, key: &CacheKey, id: ObserverId) -> usize {
        let remaining = {
            let mut observers = self.observers_mut();
            let Some(list) = observers.get_mut(key)
            else {
                return 0;
            };
            list.retain(|(oid, _)| *oid != id);
            let remaining = list.len();
            if remaining == 0 {
                observers.remove(key);
            }
            remaining
        };

        if remaining == 0 {
            self.delivered_mut().remove(key);
        }
        remaining
    }

    pub fn observer_count(&self, key: &CacheKey) -> usize {
        self.observers().get(key).map_or(0, Vec::len)
    }

    /// Announces a new state of `key`. Returns how many observers were called; zero when this version has already been
    /// announced or when nobody listens.
    pub fn notify(&self, key: &CacheKey, entry: Option<&CacheEntry>) -> usize {
        let targets = self
            .observers()
            .get(key)
            .map(|list| list.iter().map(|(_, o)| Arc::clone(o)).collect::<Vec<_>>())
            .unwrap_or_default();

        {
            let mut delivered = self.delivered_mut();
            match entry {
                Some(_) if targets.is_empty() => return 0,
                Some(entry) => {
                    if delivered.get(key).is_some_and(|v| *v >= entry.version()) {
                        return 0;
                    }
                    delivered.insert(key.clone(), entry.version());
                }
                None => {
                    delivered.remove(key);
                }
            }
        }

        for observer in &targets {
            observer.on_change(key, entry);
        }

        targets.len()
    }
}
