use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::status::BracketView;
use crate::types::EventId;

/// Cache seam for composed bracket views.
pub trait BracketCache: Send + Sync {
    fn get(&self, event_id: EventId) -> Option<BracketView>;
    fn put(&self, event_id: EventId, view: BracketView);
    fn invalidate(&self, event_id: EventId);
}

struct CacheEntry {
    stored_at: Instant,
    view: BracketView,
}

/// In-process cache; entries expire after `ttl`.
pub struct TtlBracketCache {
    ttl: Duration,
    entries: Mutex<HashMap<EventId, CacheEntry>>,
}

impl TtlBracketCache {
    pub fn new(ttl: Duration) -> Self {
        TtlBracketCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl BracketCache for TtlBracketCache {
    fn get(&self, event_id: EventId) -> Option<BracketView> {
        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(&event_id)
            .map(|entry| entry.stored_at.elapsed() < self.ttl)?;
        if !fresh {
            entries.remove(&event_id);
            return None;
        }
        entries.get(&event_id).map(|entry| entry.view.clone())
    }

    fn put(&self, event_id: EventId, view: BracketView) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                event_id,
                CacheEntry {
                    stored_at: Instant::now(),
                    view,
                },
            );
        }
    }

    fn invalidate(&self, event_id: EventId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&event_id);
        }
    }
}
