use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::bracket::EventBracket;
use crate::error::BracketError;
use crate::types::{EventId, MatchId};

/// Process-wide match id sequence. Clones share the same counter.
#[derive(Clone, Debug)]
pub struct MatchIds {
    next: Arc<AtomicU64>,
}

impl MatchIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: MatchId) -> Self {
        MatchIds {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    pub fn next(&self) -> MatchId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MatchIds {
    fn default() -> Self {
        Self::new()
    }
}

/// A loaded bracket with the version it was read at.
#[derive(Clone, Debug)]
pub struct Versioned {
    pub version: u64,
    pub bracket: EventBracket,
}

/// Persistence seam. `commit` must reject the write when the stored version
/// no longer matches `expected_version`.
pub trait EventRepository: Send + Sync {
    fn load(&self, event_id: EventId) -> Result<Option<Versioned>, BracketError>;

    /// Stores the bracket and returns the new version. `expected_version` is
    /// `None` when the caller saw no bracket for the event.
    fn commit(
        &self,
        event_id: EventId,
        expected_version: Option<u64>,
        bracket: EventBracket,
    ) -> Result<u64, BracketError>;

    fn event_for_match(&self, match_id: MatchId) -> Result<Option<EventId>, BracketError>;

    fn match_ids(&self) -> MatchIds;
}

#[derive(Default)]
struct RepositoryInner {
    events: HashMap<EventId, Versioned>,
    match_events: HashMap<MatchId, EventId>,
}

/// Mutex-guarded map of event brackets.
#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<RepositoryInner>,
    ids: MatchIds,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventRepository for InMemoryRepository {
    fn load(&self, event_id: EventId) -> Result<Option<Versioned>, BracketError> {
        let guard = self.inner.lock().map_err(|e| BracketError::Persistence(e.to_string()))?;
        Ok(guard.events.get(&event_id).cloned())
    }

    fn commit(
        &self,
        event_id: EventId,
        expected_version: Option<u64>,
        bracket: EventBracket,
    ) -> Result<u64, BracketError> {
        let mut guard = self.inner.lock().map_err(|e| BracketError::Persistence(e.to_string()))?;
        let found = guard.events.get(&event_id).map(|stored| stored.version);
        if found != expected_version {
            return Err(BracketError::Conflict {
                event_id,
                expected: expected_version.unwrap_or(0),
                found: found.unwrap_or(0),
            });
        }
        let version = found.unwrap_or(0) + 1;

        guard.match_events.retain(|_, owner| *owner != event_id);
        for m in bracket.matches() {
            guard.match_events.insert(m.id, event_id);
        }
        guard.events.insert(event_id, Versioned { version, bracket });
        Ok(version)
    }

    fn event_for_match(&self, match_id: MatchId) -> Result<Option<EventId>, BracketError> {
        let guard = self.inner.lock().map_err(|e| BracketError::Persistence(e.to_string()))?;
        Ok(guard.match_events.get(&match_id).copied())
    }

    fn match_ids(&self) -> MatchIds {
        self.ids.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FormatConfig;

    fn make_bracket(event_id: EventId, ids: &MatchIds) -> EventBracket {
        let teams = (1..=8).collect::<Vec<_>>();
        let mut bracket = EventBracket::new(event_id, &teams, FormatConfig::default());
        bracket.push_playoff_template(ids).unwrap();
        bracket
    }

    #[test]
    fn test_match_ids_are_shared_between_clones() {
        let ids = MatchIds::new();
        let other = ids.clone();
        assert_eq!(ids.next(), 1);
        assert_eq!(other.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn test_commit_bumps_version_and_indexes_matches() {
        let repo = InMemoryRepository::new();
        let bracket = make_bracket(3, &repo.match_ids());
        let first_match = bracket.matches()[0].id;
        assert_eq!(repo.commit(3, None, bracket.clone()).unwrap(), 1);
        assert_eq!(repo.commit(3, Some(1), bracket).unwrap(), 2);
        assert_eq!(repo.load(3).unwrap().unwrap().version, 2);
        assert_eq!(repo.event_for_match(first_match).unwrap(), Some(3));
        assert!(repo.load(4).unwrap().is_none());
    }

    #[test]
    fn test_stale_commit_conflicts() {
        let repo = InMemoryRepository::new();
        let bracket = make_bracket(1, &repo.match_ids());
        repo.commit(1, None, bracket.clone()).unwrap();
        repo.commit(1, Some(1), bracket.clone()).unwrap();
        let err = repo.commit(1, Some(1), bracket.clone()).unwrap_err();
        assert_eq!(
            err,
            BracketError::Conflict {
                event_id: 1,
                expected: 1,
                found: 2
            }
        );
        assert!(repo.commit(1, None, bracket).is_err());
    }

    #[test]
    fn test_regenerated_event_drops_old_match_index() {
        let repo = InMemoryRepository::new();
        let ids = repo.match_ids();
        let old = make_bracket(1, &ids);
        let old_match = old.matches()[0].id;
        repo.commit(1, None, old).unwrap();
        repo.commit(1, Some(1), make_bracket(1, &ids)).unwrap();
        assert_eq!(repo.event_for_match(old_match).unwrap(), None);
    }
}
