use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::bracket::EventBracket;
use crate::cache::{BracketCache, TtlBracketCache};
use crate::config::EngineConfig;
use crate::error::BracketError;
use crate::notify::{BracketEvent, BracketNotifier};
use crate::progression::{AdvanceOutcome, BracketProgression, PlayoffResultOutcome, ResultInput, SwissResultOutcome};
use crate::status::{bracket_status, bracket_view, progression_ordered, standings_view, BracketStatus, BracketView, StandingView};
use crate::store::{EventRepository, InMemoryRepository, MatchIds};
use crate::types::*;

type EventLocks = Mutex<HashMap<EventId, Arc<Mutex<()>>>>;

/// Entry point for every bracket operation.
///
/// Mutations run against a cloned snapshot under the event's lock and are
/// committed with the version they were loaded at, so a failure anywhere
/// leaves the stored bracket untouched.
pub struct BracketService {
    repository: Arc<dyn EventRepository>,
    cache: Arc<dyn BracketCache>,
    notifier: Arc<dyn BracketNotifier>,
    locks: EventLocks,
    rng: Mutex<StdRng>,
    default_format: FormatConfig,
}

impl BracketService {
    pub fn new(
        repository: Arc<dyn EventRepository>,
        cache: Arc<dyn BracketCache>,
        notifier: Arc<dyn BracketNotifier>,
        shuffle_seed: Option<u64>,
    ) -> Self {
        let rng = match shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        BracketService {
            repository,
            cache,
            notifier,
            locks: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            default_format: FormatConfig::default(),
        }
    }

    /// In-memory repository and TTL cache sized from the config.
    pub fn from_config(config: &EngineConfig, notifier: Arc<dyn BracketNotifier>) -> Self {
        let mut service = BracketService::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(TtlBracketCache::new(Duration::from_secs(config.cache_ttl_secs))),
            notifier,
            config.shuffle_seed,
        );
        service.default_format = config.format;
        service
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn event_lock(&self, event_id: EventId) -> Result<Arc<Mutex<()>>, BracketError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| BracketError::Persistence(e.to_string()))?;
        Ok(locks.entry(event_id).or_default().clone())
    }

    /// Lock the event, clone its bracket, run `f` on the clone, then commit.
    fn in_transaction<F, R>(&self, event_id: EventId, f: F) -> Result<R, BracketError>
    where
        F: FnOnce(&mut EventBracket, &MatchIds) -> Result<R, BracketError>,
    {
        let lock = self.event_lock(event_id)?;
        let _guard = lock.lock().map_err(|e| BracketError::Persistence(e.to_string()))?;
        let stored = self
            .repository
            .load(event_id)?
            .ok_or(BracketError::EventNotFound(event_id))?;
        let mut next = stored.bracket.clone();
        let result = f(&mut next, &self.repository.match_ids())?;
        self.repository.commit(event_id, Some(stored.version), next)?;
        self.cache.invalidate(event_id);
        Ok(result)
    }

    fn event_for_match(&self, match_id: MatchId) -> Result<EventId, BracketError> {
        self.repository
            .event_for_match(match_id)?
            .ok_or(BracketError::MatchNotFound(match_id))
    }

    fn load(&self, event_id: EventId) -> Result<EventBracket, BracketError> {
        self.repository
            .load(event_id)?
            .map(|stored| stored.bracket)
            .ok_or(BracketError::EventNotFound(event_id))
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Replaces any existing bracket for the event with a fresh Swiss stage
    /// and empty playoff placeholders.
    pub fn generate_bracket(
        &self,
        event_id: EventId,
        entrants: &[TeamId],
        format: Option<FormatConfig>,
    ) -> Result<BracketView, BracketError> {
        let format = format.unwrap_or(self.default_format);
        let lock = self.event_lock(event_id)?;
        let _guard = lock.lock().map_err(|e| BracketError::Persistence(e.to_string()))?;

        let existing = self.repository.load(event_id)?.map(|stored| stored.version);
        if existing.is_some() {
            warn!(event_id, "regenerating bracket, previous matches are discarded");
        }
        let bracket = {
            let mut rng = self.rng.lock().map_err(|e| BracketError::Persistence(e.to_string()))?;
            EventBracket::generate(event_id, entrants, format, &mut *rng, &self.repository.match_ids())?
        };
        let view = bracket_view(&bracket);
        self.repository.commit(event_id, existing, bracket)?;
        self.cache.invalidate(event_id);
        drop(_guard);

        info!(event_id, teams = entrants.len(), "bracket generated");
        self.notifier.notify(BracketEvent::BracketUpdated { event_id });
        Ok(view)
    }

    pub fn record_swiss_result(&self, match_id: MatchId, input: ResultInput) -> Result<SwissResultOutcome, BracketError> {
        let event_id = self.event_for_match(match_id)?;
        let outcome = self.in_transaction(event_id, |bracket, ids| {
            bracket.record_swiss_result(match_id, input, Utc::now(), ids)
        })?;
        self.notifier.notify(BracketEvent::MatchUpdated { event_id, match_id });
        if outcome.round_complete {
            self.notifier.notify(BracketEvent::BracketUpdated { event_id });
        }
        Ok(outcome)
    }

    pub fn record_playoff_result(&self, match_id: MatchId, input: ResultInput) -> Result<PlayoffResultOutcome, BracketError> {
        let event_id = self.event_for_match(match_id)?;
        let outcome = self.in_transaction(event_id, |bracket, _| {
            bracket.record_playoff_result(match_id, input, Utc::now())
        })?;
        self.notifier.notify(BracketEvent::MatchUpdated { event_id, match_id });
        if outcome.completed {
            self.notifier.notify(BracketEvent::BracketUpdated { event_id });
        }
        Ok(outcome)
    }

    pub fn advance_from_swiss(&self, event_id: EventId, force: bool) -> Result<AdvanceOutcome, BracketError> {
        let outcome = self.in_transaction(event_id, |bracket, _| bracket.advance_from_swiss(force))?;
        if !outcome.already_seeded {
            self.notifier.notify(BracketEvent::BracketUpdated { event_id });
        }
        Ok(outcome)
    }

    /// Composed bracket view, served from the cache when fresh.
    pub fn get_bracket(&self, event_id: EventId) -> Result<BracketView, BracketError> {
        if let Some(view) = self.cache.get(event_id) {
            return Ok(view);
        }
        let lock = self.event_lock(event_id)?;
        let _guard = lock.lock().map_err(|e| BracketError::Persistence(e.to_string()))?;
        let view = bracket_view(&self.load(event_id)?);
        self.cache.put(event_id, view.clone());
        Ok(view)
    }

    pub fn get_standings(&self, event_id: EventId) -> Result<Vec<StandingView>, BracketError> {
        Ok(standings_view(&self.load(event_id)?))
    }

    pub fn get_progression(&self, event_id: EventId) -> Result<Vec<BracketProgression>, BracketError> {
        Ok(progression_ordered(&self.load(event_id)?))
    }

    pub fn get_bracket_status(&self, event_id: EventId) -> Result<BracketStatus, BracketError> {
        Ok(bracket_status(&self.load(event_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::BroadcastNotifier;
    use crate::store::Versioned;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyRepository {
        inner: InMemoryRepository,
        fail_commits: AtomicBool,
    }

    impl EventRepository for FlakyRepository {
        fn load(&self, event_id: EventId) -> Result<Option<Versioned>, BracketError> {
            self.inner.load(event_id)
        }

        fn commit(&self, event_id: EventId, expected: Option<u64>, bracket: EventBracket) -> Result<u64, BracketError> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(BracketError::Persistence("disk full".to_string()));
            }
            self.inner.commit(event_id, expected, bracket)
        }

        fn event_for_match(&self, match_id: MatchId) -> Result<Option<EventId>, BracketError> {
            self.inner.event_for_match(match_id)
        }

        fn match_ids(&self) -> MatchIds {
            self.inner.match_ids()
        }
    }

    fn make_service_with(repository: Arc<dyn EventRepository>) -> (BracketService, Arc<BroadcastNotifier>) {
        let notifier = Arc::new(BroadcastNotifier::new(64));
        let service = BracketService::new(
            repository,
            Arc::new(TtlBracketCache::new(Duration::from_secs(60))),
            notifier.clone(),
            Some(17),
        );
        (service, notifier)
    }

    fn make_service() -> (BracketService, Arc<BroadcastNotifier>) {
        make_service_with(Arc::new(InMemoryRepository::new()))
    }

    fn make_teams(count: u32) -> Vec<TeamId> {
        (101..101 + count).collect()
    }

    fn first_swiss_match(service: &BracketService, event_id: EventId, round: u32) -> MatchId {
        let view = service.get_bracket(event_id).unwrap();
        view.swiss.rounds[round as usize - 1].matches[0].id
    }

    #[test]
    fn test_generate_and_read_back() {
        let (service, _) = make_service();
        let view = service.generate_bracket(1, &make_teams(8), None).unwrap();
        assert_eq!(view.metadata.total_matches, 14);
        let read = service.get_bracket(1).unwrap();
        assert_eq!(read, view);
        assert_eq!(service.get_standings(1).unwrap().len(), 8);
        assert_eq!(service.get_progression(1).unwrap().len(), 8);
    }

    #[test]
    fn test_unknown_event_and_match() {
        let (service, _) = make_service();
        assert_eq!(service.get_bracket(9).unwrap_err(), BracketError::EventNotFound(9));
        assert_eq!(
            service
                .record_swiss_result(404, ResultInput::completed(2, 0))
                .unwrap_err(),
            BracketError::MatchNotFound(404)
        );
        assert!(matches!(
            service.advance_from_swiss(9, true),
            Err(BracketError::EventNotFound(9))
        ));
    }

    #[test]
    fn test_invalid_entrants_store_nothing() {
        let (service, _) = make_service();
        assert!(service.generate_bracket(1, &make_teams(7), None).is_err());
        assert!(matches!(service.get_bracket(1), Err(BracketError::EventNotFound(1))));
    }

    #[test]
    fn test_result_invalidates_cached_view() {
        let (service, _) = make_service();
        service.generate_bracket(1, &make_teams(8), None).unwrap();
        let before = service.get_bracket(1).unwrap();
        assert_eq!(before.metadata.completed_matches, 0);

        let id = first_swiss_match(&service, 1, 1);
        service.record_swiss_result(id, ResultInput::completed(2, 1)).unwrap();
        let after = service.get_bracket(1).unwrap();
        assert_eq!(after.metadata.completed_matches, 1);
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let repository = Arc::new(FlakyRepository {
            inner: InMemoryRepository::new(),
            fail_commits: AtomicBool::new(false),
        });
        let (service, _) = make_service_with(repository.clone());
        service.generate_bracket(1, &make_teams(8), None).unwrap();
        let id = first_swiss_match(&service, 1, 1);

        repository.fail_commits.store(true, Ordering::SeqCst);
        let err = service.record_swiss_result(id, ResultInput::completed(2, 0)).unwrap_err();
        assert!(matches!(err, BracketError::Persistence(_)));

        let stored = repository.load(1).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        let m = stored.bracket.get_match(id).unwrap();
        assert_eq!(m.status, MatchStatus::Upcoming);
        assert!(stored.bracket.standings.ordered().iter().all(|s| s.wins + s.losses == 0));
    }

    #[test]
    fn test_rejected_result_leaves_state_untouched() {
        let (service, _) = make_service();
        service.generate_bracket(1, &make_teams(8), None).unwrap();
        let id = first_swiss_match(&service, 1, 1);
        assert!(service.record_swiss_result(id, ResultInput::completed(2, 2)).is_err());
        assert_eq!(service.get_bracket(1).unwrap().metadata.completed_matches, 0);
    }

    #[test]
    fn test_notifications_follow_commits() {
        let (service, notifier) = make_service();
        let mut rx = notifier.subscribe();
        service.generate_bracket(4, &make_teams(8), None).unwrap();
        assert_eq!(rx.try_recv().unwrap(), BracketEvent::BracketUpdated { event_id: 4 });

        let id = first_swiss_match(&service, 4, 1);
        service.record_swiss_result(id, ResultInput::completed(0, 2)).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            BracketEvent::MatchUpdated {
                event_id: 4,
                match_id: id
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forced_advance_then_noop() {
        let (service, _) = make_service();
        service.generate_bracket(2, &make_teams(10), None).unwrap();
        assert!(service.advance_from_swiss(2, false).is_err());
        let outcome = service.advance_from_swiss(2, true).unwrap();
        assert!(outcome.forced);
        let status = service.get_bracket_status(2).unwrap();
        assert!(status.swiss_complete);
        assert!(!status.playoffs_started);

        let again = service.advance_from_swiss(2, false).unwrap();
        assert!(again.already_seeded);

        let eliminated = service
            .get_progression(2)
            .unwrap()
            .into_iter()
            .filter(|p| p.stage == ProgressionStage::Eliminated)
            .count();
        assert_eq!(eliminated, 2);
    }

    #[test]
    fn test_concurrent_results_pair_next_round_once() {
        let (service, _) = make_service();
        service.generate_bracket(1, &make_teams(8), None).unwrap();
        let round_one = service.get_bracket(1).unwrap().swiss.rounds[0]
            .matches
            .iter()
            .map(|m| m.id)
            .collect::<Vec<_>>();

        std::thread::scope(|scope| {
            for id in &round_one {
                let service = &service;
                scope.spawn(move || {
                    service.record_swiss_result(*id, ResultInput::completed(2, 1)).unwrap();
                });
            }
        });

        let view = service.get_bracket(1).unwrap();
        assert_eq!(view.swiss.rounds.len(), 2);
        assert_eq!(view.swiss.rounds[1].matches.len(), 4);
        assert_eq!(view.swiss.current_round, 2);
    }

    #[test]
    fn test_regenerate_replaces_previous_bracket() {
        let (service, _) = make_service();
        service.generate_bracket(1, &make_teams(8), None).unwrap();
        let old = first_swiss_match(&service, 1, 1);
        service.generate_bracket(1, &make_teams(12), None).unwrap();
        assert_eq!(service.get_standings(1).unwrap().len(), 12);
        assert_eq!(
            service.record_swiss_result(old, ResultInput::completed(2, 0)).unwrap_err(),
            BracketError::MatchNotFound(old)
        );
    }
}
