use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::BracketError;
use crate::progression::BracketProgression;
use crate::store::MatchIds;
use crate::swiss::{pair_opening_round, Pairings, Standings};
use crate::types::*;

/// Where a slot's team comes from.
///
/// `Winner` and `Loser` hold arena indices into `EventBracket::matches`, so
/// advancement resolves by identity rather than by comparing match numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSource {
  Entrant,
  SwissRank(u32),
  Winner(usize),
  Loser(usize),
}

/// Directed edge from a completed match to the slot its winner or loser fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Advancement {
  pub target: usize,
  pub slot: usize,
}

#[derive(Clone, Debug)]
pub struct Slot {
  pub source: SlotSource,
  pub team_id: Option<TeamId>,
  pub score: u8,
}

impl Slot {
  fn new(source: SlotSource, team_id: Option<TeamId>) -> Self {
    Slot {
      source,
      team_id,
      score: 0,
    }
  }
}

#[derive(Clone, Debug)]
pub struct Match {
  pub id: MatchId,
  pub event_id: EventId,
  pub stage_type: StageType,
  pub round: u32,
  pub bracket_position: u32,
  pub match_number: String,
  pub best_of: u8,
  pub slots: [Slot; 2],
  pub status: MatchStatus,
  pub winner_id: Option<TeamId>,
  pub winner_advances_to: Option<Advancement>,
  pub loser_advances_to: Option<Advancement>,
  pub completed_at: Option<DateTime<Utc>>,
  pub completion_seq: Option<u64>,
}

impl Match {
  pub fn team_ids(&self) -> [Option<TeamId>; 2] {
    [self.slots[0].team_id, self.slots[1].team_id]
  }

  pub fn is_ready(&self) -> bool {
    self.slots.iter().all(|slot| slot.team_id.is_some())
  }

  pub fn is_completed(&self) -> bool {
    self.status == MatchStatus::Completed
  }

  pub fn playoff_round(&self) -> Option<PlayoffRound> {
    PlayoffRound::from_stage(self.stage_type, self.round)
  }

  pub fn round_name(&self) -> String {
    match self.playoff_round() {
      Some(round) => round.label().to_string(),
      None if self.stage_type == StageType::Swiss => format!("Swiss Round {}", self.round),
      None => format!("Round {}", self.round),
    }
  }
}

/// Playoff rounds of the fixed double-elimination template, keyed by
/// `(StageType, round)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayoffRound {
  UpperSemifinals,
  UpperFinal,
  LowerRound1,
  LowerQuarterfinals,
  LowerSemifinal,
  LowerFinal,
  GrandFinal,
}

impl PlayoffRound {
  pub fn from_stage(stage: StageType, round: u32) -> Option<Self> {
    match (stage, round) {
      (StageType::UpperBracket, 1) => Some(PlayoffRound::UpperSemifinals),
      (StageType::UpperBracket, 2) => Some(PlayoffRound::UpperFinal),
      (StageType::LowerBracket, 1) => Some(PlayoffRound::LowerRound1),
      (StageType::LowerBracket, 2) => Some(PlayoffRound::LowerQuarterfinals),
      (StageType::LowerBracket, 3) => Some(PlayoffRound::LowerSemifinal),
      (StageType::LowerBracket, 4) => Some(PlayoffRound::LowerFinal),
      (StageType::GrandFinal, 1) => Some(PlayoffRound::GrandFinal),
      _ => None,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      PlayoffRound::UpperSemifinals => "Upper Bracket Semifinals",
      PlayoffRound::UpperFinal => "Upper Bracket Final",
      PlayoffRound::LowerRound1 => "Lower Bracket Round 1",
      PlayoffRound::LowerQuarterfinals => "Lower Bracket Quarterfinals",
      PlayoffRound::LowerSemifinal => "Lower Bracket Semifinal",
      PlayoffRound::LowerFinal => "Lower Bracket Final",
      PlayoffRound::GrandFinal => "Grand Final",
    }
  }
}

// ── Playoff template ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
enum TemplateSource {
  Seed(u32),
  WinnerOf(&'static str),
  LoserOf(&'static str),
}

#[derive(Clone, Copy, Debug)]
struct PlaceholderSpec {
  match_number: &'static str,
  stage: StageType,
  round: u32,
  position: u32,
  sources: [TemplateSource; 2],
}

const fn placeholder(
  match_number: &'static str,
  stage: StageType,
  round: u32,
  position: u32,
  sources: [TemplateSource; 2],
) -> PlaceholderSpec {
  PlaceholderSpec {
    match_number,
    stage,
    round,
    position,
    sources,
  }
}

// Entries may only reference earlier entries, which keeps the graph acyclic.
// Upper semifinal losers cross over: UB-SF1 feeds LB-QF2, UB-SF2 feeds LB-QF1.
const PLAYOFF_TEMPLATE: [PlaceholderSpec; 10] = {
  use StageType::{GrandFinal, LowerBracket, UpperBracket};
  use TemplateSource::{LoserOf, Seed, WinnerOf};
  [
    placeholder("UB-SF1", UpperBracket, 1, 1, [Seed(1), Seed(4)]),
    placeholder("UB-SF2", UpperBracket, 1, 2, [Seed(2), Seed(3)]),
    placeholder("UB-F", UpperBracket, 2, 1, [WinnerOf("UB-SF1"), WinnerOf("UB-SF2")]),
    placeholder("LB-R1-1", LowerBracket, 1, 1, [Seed(5), Seed(8)]),
    placeholder("LB-R1-2", LowerBracket, 1, 2, [Seed(6), Seed(7)]),
    placeholder("LB-QF1", LowerBracket, 2, 1, [WinnerOf("LB-R1-1"), LoserOf("UB-SF2")]),
    placeholder("LB-QF2", LowerBracket, 2, 2, [WinnerOf("LB-R1-2"), LoserOf("UB-SF1")]),
    placeholder("LB-SF", LowerBracket, 3, 1, [WinnerOf("LB-QF1"), WinnerOf("LB-QF2")]),
    placeholder("LB-F", LowerBracket, 4, 1, [WinnerOf("LB-SF"), LoserOf("UB-F")]),
    placeholder("GF", GrandFinal, 1, 1, [WinnerOf("UB-F"), WinnerOf("LB-F")]),
  ]
};

// ── Event bracket ──────────────────────────────────────────────────────

/// All bracket state for one event: matches (arena), Swiss standings and
/// per-team progression. Cloned as a unit for transactional updates.
#[derive(Clone, Debug)]
pub struct EventBracket {
  pub event_id: EventId,
  pub format: FormatConfig,
  pub entrants: Vec<TeamId>,
  pub standings: Standings,
  pub current_round: u32,
  pub seeded: bool,
  progression: Vec<BracketProgression>,
  progression_index: HashMap<TeamId, usize>,
  matches: Vec<Match>,
  match_index: HashMap<MatchId, usize>,
  number_index: HashMap<String, usize>,
  completion_counter: u64,
}

impl EventBracket {
  pub fn new(event_id: EventId, entrants: &[TeamId], format: FormatConfig) -> Self {
    let progression = entrants
      .iter()
      .map(|team_id| BracketProgression::new(*team_id))
      .collect::<Vec<_>>();
    let progression_index = entrants
      .iter()
      .enumerate()
      .map(|(idx, team_id)| (*team_id, idx))
      .collect();
    EventBracket {
      event_id,
      format,
      entrants: entrants.to_vec(),
      standings: Standings::new(entrants),
      current_round: 0,
      seeded: false,
      progression,
      progression_index,
      matches: Vec::new(),
      match_index: HashMap::new(),
      number_index: HashMap::new(),
      completion_counter: 0,
    }
  }

  /// Fresh bracket: standings, Swiss round 1 and the playoff placeholders.
  pub fn generate<R: Rng + ?Sized>(
    event_id: EventId,
    entrants: &[TeamId],
    format: FormatConfig,
    rng: &mut R,
    ids: &MatchIds,
  ) -> Result<Self, BracketError> {
    validate_entrants(entrants)?;
    format.validate()?;

    let mut bracket = EventBracket::new(event_id, entrants, format);
    let pairings = pair_opening_round(entrants, rng);
    bracket.push_swiss_round(1, &pairings, ids)?;
    bracket.push_playoff_template(ids)?;
    bracket.current_round = 1;
    Ok(bracket)
  }

  pub fn matches(&self) -> &[Match] {
    &self.matches
  }

  pub fn match_position(&self, match_id: MatchId) -> Option<usize> {
    self.match_index.get(&match_id).copied()
  }

  pub fn get_match(&self, match_id: MatchId) -> Option<&Match> {
    self.match_position(match_id).and_then(|idx| self.matches.get(idx))
  }

  pub fn match_by_number(&self, match_number: &str) -> Option<&Match> {
    self
      .number_index
      .get(match_number)
      .and_then(|idx| self.matches.get(*idx))
  }

  pub(crate) fn match_at(&self, idx: usize) -> Option<&Match> {
    self.matches.get(idx)
  }

  pub(crate) fn match_at_mut(&mut self, idx: usize) -> Option<&mut Match> {
    self.matches.get_mut(idx)
  }

  pub fn progression(&self) -> &[BracketProgression] {
    &self.progression
  }

  pub fn progression_for(&self, team_id: TeamId) -> Option<&BracketProgression> {
    self
      .progression_index
      .get(&team_id)
      .and_then(|idx| self.progression.get(*idx))
  }

  pub(crate) fn progression_mut(&mut self, team_id: TeamId) -> Result<&mut BracketProgression, BracketError> {
    let idx = self
      .progression_index
      .get(&team_id)
      .copied()
      .ok_or_else(|| BracketError::invalid_state(format!("Team {team_id} has no bracket progression.")))?;
    Ok(&mut self.progression[idx])
  }

  pub(crate) fn next_completion_seq(&mut self) -> u64 {
    self.completion_counter += 1;
    self.completion_counter
  }

  pub fn swiss_matches(&self, round: u32) -> impl Iterator<Item = &Match> {
    self
      .matches
      .iter()
      .filter(move |m| m.stage_type == StageType::Swiss && m.round == round)
  }

  pub fn is_swiss_round_complete(&self, round: u32) -> bool {
    let mut any = false;
    for m in self.swiss_matches(round) {
      any = true;
      if !m.is_completed() {
        return false;
      }
    }
    any
  }

  pub fn swiss_pending_count(&self) -> usize {
    self
      .matches
      .iter()
      .filter(|m| m.stage_type == StageType::Swiss && !m.is_completed())
      .count()
  }

  /// Swiss match left unplayed when standings were finalized early. It can
  /// no longer be recorded, so it is neither pending nor counted.
  pub fn is_abandoned(&self, m: &Match) -> bool {
    m.stage_type == StageType::Swiss && !m.is_completed() && self.standings.is_finalized()
  }

  /// Matches that can still be, or already were, played.
  pub fn counted_matches(&self) -> impl Iterator<Item = &Match> {
    self.matches.iter().filter(move |m| !self.is_abandoned(m))
  }

  pub fn playoffs_started(&self) -> bool {
    self
      .matches
      .iter()
      .any(|m| m.stage_type.is_playoff() && m.status != MatchStatus::Upcoming)
  }

  pub fn push_swiss_round(
    &mut self,
    round: u32,
    pairings: &Pairings,
    ids: &MatchIds,
  ) -> Result<Vec<MatchId>, BracketError> {
    if let Some(team_id) = pairings.bye {
      self.standings.record_bye(team_id)?;
      warn!(event_id = self.event_id, round, team_id, "odd field, team sits out the round");
    }
    let mut created = Vec::with_capacity(pairings.pairs.len());
    for (position, (team1, team2)) in pairings.pairs.iter().enumerate() {
      let position = position as u32 + 1;
      let idx = self.push_match(
        ids.next(),
        StageType::Swiss,
        round,
        position,
        format!("SW-R{round}-{position}"),
        [
          Slot::new(SlotSource::Entrant, Some(*team1)),
          Slot::new(SlotSource::Entrant, Some(*team2)),
        ],
      );
      created.push(self.matches[idx].id);
    }
    debug!(event_id = self.event_id, round, matches = created.len(), "swiss round generated");
    Ok(created)
  }

  /// Builds the ten playoff placeholders and derives advancement edges from
  /// the slot sources.
  pub fn push_playoff_template(&mut self, ids: &MatchIds) -> Result<(), BracketError> {
    let mut template_index: HashMap<&'static str, usize> = HashMap::new();
    for spec in PLAYOFF_TEMPLATE.iter() {
      let mut slots = Vec::with_capacity(2);
      for source in spec.sources {
        let resolved = match source {
          TemplateSource::Seed(rank) => SlotSource::SwissRank(rank),
          TemplateSource::WinnerOf(number) => SlotSource::Winner(lookup_template(&template_index, spec, number)?),
          TemplateSource::LoserOf(number) => SlotSource::Loser(lookup_template(&template_index, spec, number)?),
        };
        slots.push(Slot::new(resolved, None));
      }
      let [slot_a, slot_b]: [Slot; 2] = slots
        .try_into()
        .map_err(|_| BracketError::invalid_state("Placeholder needs exactly two slots."))?;
      let idx = self.push_match(
        ids.next(),
        spec.stage,
        spec.round,
        spec.position,
        spec.match_number.to_string(),
        [slot_a, slot_b],
      );
      template_index.insert(spec.match_number, idx);
    }

    for target in template_index.values().copied().collect::<Vec<_>>() {
      for slot in 0..2 {
        match self.matches[target].slots[slot].source {
          SlotSource::Winner(from) => set_edge(&mut self.matches[from].winner_advances_to, target, slot, "winner")?,
          SlotSource::Loser(from) => set_edge(&mut self.matches[from].loser_advances_to, target, slot, "loser")?,
          SlotSource::Entrant | SlotSource::SwissRank(_) => {}
        }
      }
    }
    Ok(())
  }

  /// Writes Swiss ranks into the seed slots and moves the seeded teams into
  /// their playoff stage.
  pub fn seed_playoffs(&mut self, ranked: &[TeamId]) -> Result<(), BracketError> {
    if ranked.len() < PLAYOFF_SEEDS {
      return Err(BracketError::invalid_state(format!(
        "Seeding needs {PLAYOFF_SEEDS} ranked teams, got {}.",
        ranked.len()
      )));
    }

    let mut first_match: HashMap<u32, String> = HashMap::new();
    for m in self.matches.iter_mut() {
      for slot in m.slots.iter_mut() {
        if let SlotSource::SwissRank(rank) = slot.source {
          let team_id = ranked.get(rank as usize - 1).copied().ok_or_else(|| {
            BracketError::invalid_state(format!("No team holds Swiss rank {rank}."))
          })?;
          slot.team_id = Some(team_id);
          first_match.insert(rank, m.match_number.clone());
        }
      }
    }

    for (position, team_id) in ranked.iter().enumerate() {
      let rank = position as u32 + 1;
      let progression = self.progression_mut(*team_id)?;
      if position < PLAYOFF_SEEDS {
        progression.stage = if position < UPPER_BRACKET_SEEDS {
          ProgressionStage::UpperBracket
        } else {
          ProgressionStage::LowerBracket
        };
        progression.current_position = first_match.get(&rank).cloned();
      } else {
        progression.stage = ProgressionStage::Eliminated;
        progression.current_position = None;
        progression.elimination_round = Some(SWISS_ELIMINATION_LABEL.to_string());
        progression.assign_placement(UNLISTED_PLACEMENT)?;
      }
    }

    self.seeded = true;
    Ok(())
  }

  /// Symbolic name of a slot source (`swiss_1st`, `winner_of_UB-SF1`, ...).
  pub fn source_label(&self, source: SlotSource) -> Option<String> {
    match source {
      SlotSource::Entrant => None,
      SlotSource::SwissRank(rank) => Some(format!("swiss_{}", ordinal(rank))),
      SlotSource::Winner(idx) => self.matches.get(idx).map(|m| format!("winner_of_{}", m.match_number)),
      SlotSource::Loser(idx) => self.matches.get(idx).map(|m| format!("loser_of_{}", m.match_number)),
    }
  }

  pub fn advancement_label(&self, advancement: Option<Advancement>) -> Option<String> {
    advancement
      .and_then(|edge| self.matches.get(edge.target))
      .map(|m| m.match_number.clone())
  }

  fn push_match(
    &mut self,
    id: MatchId,
    stage_type: StageType,
    round: u32,
    bracket_position: u32,
    match_number: String,
    slots: [Slot; 2],
  ) -> usize {
    let best_of = self.format.best_of_for(stage_type);
    let m = Match {
      id,
      event_id: self.event_id,
      stage_type,
      round,
      bracket_position,
      match_number: match_number.clone(),
      best_of,
      slots,
      status: MatchStatus::Upcoming,
      winner_id: None,
      winner_advances_to: None,
      loser_advances_to: None,
      completed_at: None,
      completion_seq: None,
    };
    self.matches.push(m);
    let idx = self.matches.len() - 1;
    self.match_index.insert(id, idx);
    self.number_index.insert(match_number, idx);
    idx
  }
}

fn lookup_template(
  index: &HashMap<&'static str, usize>,
  spec: &PlaceholderSpec,
  number: &str,
) -> Result<usize, BracketError> {
  index.get(number).copied().ok_or_else(|| {
    BracketError::invalid_state(format!(
      "Placeholder {} references {number} before it is defined.",
      spec.match_number
    ))
  })
}

fn set_edge(edge: &mut Option<Advancement>, target: usize, slot: usize, kind: &str) -> Result<(), BracketError> {
  if edge.is_some() {
    return Err(BracketError::invalid_state(format!(
      "Template routes a {kind} to more than one slot."
    )));
  }
  *edge = Some(Advancement { target, slot });
  Ok(())
}

pub fn validate_entrants(entrants: &[TeamId]) -> Result<(), BracketError> {
  if entrants.len() < MIN_ENTRANTS || entrants.len() > MAX_ENTRANTS {
    return Err(BracketError::validation(format!(
      "Bracket needs between {MIN_ENTRANTS} and {MAX_ENTRANTS} teams, got {}.",
      entrants.len()
    )));
  }
  let mut seen = HashSet::new();
  for team_id in entrants {
    if !seen.insert(*team_id) {
      return Err(BracketError::validation(format!("Team {team_id} is listed twice.")));
    }
  }
  Ok(())
}
