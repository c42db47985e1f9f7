use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::bracket::{Advancement, EventBracket, PlayoffRound, SlotSource};
use crate::error::BracketError;
use crate::store::MatchIds;
use crate::swiss::pair_next_round;
use crate::types::*;

/// Per-team journey through the playoffs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketProgression {
  pub team_id: TeamId,
  pub stage: ProgressionStage,
  pub current_position: Option<String>,
  pub matches_played: u32,
  pub matches_won: u32,
  pub maps_played: u32,
  pub maps_won: u32,
  pub path_history: Vec<MatchId>,
  pub elimination_round: Option<String>,
  pub final_placement: Option<u32>,
}

impl BracketProgression {
  pub fn new(team_id: TeamId) -> Self {
    BracketProgression {
      team_id,
      stage: ProgressionStage::Swiss,
      current_position: None,
      matches_played: 0,
      matches_won: 0,
      maps_played: 0,
      maps_won: 0,
      path_history: Vec::new(),
      elimination_round: None,
      final_placement: None,
    }
  }

  pub fn assign_placement(&mut self, placement: u32) -> Result<(), BracketError> {
    if let Some(existing) = self.final_placement {
      return Err(BracketError::invalid_state(format!(
        "Team {} already placed {existing}; refusing to overwrite with {placement}.",
        self.team_id
      )));
    }
    self.final_placement = Some(placement);
    Ok(())
  }

  fn record_match(&mut self, match_id: MatchId, maps_won: u8, maps_lost: u8, won: bool) {
    self.matches_played += 1;
    if won {
      self.matches_won += 1;
    }
    self.maps_played += maps_won as u32 + maps_lost as u32;
    self.maps_won += maps_won as u32;
    self.path_history.push(match_id);
  }
}

impl PlayoffRound {
  /// Placement given to a team knocked out in this round.
  pub fn elimination_placement(self) -> u32 {
    match self {
      PlayoffRound::GrandFinal => 2,
      PlayoffRound::LowerFinal | PlayoffRound::UpperFinal => 3,
      PlayoffRound::LowerSemifinal => 4,
      PlayoffRound::LowerQuarterfinals | PlayoffRound::UpperSemifinals => 5,
      PlayoffRound::LowerRound1 => 7,
    }
  }
}

pub fn elimination_placement(stage: StageType, round: u32) -> u32 {
  PlayoffRound::from_stage(stage, round)
    .map(PlayoffRound::elimination_placement)
    .unwrap_or(UNLISTED_PLACEMENT)
}

// ── Results ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResultInput {
  pub score1: u8,
  pub score2: u8,
  pub status: MatchStatus,
}

impl ResultInput {
  pub fn completed(score1: u8, score2: u8) -> Self {
    ResultInput {
      score1,
      score2,
      status: MatchStatus::Completed,
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwissResultOutcome {
  pub match_number: String,
  pub round: u32,
  pub round_complete: bool,
  pub next_round: Option<u32>,
  pub stage_complete: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayoffResultOutcome {
  pub match_number: String,
  pub completed: bool,
  pub winner_id: Option<TeamId>,
  pub champion: Option<TeamId>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceOutcome {
  pub already_seeded: bool,
  pub forced: bool,
  pub ranked: Vec<TeamId>,
}

fn validate_scores(match_number: &str, best_of: u8, input: &ResultInput) -> Result<(), BracketError> {
  let cap = games_to_win(best_of);
  if input.score1 > cap || input.score2 > cap {
    return Err(BracketError::validation(format!(
      "{match_number} is {}; a score cannot exceed {cap}.",
      best_of_label(best_of)
    )));
  }
  if input.status == MatchStatus::Completed && input.score1 == input.score2 {
    return Err(BracketError::validation(format!(
      "{match_number} cannot be completed without a winner."
    )));
  }
  Ok(())
}

impl EventBracket {
  pub fn record_swiss_result(
    &mut self,
    match_id: MatchId,
    input: ResultInput,
    now: DateTime<Utc>,
    ids: &MatchIds,
  ) -> Result<SwissResultOutcome, BracketError> {
    let idx = self.match_position(match_id).ok_or(BracketError::MatchNotFound(match_id))?;
    let (team1, team2, round, match_number) = {
      let m = self.match_at(idx).ok_or(BracketError::MatchNotFound(match_id))?;
      if m.stage_type != StageType::Swiss {
        return Err(BracketError::invalid_state(format!("{} is not a Swiss match.", m.match_number)));
      }
      if m.is_completed() {
        return Err(BracketError::invalid_state(format!("{} is already completed.", m.match_number)));
      }
      if self.standings.is_finalized() {
        return Err(BracketError::invalid_state("Swiss stage is already finalized."));
      }
      if input.status == MatchStatus::Upcoming {
        return Err(BracketError::validation("Swiss results must be live or completed."));
      }
      validate_scores(&m.match_number, m.best_of, &input)?;
      let [Some(team1), Some(team2)] = m.team_ids() else {
        return Err(BracketError::invalid_state(format!("{} has an empty slot.", m.match_number)));
      };
      (team1, team2, m.round, m.match_number.clone())
    };

    let mut outcome = SwissResultOutcome {
      match_number: match_number.clone(),
      round,
      ..SwissResultOutcome::default()
    };

    if input.status != MatchStatus::Completed {
      self.write_scores(idx, &input);
      return Ok(outcome);
    }

    self.standings.apply_result(team1, team2, input.score1, input.score2)?;
    let winner = if input.score1 > input.score2 { team1 } else { team2 };
    self.write_scores(idx, &input);
    self.mark_completed(idx, winner, now);
    debug!(event_id = self.event_id, match_number = %match_number, winner, "swiss match completed");

    if !self.is_swiss_round_complete(round) {
      return Ok(outcome);
    }
    outcome.round_complete = true;
    self.standings.recompute_buchholz();

    if round >= SWISS_ROUNDS {
      self.finalize_swiss_stage()?;
      outcome.stage_complete = true;
      info!(event_id = self.event_id, "swiss stage complete, playoffs seeded");
    } else {
      let next = round + 1;
      let pairings = pair_next_round(&self.standings, next)?;
      self.push_swiss_round(next, &pairings, ids)?;
      self.current_round = next;
      outcome.next_round = Some(next);
      info!(event_id = self.event_id, round = next, "swiss round paired");
    }
    Ok(outcome)
  }

  pub fn record_playoff_result(
    &mut self,
    match_id: MatchId,
    input: ResultInput,
    now: DateTime<Utc>,
  ) -> Result<PlayoffResultOutcome, BracketError> {
    let idx = self.match_position(match_id).ok_or(BracketError::MatchNotFound(match_id))?;
    let match_number = {
      let m = self.match_at(idx).ok_or(BracketError::MatchNotFound(match_id))?;
      if !m.stage_type.is_playoff() {
        return Err(BracketError::invalid_state(format!("{} is not a playoff match.", m.match_number)));
      }
      if m.is_completed() {
        return Err(BracketError::invalid_state(format!("{} is already completed.", m.match_number)));
      }
      if !m.is_ready() {
        return Err(BracketError::invalid_state(format!(
          "{} is still waiting on its teams.",
          m.match_number
        )));
      }
      validate_scores(&m.match_number, m.best_of, &input)?;
      m.match_number.clone()
    };

    self.write_scores(idx, &input);
    let mut outcome = PlayoffResultOutcome {
      match_number,
      ..PlayoffResultOutcome::default()
    };
    if input.status != MatchStatus::Completed {
      return Ok(outcome);
    }

    let winner = self.complete_playoff_match(idx, now)?;
    outcome.completed = true;
    outcome.winner_id = Some(winner);
    if self.progression_for(winner).map(|p| p.stage) == Some(ProgressionStage::Champion) {
      outcome.champion = Some(winner);
    }
    Ok(outcome)
  }

  /// Resolves a scored playoff match: fills the winner and loser target
  /// slots, then updates both teams' progression.
  pub fn complete_playoff_match(&mut self, idx: usize, now: DateTime<Utc>) -> Result<TeamId, BracketError> {
    let m = self
      .match_at(idx)
      .cloned()
      .ok_or_else(|| BracketError::invalid_state("Playoff match is missing from the bracket."))?;
    let [Some(team1), Some(team2)] = m.team_ids() else {
      return Err(BracketError::invalid_state(format!("{} has an empty slot.", m.match_number)));
    };
    let (score1, score2) = (m.slots[0].score, m.slots[1].score);
    let (winner, loser, winner_maps, loser_maps) = if score1 > score2 {
      (team1, team2, score1, score2)
    } else {
      (team2, team1, score2, score1)
    };

    self.place_team(&m.match_number, m.winner_advances_to, winner, SlotSource::Winner(idx))?;
    self.place_team(&m.match_number, m.loser_advances_to, loser, SlotSource::Loser(idx))?;
    self.mark_completed(idx, winner, now);

    let winner_target = self.advancement_label(m.winner_advances_to);
    let loser_target = self.advancement_label(m.loser_advances_to);
    let round_label = m.round_name();
    let placement = elimination_placement(m.stage_type, m.round);

    let progression = self.progression_mut(winner)?;
    progression.record_match(m.id, winner_maps, loser_maps, true);
    progression.current_position = winner_target;
    if m.stage_type == StageType::GrandFinal {
      progression.stage = ProgressionStage::Champion;
      progression.assign_placement(1)?;
      info!(event_id = m.event_id, team_id = winner, "champion decided");
    }

    let progression = self.progression_mut(loser)?;
    progression.record_match(m.id, loser_maps, winner_maps, false);
    match loser_target {
      Some(target) => {
        progression.current_position = Some(target);
        progression.stage = ProgressionStage::LowerBracket;
      }
      None => {
        progression.current_position = None;
        progression.stage = ProgressionStage::Eliminated;
        progression.elimination_round = Some(round_label);
        progression.assign_placement(placement)?;
      }
    }

    debug!(
      event_id = m.event_id,
      match_number = %m.match_number,
      winner,
      loser,
      "playoff match completed"
    );
    Ok(winner)
  }

  /// Seeds the playoffs from the current standings. Without `force` every
  /// Swiss match must be completed.
  pub fn advance_from_swiss(&mut self, force: bool) -> Result<AdvanceOutcome, BracketError> {
    if self.seeded {
      if self.playoffs_started() {
        return Err(BracketError::invalid_state(
          "Playoffs are already under way; re-seeding would overwrite results.",
        ));
      }
      let ranked = self.standings.ordered().iter().map(|s| s.team_id).collect();
      return Ok(AdvanceOutcome {
        already_seeded: true,
        forced: false,
        ranked,
      });
    }

    let pending = self.swiss_pending_count();
    if pending > 0 && !force {
      return Err(BracketError::invalid_state(format!(
        "Swiss stage is not complete ({pending} matches pending). Use force to advance anyway."
      )));
    }
    self.standings.recompute_buchholz();
    let ranked = self.finalize_swiss_stage()?;
    info!(event_id = self.event_id, forced = pending > 0, "advanced from swiss");
    Ok(AdvanceOutcome {
      already_seeded: false,
      forced: pending > 0,
      ranked,
    })
  }

  fn finalize_swiss_stage(&mut self) -> Result<Vec<TeamId>, BracketError> {
    let ranked = self.standings.finalize();
    self.seed_playoffs(&ranked)?;
    Ok(ranked)
  }

  fn place_team(
    &mut self,
    match_number: &str,
    advancement: Option<Advancement>,
    team_id: TeamId,
    expected: SlotSource,
  ) -> Result<(), BracketError> {
    let Some(edge) = advancement else {
      return Ok(());
    };
    let fail = |reason: String| BracketError::SlotResolutionFailed {
      match_number: match_number.to_string(),
      reason,
    };
    let target = self
      .match_at_mut(edge.target)
      .ok_or_else(|| fail("target match does not exist".to_string()))?;
    if target.is_completed() {
      return Err(fail(format!("{} is already completed", target.match_number)));
    }
    let target_number = target.match_number.clone();
    let slot = target
      .slots
      .get_mut(edge.slot)
      .ok_or_else(|| fail(format!("{target_number} has no slot {}", edge.slot)))?;
    if slot.source != expected {
      return Err(fail(format!("slot {} of {target_number} is fed by another match", edge.slot)));
    }
    match slot.team_id {
      Some(existing) if existing != team_id => Err(fail(format!(
        "slot {} of {target_number} already holds team {existing}",
        edge.slot
      ))),
      _ => {
        slot.team_id = Some(team_id);
        Ok(())
      }
    }
  }

  fn write_scores(&mut self, idx: usize, input: &ResultInput) {
    if let Some(m) = self.match_at_mut(idx) {
      m.slots[0].score = input.score1;
      m.slots[1].score = input.score2;
      m.status = input.status;
    }
  }

  fn mark_completed(&mut self, idx: usize, winner: TeamId, now: DateTime<Utc>) {
    let seq = self.next_completion_seq();
    if let Some(m) = self.match_at_mut(idx) {
      m.status = MatchStatus::Completed;
      m.winner_id = Some(winner);
      m.completed_at = Some(now);
      m.completion_seq = Some(seq);
    }
  }
}
