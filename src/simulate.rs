use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::BracketError;
use crate::progression::ResultInput;
use crate::service::BracketService;
use crate::status::MatchView;
use crate::types::*;

const SAFETY_LIMIT: usize = 10_000;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
  pub matches_played: usize,
  pub champion: Option<TeamId>,
}

/// Plays an event to completion through the public service operations.
/// Lower seeds (earlier entrants) win more often, weighted by `1/seed`.
pub struct Simulator {
  rng: StdRng,
  seeds: HashMap<TeamId, u32>,
}

impl Simulator {
  pub fn new(entrants: &[TeamId], seed: Option<u64>) -> Self {
    let rng = match seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_os_rng(),
    };
    let seeds = entrants
      .iter()
      .enumerate()
      .map(|(idx, team_id)| (*team_id, idx as u32 + 1))
      .collect();
    Simulator { rng, seeds }
  }

  pub fn run(&mut self, service: &BracketService, event_id: EventId) -> Result<SimulationReport, BracketError> {
    let mut report = SimulationReport::default();
    let mut safety = 0;
    loop {
      safety += 1;
      if safety > SAFETY_LIMIT {
        return Err(BracketError::invalid_state("Simulation exceeded safety limit."));
      }

      let status = service.get_bracket_status(event_id)?;
      let Some(next) = status.next_matches.into_iter().next() else {
        break;
      };
      let input = self.play(&next)?;
      if next.stage_type == StageType::Swiss {
        service.record_swiss_result(next.id, input)?;
      } else {
        service.record_playoff_result(next.id, input)?;
      }
      report.matches_played += 1;
      debug!(event_id, match_number = %next.match_number, "simulated match");
    }

    report.champion = service
      .get_progression(event_id)?
      .into_iter()
      .find(|p| p.stage == ProgressionStage::Champion)
      .map(|p| p.team_id);
    info!(event_id, matches = report.matches_played, champion = ?report.champion, "simulation finished");
    Ok(report)
  }

  fn play(&mut self, m: &MatchView) -> Result<ResultInput, BracketError> {
    let (Some(a_id), Some(b_id)) = (m.team1.team_id, m.team2.team_id) else {
      return Err(BracketError::invalid_state(format!("{} has an empty slot.", m.match_number)));
    };
    let winner_slot = self.pick_winner(a_id, b_id);
    let games_to_win = games_to_win(m.best_of);
    let loser_score = self.rng.random_range(0..games_to_win);
    Ok(if winner_slot == 0 {
      ResultInput::completed(games_to_win, loser_score)
    } else {
      ResultInput::completed(loser_score, games_to_win)
    })
  }

  fn pick_winner(&mut self, a_id: TeamId, b_id: TeamId) -> usize {
    let seed_a = self.seeds.get(&a_id).copied().unwrap_or(999);
    let seed_b = self.seeds.get(&b_id).copied().unwrap_or(999);
    let weight_a = 1.0 / seed_a as f64;
    let weight_b = 1.0 / seed_b as f64;
    let roll = self.rng.random::<f64>() * (weight_a + weight_b);
    if roll < weight_a { 0 } else { 1 }
  }
}
