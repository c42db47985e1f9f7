use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::error::BracketError;
use crate::types::{TeamId, PLAYOFF_SEEDS, UPPER_BRACKET_SEEDS};

/// Upper bound on backtracking steps for a single round.
const PAIRING_SEARCH_BUDGET: usize = 200_000;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwissStanding {
  pub team_id: TeamId,
  pub wins: u32,
  pub losses: u32,
  pub swiss_score: u32,
  pub buchholz_score: u32,
  pub map_wins: u32,
  pub map_losses: u32,
  pub round_difference: i32,
  pub opponents_faced: Vec<TeamId>,
  pub byes: u32,
  pub ranking: Option<u32>,
  pub qualified_to_upper: bool,
  pub qualified_to_lower: bool,
  #[serde(skip)]
  pub entry_order: usize,
}

impl SwissStanding {
  fn new(team_id: TeamId, entry_order: usize) -> Self {
    SwissStanding {
      team_id,
      wins: 0,
      losses: 0,
      swiss_score: 0,
      buchholz_score: 0,
      map_wins: 0,
      map_losses: 0,
      round_difference: 0,
      opponents_faced: Vec::new(),
      byes: 0,
      ranking: None,
      qualified_to_upper: false,
      qualified_to_lower: false,
      entry_order,
    }
  }

  pub fn has_faced(&self, team_id: TeamId) -> bool {
    self.opponents_faced.contains(&team_id)
  }
}

/// Tie-break cascade: wins, swiss score, Buchholz, round difference (all
/// descending), then entry order.
pub fn compare_standings(a: &SwissStanding, b: &SwissStanding) -> Ordering {
  b.wins
    .cmp(&a.wins)
    .then_with(|| b.swiss_score.cmp(&a.swiss_score))
    .then_with(|| b.buchholz_score.cmp(&a.buchholz_score))
    .then_with(|| b.round_difference.cmp(&a.round_difference))
    .then_with(|| a.entry_order.cmp(&b.entry_order))
}

#[derive(Clone, Debug, Default)]
pub struct Standings {
  entries: Vec<SwissStanding>,
  index: HashMap<TeamId, usize>,
}

impl Standings {
  pub fn new(entrants: &[TeamId]) -> Self {
    let entries = entrants
      .iter()
      .enumerate()
      .map(|(order, team_id)| SwissStanding::new(*team_id, order))
      .collect::<Vec<_>>();
    let index = entries
      .iter()
      .enumerate()
      .map(|(idx, standing)| (standing.team_id, idx))
      .collect::<HashMap<_, _>>();
    Standings { entries, index }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, team_id: TeamId) -> Option<&SwissStanding> {
    self.index.get(&team_id).and_then(|idx| self.entries.get(*idx))
  }

  pub fn ordered(&self) -> Vec<&SwissStanding> {
    let mut ordered = self.entries.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| compare_standings(a, b));
    ordered
  }

  /// True once `finalize` has assigned rankings; standings are read-only after that.
  pub fn is_finalized(&self) -> bool {
    self.entries.iter().any(|s| s.ranking.is_some())
  }

  pub fn apply_result(
    &mut self,
    team1: TeamId,
    team2: TeamId,
    score1: u8,
    score2: u8,
  ) -> Result<(), BracketError> {
    if self.is_finalized() {
      return Err(BracketError::invalid_state("Swiss standings are already finalized."));
    }
    if team1 == team2 {
      return Err(BracketError::invalid_state("A team cannot play itself."));
    }
    if score1 == score2 {
      return Err(BracketError::validation("A completed Swiss match needs a winner."));
    }
    let idx1 = self.position_of(team1)?;
    let idx2 = self.position_of(team2)?;
    let (s1, s2) = (score1 as u32, score2 as u32);
    let diff = s1 as i32 - s2 as i32;

    let first = &mut self.entries[idx1];
    first.map_wins += s1;
    first.map_losses += s2;
    first.round_difference += diff;
    first.opponents_faced.push(team2);
    if s1 > s2 {
      first.wins += 1;
      first.swiss_score += 1;
    } else {
      first.losses += 1;
    }

    let second = &mut self.entries[idx2];
    second.map_wins += s2;
    second.map_losses += s1;
    second.round_difference -= diff;
    second.opponents_faced.push(team1);
    if s2 > s1 {
      second.wins += 1;
      second.swiss_score += 1;
    } else {
      second.losses += 1;
    }
    Ok(())
  }

  /// Marks a team as sitting out a round. Byes award nothing.
  pub fn record_bye(&mut self, team_id: TeamId) -> Result<(), BracketError> {
    let idx = self.position_of(team_id)?;
    self.entries[idx].byes += 1;
    Ok(())
  }

  /// Buchholz from the current swiss scores of every opponent faced so far.
  pub fn recompute_buchholz(&mut self) {
    let scores = self
      .entries
      .iter()
      .map(|s| (s.team_id, s.swiss_score))
      .collect::<HashMap<_, _>>();
    for standing in &mut self.entries {
      standing.buchholz_score = standing
        .opponents_faced
        .iter()
        .filter_map(|opponent| scores.get(opponent))
        .sum();
    }
  }

  /// Assigns rankings and qualification flags, returning team ids in rank order.
  pub fn finalize(&mut self) -> Vec<TeamId> {
    let ranked = self.ordered().iter().map(|s| s.team_id).collect::<Vec<_>>();
    for (position, team_id) in ranked.iter().enumerate() {
      let idx = self.index[team_id];
      let standing = &mut self.entries[idx];
      standing.ranking = Some(position as u32 + 1);
      standing.qualified_to_upper = position < UPPER_BRACKET_SEEDS;
      standing.qualified_to_lower = (UPPER_BRACKET_SEEDS..PLAYOFF_SEEDS).contains(&position);
    }
    ranked
  }

  fn position_of(&self, team_id: TeamId) -> Result<usize, BracketError> {
    self
      .index
      .get(&team_id)
      .copied()
      .ok_or_else(|| BracketError::invalid_state(format!("Team {team_id} has no Swiss standing.")))
  }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pairings {
  pub pairs: Vec<(TeamId, TeamId)>,
  pub bye: Option<TeamId>,
}

/// Random opening round. An odd leftover gets a bye and plays no match.
pub fn pair_opening_round<R: Rng + ?Sized>(entrants: &[TeamId], rng: &mut R) -> Pairings {
  let mut shuffled = entrants.to_vec();
  shuffled.shuffle(rng);
  let mut pairings = Pairings::default();
  for chunk in shuffled.chunks(2) {
    match chunk {
      [a, b] => pairings.pairs.push((*a, *b)),
      [leftover] => pairings.bye = Some(*leftover),
      _ => {}
    }
  }
  pairings
}

/// Pairs a later round in standings order without rematches.
///
/// The first pass only pairs teams on the same number of wins. If that leaves
/// anyone out, a second pass lets teams float to the nearest record. In an odd
/// field the bye goes to the lowest-ranked team that has not had one yet; a
/// repeat bye is only used when no such team can sit out.
pub fn pair_next_round(standings: &Standings, round: u32) -> Result<Pairings, BracketError> {
  let order = standings.ordered();
  if order.len() < 2 {
    return Err(BracketError::PairingFailed {
      round,
      reason: "fewer than two teams in the standings".to_string(),
    });
  }

  for candidates in bye_candidates(&order) {
    for same_record in [true, false] {
      for bye in &candidates {
        let mut search = PairingSearch {
          order: &order,
          same_record,
          paired: vec![false; order.len()],
          pairs: Vec::new(),
          budget: PAIRING_SEARCH_BUDGET,
        };
        if let Some(idx) = bye {
          search.paired[*idx] = true;
        }
        if search.run() {
          let pairs = search
            .pairs
            .iter()
            .map(|(a, b)| (order[*a].team_id, order[*b].team_id))
            .collect();
          return Ok(Pairings {
            pairs,
            bye: bye.map(|idx| order[idx].team_id),
          });
        }
      }
      if same_record {
        debug!(round, "no same-record pairing exists, allowing floats");
      }
    }
  }

  Err(BracketError::PairingFailed {
    round,
    reason: "every remaining arrangement contains a rematch".to_string(),
  })
}

/// Bye choices grouped by preference, each group lowest-ranked first. An even
/// field has a single "no bye" choice.
fn bye_candidates(order: &[&SwissStanding]) -> Vec<Vec<Option<usize>>> {
  if order.len() % 2 == 0 {
    return vec![vec![None]];
  }
  let (fresh, repeat): (Vec<usize>, Vec<usize>) = (0..order.len()).rev().partition(|idx| order[*idx].byes == 0);
  [fresh, repeat]
    .into_iter()
    .filter(|group| !group.is_empty())
    .map(|group| group.into_iter().map(Some).collect())
    .collect()
}

struct PairingSearch<'a> {
  order: &'a [&'a SwissStanding],
  same_record: bool,
  paired: Vec<bool>,
  pairs: Vec<(usize, usize)>,
  budget: usize,
}

impl PairingSearch<'_> {
  fn run(&mut self) -> bool {
    if self.budget == 0 {
      return false;
    }
    self.budget -= 1;

    let Some(first) = self.paired.iter().position(|done| !done) else {
      return true;
    };
    self.paired[first] = true;

    for candidate in (first + 1)..self.order.len() {
      if self.paired[candidate] || !self.can_meet(first, candidate) {
        continue;
      }
      self.paired[candidate] = true;
      self.pairs.push((first, candidate));
      if self.run() {
        return true;
      }
      self.pairs.pop();
      self.paired[candidate] = false;
    }

    self.paired[first] = false;
    false
  }

  fn can_meet(&self, a: usize, b: usize) -> bool {
    let (a, b) = (self.order[a], self.order[b]);
    if a.has_faced(b.team_id) || b.has_faced(a.team_id) {
      return false;
    }
    !self.same_record || a.wins == b.wins
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use std::collections::HashSet;

  fn make_standings(count: u32) -> Standings {
    let teams = (1..=count).collect::<Vec<_>>();
    Standings::new(&teams)
  }

  fn standings_from(rows: &[(TeamId, u32, Vec<TeamId>)]) -> Standings {
    let teams = rows.iter().map(|(team_id, _, _)| *team_id).collect::<Vec<_>>();
    let mut standings = Standings::new(&teams);
    for (team_id, wins, faced) in rows {
      let idx = standings.index[team_id];
      let entry = &mut standings.entries[idx];
      entry.wins = *wins;
      entry.swiss_score = *wins;
      entry.opponents_faced = faced.clone();
    }
    standings
  }

  #[test]
  fn test_opening_round_pairs_everyone_once() {
    let mut rng = StdRng::seed_from_u64(7);
    for count in [8u32, 10, 12, 16] {
      let teams = (1..=count).collect::<Vec<_>>();
      let pairings = pair_opening_round(&teams, &mut rng);
      assert_eq!(pairings.pairs.len(), count as usize / 2);
      assert!(pairings.bye.is_none());
      let mut seen = HashSet::new();
      for (a, b) in &pairings.pairs {
        assert!(seen.insert(*a));
        assert!(seen.insert(*b));
      }
      assert_eq!(seen.len(), count as usize);
    }
  }

  #[test]
  fn test_opening_round_odd_leftover_gets_bye() {
    let mut rng = StdRng::seed_from_u64(3);
    let teams = (1..=9).collect::<Vec<_>>();
    let pairings = pair_opening_round(&teams, &mut rng);
    assert_eq!(pairings.pairs.len(), 4);
    assert!(pairings.bye.is_some());
  }

  #[test]
  fn test_apply_result_updates_both_sides() {
    let mut standings = make_standings(8);
    standings.apply_result(1, 2, 2, 1).unwrap();

    let winner = standings.get(1).unwrap();
    assert_eq!(winner.wins, 1);
    assert_eq!(winner.losses, 0);
    assert_eq!(winner.swiss_score, 1);
    assert_eq!(winner.map_wins, 2);
    assert_eq!(winner.map_losses, 1);
    assert_eq!(winner.round_difference, 1);
    assert_eq!(winner.opponents_faced, vec![2]);

    let loser = standings.get(2).unwrap();
    assert_eq!(loser.wins, 0);
    assert_eq!(loser.losses, 1);
    assert_eq!(loser.swiss_score, 0);
    assert_eq!(loser.map_wins, 1);
    assert_eq!(loser.map_losses, 2);
    assert_eq!(loser.round_difference, -1);
    assert_eq!(loser.opponents_faced, vec![1]);
  }

  #[test]
  fn test_apply_result_second_team_wins() {
    let mut standings = make_standings(8);
    standings.apply_result(3, 4, 0, 2).unwrap();
    assert_eq!(standings.get(4).unwrap().wins, 1);
    assert_eq!(standings.get(3).unwrap().losses, 1);
    assert_eq!(standings.get(3).unwrap().round_difference, -2);
  }

  #[test]
  fn test_apply_result_rejects_draws_and_unknown_teams() {
    let mut standings = make_standings(8);
    assert!(matches!(
      standings.apply_result(1, 2, 1, 1),
      Err(BracketError::Validation(_))
    ));
    assert!(matches!(
      standings.apply_result(1, 99, 2, 0),
      Err(BracketError::InvalidState(_))
    ));
    assert_eq!(standings.get(1).unwrap().opponents_faced.len(), 0);
  }

  #[test]
  fn test_buchholz_uses_current_scores_and_is_idempotent() {
    let mut standings = make_standings(4);
    standings.apply_result(1, 2, 2, 0).unwrap();
    standings.apply_result(3, 4, 2, 1).unwrap();
    standings.recompute_buchholz();
    assert_eq!(standings.get(2).unwrap().buchholz_score, 1);
    assert_eq!(standings.get(1).unwrap().buchholz_score, 0);

    // A later result changes earlier opponents' contribution.
    standings.apply_result(2, 3, 2, 0).unwrap();
    standings.recompute_buchholz();
    let first = standings.ordered().iter().map(|s| (*s).clone()).collect::<Vec<_>>();
    standings.recompute_buchholz();
    let second = standings.ordered().iter().map(|s| (*s).clone()).collect::<Vec<_>>();
    assert_eq!(first, second);
    assert_eq!(standings.get(1).unwrap().buchholz_score, 1);
    assert_eq!(standings.get(2).unwrap().buchholz_score, 2);
  }

  #[test]
  fn test_ordering_cascade_and_entry_order_fallback() {
    let mut standings = make_standings(4);
    standings.apply_result(4, 3, 2, 0).unwrap();
    standings.apply_result(2, 1, 2, 1).unwrap();
    standings.recompute_buchholz();
    let order = standings.ordered().iter().map(|s| s.team_id).collect::<Vec<_>>();
    // 4 and 2 both 1-0, same buchholz; 4 has the better round difference.
    assert_eq!(order, vec![4, 2, 1, 3]);

    let untouched = make_standings(3);
    let order = untouched.ordered().iter().map(|s| s.team_id).collect::<Vec<_>>();
    assert_eq!(order, vec![1, 2, 3]);
  }

  #[test]
  fn test_next_round_pairs_equal_records_without_rematches() {
    let mut standings = make_standings(8);
    for (a, b) in [(1, 2), (3, 4), (5, 6), (7, 8)] {
      standings.apply_result(a, b, 2, 0).unwrap();
    }
    standings.recompute_buchholz();
    let pairings = pair_next_round(&standings, 2).unwrap();
    assert_eq!(pairings.pairs.len(), 4);
    assert!(pairings.bye.is_none());
    for (a, b) in &pairings.pairs {
      let (sa, sb) = (standings.get(*a).unwrap(), standings.get(*b).unwrap());
      assert_eq!(sa.wins, sb.wins);
      assert!(!sa.has_faced(*b));
    }
  }

  #[test]
  fn test_next_round_backtracks_past_greedy_dead_end() {
    // Greedy would take 1 v 2 and strand 3 and 4, who already met.
    let standings = standings_from(&[
      (1, 1, vec![4]),
      (2, 1, vec![3]),
      (3, 1, vec![4, 2]),
      (4, 1, vec![3, 1]),
    ]);
    let pairings = pair_next_round(&standings, 3).unwrap();
    let mut pairs = pairings
      .pairs
      .iter()
      .map(|(a, b)| if a < b { (*a, *b) } else { (*b, *a) })
      .collect::<Vec<_>>();
    pairs.sort();
    assert_eq!(pairs, vec![(1, 3), (2, 4)]);
  }

  #[test]
  fn test_next_round_floats_when_records_do_not_split_evenly() {
    let mut standings = make_standings(6);
    for (a, b) in [(1, 2), (3, 4), (5, 6)] {
      standings.apply_result(a, b, 2, 1).unwrap();
    }
    let pairings = pair_next_round(&standings, 2).unwrap();
    assert_eq!(pairings.pairs.len(), 3);
    let cross = pairings
      .pairs
      .iter()
      .filter(|(a, b)| standings.get(*a).unwrap().wins != standings.get(*b).unwrap().wins)
      .count();
    assert_eq!(cross, 1);
  }

  #[test]
  fn test_next_round_bye_skips_teams_that_already_sat_out() {
    let mut standings = make_standings(5);
    standings.apply_result(1, 2, 2, 1).unwrap();
    standings.apply_result(3, 4, 2, 1).unwrap();
    standings.record_bye(5).unwrap();
    standings.recompute_buchholz();
    assert_eq!(standings.ordered().last().map(|s| s.team_id), Some(5));

    let pairings = pair_next_round(&standings, 2).unwrap();
    assert_eq!(pairings.bye, Some(4));
    assert!(pairings.pairs.iter().any(|(a, b)| *a == 5 || *b == 5));
  }

  #[test]
  fn test_next_round_repeats_a_bye_only_when_forced() {
    let mut standings = make_standings(3);
    for team_id in [1, 2, 3] {
      standings.record_bye(team_id).unwrap();
    }
    let pairings = pair_next_round(&standings, 2).unwrap();
    assert_eq!(pairings.pairs.len(), 1);
    assert_eq!(pairings.bye, Some(3));
  }

  #[test]
  fn test_next_round_reports_failure_instead_of_dropping_teams() {
    let mut standings = make_standings(2);
    standings.apply_result(1, 2, 2, 0).unwrap();
    let err = pair_next_round(&standings, 2).unwrap_err();
    assert!(matches!(err, BracketError::PairingFailed { round: 2, .. }));
  }

  #[test]
  fn test_finalize_assigns_ranks_and_qualification() {
    let mut standings = make_standings(10);
    for (a, b) in [(1, 2), (3, 4), (5, 6), (7, 8), (9, 10)] {
      standings.apply_result(a, b, 2, 0).unwrap();
    }
    standings.recompute_buchholz();
    let ranked = standings.finalize();
    assert_eq!(ranked.len(), 10);
    for (idx, team_id) in ranked.iter().enumerate() {
      let standing = standings.get(*team_id).unwrap();
      assert_eq!(standing.ranking, Some(idx as u32 + 1));
      assert_eq!(standing.qualified_to_upper, idx < 4);
      assert_eq!(standing.qualified_to_lower, (4..8).contains(&idx));
    }
    assert!(standings.is_finalized());
    assert!(matches!(
      standings.apply_result(1, 3, 2, 0),
      Err(BracketError::InvalidState(_))
    ));
  }
}
