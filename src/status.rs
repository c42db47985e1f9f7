use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::bracket::{EventBracket, Match, Slot};
use crate::progression::BracketProgression;
use crate::swiss::SwissStanding;
use crate::types::*;

// ── Views ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub team_id: Option<TeamId>,
    pub source: Option<String>,
    pub score: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    pub id: MatchId,
    pub match_number: String,
    pub stage_type: StageType,
    pub round: u32,
    pub round_name: String,
    pub bracket_position: u32,
    pub best_of: u8,
    pub format: String,
    pub team1: SlotView,
    pub team2: SlotView,
    pub status: MatchStatus,
    pub winner_id: Option<TeamId>,
    pub winner_advances_to: Option<String>,
    pub loser_advances_to: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub round: u32,
    pub name: String,
    pub matches: Vec<MatchView>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QualificationType {
    Upper,
    Lower,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingView {
    pub position: u32,
    #[serde(flatten)]
    pub standing: SwissStanding,
    pub qualified: bool,
    pub qualification_type: Option<QualificationType>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwissStageView {
    pub standings: Vec<StandingView>,
    pub rounds: Vec<RoundView>,
    pub current_round: u32,
    pub total_rounds: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMetadata {
    pub total_matches: usize,
    pub completed_matches: usize,
    pub remaining_matches: usize,
    pub current_stage: CurrentStage,
    pub progress_percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketView {
    pub event_id: EventId,
    pub format: FormatConfig,
    pub swiss: SwissStageView,
    pub upper_bracket: Vec<RoundView>,
    pub lower_bracket: Vec<RoundView>,
    pub grand_final: Option<MatchView>,
    pub metadata: BracketMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketStatus {
    pub event_id: EventId,
    pub current_stage: CurrentStage,
    pub swiss_complete: bool,
    pub playoffs_started: bool,
    pub total_matches: usize,
    pub completed_matches: usize,
    pub live_matches: Vec<MatchView>,
    pub next_matches: Vec<MatchView>,
}

// ── Builders ───────────────────────────────────────────────────────────

fn slot_view(bracket: &EventBracket, slot: &Slot) -> SlotView {
    SlotView {
        team_id: slot.team_id,
        source: bracket.source_label(slot.source),
        score: slot.score,
    }
}

pub fn match_view(bracket: &EventBracket, m: &Match) -> MatchView {
    MatchView {
        id: m.id,
        match_number: m.match_number.clone(),
        stage_type: m.stage_type,
        round: m.round,
        round_name: m.round_name(),
        bracket_position: m.bracket_position,
        best_of: m.best_of,
        format: best_of_label(m.best_of),
        team1: slot_view(bracket, &m.slots[0]),
        team2: slot_view(bracket, &m.slots[1]),
        status: m.status,
        winner_id: m.winner_id,
        winner_advances_to: bracket.advancement_label(m.winner_advances_to),
        loser_advances_to: bracket.advancement_label(m.loser_advances_to),
        completed_at: m.completed_at,
    }
}

fn rounds_for(bracket: &EventBracket, stage: StageType) -> Vec<RoundView> {
    let mut rounds: BTreeMap<u32, Vec<&Match>> = BTreeMap::new();
    for m in bracket.matches().iter().filter(|m| m.stage_type == stage) {
        rounds.entry(m.round).or_default().push(m);
    }
    rounds
        .into_iter()
        .map(|(round, mut matches)| {
            matches.sort_by_key(|m| m.bracket_position);
            let name = matches
                .first()
                .map(|m| m.round_name())
                .unwrap_or_else(|| format!("Round {round}"));
            RoundView {
                round,
                name,
                matches: matches.into_iter().map(|m| match_view(bracket, m)).collect(),
            }
        })
        .collect()
}

pub fn standings_view(bracket: &EventBracket) -> Vec<StandingView> {
    bracket
        .standings
        .ordered()
        .into_iter()
        .enumerate()
        .map(|(idx, standing)| {
            let qualification_type = if standing.qualified_to_upper {
                Some(QualificationType::Upper)
            } else if standing.qualified_to_lower {
                Some(QualificationType::Lower)
            } else {
                None
            };
            StandingView {
                position: standing.ranking.unwrap_or(idx as u32 + 1),
                standing: standing.clone(),
                qualified: qualification_type.is_some(),
                qualification_type,
            }
        })
        .collect()
}

/// Counts plus the stage of the most recently completed match.
pub fn bracket_metadata(bracket: &EventBracket) -> BracketMetadata {
    let total = bracket.counted_matches().count();
    let completed = bracket.counted_matches().filter(|m| m.is_completed()).count();
    let current_stage = match bracket
        .matches()
        .iter()
        .filter(|m| m.is_completed())
        .max_by_key(|m| m.completion_seq)
    {
        Some(latest) if latest.stage_type.is_playoff() => CurrentStage::Playoffs,
        _ => CurrentStage::Swiss,
    };
    let progress_percentage = if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64 * 1000.0).round() / 10.0
    };
    BracketMetadata {
        total_matches: total,
        completed_matches: completed,
        remaining_matches: total - completed,
        current_stage,
        progress_percentage,
    }
}

pub fn bracket_view(bracket: &EventBracket) -> BracketView {
    BracketView {
        event_id: bracket.event_id,
        format: bracket.format,
        swiss: SwissStageView {
            standings: standings_view(bracket),
            rounds: rounds_for(bracket, StageType::Swiss),
            current_round: bracket.current_round,
            total_rounds: SWISS_ROUNDS,
        },
        upper_bracket: rounds_for(bracket, StageType::UpperBracket),
        lower_bracket: rounds_for(bracket, StageType::LowerBracket),
        grand_final: bracket
            .matches()
            .iter()
            .find(|m| m.stage_type == StageType::GrandFinal)
            .map(|m| match_view(bracket, m)),
        metadata: bracket_metadata(bracket),
    }
}

pub fn bracket_status(bracket: &EventBracket) -> BracketStatus {
    let metadata = bracket_metadata(bracket);
    let live_matches = bracket
        .counted_matches()
        .filter(|m| m.status == MatchStatus::Live)
        .map(|m| match_view(bracket, m))
        .collect();

    let mut upcoming = bracket
        .counted_matches()
        .filter(|m| m.status == MatchStatus::Upcoming && m.is_ready())
        .collect::<Vec<_>>();
    upcoming.sort_by_key(|m| (m.stage_type.is_playoff(), m.round, m.bracket_position));
    let next_matches = upcoming
        .into_iter()
        .take(NEXT_MATCHES_LIMIT)
        .map(|m| match_view(bracket, m))
        .collect();

    BracketStatus {
        event_id: bracket.event_id,
        current_stage: metadata.current_stage,
        swiss_complete: bracket.seeded,
        playoffs_started: bracket.playoffs_started(),
        total_matches: metadata.total_matches,
        completed_matches: metadata.completed_matches,
        live_matches,
        next_matches,
    }
}

/// Progression rows with placed teams first (best placement first), then
/// by matches won.
pub fn progression_ordered(bracket: &EventBracket) -> Vec<BracketProgression> {
    let mut rows = bracket.progression().to_vec();
    rows.sort_by(|a, b| {
        let placement = |p: &BracketProgression| p.final_placement.unwrap_or(u32::MAX);
        placement(a)
            .cmp(&placement(b))
            .then_with(|| b.matches_won.cmp(&a.matches_won))
            .then_with(|| a.team_id.cmp(&b.team_id))
    });
    rows
}
