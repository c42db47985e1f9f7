use serde::{Deserialize, Serialize};

use crate::error::BracketError;

// ── Constants ──────────────────────────────────────────────────────────

pub const MIN_ENTRANTS: usize = 8;
pub const MAX_ENTRANTS: usize = 16;
pub const SWISS_ROUNDS: u32 = 3;
pub const SWISS_BEST_OF: u8 = 3;
pub const PLAYOFF_SEEDS: usize = 8;
pub const UPPER_BRACKET_SEEDS: usize = 4;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const NEXT_MATCHES_LIMIT: usize = 5;
pub const UNLISTED_PLACEMENT: u32 = 9;
pub const SWISS_ELIMINATION_LABEL: &str = "Swiss Stage";

const UPPER_BEST_OF_CHOICES: [u8; 3] = [3, 5, 7];
const LOWER_BEST_OF_CHOICES: [u8; 3] = [3, 5, 7];
const GRAND_FINAL_BEST_OF_CHOICES: [u8; 3] = [5, 7, 9];

// ── Identifiers ────────────────────────────────────────────────────────

pub type TeamId = u32;
pub type EventId = u64;
pub type MatchId = u64;

// ── Stage and status enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageType {
    Swiss,
    UpperBracket,
    LowerBracket,
    GrandFinal,
}

impl StageType {
    pub fn is_playoff(self) -> bool {
        !matches!(self, StageType::Swiss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressionStage {
    Swiss,
    UpperBracket,
    LowerBracket,
    Champion,
    Eliminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurrentStage {
    Swiss,
    Playoffs,
}

// ── Format ─────────────────────────────────────────────────────────────

/// Best-of lengths for the playoff stages. Swiss matches are always Bo3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatConfig {
    pub upper_bo: u8,
    pub lower_bo: u8,
    pub grand_final_bo: u8,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig {
            upper_bo: 5,
            lower_bo: 5,
            grand_final_bo: 7,
        }
    }
}

impl FormatConfig {
    pub fn validate(&self) -> Result<(), BracketError> {
        check_best_of("upper bracket", self.upper_bo, &UPPER_BEST_OF_CHOICES)?;
        check_best_of("lower bracket", self.lower_bo, &LOWER_BEST_OF_CHOICES)?;
        check_best_of("grand final", self.grand_final_bo, &GRAND_FINAL_BEST_OF_CHOICES)?;
        Ok(())
    }

    pub fn best_of_for(&self, stage: StageType) -> u8 {
        match stage {
            StageType::Swiss => SWISS_BEST_OF,
            StageType::UpperBracket => self.upper_bo,
            StageType::LowerBracket => self.lower_bo,
            StageType::GrandFinal => self.grand_final_bo,
        }
    }
}

fn check_best_of(label: &str, value: u8, allowed: &[u8]) -> Result<(), BracketError> {
    if allowed.contains(&value) {
        return Ok(());
    }
    let allowed = allowed
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(BracketError::validation(format!(
        "{label} best-of must be one of {allowed}, got {value}"
    )))
}

// ── Helpers ────────────────────────────────────────────────────────────

pub fn games_to_win(best_of: u8) -> u8 {
    best_of / 2 + 1
}

pub fn best_of_label(best_of: u8) -> String {
    format!("BO{best_of}")
}

/// English ordinal used in symbolic seed sources (`swiss_1st`, `swiss_2nd`, ...).
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_suffixes() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(2), "2nd");
        assert_eq!(ordinal(3), "3rd");
        assert_eq!(ordinal(4), "4th");
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(12), "12th");
    }

    #[test]
    fn test_games_to_win() {
        assert_eq!(games_to_win(3), 2);
        assert_eq!(games_to_win(5), 3);
        assert_eq!(games_to_win(7), 4);
    }

    #[test]
    fn test_format_validation() {
        assert!(FormatConfig::default().validate().is_ok());
        let bad = FormatConfig {
            upper_bo: 4,
            ..FormatConfig::default()
        };
        assert!(matches!(bad.validate(), Err(BracketError::Validation(_))));
        let bad_final = FormatConfig {
            grand_final_bo: 3,
            ..FormatConfig::default()
        };
        assert!(bad_final.validate().is_err());
    }
}
