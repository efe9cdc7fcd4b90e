use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ForecastError, Result};
use crate::models::{FeatureRow, Venue};

/// Bumped whenever slot naming or vectorisation rules change.
/// Artifacts stored under another version are retrained.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const HOME_FLAG: &str = "is_home";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Column read from the fixture row, depending on which side is attacking.
    Numeric {
        home_column: String,
        away_column: String,
    },
    HomeFlag,
    AttackIndicator(String),
    DefenseIndicator(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSlot {
    pub name: String,
    pub kind: SlotKind,
}

impl FeatureSlot {
    pub fn numeric(name: impl Into<String>, home_column: impl Into<String>, away_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SlotKind::Numeric {
                home_column: home_column.into(),
                away_column: away_column.into(),
            },
        }
    }
}

/// Ordered, named model inputs shared by training and prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub slots: Vec<FeatureSlot>,
}

/// One perspective laid out against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Vectorized {
    pub values: Vec<f64>,
    /// Numeric slots that were zero-filled.
    pub missing: Vec<String>,
}

impl FeatureSchema {
    /// Numeric slots first, then the home flag, then attack and defense
    /// indicators for every known team in name order.
    pub fn build(numeric: Vec<FeatureSlot>, teams: &BTreeSet<String>) -> Self {
        let mut slots = numeric;
        slots.push(FeatureSlot {
            name: HOME_FLAG.to_string(),
            kind: SlotKind::HomeFlag,
        });
        for team in teams {
            slots.push(FeatureSlot {
                name: format!("att_{}", team),
                kind: SlotKind::AttackIndicator(team.clone()),
            });
        }
        for team in teams {
            slots.push(FeatureSlot {
                name: format!("def_{}", team),
                kind: SlotKind::DefenseIndicator(team.clone()),
            });
        }
        Self {
            version: FEATURE_SCHEMA_VERSION,
            slots,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn knows_team(&self, team: &str) -> bool {
        self.slots
            .iter()
            .any(|s| matches!(&s.kind, SlotKind::AttackIndicator(t) if t == team))
    }

    pub fn ensure_current(&self) -> Result<()> {
        if self.version != FEATURE_SCHEMA_VERSION {
            return Err(ForecastError::SchemaVersion {
                found: self.version,
                expected: FEATURE_SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    /// Lays out the `attacking` side of `row` in slot order.
    ///
    /// Columns the schema does not name are ignored. Absent numeric columns
    /// and teams without an indicator slot are zero-filled.
    pub fn vectorize(&self, row: &FeatureRow, attacking: Venue) -> Vectorized {
        let team = row.record.team(attacking);
        let opponent = row.record.team(attacking.opposite());
        let mut values = Vec::with_capacity(self.slots.len());
        let mut missing = Vec::new();

        for slot in &self.slots {
            let value = match &slot.kind {
                SlotKind::Numeric {
                    home_column,
                    away_column,
                } => {
                    let column = match attacking {
                        Venue::Home => home_column,
                        Venue::Away => away_column,
                    };
                    row.get(column).unwrap_or_else(|| {
                        missing.push(slot.name.clone());
                        0.0
                    })
                }
                SlotKind::HomeFlag => indicator(attacking == Venue::Home),
                SlotKind::AttackIndicator(t) => indicator(t == team),
                SlotKind::DefenseIndicator(t) => indicator(t == opponent),
            };
            values.push(value);
        }

        Vectorized { values, missing }
    }
}

fn indicator(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// Strips the `_home` / `_away` part of a column so both perspectives share a name.
pub fn strip_venue(column: &str) -> String {
    column.replace("_home", "").replace("_away", "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchRecord, Season, SideStats};
    use chrono::NaiveDate;

    fn row(home: &str, away: &str) -> FeatureRow {
        FeatureRow::new(MatchRecord {
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            time: None,
            competition: "Test".to_string(),
            season: Season::new(2024),
            round: Some(27),
            home_team: home.to_string(),
            away_team: away.to_string(),
            home: SideStats::default(),
            away: SideStats::default(),
            result_home: None,
        })
    }

    fn schema() -> FeatureSchema {
        let teams: BTreeSet<String> = ["A", "B"].iter().map(|t| t.to_string()).collect();
        FeatureSchema::build(
            vec![FeatureSlot::numeric("xg_roll5", "xg_home_roll5", "xg_away_roll5")],
            &teams,
        )
    }

    #[test]
    fn layout_is_numeric_flag_then_indicators() {
        assert_eq!(
            schema().names(),
            vec!["xg_roll5", "is_home", "att_A", "att_B", "def_A", "def_B"]
        );
    }

    #[test]
    fn away_perspective_reads_away_columns_and_flips_indicators() {
        let mut r = row("A", "B");
        r.set("xg_home_roll5", Some(1.7));
        r.set("xg_away_roll5", Some(0.9));
        r.set("unrelated", Some(42.0));

        let home = schema().vectorize(&r, Venue::Home);
        assert_eq!(home.values, vec![1.7, 1.0, 1.0, 0.0, 0.0, 1.0]);
        let away = schema().vectorize(&r, Venue::Away);
        assert_eq!(away.values, vec![0.9, 0.0, 0.0, 1.0, 1.0, 0.0]);
        assert!(away.missing.is_empty());
    }

    #[test]
    fn unseen_team_zero_fills_without_error() {
        let v = schema().vectorize(&row("Promoted", "B"), Venue::Home);
        assert_eq!(v.values, vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(v.missing, vec!["xg_roll5".to_string()]);
        assert!(!schema().knows_team("Promoted"));
    }

    #[test]
    fn stale_version_is_rejected() {
        let mut s = schema();
        s.version = FEATURE_SCHEMA_VERSION + 1;
        assert!(matches!(s.ensure_current(), Err(ForecastError::SchemaVersion { .. })));
    }

    #[test]
    fn venue_parts_are_stripped() {
        assert_eq!(strip_venue("xg_conceded_away_roll10"), "xg_conceded_roll10");
        assert_eq!(strip_venue("avg_goals_for_home"), "avg_goals_for");
    }
}
