use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ForecastError, Result};

/// A football season written as "YYYY-YYYY".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Season {
    start_year: i32,
}

impl Season {
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    /// Both years decremented by one.
    pub fn previous(&self) -> Self {
        Self {
            start_year: self.start_year - 1,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || ForecastError::MalformedSeason(raw.to_string());
        let (first, second) = raw.trim().split_once('-').ok_or_else(malformed)?;
        if first.len() != 4 || second.len() != 4 {
            return Err(malformed());
        }
        let start: i32 = first.parse().map_err(|_| malformed())?;
        let end: i32 = second.parse().map_err(|_| malformed())?;
        if end != start + 1 {
            return Err(malformed());
        }
        Ok(Self { start_year: start })
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_year, self.start_year + 1)
    }
}

impl FromStr for Season {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        Season::parse(s)
    }
}

impl TryFrom<String> for Season {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self> {
        Season::parse(&value)
    }
}

impl From<Season> for String {
    fn from(season: Season) -> Self {
        season.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Home,
    Away,
}

impl Venue {
    /// Column suffix used in feature names ("home" / "away").
    pub fn suffix(&self) -> &'static str {
        match self {
            Venue::Home => "home",
            Venue::Away => "away",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Venue::Home => Venue::Away,
            Venue::Away => Venue::Home,
        }
    }
}

/// Result from the home side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOutcome {
    HomeWin,
    Draw,
    AwayWin,
}

impl MatchOutcome {
    /// Parses the ingestion encoding: 1 home win, 0 draw, -1 away win.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MatchOutcome::HomeWin),
            0 => Some(MatchOutcome::Draw),
            -1 => Some(MatchOutcome::AwayWin),
            _ => None,
        }
    }

    pub fn from_goals(home_goals: f64, away_goals: f64) -> Self {
        match home_goals.partial_cmp(&away_goals) {
            Some(std::cmp::Ordering::Greater) => MatchOutcome::HomeWin,
            Some(std::cmp::Ordering::Less) => MatchOutcome::AwayWin,
            _ => MatchOutcome::Draw,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            MatchOutcome::HomeWin => 1,
            MatchOutcome::Draw => 0,
            MatchOutcome::AwayWin => -1,
        }
    }

    /// League points awarded as (home, away).
    pub fn points(&self) -> (u32, u32) {
        match self {
            MatchOutcome::HomeWin => (3, 0),
            MatchOutcome::Draw => (1, 1),
            MatchOutcome::AwayWin => (0, 3),
        }
    }
}

/// Per-side match statistics that can feed a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StatKind {
    GoalsFor,
    GoalsAgainst,
    ExpectedGoals,
    Shots,
    ShotsOnTarget,
    ShotDistance,
    FreeKicks,
    Penalties,
}

impl StatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::GoalsFor => "gf",
            StatKind::GoalsAgainst => "ga",
            StatKind::ExpectedGoals => "xg",
            StatKind::Shots => "sh",
            StatKind::ShotsOnTarget => "sot",
            StatKind::ShotDistance => "dist",
            StatKind::FreeKicks => "fk",
            StatKind::Penalties => "pk",
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatKind {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gf" => Ok(StatKind::GoalsFor),
            "ga" => Ok(StatKind::GoalsAgainst),
            "xg" => Ok(StatKind::ExpectedGoals),
            "sh" => Ok(StatKind::Shots),
            "sot" => Ok(StatKind::ShotsOnTarget),
            "dist" => Ok(StatKind::ShotDistance),
            "fk" => Ok(StatKind::FreeKicks),
            "pk" => Ok(StatKind::Penalties),
            other => Err(ForecastError::InvalidConfig(format!("unknown stat '{}'", other))),
        }
    }
}

impl TryFrom<String> for StatKind {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<StatKind> for String {
    fn from(stat: StatKind) -> Self {
        stat.as_str().to_string()
    }
}

/// Statistics for one side of a fixture. `None` means unknown (unplayed or not collected).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideStats {
    pub gf: Option<f64>,
    pub ga: Option<f64>,
    pub xg: Option<f64>,
    pub sh: Option<f64>,
    pub sot: Option<f64>,
    pub dist: Option<f64>,
    pub fk: Option<f64>,
    pub pk: Option<f64>,
}

impl SideStats {
    pub fn get(&self, stat: StatKind) -> Option<f64> {
        match stat {
            StatKind::GoalsFor => self.gf,
            StatKind::GoalsAgainst => self.ga,
            StatKind::ExpectedGoals => self.xg,
            StatKind::Shots => self.sh,
            StatKind::ShotsOnTarget => self.sot,
            StatKind::ShotDistance => self.dist,
            StatKind::FreeKicks => self.fk,
            StatKind::Penalties => self.pk,
        }
    }
}

/// One fixture, played or not. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub date: NaiveDate,
    pub time: Option<String>,
    pub competition: String,
    pub season: Season,
    pub round: Option<u32>,
    pub home_team: String,
    pub away_team: String,
    pub home: SideStats,
    pub away: SideStats,
    pub result_home: Option<MatchOutcome>,
}

impl MatchRecord {
    /// Known outcome: the recorded result, else one derived from the score.
    pub fn outcome(&self) -> Option<MatchOutcome> {
        self.result_home.or_else(|| match (self.home.gf, self.away.gf) {
            (Some(h), Some(a)) => Some(MatchOutcome::from_goals(h, a)),
            _ => None,
        })
    }

    pub fn is_played(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn team(&self, venue: Venue) -> &str {
        match venue {
            Venue::Home => &self.home_team,
            Venue::Away => &self.away_team,
        }
    }

    pub fn stats(&self, venue: Venue) -> &SideStats {
        match venue {
            Venue::Home => &self.home,
            Venue::Away => &self.away,
        }
    }
}

/// A match record with its derived, named feature columns. Absent key = null.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub record: MatchRecord,
    pub features: BTreeMap<String, f64>,
}

impl FeatureRow {
    pub fn new(record: MatchRecord) -> Self {
        Self {
            record,
            features: BTreeMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.features.get(column).copied()
    }

    pub fn set(&mut self, column: impl Into<String>, value: Option<f64>) {
        let column = column.into();
        match value {
            Some(v) if v.is_finite() => {
                self.features.insert(column, v);
            }
            _ => {
                self.features.remove(&column);
            }
        }
    }
}

/// Season-level mean goals for one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeasonStat {
    pub season: Season,
    pub team: String,
    pub avg_goals_for: f64,
    pub avg_goals_against: f64,
    pub matches: usize,
    pub points: u32,
}

/// Mean goals of the bottom placed teams of `season`, used as the prior for promoted sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedBaseline {
    pub season: Season,
    pub goals_for: f64,
    pub goals_against: f64,
    pub teams: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProbabilities {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl OutcomeProbabilities {
    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.home + self.draw + self.away
    }

    /// Mass lost to score-grid truncation.
    pub fn residual(&self) -> f64 {
        1.0 - self.total()
    }
}

/// Presentation row for one upcoming fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPrediction {
    pub date: NaiveDate,
    pub time: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub prob_home: f64,
    pub prob_draw: f64,
    pub prob_away: f64,
    pub lambda_home: f64,
    pub lambda_away: f64,
}

impl MatchPrediction {
    pub fn probabilities(&self) -> OutcomeProbabilities {
        OutcomeProbabilities {
            home: self.prob_home,
            draw: self.prob_draw,
            away: self.prob_away,
        }
    }
}

/// Outcome distribution for one unplayed fixture, as consumed by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureProbabilities {
    pub home_team: String,
    pub away_team: String,
    pub probs: OutcomeProbabilities,
}

impl From<&MatchPrediction> for FixtureProbabilities {
    fn from(p: &MatchPrediction) -> Self {
        Self {
            home_team: p.home_team.clone(),
            away_team: p.away_team.clone(),
            probs: p.probabilities(),
        }
    }
}

/// Presentation row of a season projection. Probabilities are fractions in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRow {
    pub team: String,
    pub p_champion: f64,
    pub p_top_n: f64,
    pub p_relegation: f64,
}
