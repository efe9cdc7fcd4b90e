use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::LeagueConfig;
use crate::error::Result;
use crate::models::{MatchOutcome, MatchRecord, Season, SideStats};
use crate::services::season_aggregator::PromotedPerformance;
use crate::utils::validate_team_name;

/// Minimum Jaro-Winkler similarity for matching a promoted-tier team name to a known team.
const FUZZY_THRESHOLD: f64 = 0.92;

// ── ingestion table ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawMatch {
    date: String,
    #[serde(default)]
    time: Option<String>,
    season: String,
    #[serde(default)]
    comp: Option<String>,
    #[serde(default)]
    round: Option<String>,
    home_team: String,
    away_team: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    gf_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    ga_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    xg_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    gf_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    ga_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    xg_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sh_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sot_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    dist_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    fk_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pk_home: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sh_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sot_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    dist_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    fk_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pk_away: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    result_home: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPromoted {
    season: String,
    team: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    points_per_match: Option<f64>,
}

/// Reads match tables produced by the scraping side and resolves team aliases.
pub struct MatchLoader {
    league: LeagueConfig,
}

impl MatchLoader {
    pub fn new(league: LeagueConfig) -> Self {
        Self { league }
    }

    pub fn load_matches(&self, path: &Path) -> Result<Vec<MatchRecord>> {
        tracing::info!("Loading {} matches from {}", self.league.name, path.display());
        self.read_matches(File::open(path)?)
    }

    /// Rows with a bad date, an empty team name, an empty season or unreadable
    /// fields are dropped with a warning. A malformed season aborts the load.
    pub fn read_matches<R: Read>(&self, reader: R) -> Result<Vec<MatchRecord>> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut dropped = 0usize;

        for (line, result) in rdr.deserialize::<RawMatch>().enumerate() {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Skipping match row {}: {}", line + 1, e);
                    dropped += 1;
                    continue;
                }
            };
            let Some(record) = self.to_record(raw, line + 1)? else {
                dropped += 1;
                continue;
            };
            if !seen.insert((record.date, record.home_team.clone(), record.away_team.clone())) {
                tracing::debug!(
                    "Duplicate {} vs {} on {} dropped",
                    record.home_team,
                    record.away_team,
                    record.date
                );
                continue;
            }
            out.push(record);
        }

        out.sort_by_key(|r| r.date);
        tracing::info!("Loaded {} matches ({} rows dropped)", out.len(), dropped);
        Ok(out)
    }

    /// `Ok(None)` drops the row; only a non-empty season that fails to parse is an error.
    fn to_record(&self, raw: RawMatch, line: usize) -> Result<Option<MatchRecord>> {
        let date = match parse_date(&raw.date) {
            Some(d) => d,
            None => {
                tracing::warn!("Bad date '{}' on row {}", raw.date, line);
                return Ok(None);
            }
        };
        let home_team = self.league.canonical_team(&raw.home_team);
        let away_team = self.league.canonical_team(&raw.away_team);
        if !validate_team_name(&home_team) || !validate_team_name(&away_team) {
            tracing::warn!("Missing team name on row {}", line);
            return Ok(None);
        }
        if raw.season.trim().is_empty() {
            tracing::warn!("Missing season on row {}", line);
            return Ok(None);
        }
        let season = Season::parse(&raw.season)?;

        let home = SideStats {
            gf: raw.gf_home,
            ga: raw.ga_home.or(raw.gf_away),
            xg: raw.xg_home,
            sh: raw.sh_home,
            sot: raw.sot_home,
            dist: raw.dist_home,
            fk: raw.fk_home,
            pk: raw.pk_home,
        };
        let away = SideStats {
            gf: raw.gf_away,
            ga: raw.ga_away.or(raw.gf_home),
            xg: raw.xg_away,
            sh: raw.sh_away,
            sot: raw.sot_away,
            dist: raw.dist_away,
            fk: raw.fk_away,
            pk: raw.pk_away,
        };
        let result_home = raw
            .result_home
            .and_then(|code| MatchOutcome::from_code(code as i64))
            .or_else(|| match (home.gf, away.gf) {
                (Some(h), Some(a)) => Some(MatchOutcome::from_goals(h, a)),
                _ => None,
            });

        Ok(Some(MatchRecord {
            date,
            time: raw.time.filter(|t| !t.is_empty()),
            competition: raw
                .comp
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| self.league.name.clone()),
            season,
            round: raw.round.as_deref().and_then(parse_round),
            home_team,
            away_team,
            home,
            away,
            result_home,
        }))
    }

    /// Points per match in the lower tier, keyed by the season the team was promoted into.
    /// Names go through the alias map, then fuzzy matching against `known_teams`.
    pub fn read_promoted<R: Read>(&self, reader: R, known_teams: &BTreeSet<String>) -> Result<PromotedPerformance> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut out = PromotedPerformance::new();
        for result in rdr.deserialize::<RawPromoted>() {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Skipping promoted-tier row: {}", e);
                    continue;
                }
            };
            let season = Season::parse(&raw.season)?;
            let Some(ppm) = raw.points_per_match else {
                tracing::warn!("No points per match for {} in {}", raw.team, season);
                continue;
            };
            let team = self.resolve_team(&raw.team, known_teams);
            out.insert((season, team), ppm);
        }
        Ok(out)
    }

    pub fn load_promoted(&self, path: &Path, known_teams: &BTreeSet<String>) -> Result<PromotedPerformance> {
        if !path.exists() {
            tracing::warn!(
                "Promoted-tier table {} not found, promoted baselines stay unscaled",
                path.display()
            );
            return Ok(PromotedPerformance::new());
        }
        self.read_promoted(File::open(path)?, known_teams)
    }

    fn resolve_team(&self, raw: &str, known_teams: &BTreeSet<String>) -> String {
        let canonical = self.league.canonical_team(raw);
        if known_teams.is_empty() || known_teams.contains(&canonical) {
            return canonical;
        }
        let best = known_teams
            .iter()
            .map(|t| (strsim::jaro_winkler(&canonical.to_lowercase(), &t.to_lowercase()), t))
            .max_by(|a, b| a.0.total_cmp(&b.0));
        match best {
            Some((score, team)) if score >= FUZZY_THRESHOLD => {
                tracing::debug!("Matched '{}' to '{}' ({:.3})", canonical, team, score);
                team.clone()
            }
            _ => canonical,
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Digits of a round label: "Matchweek 38" -> 38.
pub fn parse_round(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
