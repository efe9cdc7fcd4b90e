use chrono::NaiveDate;
use std::collections::HashMap;

use crate::config::{ForecastConfig, PromotionScaling};
use crate::models::{FeatureRow, MatchRecord, PromotedBaseline, Season, TeamSeasonStat, Venue};

/// Points per match a promoted team earned in the tier it came from,
/// keyed by the season it was promoted into.
pub type PromotedPerformance = HashMap<(Season, String), f64>;

pub const HOME_ADVANTAGE: &str = "home_advantage";

pub fn goals_for_column(venue: Venue) -> String {
    format!("avg_goals_for_{}", venue.suffix())
}

pub fn goals_against_column(venue: Venue) -> String {
    format!("avg_goals_against_{}", venue.suffix())
}

/// Slow-moving season priors blended with current-season averages.
#[derive(Debug, Clone)]
pub struct SeasonAggregator {
    agg_window: usize,
    bottom_k: usize,
    scaling: PromotionScaling,
}

impl SeasonAggregator {
    pub fn new(agg_window: usize, bottom_k: usize, scaling: PromotionScaling) -> Self {
        Self {
            agg_window: agg_window.max(1),
            bottom_k,
            scaling,
        }
    }

    pub fn from_config(cfg: &ForecastConfig) -> Self {
        Self::new(cfg.agg_window, cfg.baseline_bottom_k, cfg.promotion)
    }

    /// Attaches season aggregate columns for both sides of every row.
    pub fn apply(&self, rows: &mut [FeatureRow], promoted: &PromotedPerformance) {
        let records: Vec<&MatchRecord> = rows.iter().map(|r| &r.record).collect();
        let stats: HashMap<(Season, String), TeamSeasonStat> = season_stats(&records)
            .into_iter()
            .map(|s| ((s.season, s.team.clone()), s))
            .collect();
        let baselines = relegation_baselines(stats.values(), self.bottom_k);
        let played = played_dates(&records);

        let mut promoted_rows = 0usize;
        for row in rows.iter_mut() {
            for venue in [Venue::Home, Venue::Away] {
                let team = row.record.team(venue).to_string();
                let season = row.record.season;
                let prev = season.previous();

                let prior = match stats.get(&(prev, team.clone())) {
                    Some(s) => Some((s.avg_goals_for, s.avg_goals_against)),
                    None => baselines.get(&prev).map(|b| {
                        promoted_rows += 1;
                        let ratio = promoted
                            .get(&(season, team.clone()))
                            .map(|ppm| promotion_ratio(*ppm, &self.scaling))
                            .unwrap_or(1.0);
                        (b.goals_for * ratio, b.goals_against / ratio)
                    }),
                };
                let current = stats
                    .get(&(season, team.clone()))
                    .map(|s| (s.avg_goals_for, s.avg_goals_against));
                let n = played
                    .get(&(season, team))
                    .map(|dates| dates.partition_point(|d| *d < row.record.date))
                    .unwrap_or(0);

                let s = venue.suffix();
                row.set(format!("avg_goals_for_prev_{}", s), prior.map(|p| p.0));
                row.set(format!("avg_goals_against_prev_{}", s), prior.map(|p| p.1));
                row.set(format!("avg_goals_for_curr_{}", s), current.map(|c| c.0));
                row.set(format!("avg_goals_against_curr_{}", s), current.map(|c| c.1));
                row.set(format!("matches_played_{}", s), Some(n as f64));
                row.set(
                    goals_for_column(venue),
                    blend(prior.map(|p| p.0), current.map(|c| c.0), n, self.agg_window),
                );
                row.set(
                    goals_against_column(venue),
                    blend(prior.map(|p| p.1), current.map(|c| c.1), n, self.agg_window),
                );
            }

            let advantage = match (
                row.get(&goals_for_column(Venue::Home)),
                row.get(&goals_for_column(Venue::Away)),
            ) {
                (Some(h), Some(a)) => Some(h - a),
                _ => None,
            };
            row.set(HOME_ADVANTAGE, advantage);
        }

        tracing::debug!(
            "Season aggregates attached to {} rows ({} team-sides on promoted baselines)",
            rows.len(),
            promoted_rows
        );
    }
}

/// Mean goals for/against and points per (season, team) over matches with a known result.
pub fn season_stats(records: &[&MatchRecord]) -> Vec<TeamSeasonStat> {
    #[derive(Default)]
    struct Acc {
        gf: f64,
        ga: f64,
        n: usize,
        points: u32,
    }

    let mut acc: HashMap<(Season, String), Acc> = HashMap::new();
    for record in records {
        let Some(outcome) = record.outcome() else {
            continue;
        };
        let (home_pts, away_pts) = outcome.points();
        for (venue, pts) in [(Venue::Home, home_pts), (Venue::Away, away_pts)] {
            let own = record.stats(venue);
            let opp = record.stats(venue.opposite());
            let (Some(gf), Some(ga)) = (own.gf.or(opp.ga), own.ga.or(opp.gf)) else {
                continue;
            };
            let entry = acc
                .entry((record.season, record.team(venue).to_string()))
                .or_default();
            entry.gf += gf;
            entry.ga += ga;
            entry.n += 1;
            entry.points += pts;
        }
    }

    let mut out: Vec<TeamSeasonStat> = acc
        .into_iter()
        .map(|((season, team), a)| TeamSeasonStat {
            season,
            team,
            avg_goals_for: a.gf / a.n as f64,
            avg_goals_against: a.ga / a.n as f64,
            matches: a.n,
            points: a.points,
        })
        .collect();
    out.sort_by(|a, b| a.season.cmp(&b.season).then_with(|| a.team.cmp(&b.team)));
    out
}

/// Mean goals of the `bottom_k` lowest-placed teams of every season.
/// Placement is points ascending, ties by team name.
pub fn relegation_baselines<'a, I>(stats: I, bottom_k: usize) -> HashMap<Season, PromotedBaseline>
where
    I: IntoIterator<Item = &'a TeamSeasonStat>,
{
    let mut by_season: HashMap<Season, Vec<&TeamSeasonStat>> = HashMap::new();
    for s in stats {
        by_season.entry(s.season).or_default().push(s);
    }

    by_season
        .into_iter()
        .filter_map(|(season, mut teams)| {
            teams.sort_by(|a, b| a.points.cmp(&b.points).then_with(|| a.team.cmp(&b.team)));
            teams.truncate(bottom_k);
            if teams.is_empty() {
                return None;
            }
            let k = teams.len() as f64;
            Some((
                season,
                PromotedBaseline {
                    season,
                    goals_for: teams.iter().map(|t| t.avg_goals_for).sum::<f64>() / k,
                    goals_against: teams.iter().map(|t| t.avg_goals_against).sum::<f64>() / k,
                    teams: teams.iter().map(|t| t.team.clone()).collect(),
                },
            ))
        })
        .collect()
}

/// Scaling of a promoted team's baseline from its lower-tier points per match.
///
/// 1 inside the dead zone around `neutral_ppm`, rising by `up_slope` per point
/// above it, falling by `down_slope` below it, clamped to `[min_ratio, max_ratio]`.
pub fn promotion_ratio(ppm: f64, scaling: &PromotionScaling) -> f64 {
    if ppm.is_nan() {
        return 1.0;
    }
    let diff = ppm - scaling.neutral_ppm;
    let ratio = if diff.abs() <= scaling.dead_zone {
        1.0
    } else if diff > 0.0 {
        1.0 + scaling.up_slope * (diff - scaling.dead_zone)
    } else {
        1.0 - scaling.down_slope * (-diff - scaling.dead_zone)
    };
    ratio.clamp(scaling.min_ratio, scaling.max_ratio)
}

/// `weight * current + (1 - weight) * prior` with `weight = min(played / agg_window, 1)`.
pub fn blend(prior: Option<f64>, current: Option<f64>, played: usize, agg_window: usize) -> Option<f64> {
    match (prior, current) {
        (Some(p), _) if played == 0 => Some(p),
        (Some(p), Some(c)) => {
            let w = (played as f64 / agg_window.max(1) as f64).min(1.0);
            Some(w * c + (1.0 - w) * p)
        }
        (Some(p), None) => Some(p),
        (None, c) => c,
    }
}

fn played_dates(records: &[&MatchRecord]) -> HashMap<(Season, String), Vec<NaiveDate>> {
    let mut out: HashMap<(Season, String), Vec<NaiveDate>> = HashMap::new();
    for record in records.iter().filter(|r| r.is_played()) {
        for venue in [Venue::Home, Venue::Away] {
            out.entry((record.season, record.team(venue).to_string()))
                .or_default()
                .push(record.date);
        }
    }
    for dates in out.values_mut() {
        dates.sort();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SideStats;

    fn played(season: i32, month: u32, day: u32, home: &str, away: &str, hg: f64, ag: f64) -> MatchRecord {
        MatchRecord {
            date: NaiveDate::from_ymd_opt(season + 1, month, day).unwrap(),
            time: None,
            competition: "Test".to_string(),
            season: Season::new(season),
            round: None,
            home_team: home.to_string(),
            away_team: away.to_string(),
            home: SideStats {
                gf: Some(hg),
                ga: Some(ag),
                ..Default::default()
            },
            away: SideStats {
                gf: Some(ag),
                ga: Some(hg),
                ..Default::default()
            },
            result_home: None,
        }
    }

    fn unplayed(season: i32, month: u32, day: u32, home: &str, away: &str) -> MatchRecord {
        MatchRecord {
            home: SideStats::default(),
            away: SideStats::default(),
            ..played(season, month, day, home, away, 0.0, 0.0)
        }
    }

    fn aggregator() -> SeasonAggregator {
        SeasonAggregator::new(10, 1, PromotionScaling::default())
    }

    fn rows(records: Vec<MatchRecord>) -> Vec<FeatureRow> {
        records.into_iter().map(FeatureRow::new).collect()
    }

    #[test]
    fn ratio_is_one_inside_dead_zone() {
        let s = PromotionScaling::default();
        assert_eq!(promotion_ratio(2.25, &s), 1.0);
        assert_eq!(promotion_ratio(2.35, &s), 1.0);
        assert_eq!(promotion_ratio(2.12, &s), 1.0);
    }

    #[test]
    fn ratio_falls_faster_than_it_rises() {
        let s = PromotionScaling::default();
        let up = promotion_ratio(2.25 + 0.15 + 0.4, &s) - 1.0;
        let down = 1.0 - promotion_ratio(2.25 - 0.15 - 0.4, &s);
        assert!(up > 0.0 && down > 0.0);
        assert!(down > up);
        assert!((up - 0.1).abs() < 1e-12);
        assert!((down - 0.2).abs() < 1e-12);
    }

    #[test]
    fn ratio_is_clamped_for_extreme_inputs() {
        let s = PromotionScaling::default();
        for ppm in [-1e9, -3.0, 0.0, 3.0, 50.0, 1e9, f64::INFINITY, f64::NEG_INFINITY] {
            let r = promotion_ratio(ppm, &s);
            assert!(r >= s.min_ratio && r <= s.max_ratio, "ppm {ppm} gave {r}");
        }
        assert_eq!(promotion_ratio(1e9, &s), s.max_ratio);
        assert_eq!(promotion_ratio(0.0, &s), s.min_ratio);
    }

    #[test]
    fn blend_uses_prior_before_first_match_and_current_after_window() {
        assert_eq!(blend(Some(1.2), Some(2.0), 0, 10), Some(1.2));
        assert_eq!(blend(Some(1.2), Some(2.0), 10, 10), Some(2.0));
        assert_eq!(blend(Some(1.2), Some(2.0), 25, 10), Some(2.0));
        let mid = blend(Some(1.0), Some(2.0), 5, 10).unwrap();
        assert!((mid - 1.5).abs() < 1e-12);
        assert_eq!(blend(None, Some(2.0), 0, 10), Some(2.0));
        assert_eq!(blend(None, None, 3, 10), None);
    }

    #[test]
    fn bottom_k_sorted_by_points_then_name() {
        let stat = |team: &str, points: u32, gf: f64| TeamSeasonStat {
            season: Season::new(2023),
            team: team.to_string(),
            avg_goals_for: gf,
            avg_goals_against: 2.0,
            matches: 2,
            points,
        };
        let stats = vec![stat("C", 1, 0.5), stat("B", 1, 0.9), stat("A", 6, 3.0)];
        let baselines = relegation_baselines(&stats, 1);
        let b = &baselines[&Season::new(2023)];
        assert_eq!(b.teams, vec!["B".to_string()]);
        assert_eq!(b.goals_for, 0.9);
    }

    #[test]
    fn promoted_team_inherits_scaled_relegation_baseline() {
        // 2023: A beats R twice; R is bottom with 0.5 gf / 2.5 ga.
        // 2024: P is promoted and meets A.
        let mut data = rows(vec![
            played(2023, 1, 1, "A", "R", 3.0, 1.0),
            played(2023, 1, 8, "R", "A", 0.0, 2.0),
            unplayed(2024, 1, 1, "P", "A"),
        ]);
        let mut promoted = PromotedPerformance::new();
        promoted.insert((Season::new(2024), "P".to_string()), 10.0);
        aggregator().apply(&mut data, &promoted);

        let row = &data[2];
        assert_eq!(row.get("avg_goals_for_prev_home"), Some(0.5 * 1.4));
        assert_eq!(row.get("avg_goals_against_prev_home"), Some(2.5 / 1.4));
        // No current-season games yet: blended value is the prior.
        assert_eq!(row.get("avg_goals_for_home"), Some(0.5 * 1.4));
        assert_eq!(row.get("avg_goals_for_away"), Some(2.5));
        assert_eq!(row.get("matches_played_home"), Some(0.0));
    }

    #[test]
    fn promoted_team_without_lower_tier_figure_uses_unscaled_baseline() {
        let mut data = rows(vec![
            played(2023, 1, 1, "A", "R", 3.0, 1.0),
            unplayed(2024, 1, 1, "P", "A"),
        ]);
        aggregator().apply(&mut data, &PromotedPerformance::new());
        assert_eq!(data[1].get("avg_goals_for_prev_home"), Some(1.0));
    }

    #[test]
    fn first_tracked_season_falls_back_to_current() {
        let mut data = rows(vec![
            played(2024, 1, 1, "A", "B", 2.0, 0.0),
            played(2024, 1, 8, "B", "A", 1.0, 1.0),
        ]);
        aggregator().apply(&mut data, &PromotedPerformance::new());

        let first = &data[0];
        assert_eq!(first.get("avg_goals_for_prev_home"), None);
        assert_eq!(first.get("avg_goals_for_home"), Some(1.5));
        assert_eq!(first.get("avg_goals_against_away"), Some(1.5));
        assert_eq!(data[1].get("matches_played_away"), Some(1.0));
    }

    #[test]
    fn matches_played_ignores_unplayed_and_same_day_games() {
        let mut data = rows(vec![
            played(2024, 1, 1, "A", "B", 1.0, 0.0),
            unplayed(2024, 1, 5, "A", "C"),
            played(2024, 1, 9, "A", "D", 1.0, 0.0),
            played(2024, 1, 9, "E", "A", 1.0, 0.0),
            unplayed(2024, 1, 20, "F", "A"),
        ]);
        aggregator().apply(&mut data, &PromotedPerformance::new());
        assert_eq!(data[2].get("matches_played_home"), Some(1.0));
        assert_eq!(data[3].get("matches_played_away"), Some(1.0));
        assert_eq!(data[4].get("matches_played_away"), Some(3.0));
    }

    #[test]
    fn home_advantage_is_difference_of_blended_goals_for() {
        let mut data = rows(vec![played(2024, 1, 1, "A", "B", 3.0, 1.0)]);
        aggregator().apply(&mut data, &PromotedPerformance::new());
        assert_eq!(data[0].get(HOME_ADVANTAGE), Some(2.0));
    }
}
