use chrono::NaiveDate;
use std::collections::HashMap;

use crate::models::{FeatureRow, MatchRecord, StatKind, Venue};

/// Own rolling stat column, e.g. `xg_home_roll5`.
pub fn rolling_column(stat: StatKind, venue: Venue, window: usize) -> String {
    format!("{}_{}_roll{}", stat, venue.suffix(), window)
}

/// Rolling stat conceded by the team on `venue`, e.g. `xg_conceded_away_roll10`.
pub fn conceded_column(stat: StatKind, venue: Venue, window: usize) -> String {
    format!("{}_conceded_{}_roll{}", stat, venue.suffix(), window)
}

/// Venue-independent trailing form of each team's own statistics.
#[derive(Debug, Clone)]
pub struct RollingFormCalculator {
    stats: Vec<StatKind>,
    windows: Vec<usize>,
}

impl RollingFormCalculator {
    pub fn new(stats: Vec<StatKind>, windows: Vec<usize>) -> Self {
        Self { stats, windows }
    }

    pub fn columns(&self) -> Vec<String> {
        columns_for(&self.stats, &self.windows, rolling_column)
    }

    /// Attaches `{stat}_{home|away}_roll{w}` to every row.
    pub fn apply(&self, rows: &mut [FeatureRow]) {
        attach_trailing_means(
            rows,
            &self.stats,
            &self.windows,
            |record, venue, stat| record.stats(venue).get(stat),
            rolling_column,
        );
    }
}

/// Trailing form of what a team concedes: the opponent's value in each fixture.
#[derive(Debug, Clone)]
pub struct ConcededFormCalculator {
    stats: Vec<StatKind>,
    windows: Vec<usize>,
}

impl ConcededFormCalculator {
    pub fn new(stats: Vec<StatKind>, windows: Vec<usize>) -> Self {
        Self { stats, windows }
    }

    pub fn columns(&self) -> Vec<String> {
        columns_for(&self.stats, &self.windows, conceded_column)
    }

    /// Attaches `{stat}_conceded_{home|away}_roll{w}` to every row.
    pub fn apply(&self, rows: &mut [FeatureRow]) {
        attach_trailing_means(
            rows,
            &self.stats,
            &self.windows,
            |record, venue, stat| record.stats(venue.opposite()).get(stat),
            conceded_column,
        );
    }
}

fn columns_for(
    stats: &[StatKind],
    windows: &[usize],
    column: fn(StatKind, Venue, usize) -> String,
) -> Vec<String> {
    let mut out = Vec::with_capacity(stats.len() * windows.len() * 2);
    for &stat in stats {
        for &w in windows {
            out.push(column(stat, Venue::Home, w));
            out.push(column(stat, Venue::Away, w));
        }
    }
    out
}

struct Appearance {
    row: usize,
    venue: Venue,
    date: NaiveDate,
}

fn attach_trailing_means<F>(
    rows: &mut [FeatureRow],
    stats: &[StatKind],
    windows: &[usize],
    value_of: F,
    column: fn(StatKind, Venue, usize) -> String,
) where
    F: Fn(&MatchRecord, Venue, StatKind) -> Option<f64>,
{
    // Long format: one appearance per team per fixture.
    let mut by_team: HashMap<String, Vec<Appearance>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        for venue in [Venue::Home, Venue::Away] {
            by_team
                .entry(row.record.team(venue).to_string())
                .or_default()
                .push(Appearance {
                    row: idx,
                    venue,
                    date: row.record.date,
                });
        }
    }

    for appearances in by_team.values_mut() {
        appearances.sort_by_key(|a| a.date);

        for &stat in stats {
            let values: Vec<Option<f64>> = appearances
                .iter()
                .map(|a| value_of(&rows[a.row].record, a.venue, stat))
                .collect();

            for &w in windows {
                let means = trailing_means(appearances, &values, w);
                for (a, mean) in appearances.iter().zip(means) {
                    rows[a.row].set(column(stat, a.venue, w), mean);
                }
            }
        }
    }
}

/// Mean of the non-null values among the `window` appearances dated strictly
/// before each appearance. `None` when there is nothing to average.
fn trailing_means(appearances: &[Appearance], values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(appearances.len());
    let mut day_start = 0usize;
    for i in 0..appearances.len() {
        if i > 0 && appearances[i].date != appearances[i - 1].date {
            day_start = i;
        }
        let from = day_start.saturating_sub(window);
        let (sum, n) = values[from..day_start]
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        out.push(if n > 0 { Some(sum / n as f64) } else { None });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Season, SideStats};

    fn fixture(day: u32, home: &str, away: &str, xg_home: Option<f64>, xg_away: Option<f64>) -> FeatureRow {
        FeatureRow::new(MatchRecord {
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            time: None,
            competition: "Test".to_string(),
            season: Season::new(2024),
            round: None,
            home_team: home.to_string(),
            away_team: away.to_string(),
            home: SideStats {
                xg: xg_home,
                ..Default::default()
            },
            away: SideStats {
                xg: xg_away,
                ..Default::default()
            },
            result_home: None,
        })
    }

    #[test]
    fn window_of_one_uses_previous_match_any_venue() {
        let mut rows = vec![
            fixture(1, "A", "B", Some(2.0), Some(1.0)),
            fixture(2, "B", "A", Some(3.0), Some(4.0)),
        ];
        RollingFormCalculator::new(vec![StatKind::ExpectedGoals], vec![1]).apply(&mut rows);

        assert_eq!(rows[1].get("xg_away_roll1"), Some(2.0));
        assert_eq!(rows[1].get("xg_home_roll1"), Some(1.0));
        assert_eq!(rows[0].get("xg_home_roll1"), None);
        assert_eq!(rows[0].get("xg_away_roll1"), None);
    }

    #[test]
    fn conceded_form_swaps_perspective() {
        let mut rows = vec![
            fixture(1, "A", "B", Some(2.0), Some(1.0)),
            fixture(2, "B", "A", Some(3.0), Some(4.0)),
        ];
        ConcededFormCalculator::new(vec![StatKind::ExpectedGoals], vec![1]).apply(&mut rows);

        // B conceded A's 2.0 on day 1, A conceded B's 1.0.
        assert_eq!(rows[1].get("xg_conceded_home_roll1"), Some(2.0));
        assert_eq!(rows[1].get("xg_conceded_away_roll1"), Some(1.0));
        assert_eq!(rows[0].get("xg_conceded_home_roll1"), None);
    }

    #[test]
    fn own_match_never_leaks_into_its_feature() {
        let mut rows = vec![
            fixture(1, "A", "B", Some(1.0), Some(0.0)),
            fixture(2, "A", "C", Some(9.0), Some(0.0)),
        ];
        RollingFormCalculator::new(vec![StatKind::ExpectedGoals], vec![5]).apply(&mut rows);
        assert_eq!(rows[1].get("xg_home_roll5"), Some(1.0));
    }

    #[test]
    fn same_day_duplicates_do_not_see_each_other() {
        // Input order reversed on purpose; only dates matter.
        let mut rows = vec![
            fixture(3, "A", "C", Some(5.0), Some(0.0)),
            fixture(3, "A", "D", Some(7.0), Some(0.0)),
            fixture(1, "A", "B", Some(1.0), Some(0.0)),
        ];
        RollingFormCalculator::new(vec![StatKind::ExpectedGoals], vec![3]).apply(&mut rows);
        assert_eq!(rows[0].get("xg_home_roll3"), Some(1.0));
        assert_eq!(rows[1].get("xg_home_roll3"), Some(1.0));
        assert_eq!(rows[2].get("xg_home_roll3"), None);
    }

    #[test]
    fn window_truncates_older_matches() {
        let mut rows = vec![
            fixture(1, "A", "B", Some(3.0), None),
            fixture(2, "A", "C", Some(1.0), None),
            fixture(3, "A", "D", Some(2.0), None),
            fixture(4, "A", "E", None, None),
        ];
        RollingFormCalculator::new(vec![StatKind::ExpectedGoals], vec![2]).apply(&mut rows);
        assert_eq!(rows[3].get("xg_home_roll2"), Some(1.5));
    }

    #[test]
    fn missing_values_in_window_are_skipped() {
        let mut rows = vec![
            fixture(1, "A", "B", Some(2.0), None),
            fixture(2, "A", "C", None, None),
            fixture(3, "A", "D", None, None),
        ];
        RollingFormCalculator::new(vec![StatKind::ExpectedGoals], vec![2]).apply(&mut rows);
        assert_eq!(rows[2].get("xg_home_roll2"), Some(2.0));
    }

    #[test]
    fn column_names_cover_both_sides() {
        let calc = RollingFormCalculator::new(vec![StatKind::GoalsFor], vec![5, 10]);
        assert_eq!(
            calc.columns(),
            vec!["gf_home_roll5", "gf_away_roll5", "gf_home_roll10", "gf_away_roll10"]
        );
    }
}
