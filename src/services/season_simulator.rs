use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

use crate::config::SimulationConfig;
use crate::models::{FixtureProbabilities, MatchOutcome, MatchRecord, OutcomeProbabilities, SimulationRow};

/// Upper bound of the per-trial tie-break jitter. Below one point, so it only reorders equal totals.
const JITTER: f64 = 1e-6;
/// Trials per independent random stream in parallel runs.
const BLOCK_TRIALS: usize = 1024;

/// Monte Carlo projection of final standings from the remaining fixtures.
#[derive(Debug, Clone)]
pub struct SeasonSimulator {
    trials: usize,
    top_n: usize,
    relegation_spots: usize,
}

enum OutcomeDraw {
    Weighted(WeightedIndex<f64>),
    Uniform,
}

impl OutcomeDraw {
    fn sample<R: Rng>(&self, rng: &mut R) -> MatchOutcome {
        let index = match self {
            OutcomeDraw::Weighted(w) => w.sample(rng),
            OutcomeDraw::Uniform => rng.gen_range(0..3),
        };
        match index {
            0 => MatchOutcome::HomeWin,
            1 => MatchOutcome::Draw,
            _ => MatchOutcome::AwayWin,
        }
    }
}

struct Fixture {
    home: usize,
    away: usize,
    outcome: OutcomeDraw,
}

/// Immutable state shared by every trial of a run.
struct Prepared {
    teams: Vec<String>,
    base: Vec<u32>,
    fixtures: Vec<Fixture>,
}

#[derive(Debug, Clone, PartialEq)]
struct Tally {
    champion: Vec<u64>,
    top_n: Vec<u64>,
    relegated: Vec<u64>,
    trials: u64,
}

impl Tally {
    fn new(teams: usize) -> Self {
        Self {
            champion: vec![0; teams],
            top_n: vec![0; teams],
            relegated: vec![0; teams],
            trials: 0,
        }
    }

    fn merge(mut self, other: Tally) -> Tally {
        for (a, b) in self.champion.iter_mut().zip(other.champion) {
            *a += b;
        }
        for (a, b) in self.top_n.iter_mut().zip(other.top_n) {
            *a += b;
        }
        for (a, b) in self.relegated.iter_mut().zip(other.relegated) {
            *a += b;
        }
        self.trials += other.trials;
        self
    }
}

impl SeasonSimulator {
    pub fn new(cfg: &SimulationConfig) -> Self {
        Self {
            trials: cfg.trials.max(1),
            top_n: cfg.top_n,
            relegation_spots: cfg.relegation_spots,
        }
    }

    /// Points already banked from matches with a known result, for every team in `matches`.
    pub fn secured_points(matches: &[MatchRecord]) -> BTreeMap<String, u32> {
        let mut table = BTreeMap::new();
        for m in matches {
            let (home_pts, away_pts) = m.outcome().map(|o| o.points()).unwrap_or((0, 0));
            *table.entry(m.home_team.clone()).or_insert(0) += home_pts;
            *table.entry(m.away_team.clone()).or_insert(0) += away_pts;
        }
        table
    }

    /// Seeded run on one generator. `None` draws the seed from the OS.
    pub fn run_seeded(
        &self,
        matches: &[MatchRecord],
        predictions: &[FixtureProbabilities],
        seed: Option<u64>,
    ) -> Vec<SimulationRow> {
        let mut rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        self.run(matches, predictions, &mut rng)
    }

    /// Sequential run drawing every trial, and its tie-break jitter, from `rng`.
    pub fn run<R: Rng>(
        &self,
        matches: &[MatchRecord],
        predictions: &[FixtureProbabilities],
        rng: &mut R,
    ) -> Vec<SimulationRow> {
        let prepared = self.prepare(matches, predictions);
        if prepared.fixtures.is_empty() {
            return self.finished_season(&prepared);
        }
        let tally = self.run_trials(&prepared, self.trials, rng);
        self.summarise(&prepared, &tally)
    }

    /// Parallel run over fixed blocks of trials. Block `b` uses stream `b` of
    /// a generator seeded with `seed`, so results do not depend on the thread count.
    pub fn run_parallel(
        &self,
        matches: &[MatchRecord],
        predictions: &[FixtureProbabilities],
        seed: u64,
    ) -> Vec<SimulationRow> {
        let prepared = self.prepare(matches, predictions);
        if prepared.fixtures.is_empty() {
            return self.finished_season(&prepared);
        }
        let blocks = (self.trials + BLOCK_TRIALS - 1) / BLOCK_TRIALS;
        let tally = (0..blocks)
            .into_par_iter()
            .map(|block| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(block as u64);
                let n = BLOCK_TRIALS.min(self.trials - block * BLOCK_TRIALS);
                self.run_trials(&prepared, n, &mut rng)
            })
            .reduce(|| Tally::new(prepared.teams.len()), Tally::merge);
        self.summarise(&prepared, &tally)
    }

    fn prepare(&self, matches: &[MatchRecord], predictions: &[FixtureProbabilities]) -> Prepared {
        let secured = Self::secured_points(matches);
        let index: HashMap<&str, usize> = secured.keys().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
        let lookup: HashMap<(&str, &str), &OutcomeProbabilities> = predictions
            .iter()
            .map(|p| ((p.home_team.as_str(), p.away_team.as_str()), &p.probs))
            .collect();

        let mut fixtures = Vec::new();
        for m in matches.iter().filter(|m| !m.is_played()) {
            let outcome = match lookup.get(&(m.home_team.as_str(), m.away_team.as_str())) {
                Some(p) => weighted(p),
                None => {
                    tracing::warn!(
                        "No prediction for {} vs {} on {}, using a uniform outcome",
                        m.home_team,
                        m.away_team,
                        m.date
                    );
                    OutcomeDraw::Uniform
                }
            };
            fixtures.push(Fixture {
                home: index[m.home_team.as_str()],
                away: index[m.away_team.as_str()],
                outcome,
            });
        }

        Prepared {
            teams: secured.keys().cloned().collect(),
            base: secured.values().copied().collect(),
            fixtures,
        }
    }

    fn run_trials<R: Rng>(&self, prepared: &Prepared, trials: usize, rng: &mut R) -> Tally {
        let n = prepared.teams.len();
        let mut tally = Tally::new(n);
        let mut points = vec![0u32; n];
        let mut order: Vec<(f64, usize)> = Vec::with_capacity(n);
        let top_n = self.top_n.min(n);
        let relegated = self.relegation_spots.min(n);

        for _ in 0..trials {
            points.copy_from_slice(&prepared.base);
            for f in &prepared.fixtures {
                let (h, a) = f.outcome.sample(rng).points();
                points[f.home] += h;
                points[f.away] += a;
            }

            order.clear();
            for (team, pts) in points.iter().enumerate() {
                order.push((*pts as f64 + rng.gen::<f64>() * JITTER, team));
            }
            order.sort_by(|a, b| b.0.total_cmp(&a.0));

            if let Some(&(_, leader)) = order.first() {
                tally.champion[leader] += 1;
            }
            for &(_, team) in &order[..top_n] {
                tally.top_n[team] += 1;
            }
            for &(_, team) in &order[n - relegated..] {
                tally.relegated[team] += 1;
            }
            tally.trials += 1;
        }
        tally
    }

    /// Nothing left to play: the current leader is champion, ties broken by name.
    fn finished_season(&self, prepared: &Prepared) -> Vec<SimulationRow> {
        let leader = prepared
            .base
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(i, _)| i);

        let mut tally = Tally::new(prepared.teams.len());
        if let Some(i) = leader {
            tally.champion[i] = 1;
        }
        tally.trials = 1;
        tracing::info!("No fixtures remaining, champion decided on secured points");
        self.summarise(prepared, &tally)
    }

    fn summarise(&self, prepared: &Prepared, tally: &Tally) -> Vec<SimulationRow> {
        let n = tally.trials.max(1) as f64;
        let mut rows: Vec<SimulationRow> = prepared
            .teams
            .iter()
            .enumerate()
            .map(|(i, team)| SimulationRow {
                team: team.clone(),
                p_champion: tally.champion[i] as f64 / n,
                p_top_n: tally.top_n[i] as f64 / n,
                p_relegation: tally.relegated[i] as f64 / n,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.p_champion
                .total_cmp(&a.p_champion)
                .then_with(|| b.p_top_n.total_cmp(&a.p_top_n))
                .then_with(|| a.p_relegation.total_cmp(&b.p_relegation))
                .then_with(|| a.team.cmp(&b.team))
        });

        tracing::info!(
            "Simulated {} trials over {} fixtures for {} teams",
            tally.trials,
            prepared.fixtures.len(),
            rows.len()
        );
        rows
    }
}

/// Non-finite, negative or all-zero probabilities fall back to a uniform draw.
fn weighted(p: &OutcomeProbabilities) -> OutcomeDraw {
    let values = [p.home, p.draw, p.away];
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return OutcomeDraw::Uniform;
    }
    WeightedIndex::new(values)
        .map(OutcomeDraw::Weighted)
        .unwrap_or(OutcomeDraw::Uniform)
}
