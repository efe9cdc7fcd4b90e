use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use xgforge::config::{load_league_config, ForecastConfig, LeagueConfig, SimulationConfig};
use xgforge::db::{self, create_pool};
use xgforge::models::{FeatureRow, FixtureProbabilities, MatchRecord, Season};
use xgforge::services::{
    price_markets, train_competitions, upcoming_fixtures, FeaturePipeline, MatchLoader, ModelArtifact,
    ModelTrainer, OutcomePredictor, SeasonSimulator, DEFAULT_GOAL_LINE,
};
use xgforge::utils::{competition_key, round_to, write_csv};
use xgforge::ForecastError;

/// Matches of one league, loaded and featured.
struct LeagueData {
    league: LeagueConfig,
    records: Vec<MatchRecord>,
    rows: Vec<FeatureRow>,
}

fn data_dir() -> PathBuf {
    PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()))
}

fn leagues_path() -> PathBuf {
    PathBuf::from(env::var("LEAGUES_CONFIG").unwrap_or_else(|_| "config/leagues.json".to_string()))
}

/// `{DATA_DIR}/{key}_matches.csv` unless given explicitly.
fn matches_path(league: &str, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| data_dir().join(format!("{}_matches.csv", competition_key(league))))
}

fn promoted_path(league: &str) -> PathBuf {
    data_dir().join(format!("{}_promoted.csv", competition_key(league)))
}

fn load_league(name: &str, matches: Option<PathBuf>, cfg: &ForecastConfig) -> Result<LeagueData> {
    let league = load_league_config(&leagues_path(), name)?;
    let loader = MatchLoader::new(league.clone());
    let path = matches_path(name, matches);
    let records = loader
        .load_matches(&path)
        .with_context(|| format!("reading matches for {} from {}", name, path.display()))?;

    let known: BTreeSet<String> = records
        .iter()
        .flat_map(|r| [r.home_team.clone(), r.away_team.clone()])
        .collect();
    let promoted = loader.load_promoted(&promoted_path(name), &known)?;

    let rows = FeaturePipeline::new(cfg).run(records.clone(), &promoted);
    Ok(LeagueData { league, records, rows })
}

/// Stored model for the league, retrained and stored again when absent or stale.
async fn artifact_for(pool: &SqlitePool, cfg: &ForecastConfig, data: &LeagueData) -> Result<ModelArtifact> {
    match db::load_artifact(pool, &data.league.name).await {
        Ok(artifact) => Ok(artifact),
        Err(e @ (ForecastError::MissingArtifact { .. } | ForecastError::SchemaVersion { .. })) => {
            tracing::warn!("{}; retraining", e);
            let artifact = ModelTrainer::new(cfg).train(&data.league.name, &data.rows)?;
            db::save_artifact(pool, &artifact).await?;
            Ok(artifact)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn build_features(league: &str, matches: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let cfg = ForecastConfig::from_env()?;
    let data = load_league(league, matches, &cfg)?;

    match output {
        Some(path) => {
            write_feature_rows(&data.rows, File::create(&path)?)?;
            println!("✅ Wrote {} featured matches to {}", data.rows.len(), path.display());
        }
        None => write_feature_rows(&data.rows, io::stdout())?,
    }
    Ok(())
}

fn write_feature_rows<W: io::Write>(rows: &[FeatureRow], writer: W) -> Result<()> {
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.features.keys().map(String::as_str))
        .collect();
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["date", "season", "round", "home_team", "away_team", "result_home"];
    header.extend(columns.iter().copied());
    wtr.write_record(&header)?;

    for row in rows {
        let r = &row.record;
        let mut record = vec![
            r.date.to_string(),
            r.season.to_string(),
            r.round.map(|n| n.to_string()).unwrap_or_default(),
            r.home_team.clone(),
            r.away_team.clone(),
            r.outcome().map(|o| o.code().to_string()).unwrap_or_default(),
        ];
        record.extend(
            columns
                .iter()
                .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub async fn train(league: &str, matches: Option<PathBuf>) -> Result<()> {
    let cfg = ForecastConfig::from_env()?;
    let pool = create_pool().await?;
    db::init_database_with_pool(&pool).await?;
    let data = load_league(league, matches, &cfg)?;

    println!("🧮 Training goal model for {}...", league);
    let artifact = ModelTrainer::new(&cfg).train(league, &data.rows)?;
    db::save_artifact(&pool, &artifact).await?;
    print_report(&artifact);
    Ok(())
}

/// Trains every league in the leagues file in parallel. One failure does not stop the others.
pub async fn train_all() -> Result<()> {
    let cfg = ForecastConfig::from_env()?;
    let pool = create_pool().await?;
    db::init_database_with_pool(&pool).await?;

    let raw = std::fs::read_to_string(leagues_path())
        .with_context(|| format!("reading {}", leagues_path().display()))?;
    let leagues: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)?;
    let mut names: Vec<String> = leagues.into_keys().collect();
    names.sort();

    let mut datasets = Vec::new();
    for name in &names {
        match load_league(name, None, &cfg) {
            Ok(data) => datasets.push((name.clone(), data.rows)),
            Err(e) => println!("⚠️  Skipping {}: {:#}", name, e),
        }
    }

    let trainer = ModelTrainer::new(&cfg);
    let results = tokio::task::spawn_blocking(move || train_competitions(&trainer, &datasets)).await?;

    let stored = store_trained(&pool, results).await;
    println!("📦 Stored {} of {} league models", stored, names.len());
    Ok(())
}

/// Saves every successful fit; a failed fit or save is reported for that league only.
async fn store_trained(pool: &SqlitePool, results: Vec<(String, xgforge::Result<ModelArtifact>)>) -> usize {
    let mut stored = 0;
    for (name, result) in results {
        match result {
            Ok(artifact) => match db::save_artifact(pool, &artifact).await {
                Ok(()) => {
                    print_report(&artifact);
                    stored += 1;
                }
                Err(e) => println!("❌ {}: trained but not stored: {}", name, e),
            },
            Err(e) => println!("❌ {}: {}", name, e),
        }
    }
    stored
}

fn print_report(artifact: &ModelArtifact) {
    let r = &artifact.report;
    println!(
        "✅ {} model {}: {} rows, {} iterations{}, kappa home {:.3} / away {:.3}, deviance {:.3}",
        artifact.competition,
        artifact.run_id,
        r.rows,
        r.iterations,
        if r.converged { "" } else { " (not converged)" },
        r.kappa_home,
        r.kappa_away,
        r.mean_deviance
    );
}

#[derive(Serialize)]
struct PredictionOutput {
    date: String,
    time: String,
    home_team: String,
    away_team: String,
    prob_home: f64,
    prob_draw: f64,
    prob_away: f64,
    lambda_home: f64,
    lambda_away: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    btts_yes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    over: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    under: Option<f64>,
    fair_odds_home: String,
    fair_odds_draw: String,
    fair_odds_away: String,
}

pub async fn predict(league: &str, rounds: Vec<u32>, markets: bool, matches: Option<PathBuf>) -> Result<()> {
    let cfg = ForecastConfig::from_env()?;
    let pool = create_pool().await?;
    db::init_database_with_pool(&pool).await?;
    let data = load_league(league, matches, &cfg)?;

    let fixtures = upcoming_fixtures(&data.rows, &rounds);
    if fixtures.is_empty() {
        println!("📭 No upcoming fixtures found for {} in rounds {:?}", league, rounds);
        return Ok(());
    }

    let artifact = artifact_for(&pool, &cfg, &data).await?;
    let predictions = OutcomePredictor::new(cfg.max_goals).generate_predictions(&artifact, &fixtures)?;

    let mut out = Vec::with_capacity(predictions.len());
    for p in &predictions {
        let prices = price_markets(p.lambda_home, p.lambda_away, cfg.max_goals, DEFAULT_GOAL_LINE)?;
        let odds = prices.fair_odds();
        out.push(PredictionOutput {
            date: p.date.to_string(),
            time: p.time.clone().unwrap_or_default(),
            home_team: p.home_team.clone(),
            away_team: p.away_team.clone(),
            prob_home: round_to(p.prob_home, 4),
            prob_draw: round_to(p.prob_draw, 4),
            prob_away: round_to(p.prob_away, 4),
            lambda_home: round_to(p.lambda_home, 3),
            lambda_away: round_to(p.lambda_away, 3),
            btts_yes: markets.then(|| round_to(prices.btts_yes, 4)),
            over: markets.then(|| round_to(prices.over, 4)),
            under: markets.then(|| round_to(prices.under, 4)),
            fair_odds_home: odds[0].to_string(),
            fair_odds_draw: odds[1].to_string(),
            fair_odds_away: odds[2].to_string(),
        });
    }
    write_csv(&out, io::stdout())?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct SimulateArgs {
    pub trials: Option<usize>,
    pub seed: Option<u64>,
    pub top_n: Option<usize>,
    pub relegation_spots: Option<usize>,
    pub parallel: bool,
}

pub async fn simulate(
    league: &str,
    season: Option<String>,
    args: SimulateArgs,
    matches: Option<PathBuf>,
) -> Result<()> {
    let mut cfg = ForecastConfig::from_env()?;
    if let Some(t) = args.trials {
        cfg.simulation.trials = t;
    }
    if let Some(n) = args.top_n {
        cfg.simulation.top_n = n;
    }
    if let Some(r) = args.relegation_spots {
        cfg.simulation.relegation_spots = r;
    }
    cfg.simulation.seed = args.seed.or(cfg.simulation.seed);

    let pool = create_pool().await?;
    db::init_database_with_pool(&pool).await?;
    let data = load_league(league, matches, &cfg)?;

    let season = match season {
        Some(s) => Season::parse(&s)?,
        None => data
            .records
            .iter()
            .map(|r| r.season)
            .max()
            .ok_or_else(|| anyhow!("no matches loaded for {}", league))?,
    };
    let season_matches: Vec<MatchRecord> = data.records.iter().filter(|r| r.season == season).cloned().collect();
    let fixtures: Vec<&FeatureRow> = data
        .rows
        .iter()
        .filter(|r| r.record.season == season && !r.record.is_played())
        .collect();

    let predictions: Vec<FixtureProbabilities> = if fixtures.is_empty() {
        Vec::new()
    } else {
        let artifact = artifact_for(&pool, &cfg, &data).await?;
        OutcomePredictor::new(cfg.max_goals)
            .generate_predictions(&artifact, &fixtures)?
            .iter()
            .map(FixtureProbabilities::from)
            .collect()
    };

    tracing::info!(
        "🎲 Simulating {} {} ({} fixtures left, {} trials)",
        league,
        season,
        fixtures.len(),
        cfg.simulation.trials
    );
    simulation_table(&cfg.simulation, &season_matches, &predictions, args.parallel, io::stdout())
}

/// Runs the simulation and writes only the CSV table to `out`.
fn simulation_table<W: io::Write>(
    sim: &SimulationConfig,
    matches: &[MatchRecord],
    predictions: &[FixtureProbabilities],
    parallel: bool,
    out: W,
) -> Result<()> {
    let simulator = SeasonSimulator::new(sim);
    let rows = match (parallel, sim.seed) {
        (true, Some(seed)) => simulator.run_parallel(matches, predictions, seed),
        (true, None) => simulator.run_parallel(matches, predictions, rand::random()),
        (false, seed) => simulator.run_seeded(matches, predictions, seed),
    };
    write_csv(&rows, out)?;
    Ok(())
}

pub async fn list_models() -> Result<()> {
    let pool = create_pool().await?;
    db::init_database_with_pool(&pool).await?;
    let models = db::list_artifacts(&pool).await?;
    if models.is_empty() {
        println!("📭 No trained models. Train one with: xgforge train --league \"Premier League\"");
        return Ok(());
    }
    for (competition, run_id, trained_at) in models {
        println!("{} | {} | {}", competition, run_id, trained_at);
    }
    Ok(())
}
