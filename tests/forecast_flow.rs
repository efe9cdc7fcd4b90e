use chrono::NaiveDate;
use std::fmt::Write as _;

use xgforge::config::{ForecastConfig, LeagueConfig, SimulationConfig};
use xgforge::models::{FixtureProbabilities, MatchRecord, OutcomeProbabilities, Season, SideStats};
use xgforge::services::predictor::TRUNCATION_EPSILON;
use xgforge::services::{
    upcoming_fixtures, FeaturePipeline, MatchLoader, ModelArtifact, ModelTrainer, OutcomePredictor,
    PromotedPerformance, SeasonSimulator,
};

const TEAMS: [&str; 4] = ["Arsenal", "Brentford", "Chelsea", "Everton"];
const ATTACK: [f64; 4] = [2.4, 1.6, 1.1, 0.6];
const CYCLES: u32 = 8;

/// Double round robins of four teams; the last cycle has no scores yet.
fn season_csv() -> String {
    let mut csv = String::from("date,season,round,home_team,away_team,gf_home,gf_away,xg_home,xg_away\n");
    let mut date = NaiveDate::from_ymd_opt(2024, 8, 17).unwrap();
    for cycle in 0..CYCLES {
        for (h, home) in TEAMS.iter().enumerate() {
            for (a, away) in TEAMS.iter().enumerate() {
                if h == a {
                    continue;
                }
                if cycle + 1 == CYCLES {
                    writeln!(csv, "{date},2024-2025,Matchweek {},{home},{away},,,,", cycle + 1).unwrap();
                } else {
                    let hg = (ATTACK[h] + 0.3 + (cycle % 3) as f64 * 0.4).floor();
                    let ag = (ATTACK[a] + ((cycle as usize + h) % 2) as f64 * 0.6).floor();
                    writeln!(
                        csv,
                        "{date},2024-2025,Matchweek {},{home},{away},{hg},{ag},{:.2},{:.2}",
                        cycle + 1,
                        hg * 0.85 + 0.2,
                        ag * 0.85 + 0.2
                    )
                    .unwrap();
                }
                date = date.succ_opt().unwrap();
            }
        }
    }
    csv
}

fn load() -> Vec<MatchRecord> {
    let loader = MatchLoader::new(LeagueConfig::named("Premier League"));
    loader.read_matches(season_csv().as_bytes()).unwrap()
}

#[test]
fn loads_featurises_trains_and_predicts() {
    let cfg = ForecastConfig::default();
    let records = load();
    assert_eq!(records.len(), (CYCLES as usize) * 12);
    assert_eq!(records.iter().filter(|r| !r.is_played()).count(), 12);

    let rows = FeaturePipeline::new(&cfg).run(records, &PromotedPerformance::new());
    let artifact = ModelTrainer::new(&cfg).train("Premier League", &rows).unwrap();

    let fixtures = upcoming_fixtures(&rows, &[CYCLES]);
    assert_eq!(fixtures.len(), 12);

    let predictions = OutcomePredictor::new(cfg.max_goals)
        .generate_predictions(&artifact, &fixtures)
        .unwrap();
    for p in &predictions {
        let total = p.prob_home + p.prob_draw + p.prob_away;
        assert!(total <= 1.0 + 1e-12 && total >= 1.0 - TRUNCATION_EPSILON, "{total}");
        assert!(p.lambda_home > 0.0 && p.lambda_away > 0.0);
    }

    let strongest = predictions
        .iter()
        .find(|p| p.home_team == "Arsenal" && p.away_team == "Everton")
        .unwrap();
    assert!(strongest.prob_home > strongest.prob_away);
}

#[test]
fn stored_artifact_predicts_identically() {
    let cfg = ForecastConfig::default();
    let rows = FeaturePipeline::new(&cfg).run(load(), &PromotedPerformance::new());
    let artifact = ModelTrainer::new(&cfg).train("Premier League", &rows).unwrap();

    let json = serde_json::to_string(&artifact).unwrap();
    let restored: ModelArtifact = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, artifact);

    let fixtures = upcoming_fixtures(&rows, &[]);
    let predictor = OutcomePredictor::new(cfg.max_goals);
    assert_eq!(
        predictor.generate_predictions(&artifact, &fixtures).unwrap(),
        predictor.generate_predictions(&restored, &fixtures).unwrap()
    );
}

#[test]
fn simulated_table_is_a_distribution() {
    let cfg = ForecastConfig::default();
    let records = load();
    let rows = FeaturePipeline::new(&cfg).run(records.clone(), &PromotedPerformance::new());
    let artifact = ModelTrainer::new(&cfg).train("Premier League", &rows).unwrap();
    let fixtures = upcoming_fixtures(&rows, &[]);
    let predictions: Vec<FixtureProbabilities> = OutcomePredictor::new(cfg.max_goals)
        .generate_predictions(&artifact, &fixtures)
        .unwrap()
        .iter()
        .map(FixtureProbabilities::from)
        .collect();

    let sim = SeasonSimulator::new(&SimulationConfig {
        trials: 2_000,
        top_n: 2,
        relegation_spots: 1,
        seed: Some(11),
    });
    let table = sim.run_seeded(&records, &predictions, Some(11));

    assert_eq!(table.len(), TEAMS.len());
    let sum = |f: fn(&xgforge::models::SimulationRow) -> f64| table.iter().map(f).sum::<f64>();
    assert!((sum(|r| r.p_champion) - 1.0).abs() < 1e-9);
    assert!((sum(|r| r.p_top_n) - 2.0).abs() < 1e-9);
    assert!((sum(|r| r.p_relegation) - 1.0).abs() < 1e-9);
    assert!(table.windows(2).all(|w| w[0].p_champion >= w[1].p_champion));
    assert_eq!(table[0].team, "Arsenal");
}

fn played(day: u32, home: &str, away: &str, hg: f64, ag: f64) -> MatchRecord {
    MatchRecord {
        date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
        time: None,
        competition: "Mini".to_string(),
        season: Season::new(2024),
        round: Some(day),
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

#[test]
fn leader_out_of_reach_is_certain_champion() {
    let mut matches = vec![
        played(1, "A", "B", 2.0, 0.0),
        played(2, "B", "A", 0.0, 1.0),
        played(3, "A", "B", 3.0, 1.0),
    ];
    let mut open = played(4, "B", "A", 0.0, 0.0);
    open.home.gf = None;
    open.away.gf = None;
    matches.push(open);

    let fixture = FixtureProbabilities {
        home_team: "B".to_string(),
        away_team: "A".to_string(),
        probs: OutcomeProbabilities {
            home: 0.6,
            draw: 0.25,
            away: 0.15,
        },
    };
    let sim = SeasonSimulator::new(&SimulationConfig {
        trials: 5_000,
        top_n: 1,
        relegation_spots: 1,
        seed: None,
    });
    let table = sim.run_parallel(&matches, &[fixture], 3);

    assert_eq!(table[0].team, "A");
    assert_eq!(table[0].p_champion, 1.0);
    assert_eq!(table[1].p_champion, 0.0);
    assert_eq!(table[1].p_relegation, 1.0);
}
