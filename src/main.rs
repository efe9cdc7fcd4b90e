mod cli;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use xgforge::db;

#[derive(Parser)]
#[command(name = "xgforge")]
#[command(about = "Football match forecasting and season simulation from expected-goals form")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LeagueArgs {
    /// League name as it appears in the leagues config
    #[arg(short, long)]
    league: String,
    /// Match CSV; defaults to $DATA_DIR/<league_key>_matches.csv
    #[arg(short, long)]
    matches: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build rolling and season features and write them as CSV
    Features {
        #[command(flatten)]
        source: LeagueArgs,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Train and store the goal model for one league
    Train {
        #[command(flatten)]
        source: LeagueArgs,
    },
    /// Train every league in the leagues config
    TrainAll,
    /// Outcome probabilities for upcoming fixtures
    Predict {
        #[command(flatten)]
        source: LeagueArgs,
        /// Rounds to predict; all unplayed fixtures when omitted
        #[arg(short, long)]
        round: Vec<u32>,
        /// Add both-teams-to-score and over/under columns
        #[arg(long)]
        markets: bool,
    },
    /// Monte Carlo simulation of the rest of a season
    Simulate {
        #[command(flatten)]
        source: LeagueArgs,
        /// Season as YYYY-YYYY; the latest in the data when omitted
        #[arg(short, long)]
        season: Option<String>,
        #[arg(short, long)]
        trials: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        relegation_spots: Option<usize>,
        /// Spread trials over all cores
        #[arg(long)]
        parallel: bool,
    },
    /// List stored models
    Models,
    /// Initialize the database
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Logs go to stderr so CSV output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Features { source, output } => {
            tracing::info!("Building features for {}", source.league);
            cli::build_features(&source.league, source.matches, output).await?;
        }
        Commands::Train { source } => {
            tracing::info!("Training model for {}", source.league);
            cli::train(&source.league, source.matches).await?;
        }
        Commands::TrainAll => {
            tracing::info!("Training all leagues...");
            cli::train_all().await?;
        }
        Commands::Predict {
            source,
            round,
            markets,
        } => {
            tracing::info!("Generating predictions for {}", source.league);
            cli::predict(&source.league, round, markets, source.matches).await?;
        }
        Commands::Simulate {
            source,
            season,
            trials,
            seed,
            top_n,
            relegation_spots,
            parallel,
        } => {
            tracing::info!("Simulating season for {}", source.league);
            let args = cli::SimulateArgs {
                trials,
                seed,
                top_n,
                relegation_spots,
                parallel,
            };
            cli::simulate(&source.league, season, args, source.matches).await?;
        }
        Commands::Models => {
            cli::list_models().await?;
        }
        Commands::InitDb => {
            tracing::info!("Initializing database...");
            db::init_database().await?;
        }
    }

    Ok(())
}
