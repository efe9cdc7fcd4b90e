use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::env;
use std::str::FromStr;

use crate::error::{ForecastError, Result};
use crate::services::feature_schema::FEATURE_SCHEMA_VERSION;
use crate::services::model_trainer::ModelArtifact;
use crate::utils::competition_key;

pub async fn create_pool() -> Result<SqlitePool> {
    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/xgforge.db".to_string());
    create_pool_with_url(&database_url).await
}

pub async fn create_pool_with_url(database_url: &str) -> Result<SqlitePool> {
    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if let Some(parent) = std::path::Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database() -> Result<()> {
    let pool = create_pool().await?;
    init_database_with_pool(&pool).await
}

pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_artifacts (
            competition_key TEXT PRIMARY KEY,
            competition TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            artifact_json TEXT NOT NULL,
            trained_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

// Artifact operations

/// Stores the artifact as an opaque JSON blob, replacing any earlier one for the competition.
pub async fn save_artifact(pool: &SqlitePool, artifact: &ModelArtifact) -> Result<()> {
    let json = serde_json::to_string(artifact)?;
    sqlx::query(
        r#"INSERT INTO model_artifacts (competition_key, competition, schema_version, run_id, artifact_json, trained_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(competition_key) DO UPDATE SET
               competition    = excluded.competition,
               schema_version = excluded.schema_version,
               run_id         = excluded.run_id,
               artifact_json  = excluded.artifact_json,
               trained_at     = excluded.trained_at"#,
    )
    .bind(competition_key(&artifact.competition))
    .bind(&artifact.competition)
    .bind(artifact.schema.version as i64)
    .bind(artifact.run_id.to_string())
    .bind(&json)
    .bind(artifact.trained_at.to_rfc3339())
    .execute(pool)
    .await?;

    tracing::info!(
        "Stored model {} for {}",
        artifact.run_id,
        competition_key(&artifact.competition)
    );
    Ok(())
}

/// `MissingArtifact` and `SchemaVersion` both mean "retrain"; callers treat them alike.
pub async fn load_artifact(pool: &SqlitePool, competition: &str) -> Result<ModelArtifact> {
    let key = competition_key(competition);
    let row = sqlx::query("SELECT schema_version, artifact_json FROM model_artifacts WHERE competition_key = ?")
        .bind(&key)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(ForecastError::MissingArtifact { competition: key });
    };

    let version: i64 = row.get("schema_version");
    if version != FEATURE_SCHEMA_VERSION as i64 {
        return Err(ForecastError::SchemaVersion {
            found: version as u32,
            expected: FEATURE_SCHEMA_VERSION,
        });
    }
    let json: String = row.get("artifact_json");
    let artifact: ModelArtifact = serde_json::from_str(&json)?;
    artifact.schema.ensure_current()?;
    Ok(artifact)
}

/// (competition, run id, trained at) of every stored model, by key.
pub async fn list_artifacts(pool: &SqlitePool) -> Result<Vec<(String, String, String)>> {
    let rows = sqlx::query("SELECT competition, run_id, trained_at FROM model_artifacts ORDER BY competition_key")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get("competition"), r.get("run_id"), r.get("trained_at")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::feature_schema::{FeatureSchema, FeatureSlot};
    use crate::services::model_trainer::TrainingReport;
    use crate::services::poisson_regression::{PoissonFit, StandardScaler};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn artifact(competition: &str) -> ModelArtifact {
        let teams: BTreeSet<String> = ["A", "B"].iter().map(|t| t.to_string()).collect();
        let schema = FeatureSchema::build(
            vec![FeatureSlot::numeric("gf_roll5", "gf_home_roll5", "gf_away_roll5")],
            &teams,
        );
        let width = schema.len();
        ModelArtifact {
            run_id: Uuid::new_v4(),
            competition: competition.to_string(),
            trained_at: Utc::now(),
            schema,
            scaler: StandardScaler {
                mean: vec![0.5; width],
                scale: vec![1.5; width],
            },
            model: PoissonFit {
                coefficients: vec![0.1; width],
                intercept: 0.2,
                iterations: 4,
                converged: true,
            },
            report: TrainingReport {
                rows: 40,
                zero_filled_rows: 2,
                iterations: 4,
                converged: true,
                kappa_home: 1.01,
                kappa_away: 0.99,
                mean_deviance: 1.1,
            },
        }
    }

    async fn pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("models/test.db").display());
        let pool = create_pool_with_url(&url).await.unwrap();
        init_database_with_pool(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn missing_artifact_is_recoverable() {
        let (_dir, pool) = pool().await;
        match load_artifact(&pool, "Serie A").await {
            Err(ForecastError::MissingArtifact { competition }) => assert_eq!(competition, "serie_a"),
            other => panic!("expected MissingArtifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (_dir, pool) = pool().await;
        let stored = artifact("Premier League");
        save_artifact(&pool, &stored).await.unwrap();

        let loaded = load_artifact(&pool, "premier league").await.unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(list_artifacts(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_replaces_previous_model() {
        let (_dir, pool) = pool().await;
        save_artifact(&pool, &artifact("La Liga")).await.unwrap();
        let newer = artifact("La Liga");
        save_artifact(&pool, &newer).await.unwrap();

        assert_eq!(load_artifact(&pool, "La Liga").await.unwrap().run_id, newer.run_id);
        assert_eq!(list_artifacts(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_schema_asks_for_retraining() {
        let (_dir, pool) = pool().await;
        save_artifact(&pool, &artifact("Ligue 1")).await.unwrap();
        sqlx::query("UPDATE model_artifacts SET schema_version = 0")
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            load_artifact(&pool, "Ligue 1").await,
            Err(ForecastError::SchemaVersion { found: 0, .. })
        ));
    }
}
