use serde::Serialize;
use std::io::Write;

use crate::error::Result;

/// Storage key of a competition: lower-cased, spaces replaced by underscores.
pub fn competition_key(competition: &str) -> String {
    competition.trim().to_lowercase().replace(' ', "_")
}

/// Rounds for display only; stored and simulated values keep full precision.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Validate team name format
pub fn validate_team_name(name: &str) -> bool {
    !name.trim().is_empty() && name.len() <= 100
}

/// Writes serializable rows as CSV with a header line.
pub fn write_csv<T: Serialize, W: Write>(rows: &[T], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
