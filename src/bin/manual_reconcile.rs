// Small ops utility: run one reconciliation pass against a database file and print the result.
//
// Usage:
//   cargo run --bin manual_reconcile -- [db_path]
//
// Uses the same engine and single-flight guard as the periodic trigger; does not start the scheduler.

use anyhow::anyhow;
use weight_summary::app::{get_default_db_path, AppState};

fn main() -> anyhow::Result<()> {
    weight_summary::logging::init();

    let db_path = std::env::args()
        .nth(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);

    let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;
    let result = state.weight_summary_api.reconcile()?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
