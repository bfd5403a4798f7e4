//! Daily ledger sweep
//!
//! Marks overdue loan charges and, when a late payment penalty amount is
//! configured, penalizes loans that are behind. Safe to run repeatedly.
//!
//! Usage: `ledger-sweep [config.toml]`

use anyhow::Context;
use chama_ledger::{Config, Ledger};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => Config::from_env().context("failed to load config from environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = ?config.data_dir,
        storage = ?config.storage,
        "Starting ledger sweep"
    );

    let late_penalty = config.penalties.late_payment_amount;
    let ledger = Ledger::open(config).context("failed to open ledger")?;

    let sweep = ledger.loans().sweep_overdue()?;
    tracing::info!(
        loans_checked = sweep.loans_checked,
        charges_marked = sweep.charges_marked,
        loans_affected = sweep.loans_affected.len(),
        "Overdue sweep finished"
    );

    match late_penalty {
        Some(amount) => {
            let applied = ledger.penalties().sweep_late_payments(amount)?;
            tracing::info!(
                penalties_applied = applied.len(),
                amount = %amount,
                "Late payment sweep finished"
            );
        }
        None => tracing::info!("No late payment penalty configured, skipping"),
    }

    Ok(())
}
