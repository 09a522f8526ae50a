//! Prometheus gauges for consensus progress.
//!
//! All updates are advisory: registration failures are swallowed and a
//! metric update can never fail a state transition.

use prometheus::Gauge;
use std::sync::OnceLock;

static HEIGHT: OnceLock<Option<Gauge>> = OnceLock::new();
static ROUND: OnceLock<Option<Gauge>> = OnceLock::new();
static BLOCK_INTERVAL: OnceLock<Option<Gauge>> = OnceLock::new();
static DURATION: OnceLock<Option<Gauge>> = OnceLock::new();

fn gauge(cell: &'static OnceLock<Option<Gauge>>, name: &str, help: &str) -> Option<&'static Gauge> {
    cell.get_or_init(|| prometheus::register_gauge!(name, help).ok())
        .as_ref()
}

/// Sets the current consensus height.
pub(crate) fn set_height(height: u64) {
    if let Some(g) = gauge(&HEIGHT, "rolldpos_consensus_height", "Consensus height") {
        g.set(height as f64);
    }
}

/// Sets the current round number.
pub(crate) fn set_round(round: u32) {
    if let Some(g) = gauge(&ROUND, "rolldpos_consensus_round", "Consensus round") {
        g.set(f64::from(round));
    }
}

/// Sets the observed interval between the last two committed blocks.
pub(crate) fn set_block_interval_ms(interval_ms: u64) {
    if let Some(g) = gauge(
        &BLOCK_INTERVAL,
        "rolldpos_consensus_block_interval",
        "Observed block interval in milliseconds",
    ) {
        g.set(interval_ms as f64);
    }
}

/// Sets the elapsed time from round start to commit.
pub(crate) fn set_consensus_duration_ms(duration_ms: u64) {
    if let Some(g) = gauge(
        &DURATION,
        "rolldpos_consensus_elapse_time",
        "Elapsed consensus time in milliseconds",
    ) {
        g.set(duration_ms as f64);
    }
}
