//! Expiry sweep: the background pass that resolves lapsed verification
//! windows
//!
//! One tick per configured interval, two independent passes: a one-time
//! warning for transactions near expiry, and auto-confirmation of those past
//! it. Neither pass holds a cross-transaction lock; safety comes from the
//! per-row status guard in the escrow service, so a buyer confirm racing the
//! sweep simply wins or loses that guard.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::ApiResult;

use super::EscrowService;

/// Sweep timing, taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub interval_seconds: u64,
    pub warning_lookahead_minutes: i64,
}

/// Run the expiry sweep forever. Spawned once per process; the warned-set
/// idempotency assumes a single sweep instance.
pub async fn expiry_sweep(escrow_service: Arc<EscrowService>, config: SweepConfig) {
    tracing::info!(
        interval_seconds = config.interval_seconds,
        lookahead_minutes = config.warning_lookahead_minutes,
        "Starting expiry sweep"
    );

    // In-process record of transactions already warned this instance.
    // Entries are evicted once a transaction leaves the expiring window
    // (resolved or lapsed), bounding memory.
    let mut warned: HashSet<Uuid> = HashSet::new();

    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if let Err(e) =
            sweep_tick(&escrow_service, config.warning_lookahead_minutes, &mut warned).await
        {
            tracing::error!(error = %e, "Sweep tick failed");
        }
    }
}

/// One sweep iteration: warning pass, then auto-resolve pass. The caller
/// owns the warned set so repeated ticks stay idempotent.
pub async fn sweep_tick(
    escrow_service: &EscrowService,
    warning_lookahead_minutes: i64,
    warned: &mut HashSet<Uuid>,
) -> ApiResult<()> {
    warning_pass(escrow_service, warned, warning_lookahead_minutes).await?;
    auto_resolve_pass(escrow_service).await?;
    Ok(())
}

/// Emit a one-time "time running out" notification for each holding
/// transaction whose window ends within the lookahead.
async fn warning_pass(
    escrow_service: &EscrowService,
    warned: &mut HashSet<Uuid>,
    lookahead_minutes: i64,
) -> ApiResult<()> {
    let expiring = escrow_service
        .holding_expiring_within(lookahead_minutes)
        .await?;

    for tx in &expiring {
        if warned.insert(tx.id) {
            escrow_service.warn_expiring(tx).await;
            tracing::info!(transaction_id = %tx.id, "Expiry warning sent");
        }
    }

    // Evict ids no longer in the window.
    let current: HashSet<Uuid> = expiring.iter().map(|tx| tx.id).collect();
    warned.retain(|id| current.contains(id));

    Ok(())
}

/// Auto-confirm every holding transaction past its deadline. One failing
/// transaction never blocks the rest of the batch.
async fn auto_resolve_pass(escrow_service: &EscrowService) -> ApiResult<()> {
    let expired = escrow_service.holding_expired().await?;

    for tx in expired {
        match escrow_service.auto_confirm(tx.id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Lost the race to a concurrent buyer action; nothing to do.
            }
            Err(e) => {
                tracing::error!(
                    transaction_id = %tx.id,
                    error = %e,
                    "Failed to auto-confirm expired transaction"
                );
            }
        }
    }

    Ok(())
}
