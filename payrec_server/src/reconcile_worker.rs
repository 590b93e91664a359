use std::sync::Arc;

use chrono::Duration;
use log::*;
use payrec_engine::{events::EventBus, IdempotencyStore, RefundFlowApi, SqliteDatabase};
use tokio::task::JoinHandle;

use crate::integrations::LiveGateway;

/// Starts the reconciliation worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Each pass re-queries the gateway for refunds that have sat in PENDING or PROCESSING for longer than
/// `stale_after`, adopting the gateway's answer either way, and then reaps expired webhook dedup markers.
pub fn start_reconcile_worker(
    db: SqliteDatabase,
    gateway: LiveGateway,
    bus: Arc<dyn EventBus>,
    interval: Duration,
    stale_after: Duration,
    max_retries: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(interval.num_seconds().max(1) as u64);
        let mut timer = tokio::time::interval(period);
        let api = RefundFlowApi::new(db.clone(), gateway, bus).with_max_retries(max_retries);
        info!("🕰️ Refund reconciliation worker started. Interval: {}s", period.as_secs());
        loop {
            timer.tick().await;
            trace!("🕰️ Running refund reconciliation pass");
            match api.reconcile_stale_refunds(stale_after).await {
                Ok(report) if report.examined > 0 => info!("🕰️ Reconciliation pass complete. {report}"),
                Ok(_) => debug!("🕰️ Reconciliation pass complete. No stale refunds"),
                Err(e) => error!("🕰️ Error running refund reconciliation pass: {e}"),
            }
            match db.purge_expired().await {
                Ok(0) => {},
                Ok(n) => info!("🕰️ Purged {n} expired webhook event markers"),
                Err(e) => error!("🕰️ Error purging expired webhook event markers: {e}"),
            }
        }
    })
}
