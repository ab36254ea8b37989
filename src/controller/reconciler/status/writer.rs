//! Conflict-safe status persistence.

use super::conditions::StatusUpdate;
use crate::constants::{STATUS_CONFLICT_RETRY_MS, STATUS_UPDATE_ATTEMPTS};
use crate::crd::AssistantConfig;
use crate::observability::metrics;
use crate::store::{Store, StoreError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    Written,
    /// Computed status equals the persisted one; nothing was sent
    Unchanged,
    /// The `AssistantConfig` is gone
    Gone,
}

/// Persist `update` onto the `AssistantConfig` named `name`.
///
/// Every attempt re-reads the object and re-applies the update, so a conflict
/// never overwrites a newer status with a stale one.
pub async fn write_status(
    store: &Store,
    name: &str,
    update: &StatusUpdate,
) -> Result<StatusWrite, StoreError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut current) = store.get::<AssistantConfig>(None, name).await? else {
            debug!(resource.name = name, "AssistantConfig gone, skipping status write");
            return Ok(StatusWrite::Gone);
        };
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let next = update.apply(&current.status.clone().unwrap_or_default(), &now);
        if current.status.as_ref() == Some(&next) {
            debug!(resource.name = name, "Status unchanged");
            return Ok(StatusWrite::Unchanged);
        }
        let overall = next.overall_status;
        current.status = Some(next);

        match store.replace_status(&current).await {
            Ok(_) => {
                info!(resource.name = name, overall_status = ?overall, "📝 Status updated");
                return Ok(StatusWrite::Written);
            }
            Err(e) if e.is_not_found() => return Ok(StatusWrite::Gone),
            Err(e) if e.is_conflict() && attempt < STATUS_UPDATE_ATTEMPTS => {
                metrics::increment_status_conflicts();
                warn!(
                    resource.name = name,
                    attempt, "Conflict writing status, re-reading and retrying"
                );
                tokio::time::sleep(Duration::from_millis(
                    STATUS_CONFLICT_RETRY_MS * u64::from(attempt),
                ))
                .await;
            }
            Err(e) => {
                if e.is_conflict() {
                    metrics::increment_status_conflicts();
                }
                return Err(e);
            }
        }
    }
}
