//! Callsign validation pass: confirm each unvalidated `callsigns` row with
//! the lookup service, deleting the ones it does not know.

use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use qrz_client::{Lookup, QrzError, QrzSession};
use tracing::{info, warn};

use crate::store::CallsignRegistry;

#[async_trait]
pub trait CallsignLookup: Send {
    async fn lookup(&mut self, callsign: &str) -> Result<Lookup, QrzError>;
}

#[async_trait]
impl CallsignLookup for QrzSession {
    async fn lookup(&mut self, callsign: &str) -> Result<Lookup, QrzError> {
        QrzSession::lookup(self, callsign).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub checked: usize,
    pub validated: usize,
    pub deleted: usize,
    /// Lookup failed for a reason other than the callsign itself.
    pub skipped: usize,
}

impl fmt::Display for ValidationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checked, {} validated, {} deleted, {} skipped",
            self.checked, self.validated, self.deleted, self.skipped
        )
    }
}

/// Bad credentials abort the pass; any other lookup failure skips the
/// callsign so the next pass retries it.
pub async fn validate_callsigns(
    registry: &dyn CallsignRegistry,
    lookup: &mut dyn CallsignLookup,
) -> anyhow::Result<ValidationStats> {
    let pending = registry
        .unvalidated_callsigns()
        .await
        .context("listing unvalidated callsigns")?;
    info!(count = pending.len(), "Validating callsigns");

    let mut stats = ValidationStats::default();
    for callsign in &pending {
        stats.checked += 1;
        match lookup.lookup(callsign).await {
            Ok(Lookup::Valid) => {
                registry.mark_validated(callsign).await?;
                stats.validated += 1;
            }
            Ok(Lookup::Invalid(reason)) => {
                info!(callsign = %callsign, reason = %reason, "Deleting unknown callsign");
                registry.delete_callsign(callsign).await?;
                stats.deleted += 1;
            }
            Err(e @ QrzError::Login(_)) => {
                return Err(anyhow::Error::new(e).context("QRZ login rejected"));
            }
            Err(e) => {
                warn!(callsign = %callsign, error = %e, "Lookup failed, skipping");
                stats.skipped += 1;
            }
        }
    }

    info!(%stats, "Callsign validation finished");
    Ok(stats)
}
