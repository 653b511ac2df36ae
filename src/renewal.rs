use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::storage::CertificateStore;
use crate::{Certificate, Error};

/// Certificates are renewed once they are older than this
pub const DEFAULT_CERT_FRESH_DAYS: i64 = 60;

/// Upper bound accepted for the fresh window, ten years
pub const MAX_CERT_FRESH_DAYS: i64 = 3650;

/// Stored certificates issued more than `cert_fresh_days` before `now`,
/// with the time they were issued. A window too large to add to the issue
/// time keeps the certificate fresh.
pub async fn find_certificates_to_renew(
    store: &CertificateStore,
    now: DateTime<Utc>,
    cert_fresh_days: i64,
) -> Result<Vec<(Certificate, DateTime<Utc>)>, Error> {
    let mut due = Vec::new();
    for (name, valid_after) in store.list_certificates().await? {
        let fresh_before = TimeDelta::try_days(cert_fresh_days)
            .and_then(|window| valid_after.checked_add_signed(window));
        if fresh_before.map_or(true, |fresh_before| now <= fresh_before) {
            debug!(certificate = %name, %valid_after, "certificate still fresh");
            continue;
        }
        match store.get_certificate(&name).await? {
            Some(certificate) => due.push((certificate, valid_after)),
            None => debug!(certificate = %name, "certificate chain without key or config"),
        }
    }
    Ok(due)
}
