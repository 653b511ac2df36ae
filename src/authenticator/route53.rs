use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Authenticator, PendingChallenge};
use crate::Error;

const TXT_TTL: i64 = 10;
const CHANGE_POLL_INTERVAL_SEC: u64 = 5;
const CHANGE_POLL_MAX: u32 = 120;

/// DNS-01 through Route53 hosted zones given as domain -> hosted zone ID
#[derive(Clone, Debug)]
pub struct Route53Authenticator {
    client: aws_sdk_route53::Client,
    zones: HashMap<String, String>,
}

/// Parse `example.com=Z123,example.org=Z456`
pub fn parse_zones(zones: &str) -> Result<HashMap<String, String>, Error> {
    zones
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((domain, zone_id)) if !domain.is_empty() && !zone_id.is_empty() => {
                Ok((domain.trim().to_string(), zone_id.trim().to_string()))
            }
            _ => Err(Error::InvalidEnv("ROUTE53_ZONES", entry.to_string())),
        })
        .collect()
}

impl Route53Authenticator {
    pub fn new(aws_sdk_config: &aws_config::SdkConfig, zones: HashMap<String, String>) -> Self {
        let zones = zones
            .into_iter()
            .map(|(domain, zone_id)| (normalize_domain(&domain), zone_id))
            .collect();
        Self {
            client: aws_sdk_route53::Client::new(aws_sdk_config),
            zones,
        }
    }

    /// Hosted zone of the closest enclosing configured domain
    pub fn zone_id<'a>(&'a self, domain: &str) -> Option<&'a str> {
        let mut domain = normalize_domain(domain);
        loop {
            if let Some(zone_id) = self.zones.get(&domain) {
                return Some(zone_id.as_str());
            }
            match domain.split_once('.') {
                Some((_, parent)) => domain = parent.to_string(),
                None => return None,
            }
        }
    }

    /// zone ID -> record name -> TXT values
    fn group_records<'a>(
        &'a self,
        challenges: &[PendingChallenge],
    ) -> Result<BTreeMap<&'a str, BTreeMap<String, Vec<String>>>, Error> {
        let mut zones = BTreeMap::<&str, BTreeMap<String, Vec<String>>>::new();
        for challenge in challenges {
            let zone_id = self
                .zone_id(&challenge.domain)
                .ok_or_else(|| Error::NoDnsZone(challenge.domain.clone()))?;
            zones
                .entry(zone_id)
                .or_default()
                .entry(challenge_record_name(&challenge.domain))
                .or_default()
                .push(format!("\"{}\"", challenge.dns_value));
        }
        Ok(zones)
    }

    fn change_batch(
        action: aws_sdk_route53::types::ChangeAction,
        records: &BTreeMap<String, Vec<String>>,
    ) -> Result<aws_sdk_route53::types::ChangeBatch, Error> {
        use aws_sdk_route53::types::{Change, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType};

        let changes = records
            .iter()
            .map(|(record_name, values)| {
                let resource_records = values
                    .iter()
                    .map(|value| ResourceRecord::builder().value(value).build())
                    .collect::<Result<Vec<_>, _>>()?;
                let record_set = ResourceRecordSet::builder()
                    .name(record_name)
                    .r#type(RrType::Txt)
                    .ttl(TXT_TTL)
                    .set_resource_records(Some(resource_records))
                    .build()?;
                Ok(Change::builder()
                    .action(action.clone())
                    .resource_record_set(record_set)
                    .build()?)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(ChangeBatch::builder()
            .comment(format!("lambda-acme certificate validation {}", action.as_str()))
            .set_changes(Some(changes))
            .build()?)
    }

    async fn change_txt_records(
        &self,
        zone_id: &str,
        batch: aws_sdk_route53::types::ChangeBatch,
    ) -> Result<String, Error> {
        let resp = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await?;
        Ok(resp.change_info.id)
    }

    /// Wait until a change has propagated to all Route53 DNS servers
    async fn wait_for_change(&self, change_id: &str) -> Result<(), Error> {
        use aws_sdk_route53::types::ChangeStatus;

        for _retry in 0..CHANGE_POLL_MAX {
            let resp = self.client.get_change().id(change_id).send().await?;
            if resp.change_info.status == ChangeStatus::Insync {
                debug!(change_id, "route53 change in sync");
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(CHANGE_POLL_INTERVAL_SEC)).await;
        }

        Err(Error::DnsUpdateTimeout(change_id.to_string()))
    }
}

#[async_trait]
impl Authenticator for Route53Authenticator {
    fn is_supported(&self, domain: &str, challenge_type: &instant_acme::ChallengeType) -> bool {
        *challenge_type == instant_acme::ChallengeType::Dns01 && self.zone_id(domain).is_some()
    }

    async fn perform(&self, challenges: &[PendingChallenge]) -> Result<(), Error> {
        use aws_sdk_route53::types::ChangeAction;

        let mut change_ids = Vec::new();
        for (zone_id, records) in self.group_records(challenges)? {
            let batch = Self::change_batch(ChangeAction::Upsert, &records)?;
            let change_id = self.change_txt_records(zone_id, batch).await?;
            info!(zone_id, change_id = %change_id, records = records.len(), "TXT records upserted");
            change_ids.push(change_id);
        }

        // Route53 changes propagate concurrently
        futures::future::try_join_all(change_ids.iter().map(|id| self.wait_for_change(id)))
            .await?;
        Ok(())
    }

    /// Failures are logged only, a stale TXT record does no harm
    async fn cleanup(&self, challenges: &[PendingChallenge]) -> Result<(), Error> {
        use aws_sdk_route53::types::ChangeAction;

        for (zone_id, records) in self.group_records(challenges)? {
            let result = match Self::change_batch(ChangeAction::Delete, &records) {
                Ok(batch) => self.change_txt_records(zone_id, batch).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!(zone_id, error = %e, "TXT record cleanup failed");
            }
        }
        Ok(())
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

/// `_acme-challenge.<domain>.` with any wildcard label removed
pub(crate) fn challenge_record_name(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("_acme-challenge.{}.", normalize_domain(domain))
}
