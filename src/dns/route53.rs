//! AWS Route53 backend adapter
//!
//! Route53's `ChangeResourceRecordSets` applies a whole change batch
//! atomically, so the A and TXT records are always replaced together here.
//! Credentials come from the standard AWS provider chain (environment,
//! profile, instance role).

use std::net::Ipv4Addr;

use async_trait::async_trait;
use aws_sdk_route53::error::ProvideErrorMetadata;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use tracing::debug;

use super::{BackendError, DnsBackend, RecordSnapshot};
use crate::config;
use crate::error::Result;
use crate::lease::{Lease, Owner};

pub struct Route53Backend {
    client: aws_sdk_route53::Client,
    zone_id: String,
    record: String,
}

impl Route53Backend {
    pub async fn from_env(record: &str) -> Result<Self> {
        let zone_id = config::required("ROUTE53_ZONE_ID")?;
        // Credentials from the standard chain; one bounded attempt per
        // loop iteration, the coordinator retries next interval.
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_timeout(std::time::Duration::from_secs(10))
            .build();
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .timeout_config(timeouts)
            .load()
            .await;
        Ok(Self {
            client: aws_sdk_route53::Client::new(&aws_config),
            zone_id,
            record: record.to_string(),
        })
    }

    fn record_matches(&self, name: &str) -> bool {
        normalize_name(name) == normalize_name(&self.record)
    }
}

#[async_trait]
impl DnsBackend for Route53Backend {
    async fn set_records(
        &self,
        ip: Ipv4Addr,
        owner: Owner,
        exp_unix: u64,
        ttl: u32,
    ) -> std::result::Result<(), BackendError> {
        let txt = Lease::new(owner, exp_unix).to_txt();
        let batch = change_batch(&self.record, ip, &txt, ttl)?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(&self.zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| classify(e.code(), e.message(), &e.to_string()))?;

        debug!(record = %self.record, %ip, txt, "route53 change batch applied");
        Ok(())
    }

    async fn get_records(&self) -> std::result::Result<RecordSnapshot, BackendError> {
        let listing = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(&self.zone_id)
            .start_record_name(&self.record)
            .send()
            .await
            .map_err(|e| classify(e.code(), e.message(), &e.to_string()))?;

        let mut snapshot = RecordSnapshot::default();
        for rrset in listing.resource_record_sets() {
            if !self.record_matches(rrset.name()) {
                continue;
            }
            let first_value = rrset
                .resource_records()
                .first()
                .map(|r| r.value().to_string());
            match rrset.r#type() {
                RrType::A => {
                    snapshot.a = first_value.and_then(|v| v.parse().ok());
                }
                RrType::Txt => {
                    snapshot.txt = first_value.map(|v| unquote_txt(&v));
                }
                _ => {}
            }
        }
        Ok(snapshot)
    }
}

/// One atomic UPSERT batch carrying both records.
fn change_batch(
    record: &str,
    ip: Ipv4Addr,
    txt: &str,
    ttl: u32,
) -> std::result::Result<ChangeBatch, BackendError> {
    let a_change = upsert(record, RrType::A, ip.to_string(), ttl)?;
    // Route53 requires TXT rdata in its quoted presentation form.
    let txt_change = upsert(record, RrType::Txt, format!("\"{txt}\""), ttl)?;

    ChangeBatch::builder()
        .changes(a_change)
        .changes(txt_change)
        .build()
        .map_err(|e| BackendError::Network(format!("invalid change batch: {e}")))
}

fn upsert(
    record: &str,
    rtype: RrType,
    value: String,
    ttl: u32,
) -> std::result::Result<Change, BackendError> {
    let invalid = |e: aws_sdk_route53::error::BuildError| {
        BackendError::Network(format!("invalid change batch: {e}"))
    };
    let rr = ResourceRecord::builder().value(value).build().map_err(invalid)?;
    let rrset = ResourceRecordSet::builder()
        .name(record)
        .r#type(rtype)
        .ttl(i64::from(ttl))
        .resource_records(rr)
        .build()
        .map_err(invalid)?;
    Change::builder()
        .action(ChangeAction::Upsert)
        .resource_record_set(rrset)
        .build()
        .map_err(invalid)
}

/// Map an AWS error code onto the backend taxonomy. Unknown codes are
/// treated as transient so the caller retries next iteration.
fn classify(code: Option<&str>, message: Option<&str>, fallback: &str) -> BackendError {
    let detail = message.unwrap_or(fallback).to_string();
    match code {
        Some(
            "AccessDenied" | "AccessDeniedException" | "InvalidClientTokenId"
            | "SignatureDoesNotMatch" | "UnrecognizedClientException" | "ExpiredToken",
        ) => BackendError::Auth(detail),
        Some("NoSuchHostedZone") => BackendError::NotFound(detail),
        Some("PriorRequestNotComplete" | "ConcurrentModification") => {
            BackendError::Conflict(detail)
        }
        _ => BackendError::Network(detail),
    }
}

fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Route53 returns TXT rdata in quoted presentation form.
fn unquote_txt(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('"')
        .trim_end_matches('"')
        .to_string()
}
