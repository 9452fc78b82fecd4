//! Cloudflare backend adapter
//!
//! Uses the v4 REST API with a bearer token. Cloudflare has no multi-record
//! change batch, so the A record is written before the TXT record: an
//! interrupted pair leaves the lease metadata on the old owner, which the
//! next DR iteration re-evaluates safely.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{BackendError, DnsBackend, RecordSnapshot};
use crate::config;
use crate::error::{Error, Result};
use crate::lease::{Lease, Owner};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CloudflareBackend {
    http: reqwest::Client,
    api_base: String,
    zone_id: String,
    record: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    content: String,
}

impl CloudflareBackend {
    pub fn from_env(record: &str) -> Result<Self> {
        let token = config::required("CLOUDFLARE_API_TOKEN")?;
        let zone_id = config::required("CLOUDFLARE_ZONE_ID")?;
        Self::new(API_BASE.to_string(), token, zone_id, record.to_string())
    }

    fn new(api_base: String, token: String, zone_id: String, record: String) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::ConfigError("CLOUDFLARE_API_TOKEN is not valid ASCII".into()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base,
            zone_id,
            record,
        })
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.api_base, self.zone_id)
    }

    /// Find the single record of `rtype` at the coordinating name, if any.
    async fn find_record(
        &self,
        rtype: &str,
    ) -> std::result::Result<Option<DnsRecord>, BackendError> {
        let response = self
            .http
            .get(self.records_url())
            .query(&[("type", rtype), ("name", self.record.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        let records: Vec<DnsRecord> = decode(response).await?;
        Ok(records.into_iter().next())
    }

    /// Replace-or-create one record. Update via PUT when an id exists,
    /// create via POST otherwise.
    async fn upsert_record(
        &self,
        rtype: &str,
        content: &str,
        ttl: u32,
    ) -> std::result::Result<(), BackendError> {
        let body = json!({
            "type": rtype,
            "name": self.record,
            "content": content,
            "ttl": ttl,
        });
        let response = match self.find_record(rtype).await? {
            Some(existing) => self
                .http
                .put(format!("{}/{}", self.records_url(), existing.id))
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?,
            None => self
                .http
                .post(self.records_url())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?,
        };
        let _record: DnsRecord = decode(response).await?;
        debug!(record = %self.record, rtype, content, "cloudflare record upserted");
        Ok(())
    }
}

#[async_trait]
impl DnsBackend for CloudflareBackend {
    async fn set_records(
        &self,
        ip: Ipv4Addr,
        owner: Owner,
        exp_unix: u64,
        ttl: u32,
    ) -> std::result::Result<(), BackendError> {
        // A before TXT; no batch support.
        self.upsert_record("A", &ip.to_string(), ttl).await?;
        self.upsert_record("TXT", &Lease::new(owner, exp_unix).to_txt(), ttl)
            .await
    }

    async fn get_records(&self) -> std::result::Result<RecordSnapshot, BackendError> {
        let a = self
            .find_record("A")
            .await?
            .and_then(|r| r.content.parse().ok());
        let txt = self.find_record("TXT").await?.map(|r| r.content);
        Ok(RecordSnapshot { a, txt })
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    BackendError::Network(format!("cloudflare API unreachable: {e}"))
}

/// Unwrap the `{success, errors, result}` envelope, classifying HTTP and
/// API-level failures onto the backend taxonomy.
async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, BackendError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        let detail = format!("status {status}: {body}");
        return Err(match status.as_u16() {
            401 | 403 => BackendError::Auth(detail),
            404 => BackendError::NotFound(detail),
            409 => BackendError::Conflict(detail),
            _ => BackendError::Network(detail),
        });
    }

    let envelope: ApiEnvelope<T> = serde_json::from_str(&body)
        .map_err(|e| BackendError::Network(format!("unexpected cloudflare response: {e}")))?;
    if !envelope.success {
        let detail = envelope
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(BackendError::Network(format!("cloudflare error: {detail}")));
    }
    envelope
        .result
        .ok_or_else(|| BackendError::Network("cloudflare response missing result".into()))
}
