//! RFC 2136 dynamic-update backend adapter
//!
//! Talks straight to an authoritative server (BIND, Knot, PowerDNS) over
//! UDP. A single update message deletes and re-adds both RRsets, and RFC
//! 2136 requires the server to apply the whole update atomically, so the
//! pair can never be half-applied. Reads are plain queries against the same
//! server. Updates are optionally TSIG-signed (hmac-sha256, base64 secret).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hickory_proto::dnssec::rdata::tsig::TsigAlgorithm;
use hickory_proto::dnssec::tsig::TSigner;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode, UpdateMessage};
use hickory_proto::rr::rdata::{A, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::runtime::TokioRuntimeProvider;
use hickory_proto::udp::UdpClientStream;
use hickory_proto::xfer::{DnsRequest, DnsRequestOptions, DnsRequestSender, FirstAnswer};
use tracing::debug;

use super::{BackendError, DnsBackend, RecordSnapshot};
use crate::config;
use crate::error::{Error, Result};
use crate::lease::{Lease, Owner};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const TSIG_FUDGE: u16 = 300;

pub struct Rfc2136Backend {
    server: SocketAddr,
    zone: Name,
    record: Name,
    tsig: Option<Arc<TSigner>>,
}

impl Rfc2136Backend {
    pub fn from_env(zone: &str, record: &str) -> Result<Self> {
        let server_raw = config::required("RFC2136_SERVER")?;
        let server: SocketAddr = if server_raw.contains(':') {
            server_raw
                .parse()
                .map_err(|_| Error::ConfigError("RFC2136_SERVER must be ip or ip:port".into()))?
        } else {
            let ip = server_raw
                .parse::<std::net::IpAddr>()
                .map_err(|_| Error::ConfigError("RFC2136_SERVER must be ip or ip:port".into()))?;
            SocketAddr::new(ip, 53)
        };

        let tsig = match (
            config::optional("RFC2136_TSIG_NAME"),
            config::optional("RFC2136_TSIG_SECRET"),
        ) {
            (Some(name), Some(secret)) => {
                let key = base64::engine::general_purpose::STANDARD
                    .decode(secret.trim())
                    .map_err(|_| {
                        Error::ConfigError("RFC2136_TSIG_SECRET is not valid base64".into())
                    })?;
                let signer_name = Name::from_ascii(&name).map_err(|_| {
                    Error::ConfigError("RFC2136_TSIG_NAME is not a valid DNS name".into())
                })?;
                let signer = TSigner::new(key, TsigAlgorithm::HmacSha256, signer_name, TSIG_FUDGE)
                    .map_err(|e| Error::ConfigError(format!("failed to build TSIG signer: {e}")))?;
                Some(Arc::new(signer))
            }
            (None, None) => None,
            _ => {
                return Err(Error::ConfigError(
                    "RFC2136_TSIG_NAME and RFC2136_TSIG_SECRET must be set together".into(),
                ))
            }
        };

        Ok(Self {
            server,
            zone: Name::from_ascii(zone)
                .map_err(|_| Error::ConfigError("DNS_ZONE is not a valid DNS name".into()))?,
            record: Name::from_ascii(record)
                .map_err(|_| Error::ConfigError("DNS_RECORD is not a valid DNS name".into()))?,
            tsig,
        })
    }

    /// Fresh short-lived client per operation; updates are rare and the
    /// socket carries the TSIG signer when configured.
    async fn connect(
        &self,
    ) -> std::result::Result<UdpClientStream<TokioRuntimeProvider>, BackendError> {
        let mut builder = UdpClientStream::builder(self.server, TokioRuntimeProvider::default())
            .with_timeout(Some(QUERY_TIMEOUT));
        if let Some(tsig) = &self.tsig {
            builder = builder.with_signer(Some(tsig.clone()));
        }
        builder
            .build()
            .await
            .map_err(|e| BackendError::Network(format!("udp client to {}: {e}", self.server)))
    }

    async fn exchange(
        &self,
        message: Message,
    ) -> std::result::Result<hickory_proto::xfer::DnsResponse, BackendError> {
        let mut client = self.connect().await?;
        let request = DnsRequest::new(message, DnsRequestOptions::default());
        let response = client
            .send_message(request)
            .first_answer()
            .await
            .map_err(|e| BackendError::Network(format!("exchange with {}: {e}", self.server)));
        client.shutdown();
        response
    }

    async fn query(
        &self,
        rtype: RecordType,
    ) -> std::result::Result<Vec<Record>, BackendError> {
        let mut message = Message::new();
        message
            .set_id(rand::random())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(false)
            .add_query(Query::query(self.record.clone(), rtype));

        let response = self.exchange(message).await?;
        match response.response_code() {
            ResponseCode::NoError => Ok(response.answers().to_vec()),
            // Nothing at the name yet; the caller sees an empty snapshot.
            ResponseCode::NXDomain => Ok(Vec::new()),
            code => Err(classify_rcode(code, self.server)),
        }
    }
}

#[async_trait]
impl DnsBackend for Rfc2136Backend {
    async fn set_records(
        &self,
        ip: Ipv4Addr,
        owner: Owner,
        exp_unix: u64,
        ttl: u32,
    ) -> std::result::Result<(), BackendError> {
        let txt = Lease::new(owner, exp_unix).to_txt();
        let message = replace_pair_update(&self.zone, &self.record, ip, &txt, ttl);

        let response = self.exchange(message).await?;
        if response.response_code() == ResponseCode::NoError {
            debug!(record = %self.record, %ip, txt, "rfc2136 update applied");
            Ok(())
        } else {
            Err(classify_rcode(response.response_code(), self.server))
        }
    }

    async fn get_records(&self) -> std::result::Result<RecordSnapshot, BackendError> {
        let mut snapshot = RecordSnapshot::default();
        for record in self.query(RecordType::A).await? {
            if let Some(a) = record.data().as_a() {
                snapshot.a = Some(a.0);
                break;
            }
        }
        for record in self.query(RecordType::TXT).await? {
            if let Some(txt) = record.data().as_txt() {
                let joined: Vec<u8> = txt
                    .txt_data()
                    .iter()
                    .flat_map(|segment| segment.iter().copied())
                    .collect();
                snapshot.txt = Some(String::from_utf8_lossy(&joined).into_owned());
                break;
            }
        }
        Ok(snapshot)
    }
}

/// Build the single update message replacing both RRsets: delete the A and
/// TXT RRsets at the name, then add the new records. The server applies the
/// whole sequence atomically.
fn replace_pair_update(
    zone: &Name,
    record: &Name,
    ip: Ipv4Addr,
    txt: &str,
    ttl: u32,
) -> Message {
    let mut zone_query = Query::new();
    zone_query
        .set_name(zone.clone())
        .set_query_class(DNSClass::IN)
        .set_query_type(RecordType::SOA);

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Update)
        .set_recursion_desired(false);
    message.add_zone(zone_query);

    // Delete-RRset entries: class ANY, TTL 0, empty rdata.
    let mut delete_a = Record::update0(record.clone(), 0, RecordType::A);
    delete_a.set_dns_class(DNSClass::ANY);
    message.add_update(delete_a);
    let mut delete_txt = Record::update0(record.clone(), 0, RecordType::TXT);
    delete_txt.set_dns_class(DNSClass::ANY);
    message.add_update(delete_txt);

    message.add_update(Record::from_rdata(record.clone(), ttl, RData::A(A(ip))));
    message.add_update(Record::from_rdata(
        record.clone(),
        ttl,
        RData::TXT(TXT::new(vec![txt.to_string()])),
    ));

    message
}

fn classify_rcode(code: ResponseCode, server: SocketAddr) -> BackendError {
    match code {
        ResponseCode::NotAuth | ResponseCode::Refused | ResponseCode::BADSIG
        | ResponseCode::BADKEY | ResponseCode::BADTIME => {
            BackendError::Auth(format!("{server} answered {code:?}"))
        }
        ResponseCode::NXDomain | ResponseCode::NotZone => {
            BackendError::NotFound(format!("{server} answered {code:?}"))
        }
        other => BackendError::Network(format!("{server} answered {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> (Name, Name) {
        (
            Name::from_ascii("example.net.").unwrap(),
            Name::from_ascii("collector.example.net.").unwrap(),
        )
    }

    #[test]
    fn update_message_replaces_both_rrsets() {
        let (zone, record) = names();
        let message = replace_pair_update(
            &zone,
            &record,
            Ipv4Addr::new(10, 0, 2, 10),
            "owner=dr exp=1700000060",
            30,
        );

        assert_eq!(message.op_code(), OpCode::Update);
        let zones = message.queries();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name(), &zone);
        assert_eq!(zones[0].query_type(), RecordType::SOA);

        // Updates land in the name-servers section of the message.
        let updates = message.name_servers();
        assert_eq!(updates.len(), 4);

        // Two delete-RRset entries first.
        assert_eq!(updates[0].dns_class(), DNSClass::ANY);
        assert_eq!(updates[0].record_type(), RecordType::A);
        assert_eq!(updates[0].ttl(), 0);
        assert_eq!(updates[1].dns_class(), DNSClass::ANY);
        assert_eq!(updates[1].record_type(), RecordType::TXT);

        // Then the replacement records.
        assert_eq!(
            updates[2].data().as_a(),
            Some(&A(Ipv4Addr::new(10, 0, 2, 10)))
        );
        assert_eq!(updates[2].ttl(), 30);
        let txt = updates[3].data().as_txt().unwrap();
        assert_eq!(
            txt.txt_data(),
            [Box::from("owner=dr exp=1700000060".as_bytes())].as_slice()
        );
    }

    #[test]
    fn rcodes_map_to_taxonomy() {
        let server: SocketAddr = "192.0.2.53:53".parse().unwrap();
        assert!(matches!(
            classify_rcode(ResponseCode::Refused, server),
            BackendError::Auth(_)
        ));
        assert!(matches!(
            classify_rcode(ResponseCode::NotAuth, server),
            BackendError::Auth(_)
        ));
        assert!(matches!(
            classify_rcode(ResponseCode::NXDomain, server),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            classify_rcode(ResponseCode::ServFail, server),
            BackendError::Network(_)
        ));
    }
}
