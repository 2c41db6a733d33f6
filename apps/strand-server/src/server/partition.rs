use std::net::SocketAddr;

use axum::http::HeaderMap;

const FORWARDED_ORIGIN_HEADER: &str = "x-forwarded-for";
const MAX_FORWARDED_HEADER_CHARS: usize = 512;
const MAX_FORWARDED_ENTRY_CHARS: usize = 64;
const UNKNOWN_PARTITION: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartitionSource {
    Subject,
    Forwarded,
    Peer,
    Unknown,
    /// Deliberate fail-open partition for requests whose origin could not be
    /// resolved at all; the limiter admits these unconditionally.
    Unrestricted,
}

impl PartitionSource {
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Forwarded => "forwarded",
            Self::Peer => "peer",
            Self::Unknown => "unknown",
            Self::Unrestricted => "unrestricted",
        }
    }
}

/// The identity a rate limiter buckets counters by: the authenticated
/// subject id when present, otherwise a normalized network origin.
///
/// Unauthenticated clients behind one proxy therefore share a bucket; the
/// subject-first order exists so authenticated traffic escapes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartitionKey {
    key: String,
    source: PartitionSource,
}

impl PartitionKey {
    #[must_use]
    pub(crate) fn as_str(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub(crate) fn source(&self) -> PartitionSource {
        self.source
    }

    #[must_use]
    pub(crate) fn is_unrestricted(&self) -> bool {
        self.source == PartitionSource::Unrestricted
    }

    #[must_use]
    pub(crate) fn unrestricted() -> Self {
        Self {
            key: String::from("unrestricted"),
            source: PartitionSource::Unrestricted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartitionError {
    MalformedForwardedHeader,
}

/// Resolves the throttling partition for a request.
///
/// Order: authenticated subject id, first forwarded-origin entry, direct
/// peer address, the literal `"unknown"`. A forwarded header that is present
/// but undecodable is an error so the caller can take the fail-open branch
/// explicitly.
pub(crate) fn resolve_partition_key(
    subject_id: Option<&str>,
    headers: &HeaderMap,
    peer_addr: Option<SocketAddr>,
) -> Result<PartitionKey, PartitionError> {
    if let Some(subject) = subject_id {
        return Ok(PartitionKey {
            key: subject.to_owned(),
            source: PartitionSource::Subject,
        });
    }

    if let Some(raw) = headers.get(FORWARDED_ORIGIN_HEADER) {
        let value = raw
            .to_str()
            .map_err(|_| PartitionError::MalformedForwardedHeader)?;
        if let Some(origin) = first_forwarded_origin(value) {
            return Ok(PartitionKey {
                key: origin,
                source: PartitionSource::Forwarded,
            });
        }
    }

    if let Some(peer) = peer_addr {
        return Ok(PartitionKey {
            key: peer.ip().to_string(),
            source: PartitionSource::Peer,
        });
    }

    Ok(PartitionKey {
        key: String::from(UNKNOWN_PARTITION),
        source: PartitionSource::Unknown,
    })
}

fn first_forwarded_origin(value: &str) -> Option<String> {
    if value.len() > MAX_FORWARDED_HEADER_CHARS {
        return None;
    }
    let entry = value.split(',').next().map(str::trim)?;
    if entry.is_empty() || entry.len() > MAX_FORWARDED_ENTRY_CHARS {
        return None;
    }
    Some(strip_single_port_suffix(entry).to_owned())
}

/// Strips a trailing `:port` only when the value holds exactly one colon.
/// IPv6 literals contain several and must pass through untouched.
fn strip_single_port_suffix(entry: &str) -> &str {
    if entry.chars().filter(|c| *c == ':').count() == 1 {
        if let Some((host, port)) = entry.rsplit_once(':') {
            if !host.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                return host;
            }
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::{resolve_partition_key, PartitionError, PartitionSource};
    use axum::http::{HeaderMap, HeaderValue};

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", value.parse().expect("valid header"));
        headers
    }

    #[test]
    fn subject_id_wins_over_network_origin() {
        let headers = forwarded("198.51.100.7");
        let key = resolve_partition_key(
            Some("01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            &headers,
            Some("10.0.0.1:443".parse().expect("valid addr")),
        )
        .unwrap();
        assert_eq!(key.source(), PartitionSource::Subject);
        assert_eq!(key.as_str(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
    }

    #[test]
    fn first_forwarded_entry_is_used() {
        let headers = forwarded("198.51.100.44, 203.0.113.10");
        let key = resolve_partition_key(None, &headers, None).unwrap();
        assert_eq!(key.source(), PartitionSource::Forwarded);
        assert_eq!(key.as_str(), "198.51.100.44");
    }

    #[test]
    fn single_colon_port_suffix_is_stripped() {
        let headers = forwarded("198.51.100.44:8080");
        let key = resolve_partition_key(None, &headers, None).unwrap();
        assert_eq!(key.as_str(), "198.51.100.44");
    }

    #[test]
    fn ipv6_literals_keep_their_colons() {
        let headers = forwarded("2001:db8::7334");
        let key = resolve_partition_key(None, &headers, None).unwrap();
        assert_eq!(key.as_str(), "2001:db8::7334");
    }

    #[test]
    fn oversized_forwarded_header_falls_back_to_peer() {
        let headers = forwarded(&format!("198.51.100.1,{}", "9".repeat(600)));
        let key = resolve_partition_key(
            None,
            &headers,
            Some("10.2.0.8:51000".parse().expect("valid addr")),
        )
        .unwrap();
        assert_eq!(key.source(), PartitionSource::Peer);
        assert_eq!(key.as_str(), "10.2.0.8");
    }

    #[test]
    fn undecodable_forwarded_header_is_a_resolver_error() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_bytes(b"\xff\xfe").expect("opaque header bytes"),
        );
        let error = resolve_partition_key(None, &headers, None).unwrap_err();
        assert_eq!(error, PartitionError::MalformedForwardedHeader);
    }

    #[test]
    fn missing_everything_resolves_to_unknown() {
        let key = resolve_partition_key(None, &HeaderMap::new(), None).unwrap();
        assert_eq!(key.source(), PartitionSource::Unknown);
        assert_eq!(key.as_str(), "unknown");
    }
}
