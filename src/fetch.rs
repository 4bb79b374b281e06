//! SSRF-guarded web page fetching for URL ingestion.
//!
//! Every hop is validated before a connection is made: the URL's host is
//! resolved and each address is rejected when it is loopback, link-local,
//! or private (RFC1918 and the IPv6 equivalents). Redirects are followed
//! manually so the same validation applies to every Location target.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::Url;
use tracing::debug;

use crate::error::{Result, SynthesisError};

const MAX_REDIRECTS: usize = 5;

/// A fetched page: final URL, declared content type, body bytes.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn forbidden_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_link_local()
        || ip.is_private()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn forbidden_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return forbidden_v4(v4);
    }
    let segments = ip.segments();
    let is_unique_local = (segments[0] & 0xfe00) == 0xfc00; // fc00::/7
    let is_link_local = (segments[0] & 0xffc0) == 0xfe80; // fe80::/10
    ip.is_loopback() || ip.is_unspecified() || is_unique_local || is_link_local
}

/// True when the address must never be fetched.
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => forbidden_v4(v4),
        IpAddr::V6(v6) => forbidden_v6(v6),
    }
}

/// Validate a URL's scheme and resolved addresses.
async fn validate_url(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(SynthesisError::InvalidInput(format!(
                "unsupported URL scheme: {other}"
            )))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| SynthesisError::InvalidInput("URL has no host".to_string()))?;
    let port = url.port_or_known_default().unwrap_or(443);

    // Literal addresses skip DNS.
    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        if is_forbidden_ip(ip) {
            return Err(SynthesisError::InvalidInput(format!(
                "refusing to fetch private address {ip}"
            )));
        }
        return Ok(());
    }

    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SynthesisError::InvalidInput(format!("cannot resolve {host}: {e}")))?;

    let mut any = false;
    for addr in addrs {
        any = true;
        if is_forbidden_ip(addr.ip()) {
            return Err(SynthesisError::InvalidInput(format!(
                "refusing to fetch {host}: resolves to private address {}",
                addr.ip()
            )));
        }
    }
    if !any {
        return Err(SynthesisError::InvalidInput(format!(
            "cannot resolve {host}: no addresses"
        )));
    }
    Ok(())
}

/// Fetch a page, re-validating every redirect hop.
pub async fn fetch_url(raw_url: &str, timeout: Duration) -> Result<FetchedPage> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(Policy::none())
        .build()
        .map_err(|e| SynthesisError::Internal(e.to_string()))?;

    let mut url = Url::parse(raw_url)
        .map_err(|e| SynthesisError::InvalidInput(format!("invalid URL {raw_url}: {e}")))?;

    for _hop in 0..=MAX_REDIRECTS {
        validate_url(&url).await?;

        let response = client.get(url.clone()).send().await.map_err(|e| {
            SynthesisError::ProviderUnavailable {
                provider: "fetch".to_string(),
                cause: e.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| SynthesisError::ProviderUnavailable {
                    provider: "fetch".to_string(),
                    cause: format!("{status} without Location header"),
                })?;
            let next = url.join(location).map_err(|e| {
                SynthesisError::InvalidInput(format!("invalid redirect target {location}: {e}"))
            })?;
            debug!(from = %url, to = %next, "following redirect");
            url = next;
            continue;
        }

        if !status.is_success() {
            return Err(SynthesisError::ProviderUnavailable {
                provider: "fetch".to_string(),
                cause: format!("{status} fetching {url}"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "text/html".to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::ProviderUnavailable {
                provider: "fetch".to_string(),
                cause: e.to_string(),
            })?;

        return Ok(FetchedPage {
            final_url: url.to_string(),
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err(SynthesisError::InvalidInput(format!(
        "too many redirects fetching {raw_url}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_and_private_v4() {
        assert!(is_forbidden_ip("127.0.0.1".parse().unwrap()));
        assert!(is_forbidden_ip("10.1.2.3".parse().unwrap()));
        assert!(is_forbidden_ip("172.16.0.1".parse().unwrap()));
        assert!(is_forbidden_ip("192.168.1.1".parse().unwrap()));
        assert!(is_forbidden_ip("169.254.0.5".parse().unwrap()));
        assert!(is_forbidden_ip("0.0.0.0".parse().unwrap()));
    }

    #[test]
    fn rejects_ipv6_equivalents() {
        assert!(is_forbidden_ip("::1".parse().unwrap()));
        assert!(is_forbidden_ip("fe80::1".parse().unwrap()));
        assert!(is_forbidden_ip("fc00::1".parse().unwrap()));
        assert!(is_forbidden_ip("fd12:3456::1".parse().unwrap()));
        // IPv4-mapped loopback
        assert!(is_forbidden_ip("::ffff:127.0.0.1".parse().unwrap()));
        assert!(is_forbidden_ip("::ffff:10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn allows_public_addresses() {
        assert!(!is_forbidden_ip("93.184.216.34".parse().unwrap()));
        assert!(!is_forbidden_ip("2606:2800:220:1::1".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejects_literal_private_url() {
        let err = fetch_url("http://127.0.0.1:8080/admin", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let err = fetch_url("ftp://example.com/file", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
