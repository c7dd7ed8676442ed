//! Outbound SSRF guard (spec §4.10): reject destinations that resolve to
//! loopback, link-local, or RFC1918 private ranges unless the deployment
//! explicitly allows internal destinations.

use std::net::IpAddr;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("destination {0} resolves to a private/internal address")]
    PrivateDestination(String),
    #[error("could not resolve destination {0}: {1}")]
    ResolutionFailed(String, String),
}

/// Checks `url`'s host against the private-range blocklist. Literal IP
/// hosts are checked directly; hostnames are resolved via the OS resolver
/// (`tokio::net::lookup_host`) and every resolved address is checked, so a
/// hostname that resolves to a loopback/link-local/RFC1918 address is
/// rejected just like a literal one.
pub async fn check_destination(url: &str, allow_internal: bool) -> Result<(), SsrfError> {
    if allow_internal {
        return Ok(());
    }
    let parsed = Url::parse(url).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;
    let host = parsed.host_str().ok_or_else(|| SsrfError::InvalidUrl("missing host".into()))?;

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private(&ip) {
            return Err(SsrfError::PrivateDestination(host.to_string()));
        }
        return Ok(());
    }

    if host == "localhost" || host.ends_with(".local") {
        return Err(SsrfError::PrivateDestination(host.to_string()));
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SsrfError::ResolutionFailed(host.to_string(), e.to_string()))?
        .map(|addr| addr.ip())
        .collect();

    if addrs.is_empty() {
        return Err(SsrfError::ResolutionFailed(host.to_string(), "no addresses returned".into()));
    }
    if addrs.iter().any(is_private) {
        return Err(SsrfError::PrivateDestination(host.to_string()));
    }
    Ok(())
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_private() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_loopback() {
        assert!(check_destination("http://127.0.0.1/hook", false).await.is_err());
    }

    #[tokio::test]
    async fn rejects_rfc1918() {
        assert!(check_destination("http://10.0.0.5/hook", false).await.is_err());
        assert!(check_destination("http://192.168.1.1/hook", false).await.is_err());
    }

    #[tokio::test]
    async fn rejects_localhost_hostname() {
        assert!(check_destination("http://localhost/hook", false).await.is_err());
    }

    #[tokio::test]
    async fn allows_public_ip() {
        assert!(check_destination("http://93.184.216.34/hook", false).await.is_ok());
    }

    #[tokio::test]
    async fn allow_internal_bypasses_guard() {
        assert!(check_destination("http://127.0.0.1/hook", true).await.is_ok());
    }
}
