//! SSRF guard for outbound HTTP.
//!
//! URLs are vetted before any socket is opened: scheme restricted to
//! http/https (http upgraded to https), metadata hostnames and literal
//! blocked IPs rejected, and the host resolved up front with every
//! resolved address checked against the blocked CIDR set. The fetcher pins
//! its connection to the vetted addresses, so a DNS answer that changes
//! between validation and connect cannot redirect the request into an
//! internal network.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use url::Url;

use crate::error::WebError;

// ─── Host rules ───────────────────────────────────────────────────────────────

/// Hostnames that commonly expose cloud instance metadata or local
/// services.
const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "metadata",
    "metadata.google.internal",
    "instance-data",
    "169.254.169.254",
];

/// Parse and vet a URL string. `http` is upgraded to `https` in place.
pub fn validate_url(raw: &str) -> Result<Url, WebError> {
    let mut url = Url::parse(raw).map_err(|e| WebError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "https" => {}
        "http" => {
            // Upgrade; set_scheme only fails for incompatible schemes.
            let _ = url.set_scheme("https");
        }
        other => {
            return Err(WebError::InvalidScheme {
                scheme: other.to_string(),
            });
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| WebError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".into(),
        })?
        .to_lowercase();

    if BLOCKED_HOSTS.contains(&host.as_str()) {
        return Err(WebError::BlockedHost { host });
    }

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>()
        && is_blocked_ip(ip)
    {
        return Err(WebError::BlockedIp { ip });
    }

    Ok(url)
}

// ─── CIDR rules ───────────────────────────────────────────────────────────────

/// True when `ip` falls in a range this process must never dial: private,
/// loopback, link-local, multicast/broadcast, documentation, cloud
/// metadata, and their IPv6 equivalents.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local() // covers 169.254.0.0/16 incl. metadata
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24 documentation
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 192.0.0.0/24 protocol assignments
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    // Blocked IPv4 addresses embedded as v4-mapped must not bypass the v4
    // rules.
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast() // ff00::/8
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        // 2001::/32 Teredo
        || (segments[0] == 0x2001 && segments[1] == 0x0000)
        // 2001:10::/28 ORCHID, 2001:20::/28 ORCHIDv2
        || (segments[0] == 0x2001 && (segments[1] & 0xfff0) == 0x0010)
        || (segments[0] == 0x2001 && (segments[1] & 0xfff0) == 0x0020)
        // 2002::/16 6to4
        || segments[0] == 0x2002
}

// ─── Resolution ───────────────────────────────────────────────────────────────

/// Resolve `host:port` and reject the whole set if any address is blocked.
/// Returning every vetted address lets the caller pin the connection to
/// exactly what was checked, closing the DNS-rebinding window.
pub async fn resolve_and_check(host: &str, port: u16) -> Result<Vec<SocketAddr>, WebError> {
    // A literal IP needs no lookup, but still needs the CIDR check.
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(WebError::BlockedIp { ip });
        }
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| WebError::Transport(format!("DNS lookup for '{host}' failed: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(WebError::Transport(format!(
            "DNS lookup for '{host}' returned no addresses"
        )));
    }

    for addr in &addrs {
        if is_blocked_ip(addr.ip()) {
            return Err(WebError::BlockedIp { ip: addr.ip() });
        }
    }

    Ok(addrs)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
