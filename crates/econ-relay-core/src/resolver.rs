//! Target address resolution.
//!
//! Splits a `host:port` string, resolves the host through
//! `tokio::net::lookup_host`, and picks one address, preferring IPv4. The
//! choice happens once at startup and is never re-resolved.

use crate::error::{RelayError, RelayResult};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net;
use tracing::{debug, warn};

/// A resolved connection target: literal IP plus the port exactly as it was
/// written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    ip: IpAddr,
    port: String,
    port_num: u16,
}

impl TargetAddress {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port_num)
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

/// Split `host:port` into its two halves.
///
/// Accepts exactly one host/port pair. Bracketed IPv6 literals
/// (`[2001:db8::1]:7302`) count as one pair; bare IPv6 literals do not.
pub fn split_host_port(address: &str) -> RelayResult<(&str, &str)> {
    let invalid =
        || RelayError::Config(format!("invalid address, expected host:port: {address}"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
        if host.contains(['[', ']']) {
            return Err(invalid());
        }
        (host, port)
    } else {
        let (host, port) = address.split_once(':').ok_or_else(invalid)?;
        if port.contains(':') {
            return Err(invalid());
        }
        (host, port)
    };

    if host.is_empty() || port.is_empty() {
        return Err(invalid());
    }
    Ok((host, port))
}

/// Pick one address from resolver output.
///
/// The first candidate is kept unless it is IPv6, in which case any later
/// IPv4 or IPv4-mapped IPv6 candidate replaces it. The scan stops at the first
/// pure IPv4 selection.
pub fn select_preferred(candidates: &[IpAddr]) -> Option<IpAddr> {
    let mut selected: Option<IpAddr> = None;
    for &candidate in candidates {
        match selected {
            None => selected = Some(candidate),
            Some(_) if is_ipv4_like(candidate) => selected = Some(candidate),
            Some(_) => continue,
        }
        if candidate.is_ipv4() {
            break;
        }
    }
    selected
}

fn is_ipv4_like(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => true,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some(),
    }
}

/// Resolve `host:port` with the platform resolver.
pub async fn resolve_target(address: &str) -> RelayResult<TargetAddress> {
    resolve_target_with(address, |host, port| async move {
        let addrs = net::lookup_host((host.as_str(), port)).await?;
        Ok::<_, io::Error>(addrs.map(|addr| addr.ip()).collect::<Vec<IpAddr>>())
    })
    .await
}

/// Resolve `host:port` using a caller-supplied lookup function.
pub async fn resolve_target_with<F, Fut>(address: &str, lookup: F) -> RelayResult<TargetAddress>
where
    F: FnOnce(String, u16) -> Fut,
    Fut: Future<Output = io::Result<Vec<IpAddr>>>,
{
    let (host, port) = split_host_port(address)?;
    let port_num: u16 = port
        .parse()
        .map_err(|_| RelayError::Config(format!("invalid port in address {address}: {port}")))?;

    let candidates = lookup(host.to_string(), port_num).await.map_err(|e| {
        warn!(host = %host, error = %e, "DNS resolution failed");
        RelayError::Resolution(format!("failed to resolve host {host}: {e}"))
    })?;

    let ip = select_preferred(&candidates).ok_or_else(|| {
        RelayError::Resolution(format!("could not select any resolved address for {host}"))
    })?;

    let target = TargetAddress {
        ip,
        port: port.to_string(),
        port_num,
    };
    debug!(host = %host, candidates = candidates.len(), target = %target, "resolved target");
    Ok(target)
}
