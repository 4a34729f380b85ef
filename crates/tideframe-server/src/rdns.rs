//! Reverse DNS validation of peer addresses.
//!
//! On connect, the peer IP is resolved to a host name and the forward
//! records of that name are checked for the original IP. Only a
//! round-trip-confirmed host is disclosed later (whois, signon burst);
//! everything else falls back to the dotted quad. The whole exercise is
//! bounded at five seconds and never fails loudly.

use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use tokio::sync::watch;

const RDNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Kick off validation for `ip`; the result arrives on the returned
/// channel as `Some(host)` (the validated host, or the IP itself).
pub fn spawn(ip: IpAddr) -> watch::Receiver<Option<String>> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let host = tokio::time::timeout(RDNS_TIMEOUT, validate(ip))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| ip.to_string());
        let _ = tx.send(Some(host));
    });
    rx
}

/// A channel that already carries `host`; for transports without a peer
/// address and for tests.
pub fn resolved(host: &str) -> watch::Receiver<Option<String>> {
    // A watch channel retains its last value after the sender is gone.
    let (_tx, rx) = watch::channel(Some(host.to_string()));
    rx
}

async fn validate(ip: IpAddr) -> Option<String> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().ok()?;

    let ptr = resolver.reverse_lookup(ip).await.ok()?;
    let name = ptr.iter().next()?.to_utf8();
    let name = name.trim_end_matches('.');

    // Confirm the forward records contain the peer address.
    let forward = resolver.lookup_ip(name).await.ok()?;
    forward.iter().any(|addr| addr == ip).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_channel_is_immediately_ready() {
        let rx = resolved("198.51.100.7");
        assert_eq!(rx.borrow().as_deref(), Some("198.51.100.7"));
    }
}
