//! External IP change detection
//!
//! Asks a lookup service which address our requests come from and compares
//! it with the last one seen. Lookups are always plaintext on port 80.

use std::net::{Ipv4Addr, SocketAddr};

use tracing::{debug, info, warn};

use crate::constants::{LOOKUP_PATH, LOOKUP_PORT, LOOKUP_RESPONSE_MAX};
use crate::settings::Settings;
use crate::transport::{receive_response, Transport};
use crate::update::{last_line, user_agent};

/// Result of one IP check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpChange {
    /// An update should be sent
    Changed,
    /// Nothing to do this cycle
    NoChange,
}

/// Extracts the address from a lookup response body
///
/// The address is the last line of the trimmed text.
///
/// # Examples
///
/// ```
/// use std::net::Ipv4Addr;
/// use educ::ip_lookup::parse_lookup_response;
///
/// let body = "HTTP/1.0 200 OK\r\n\r\n203.0.113.5\r\n";
/// assert_eq!(parse_lookup_response(body), Some(Ipv4Addr::new(203, 0, 113, 5)));
/// assert_eq!(parse_lookup_response("<html>oops</html>"), None);
/// ```
pub fn parse_lookup_response(body: &str) -> Option<Ipv4Addr> {
    last_line(body)?.parse().ok()
}

/// Remembers the last external address and decides whether it changed
#[derive(Debug, Default)]
pub struct IpChangeDetector {
    last_known: Option<Ipv4Addr>,
}

impl IpChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last address parsed from a lookup, if any
    pub fn last_known(&self) -> Option<Ipv4Addr> {
        self.last_known
    }

    /// Compares a received lookup body with the stored address
    ///
    /// The stored address only moves when the body holds a valid address
    /// that differs from it.
    pub fn observe(&mut self, body: &str) -> IpChange {
        let Some(addr) = parse_lookup_response(body) else {
            warn!("unable to parse IP address from lookup response");
            debug!("lookup response: {:?}", body);
            return IpChange::NoChange;
        };

        if self.last_known == Some(addr) {
            debug!("external IP unchanged ({})", addr);
            return IpChange::NoChange;
        }

        match self.last_known.replace(addr) {
            Some(old) => info!("external IP changed: {} -> {}", old, addr),
            None => info!("external IP is {}", addr),
        }
        IpChange::Changed
    }

    /// Runs one IP check against the configured lookup services
    ///
    /// Failing to reach either lookup service counts as [`IpChange::Changed`];
    /// a lookup that answers with something unusable counts as
    /// [`IpChange::NoChange`].
    pub async fn check(&mut self, transport: &dyn Transport, settings: &Settings) -> IpChange {
        if settings.get_bool("force_update", true) {
            debug!("force_update set, skipping IP lookup");
            return IpChange::Changed;
        }

        let Some((host, addrs)) = resolve_lookup_host(transport, settings).await else {
            warn!("no IP lookup service could be resolved");
            return IpChange::Changed;
        };

        let mut conn = match transport.connect_addrs(host, &addrs).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("IP lookup: {}", e);
                return IpChange::Changed;
            }
        };

        let request_line = format!("GET {} HTTP/1.0", LOOKUP_PATH);
        let headers = [
            format!("Host: {}", host),
            format!("User-Agent: {}", user_agent()),
        ];
        let exchange = async {
            conn.send(&request_line, &headers).await?;
            receive_response(conn.as_mut(), LOOKUP_RESPONSE_MAX).await
        }
        .await;
        conn.disconnect().await;

        match exchange {
            Ok(body) => self.observe(&String::from_utf8_lossy(&body)),
            Err(e) => {
                warn!("IP lookup via {} failed: {}", host, e);
                IpChange::NoChange
            }
        }
    }
}

/// Resolves the primary lookup service, falling back to the backup
async fn resolve_lookup_host<'a>(
    transport: &dyn Transport,
    settings: &'a Settings,
) -> Option<(&'a str, Vec<SocketAddr>)> {
    for name in ["primary_ip_lookup_srv", "backup_ip_lookup_srv"] {
        let host = settings.get(name);
        match transport.resolve(host, LOOKUP_PORT).await {
            Ok(addrs) => return Some((host, addrs)),
            Err(e) => warn!("{}", e),
        }
    }
    None
}

//==============================================================================
// Tests
//==============================================================================
