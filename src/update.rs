//! Provider update requests for educ
//!
//! Builds the authenticated `GET /nic/update` request for one hostname, sends
//! it, and classifies the provider's answer into an [`UpdateOutcome`].

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tracing::debug;
use urlencoding::encode;
use zeroize::Zeroizing;

use crate::constants::{
    AUTH_TOKEN_MAX, MAINTAINER_CONTACT, PRODUCT_NAME, PRODUCT_VERSION, UPDATE_RESPONSE_MAX,
    UPDATE_SCRIPT_PATH, WAN_ADDRESS_SENTINEL,
};
use crate::settings::Settings;
use crate::transport::{receive_response, Transport, TransportError};

//==============================================================================
// Types
//==============================================================================

/// Classification of a provider response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The hostname now points at the address
    Good,
    /// The address was already current
    NoChange,
    /// The hostname does not exist under the account
    NoHost,
    /// Invalid username/password combination
    BadAuth,
    /// The client was rejected by the provider
    BadAgent,
    /// The requested feature needs a paid account
    NotDonator,
    /// The account is blocked due to abuse
    Abuse,
    /// Provider-side failure (`911`); retry later
    ServerError,
    /// Anything the classifier does not recognize
    Unknown,
}

impl UpdateOutcome {
    /// Returns true for outcomes no retry can fix
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::NoHost | Self::BadAuth | Self::BadAgent | Self::NotDonator | Self::Abuse
        )
    }

    /// Returns true when the hostname is up to date
    pub fn is_success(self) -> bool {
        matches!(self, Self::Good | Self::NoChange)
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Good => "DNS hostname update successful",
            Self::NoChange => "IP address is current",
            Self::NoHost => "hostname supplied does not exist under specified account",
            Self::BadAuth => "invalid username password combination",
            Self::BadAgent => "client disabled by the provider (badagent)",
            Self::NotDonator => "bad update request, feature not available",
            Self::Abuse => "username blocked due to abuse",
            Self::ServerError => "fatal error on the server side",
            Self::Unknown => "unknown server response",
        };
        f.write_str(text)
    }
}

/// Status tokens the provider may answer with
const RESPONSES: &[(&str, UpdateOutcome)] = &[
    ("good", UpdateOutcome::Good),
    ("nochg", UpdateOutcome::NoChange),
    ("nohost", UpdateOutcome::NoHost),
    ("badauth", UpdateOutcome::BadAuth),
    ("badagent", UpdateOutcome::BadAgent),
    ("!donator", UpdateOutcome::NotDonator),
    ("abuse", UpdateOutcome::Abuse),
    ("911", UpdateOutcome::ServerError),
];

/// Errors of one update attempt
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("encoded credentials too long ({0} bytes, max 499)")]
    CredentialsTooLong(usize),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A ready-to-send update request
///
/// The headers carry the credentials and are wiped on drop.
pub struct UpdateRequest {
    pub request_line: String,
    pub headers: Zeroizing<Vec<String>>,
}

impl UpdateRequest {
    /// Renders the request for logging, with the credentials masked
    pub fn redacted(&self) -> String {
        let mut lines = vec![self.request_line.clone()];
        for header in self.headers.iter() {
            match header.split_once(": ") {
                Some(("Authorization", _)) => lines.push("Authorization: ***REDACTED***".to_string()),
                _ => lines.push(header.clone()),
            }
        }
        lines.join("\\r\\n")
    }
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("request_line", &self.request_line)
            .finish_non_exhaustive()
    }
}

//==============================================================================
// Classification
//==============================================================================

/// Returns the last line of `text` after trimming, or `None` when blank
pub fn last_line(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let line = trimmed
        .rsplit_once('\n')
        .map(|(_, last)| last)
        .unwrap_or(trimmed);
    Some(line.trim())
}

/// Classifies one status line: `<status> <optional free text>`
///
/// The status token (up to the first space) is matched case-insensitively.
///
/// # Examples
///
/// ```
/// use educ::update::{classify_status_line, UpdateOutcome};
///
/// assert_eq!(classify_status_line("good 1.2.3.4"), UpdateOutcome::Good);
/// assert_eq!(classify_status_line("nochg"), UpdateOutcome::NoChange);
/// assert_eq!(classify_status_line("nochgg"), UpdateOutcome::Unknown);
/// assert_eq!(classify_status_line("911 emergency"), UpdateOutcome::ServerError);
/// ```
pub fn classify_status_line(line: &str) -> UpdateOutcome {
    let line = line.to_ascii_lowercase();
    let status = line
        .split_once(' ')
        .map(|(status, _)| status)
        .unwrap_or(&line);

    RESPONSES
        .iter()
        .find(|(token, _)| *token == status)
        .map(|(_, outcome)| *outcome)
        .unwrap_or(UpdateOutcome::Unknown)
}

/// Classifies a whole provider response by its final line
pub fn classify_response(body: &str) -> UpdateOutcome {
    match last_line(body) {
        Some(line) => {
            debug!("server response: last line = {:?}", line);
            classify_status_line(line)
        }
        None => UpdateOutcome::Unknown,
    }
}

//==============================================================================
// Request Builder
//==============================================================================

/// Returns the `User-Agent` value: `<product>/<version> <contact>`
pub fn user_agent() -> String {
    format!("{}/{} {}", PRODUCT_NAME, PRODUCT_VERSION, MAINTAINER_CONTACT)
}

/// Base64-encodes `username:password` for the `Authorization` header
///
/// # Errors
///
/// Returns [`UpdateError::CredentialsTooLong`] when the token does not fit
/// the 500-byte header buffer along with its terminator.
pub fn basic_auth_token(username: &str, password: &str) -> Result<Zeroizing<String>, UpdateError> {
    let credentials = Zeroizing::new(format!("{}:{}", username, password));
    let token = Zeroizing::new(STANDARD.encode(credentials.as_bytes()));
    // The buffer also holds a terminating NUL
    if token.len() >= AUTH_TOKEN_MAX {
        return Err(UpdateError::CredentialsTooLong(token.len()));
    }
    Ok(token)
}

/// Builds the update request for `hostname`
///
/// When `ip_addr` is `WAN_address` the provider uses the address the request
/// comes from; otherwise the address is sent explicitly as `myip`.
pub fn build_request(settings: &Settings, hostname: &str) -> Result<UpdateRequest, UpdateError> {
    let ip_addr = settings.get("ip_addr");
    let request_line = if ip_addr == WAN_ADDRESS_SENTINEL {
        format!(
            "GET {}?hostname={} HTTP/1.0",
            UPDATE_SCRIPT_PATH,
            encode(hostname)
        )
    } else {
        format!(
            "GET {}?hostname={}&myip={} HTTP/1.0",
            UPDATE_SCRIPT_PATH,
            encode(hostname),
            encode(ip_addr)
        )
    };

    let token = basic_auth_token(settings.get("username"), settings.get("password"))?;
    let headers = Zeroizing::new(vec![
        format!("Host: {}", settings.get("sp_hostname")),
        format!("Authorization: Basic {}", token.as_str()),
        format!("User-Agent: {}", user_agent()),
    ]);

    Ok(UpdateRequest {
        request_line,
        headers,
    })
}

//==============================================================================
// Update
//==============================================================================

/// Sends one update request for `hostname` and classifies the answer
///
/// The connection is always closed before returning, on error paths too.
pub async fn update_host(
    transport: &dyn Transport,
    settings: &Settings,
    hostname: &str,
) -> Result<UpdateOutcome, UpdateError> {
    let request = build_request(settings, hostname)?;
    let provider = settings.get("sp_hostname");
    let port = settings.get_int("port", 1, i64::from(u16::MAX), 80) as u16;

    let mut conn = transport.connect(provider, port).await?;

    debug!("sending http GET request: {}", request.redacted());
    let exchange = async {
        conn.send(&request.request_line, &request.headers).await?;
        receive_response(conn.as_mut(), UPDATE_RESPONSE_MAX).await
    }
    .await;
    conn.disconnect().await;

    let body = exchange?;
    let text = String::from_utf8_lossy(&body);
    debug!("server response: {:?}", text);
    Ok(classify_response(&text))
}

//==============================================================================
// Tests
//==============================================================================
