//! Common constants used throughout the educ application

//==============================================================================
// Program Identity
//==============================================================================

/// Product name sent in the `User-Agent` header
pub const PRODUCT_NAME: &str = "educ";

/// Program version
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maintainer contact sent in the `User-Agent` header
pub const MAINTAINER_CONTACT: &str = "educ@users.noreply.github.com";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/educ_noip.conf";

//==============================================================================
// Wire Protocol Constants
//==============================================================================

/// Path of the provider update script
pub const UPDATE_SCRIPT_PATH: &str = "/nic/update";

/// Path requested from the IP lookup service
pub const LOOKUP_PATH: &str = "/index.html";

/// Port used for IP lookups (always plaintext)
pub const LOOKUP_PORT: u16 = 80;

/// Provider port that selects TLS
pub const TLS_PORT: &str = "443";

/// Ports accepted by the strict settings check
pub const ALLOWED_PORTS: &[&str] = &["80", "443", "8245"];

/// Sentinel `ip_addr` value meaning "whatever address the request comes from"
pub const WAN_ADDRESS_SENTINEL: &str = "WAN_address";

/// Terminator appended to every request
pub const MESSAGE_TERMINATOR: &str = "\r\n\r\n";

//==============================================================================
// Buffer Limits
//==============================================================================

/// Maximum bytes read from the provider per response read
pub const UPDATE_RESPONSE_MAX: usize = 2000;

/// Maximum bytes read from the IP lookup service
pub const LOOKUP_RESPONSE_MAX: usize = 1000;

/// Size of the Base64 credentials buffer, terminator included
pub const AUTH_TOKEN_MAX: usize = 500;

/// Maximum hostnames updated per pass
pub const PERMITTED_HOSTS_LIMIT: usize = 10;

//==============================================================================
// Timeout and Interval Constants
//==============================================================================

/// Seconds to wait for readable data on any receive
pub const RECEIVE_TIMEOUT_SECS: u64 = 10;

/// Settings key for the update interval
pub const UPDATE_INTERVAL_SETTING: &str = "update_interval_seconds";

/// Minimum update interval (10 minutes)
pub const MIN_UPDATE_INTERVAL_SECS: i64 = 600;

/// Maximum update interval (2 days)
pub const MAX_UPDATE_INTERVAL_SECS: i64 = 172_800;

/// Interval used when the configured one is out of range (30 minutes)
pub const FALLBACK_UPDATE_INTERVAL_SECS: i64 = 1800;

/// Delay before retrying after the provider reported a server-side failure
pub const SERVER_ERROR_RETRY_SECS: u64 = 1800;

//==============================================================================
// TLS Constants
//==============================================================================

/// Maximum number of intermediate certificates accepted in a peer chain
pub const TLS_VERIFY_DEPTH: usize = 4;

//==============================================================================
// Validation Constants
//==============================================================================

/// Maximum username length in bytes
pub const MAX_USERNAME_LENGTH: usize = 50;

/// Maximum password length in bytes
pub const MAX_PASSWORD_LENGTH: usize = 120;

/// Maximum service hostname length in bytes
pub const MAX_SERVICE_HOSTNAME_LENGTH: usize = 255;

/// Maximum identifier length in the config file
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Maximum value length in the config file
pub const MAX_ARGUMENT_LENGTH: usize = 511;

//==============================================================================
// Process Constants
//==============================================================================

/// Unprivileged user assumed after start as root
pub const UNPRIVILEGED_USER: &str = "nobody";

/// Working directory after dropping privileges
pub const UNPRIVILEGED_DIR: &str = "/tmp";
