//! Validation utilities for educ
//!
//! This module provides validation functions for the hostnames and addresses
//! found in the settings: the provider and lookup-service hostnames, the
//! `ip_addr` setting, and the pipe-delimited list of hostnames to update.

use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};

use crate::constants::{MAX_SERVICE_HOSTNAME_LENGTH, WAN_ADDRESS_SENTINEL};

/// Validates the hostname of a service the client connects to
///
/// Used for `sp_hostname`, `primary_ip_lookup_srv` and `backup_ip_lookup_srv`.
///
/// # Validation Rules
///
/// - Must not be empty
/// - At most 255 bytes
/// - Only letters, digits, `-`, `.` and `:` (the colon admits IPv6 literals)
///
/// # Examples
///
/// ```
/// use educ::validation::validate_service_hostname;
///
/// assert!(validate_service_hostname("dynupdate.noip.com").is_ok());
/// assert!(validate_service_hostname("192.0.2.1").is_ok());
/// assert!(validate_service_hostname("").is_err());
/// assert!(validate_service_hostname("dyn_update.example").is_err());
/// ```
pub fn validate_service_hostname(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(anyhow!("empty setting"));
    }
    if host.len() > MAX_SERVICE_HOSTNAME_LENGTH {
        return Err(anyhow!(
            "name too long (max {} characters, got {})",
            MAX_SERVICE_HOSTNAME_LENGTH,
            host.len()
        ));
    }
    if let Some(ch) = host
        .chars()
        .find(|&c| !(c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':'))
    {
        return Err(anyhow!("invalid character: '{}'", ch));
    }
    Ok(())
}

/// Validates the `ip_addr` setting
///
/// Accepts the `WAN_address` sentinel or a dotted-quad IPv4 address.
pub fn validate_ip_addr_setting(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("empty setting"));
    }
    if value == WAN_ADDRESS_SENTINEL {
        return Ok(());
    }
    value
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| anyhow!("bogus ipv4 address: {}", value))
}

/// Checks whether a character may appear in the `hostname` setting
fn is_hostname_list_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '|'
}

/// Splits the pipe-delimited `hostname` setting into its hostnames
///
/// The whole setting is checked against the allowed character set before
/// splitting, so a bad list is rejected before any network activity. Empty
/// entries (`a.com||b.com`) are skipped. Order is preserved.
///
/// # Errors
///
/// - The setting is empty
/// - It contains a character other than letters, digits, `-`, `.` or `|`
/// - It yields no hostnames at all (e.g. `"|||"`)
///
/// # Examples
///
/// ```
/// use educ::validation::split_hostnames;
///
/// let hosts = split_hostnames("a.com|b.com|c.com").unwrap();
/// assert_eq!(hosts, vec!["a.com", "b.com", "c.com"]);
/// assert!(split_hostnames("a.com|b com").is_err());
/// ```
pub fn split_hostnames(setting: &str) -> Result<Vec<String>> {
    if setting.is_empty() {
        return Err(anyhow!("no hostnames to update (setting empty)"));
    }
    if let Some(ch) = setting.chars().find(|&c| !is_hostname_list_char(c)) {
        return Err(anyhow!(
            "invalid chars in hostname setting: first invalid char was '{}'",
            ch
        ));
    }

    let hosts: Vec<String> = setting
        .split('|')
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();

    if hosts.is_empty() {
        return Err(anyhow!("zero hostnames assigned"));
    }
    Ok(hosts)
}
