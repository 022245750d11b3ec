//! Settings store for educ
//!
//! Settings come from an immutable table of defaults and a separate map of
//! overrides installed from the config file. A lookup consults the overrides
//! first and falls back to the defaults.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

use crate::constants::{
    ALLOWED_PORTS, MAX_PASSWORD_LENGTH, MAX_USERNAME_LENGTH, WAN_ADDRESS_SENTINEL,
};
use crate::validation::{validate_ip_addr_setting, validate_service_hostname};

//==============================================================================
// Types
//==============================================================================

/// Value type of a setting, checked when an override is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    String,
    Integer,
    Boolean,
}

/// One entry of the defaults table
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub name: &'static str,
    pub kind: SettingType,
    pub default: &'static str,
    /// Prompt text shown by the config wizard
    pub description: &'static str,
}

/// Every setting the program understands, in config-file order
pub const SETTINGS: &[SettingSpec] = &[
    SettingSpec {
        name: "username",
        kind: SettingType::String,
        default: "ChangeMe",
        description: "Your username.",
    },
    SettingSpec {
        name: "password",
        kind: SettingType::String,
        default: "ChangeMe",
        description: "Your password. (Will not echo!)",
    },
    SettingSpec {
        name: "hostname",
        kind: SettingType::String,
        default: "host1.domain.com|host2.domain.com",
        description: "The hostname to be updated. (Multiple hosts are separated with a vertical\nbar.)",
    },
    SettingSpec {
        name: "ip_addr",
        kind: SettingType::String,
        default: WAN_ADDRESS_SENTINEL,
        description: "Associate the hostname(s) with this IP address. If the special value\n'WAN_address' is specified, the associated IP address will be the WAN\naddress of the computer that the client is running on.",
    },
    SettingSpec {
        name: "sp_hostname",
        kind: SettingType::String,
        default: "dynupdate.noip.com",
        description: "Service provider hostname. (The update request is sent to this hostname\nor IP.)",
    },
    SettingSpec {
        name: "port",
        kind: SettingType::Integer,
        default: "80",
        description: "Target port? (443 = enable TLS.)",
    },
    SettingSpec {
        name: "update_interval_seconds",
        kind: SettingType::Integer,
        default: "1800",
        description: "Update interval in seconds. If a value less than 600 is entered, the\nprogram will fall back to 1800 in order to avoid flooding the server with\nrequests.",
    },
    SettingSpec {
        name: "primary_ip_lookup_srv",
        kind: SettingType::String,
        default: "ip1.dynupdate.no-ip.com",
        description: "Server used to determine your external IP.",
    },
    SettingSpec {
        name: "backup_ip_lookup_srv",
        kind: SettingType::String,
        default: "ip2.dynupdate.no-ip.com",
        description: "Backup server for IP lookups.",
    },
    SettingSpec {
        name: "force_update",
        kind: SettingType::Boolean,
        default: "YES",
        description: "Even if your external IP address hasn't changed between update intervals,\nOR if the program cannot determine your external IP, force an update.\nThis setting should be YES if 'ip_addr' is not 'WAN_address'.",
    },
];

/// Errors raised while installing or validating settings
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("no such setting: {0}")]
    Unknown(String),

    #[error("setting {0} is given more than once")]
    Duplicate(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Looks up the defaults-table entry for `name`
pub fn spec(name: &str) -> Option<&'static SettingSpec> {
    SETTINGS.iter().find(|s| s.name == name)
}

/// Checks that `value` is acceptable for a setting of type `kind`
///
/// Booleans must be `yes`, `YES`, `no` or `NO`, integers all ASCII digits,
/// strings free of whitespace and double quotes.
pub fn check_value(kind: SettingType, value: &str) -> Result<(), &'static str> {
    match kind {
        SettingType::Boolean => match value {
            "yes" | "YES" | "no" | "NO" => Ok(()),
            _ => Err("booleans must be either: yes, YES, no or NO"),
        },
        SettingType::Integer => {
            if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                Ok(())
            } else {
                Err("integer not all numeric")
            }
        }
        SettingType::String => {
            if value.chars().any(|c| c.is_ascii_whitespace() || c == '\u{b}' || c == '"') {
                Err("illegal characters in string")
            } else {
                Ok(())
            }
        }
    }
}

//==============================================================================
// Settings
//==============================================================================

/// Defaults plus the overrides read from the config file
///
/// Override values are wiped from memory when the store is dropped.
#[derive(Default)]
pub struct Settings {
    overrides: HashMap<&'static str, Zeroizing<String>>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.overrides.keys().collect();
        names.sort();
        f.debug_struct("Settings").field("overrides", &names).finish()
    }
}

impl Settings {
    /// Creates a store holding only the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an override after checking name, uniqueness and value type
    pub fn install(&mut self, name: &str, value: &str) -> Result<(), SettingsError> {
        let spec = spec(name).ok_or_else(|| SettingsError::Unknown(name.to_string()))?;
        if self.overrides.contains_key(spec.name) {
            return Err(SettingsError::Duplicate(name.to_string()));
        }
        check_value(spec.kind, value).map_err(|reason| SettingsError::InvalidValue {
            name: name.to_string(),
            reason: reason.to_string(),
        })?;
        self.overrides
            .insert(spec.name, Zeroizing::new(value.to_string()));
        Ok(())
    }

    /// Returns the value of `name`, or an empty string for unknown settings
    pub fn get(&self, name: &str) -> &str {
        match self.overrides.get(name) {
            Some(v) => v.as_str(),
            None => spec(name).map(|s| s.default).unwrap_or(""),
        }
    }

    /// Returns `name` as an integer in `lo..=hi`, or `fallback`
    pub fn get_int(&self, name: &str, lo: i64, hi: i64, fallback: i64) -> i64 {
        match self.get(name).trim().parse::<i64>() {
            Ok(v) if (lo..=hi).contains(&v) => v,
            _ => {
                warn!(
                    "setting {} out of range {}-{}: fallback value is {}",
                    name, lo, hi, fallback
                );
                fallback
            }
        }
    }

    /// Returns `name` as a boolean, or `fallback`
    pub fn get_bool(&self, name: &str, fallback: bool) -> bool {
        match spec(name) {
            Some(s) if s.kind == SettingType::Boolean => {}
            _ => {
                warn!("setting {} is not a boolean", name);
                return fallback;
            }
        }
        match self.get(name) {
            "yes" | "YES" => true,
            "no" | "NO" => false,
            _ => {
                warn!("setting {} has an invalid value", name);
                fallback
            }
        }
    }

    /// Validates the settings that must be sane before any network activity
    ///
    /// # Errors
    ///
    /// - username or password empty or too long
    /// - `ip_addr` neither `WAN_address` nor an IPv4 address
    /// - a service hostname empty, too long or with invalid characters
    /// - `port` not one of 80, 443, 8245
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |name: &str, reason: String| SettingsError::InvalidValue {
            name: name.to_string(),
            reason,
        };

        let username = self.get("username");
        let password = self.get("password");
        if username.is_empty() || password.is_empty() {
            return Err(invalid(
                "username",
                "empty username or password".to_string(),
            ));
        }
        if username.len() > MAX_USERNAME_LENGTH {
            return Err(invalid(
                "username",
                format!("too long (max {})", MAX_USERNAME_LENGTH),
            ));
        }
        if password.len() > MAX_PASSWORD_LENGTH {
            return Err(invalid(
                "password",
                format!("too long (max {})", MAX_PASSWORD_LENGTH),
            ));
        }

        validate_ip_addr_setting(self.get("ip_addr"))
            .map_err(|e| invalid("ip_addr", e.to_string()))?;

        for name in ["sp_hostname", "primary_ip_lookup_srv", "backup_ip_lookup_srv"] {
            validate_service_hostname(self.get(name)).map_err(|e| invalid(name, e.to_string()))?;
        }

        if !ALLOWED_PORTS.contains(&self.get("port")) {
            return Err(invalid("port", "bogus port number".to_string()));
        }

        Ok(())
    }
}

//==============================================================================
// Tests
//==============================================================================
