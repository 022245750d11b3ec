//! educ - dynamic DNS update client
//!
//! Architecture:
//! - One current-thread tokio runtime, one task, no locking
//! - External IP checked over plaintext HTTP against a lookup service
//! - Provider updates over plaintext or TLS (rustls), chosen once by port
//! - Fixed retry policy: 30 minutes after a provider failure, else the
//!   configured interval

pub mod config;
pub mod constants;
pub mod daemon;
pub mod ip_lookup;
pub mod process;
pub mod settings;
pub mod tls;
pub mod transport;
pub mod update;
pub mod validation;
pub mod wizard;

#[cfg(test)]
mod testing;
