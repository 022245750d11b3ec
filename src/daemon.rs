//! Daemon module for educ
//!
//! This module contains the update cycle: check the external IP, update every
//! configured hostname when needed, sleep, repeat.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

use crate::constants::{
    FALLBACK_UPDATE_INTERVAL_SECS, MAX_UPDATE_INTERVAL_SECS, MIN_UPDATE_INTERVAL_SECS,
    PERMITTED_HOSTS_LIMIT, SERVER_ERROR_RETRY_SECS, UPDATE_INTERVAL_SETTING,
};
use crate::ip_lookup::{IpChange, IpChangeDetector};
use crate::settings::Settings;
use crate::transport::Transport;
use crate::update::{update_host, UpdateOutcome};
use crate::validation::split_hostnames;

//==============================================================================
// Constants
//==============================================================================

/// Sleep after the provider reported a server-side failure (30 minutes)
pub const SERVER_ERROR_RETRY: Duration = Duration::from_secs(SERVER_ERROR_RETRY_SECS);

//==============================================================================
// State
//==============================================================================

/// Controls how the daemon cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingContext {
    /// False runs a single unconditional pass
    pub cycle_enabled: bool,
    /// Set when the provider answered `911` during the last pass
    pub retry_after_server_error: bool,
}

impl PollingContext {
    pub fn new(cycle_enabled: bool) -> Self {
        Self {
            cycle_enabled,
            retry_after_server_error: false,
        }
    }
}

/// Why a pass ended before its last hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The provider answered `911`
    ServerError,
    /// The provider answered something unrecognized
    UnknownResponse,
    /// The attempt failed before a response was classified
    AttemptFailed(String),
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether the hostnames were attempted at all
    pub updated: bool,
    /// Hostnames the provider reported as current
    pub hosts_updated: usize,
    /// Set when the pass stopped early
    pub stopped: Option<StopReason>,
    /// How long to sleep before the next cycle
    pub sleep: Duration,
}

/// Conditions that end the program with a failure status
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fatal response for {host}: {outcome}")]
    Fatal { host: String, outcome: UpdateOutcome },
}

/// Returns the time to sleep after a pass
///
/// A server-side failure always waits 30 minutes; otherwise the configured
/// interval is used, falling back to 1800 seconds when outside 600..=172800.
pub fn sleep_duration(settings: &Settings, retry_after_server_error: bool) -> Duration {
    if retry_after_server_error {
        return SERVER_ERROR_RETRY;
    }
    let secs = settings.get_int(
        UPDATE_INTERVAL_SETTING,
        MIN_UPDATE_INTERVAL_SECS,
        MAX_UPDATE_INTERVAL_SECS,
        FALLBACK_UPDATE_INTERVAL_SECS,
    );
    Duration::from_secs(secs.unsigned_abs())
}

//==============================================================================
// Daemon
//==============================================================================

/// The update cycle controller
///
/// Owns the settings, both transports and the IP detector; nothing is shared.
pub struct Daemon {
    settings: Settings,
    /// Transport for the provider, plain or TLS by configured port
    provider: Box<dyn Transport>,
    /// Transport for IP lookups, always plain
    lookup: Box<dyn Transport>,
    detector: IpChangeDetector,
    polling: PollingContext,
    /// Timestamp of the last pass where every hostname was current (UTC)
    last_success: Option<DateTime<Utc>>,
}

impl Daemon {
    /// Creates a new daemon instance
    pub fn new(
        settings: Settings,
        provider: Box<dyn Transport>,
        lookup: Box<dyn Transport>,
        cycle_enabled: bool,
    ) -> Self {
        Self {
            settings,
            provider,
            lookup,
            detector: IpChangeDetector::new(),
            polling: PollingContext::new(cycle_enabled),
            last_success: None,
        }
    }

    pub fn polling(&self) -> PollingContext {
        self.polling
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Runs the daemon main loop
    ///
    /// Returns `Ok(())` on a terminating signal, or after the single pass when
    /// cycling is disabled. Signals are observed during the pass too; the open
    /// connection, if any, is dropped with the pass.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(
            "Mode: {}",
            if self.polling.cycle_enabled {
                "cycling"
            } else {
                "single update"
            }
        );

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        loop {
            let report = tokio::select! {
                _ = sigterm.recv() => { info!("SIGTERM received"); break; }
                _ = sigint.recv() => { info!("SIGINT received"); break; }
                _ = sighup.recv() => { info!("SIGHUP received"); break; }
                report = self.run_cycle() => report?,
            };

            if !self.polling.cycle_enabled {
                break;
            }

            match self.last_success {
                Some(at) => info!("last successful update: {}", at.to_rfc3339()),
                None => info!("no successful update yet"),
            }
            info!("sleeping for {} seconds", report.sleep.as_secs());

            tokio::select! {
                _ = sigterm.recv() => { info!("SIGTERM received"); break; }
                _ = sigint.recv() => { info!("SIGINT received"); break; }
                _ = sighup.recv() => { info!("SIGHUP received"); break; }
                _ = tokio::time::sleep(report.sleep) => {}
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Runs one cycle: IP check, then the hostname pass if needed
    ///
    /// # Errors
    ///
    /// - [`CycleError::Config`] when the hostname list is unusable; checked
    ///   before any update request is sent
    /// - [`CycleError::Fatal`] when the provider rejects the account or host
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.polling.retry_after_server_error = false;

        let needs_update = if self.polling.cycle_enabled {
            self.detector
                .check(self.lookup.as_ref(), &self.settings)
                .await
                == IpChange::Changed
        } else {
            true
        };

        let mut report = CycleReport {
            updated: needs_update,
            hosts_updated: 0,
            stopped: None,
            sleep: Duration::ZERO,
        };

        if needs_update {
            let (hosts_updated, stopped) = self.update_hosts().await?;
            if stopped.is_none() {
                self.last_success = Some(Utc::now());
            }
            report.hosts_updated = hosts_updated;
            report.stopped = stopped;
        } else {
            debug!("no update needed");
        }

        report.sleep = sleep_duration(&self.settings, self.polling.retry_after_server_error);
        Ok(report)
    }

    /// Attempts every configured hostname in order
    ///
    /// Returns how many were updated and why the pass stopped early, if it did.
    async fn update_hosts(&mut self) -> Result<(usize, Option<StopReason>), CycleError> {
        let mut hosts = split_hostnames(self.settings.get("hostname"))
            .map_err(|e| CycleError::Config(e.to_string()))?;
        if hosts.len() > PERMITTED_HOSTS_LIMIT {
            warn!(
                "only {} hostnames are updated per pass, ignoring {} more",
                PERMITTED_HOSTS_LIMIT,
                hosts.len() - PERMITTED_HOSTS_LIMIT
            );
            hosts.truncate(PERMITTED_HOSTS_LIMIT);
        }

        let mut updated = 0;
        for host in &hosts {
            let outcome = match update_host(self.provider.as_ref(), &self.settings, host).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("update of {} failed: {}", host, e);
                    return Ok((updated, Some(StopReason::AttemptFailed(e.to_string()))));
                }
            };

            if outcome.is_success() {
                info!("{}: {}", host, outcome);
                updated += 1;
                continue;
            }
            if outcome.is_fatal() {
                error!("{}: {}", host, outcome);
                return Err(CycleError::Fatal {
                    host: host.clone(),
                    outcome,
                });
            }

            if outcome == UpdateOutcome::ServerError {
                warn!("{}: {}, retrying in 30 minutes", host, outcome);
                self.polling.retry_after_server_error = true;
                return Ok((updated, Some(StopReason::ServerError)));
            }
            warn!("{}: {}", host, outcome);
            return Ok((updated, Some(StopReason::UnknownResponse)));
        }

        Ok((updated, None))
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, Step};
    use serial_test::serial;

    fn settings_with(pairs: &[(&str, &str)]) -> Settings {
        let mut settings = Settings::new();
        for (name, value) in pairs {
            settings.install(name, value).unwrap();
        }
        settings
    }

    fn daemon(settings: Settings, provider: Vec<Step>, cycle_enabled: bool) -> Daemon {
        Daemon::new(
            settings,
            Box::new(ScriptedTransport::new(provider)),
            Box::new(ScriptedTransport::new(vec![])),
            cycle_enabled,
        )
    }

    #[test]
    fn test_polling_context_default() {
        let ctx = PollingContext::new(true);
        assert!(ctx.cycle_enabled);
        assert!(!ctx.retry_after_server_error);
    }

    #[test]
    fn test_sleep_duration_clamping() {
        let cases = [("300", 1800), ("900", 900), ("999999", 1800)];
        for (value, expected) in cases {
            let settings = settings_with(&[("update_interval_seconds", value)]);
            assert_eq!(sleep_duration(&settings, false), Duration::from_secs(expected));
        }
    }

    #[test]
    fn test_sleep_duration_after_server_error() {
        let settings = settings_with(&[("update_interval_seconds", "900")]);
        assert_eq!(sleep_duration(&settings, true), Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_cycle_all_hosts_current() {
        let settings = settings_with(&[
            ("hostname", "a.example.com|b.example.com"),
            ("update_interval_seconds", "900"),
        ]);
        let mut d = daemon(
            settings,
            vec![Step::Reply("good 1.2.3.4"), Step::Reply("nochg 1.2.3.4")],
            true,
        );

        let report = d.run_cycle().await.unwrap();
        assert!(report.updated);
        assert_eq!(report.hosts_updated, 2);
        assert_eq!(report.stopped, None);
        assert_eq!(report.sleep, Duration::from_secs(900));
        assert!(d.last_success().is_some());
    }

    #[tokio::test]
    async fn test_cycle_server_error_skips_remaining_hosts() {
        let settings = settings_with(&[
            ("hostname", "a.example.com|b.example.com"),
            ("update_interval_seconds", "900"),
        ]);
        let provider = ScriptedTransport::new(vec![
            Step::Reply("911 emergency"),
            Step::Reply("good 1.2.3.4"),
        ]);
        let requests = provider.request_log();
        let mut d = Daemon::new(
            settings,
            Box::new(provider),
            Box::new(ScriptedTransport::new(vec![])),
            true,
        );

        let report = d.run_cycle().await.unwrap();
        assert_eq!(report.stopped, Some(StopReason::ServerError));
        assert_eq!(report.sleep, Duration::from_secs(1800));
        assert!(d.polling().retry_after_server_error);
        assert_eq!(requests.lock().unwrap().len(), 1);
        assert!(d.last_success().is_none());
    }

    #[tokio::test]
    async fn test_cycle_server_error_flag_clears_next_cycle() {
        let settings = settings_with(&[("hostname", "a.example.com")]);
        let mut d = daemon(
            settings,
            vec![Step::Reply("911"), Step::Reply("good 1.2.3.4")],
            true,
        );

        assert_eq!(d.run_cycle().await.unwrap().sleep, Duration::from_secs(1800));
        let report = d.run_cycle().await.unwrap();
        assert_eq!(report.stopped, None);
        assert!(!d.polling().retry_after_server_error);
    }

    #[tokio::test]
    async fn test_cycle_badauth_is_fatal() {
        let settings = settings_with(&[("hostname", "a.example.com|b.example.com")]);
        let provider = ScriptedTransport::new(vec![
            Step::Reply("badauth"),
            Step::Reply("good 1.2.3.4"),
        ]);
        let requests = provider.request_log();
        let mut d = Daemon::new(
            settings,
            Box::new(provider),
            Box::new(ScriptedTransport::new(vec![])),
            true,
        );

        let err = d.run_cycle().await.unwrap_err();
        assert_eq!(
            err,
            CycleError::Fatal {
                host: "a.example.com".to_string(),
                outcome: UpdateOutcome::BadAuth,
            }
        );
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_every_fatal_answer_ends_program() {
        let cases = [
            ("nohost", UpdateOutcome::NoHost),
            ("badagent", UpdateOutcome::BadAgent),
            ("!donator", UpdateOutcome::NotDonator),
            ("abuse", UpdateOutcome::Abuse),
        ];
        for (reply, outcome) in cases {
            let settings = settings_with(&[("hostname", "a.example.com|b.example.com")]);
            let mut d = daemon(settings, vec![Step::Reply(reply), Step::Reply("good")], true);

            let err = d.run_cycle().await.unwrap_err();
            assert_eq!(
                err,
                CycleError::Fatal {
                    host: "a.example.com".to_string(),
                    outcome,
                },
                "reply {:?}",
                reply
            );
        }
    }

    #[tokio::test]
    async fn test_cycle_unknown_response_stops_pass() {
        let settings = settings_with(&[("hostname", "a.example.com|b.example.com")]);
        let mut d = daemon(settings, vec![Step::Reply("wat"), Step::Reply("good")], true);

        let report = d.run_cycle().await.unwrap();
        assert_eq!(report.hosts_updated, 0);
        assert_eq!(report.stopped, Some(StopReason::UnknownResponse));
        assert!(!d.polling().retry_after_server_error);
    }

    #[tokio::test]
    async fn test_cycle_transport_failure_stops_pass() {
        let settings = settings_with(&[("hostname", "a.example.com|b.example.com")]);
        let mut d = daemon(settings, vec![Step::Reply("good"), Step::Refuse], true);

        let report = d.run_cycle().await.unwrap();
        assert_eq!(report.hosts_updated, 1);
        assert!(matches!(report.stopped, Some(StopReason::AttemptFailed(_))));
    }

    #[tokio::test]
    async fn test_cycle_invalid_hostnames_fail_before_network() {
        let settings = settings_with(&[("hostname", "a.example.com|b_example.com")]);
        let provider = ScriptedTransport::new(vec![Step::Reply("good")]);
        let requests = provider.request_log();
        let mut d = Daemon::new(
            settings,
            Box::new(provider),
            Box::new(ScriptedTransport::new(vec![])),
            false,
        );

        let err = d.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Config(_)));
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_host_limit() {
        let names: Vec<String> = (0..12).map(|i| format!("h{}.example.com", i)).collect();
        let settings = settings_with(&[("hostname", &names.join("|"))]);
        let replies = vec![Step::Reply("good"); 12];
        let mut d = daemon(settings, replies, false);

        let report = d.run_cycle().await.unwrap();
        assert_eq!(report.hosts_updated, 10);
    }

    #[tokio::test]
    async fn test_once_mode_skips_ip_check() {
        let settings = settings_with(&[("hostname", "a.example.com"), ("force_update", "NO")]);
        let lookup = ScriptedTransport::new(vec![]);
        let resolved = lookup.resolve_log();
        let mut d = Daemon::new(
            settings,
            Box::new(ScriptedTransport::new(vec![Step::Reply("good 1.2.3.4")])),
            Box::new(lookup),
            false,
        );

        let report = d.run_cycle().await.unwrap();
        assert!(report.updated);
        assert_eq!(report.hosts_updated, 1);
        assert!(resolved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_ip_skips_update() {
        let settings = settings_with(&[("hostname", "a.example.com"), ("force_update", "NO")]);
        let provider = ScriptedTransport::new(vec![Step::Reply("good 1.2.3.4")]);
        let requests = provider.request_log();
        let mut d = Daemon::new(
            settings,
            Box::new(provider),
            Box::new(ScriptedTransport::new(vec![
                Step::Reply("203.0.113.5"),
                Step::Reply("203.0.113.5"),
            ])),
            true,
        );

        assert!(d.run_cycle().await.unwrap().updated);
        let report = d.run_cycle().await.unwrap();
        assert!(!report.updated);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_run_once_returns_after_single_pass() {
        let settings = settings_with(&[("hostname", "a.example.com|b.example.com")]);
        let provider = ScriptedTransport::new(vec![Step::Reply("good"), Step::Reply("nochg")]);
        let requests = provider.request_log();
        let mut d = Daemon::new(
            settings,
            Box::new(provider),
            Box::new(ScriptedTransport::new(vec![])),
            false,
        );

        let started = tokio::time::Instant::now();
        d.run().await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_run_waits_thirty_minutes_after_server_error() {
        let settings = || {
            settings_with(&[("hostname", "a.example.com"), ("update_interval_seconds", "900")])
        };
        let steps = || vec![Step::Reply("911"), Step::Reply("good 1.2.3.4")];

        let provider = ScriptedTransport::new(steps());
        let requests = provider.request_log();
        let mut d = Daemon::new(
            settings(),
            Box::new(provider),
            Box::new(ScriptedTransport::new(vec![])),
            true,
        );
        let ran = tokio::time::timeout(Duration::from_secs(1799), d.run()).await;
        assert!(ran.is_err());
        assert_eq!(requests.lock().unwrap().len(), 1);

        let provider = ScriptedTransport::new(steps());
        let requests = provider.request_log();
        let mut d = Daemon::new(
            settings(),
            Box::new(provider),
            Box::new(ScriptedTransport::new(vec![])),
            true,
        );
        let ran = tokio::time::timeout(Duration::from_secs(1801), d.run()).await;
        assert!(ran.is_err());
        assert_eq!(requests.lock().unwrap().len(), 2);
        assert!(d.last_success().is_some());
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_run_stops_on_hangup() {
        let settings =
            settings_with(&[("hostname", "a.example.com"), ("update_interval_seconds", "900")]);
        let mut d = daemon(settings, vec![Step::Reply("good 1.2.3.4")], true);

        let hangup = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            // SAFETY: the handler is installed by the running loop
            unsafe { libc::raise(libc::SIGHUP) };
        };
        let (ran, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(3600), d.run()),
            hangup
        );

        assert!(matches!(ran, Ok(Ok(()))));
    }
}
