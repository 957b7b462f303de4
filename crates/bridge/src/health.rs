//! Read-only diagnostics over the session registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::session::{SessionRegistry, SessionSummary};

/// Effective configuration echoed by `/health`. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub port: u16,
    pub terminal: TerminalSummary,
    pub ssh: SshSummary,
    pub logging: LoggingSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub cols: u16,
    pub rows: u16,
    pub term_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshSummary {
    pub ready_timeout: u64,
    pub keepalive_interval: u64,
    pub keepalive_count_max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSummary {
    pub level: String,
    pub log_ssh_io: bool,
}

impl From<&Config> for ConfigSummary {
    fn from(config: &Config) -> Self {
        Self {
            port: config.server.port,
            terminal: TerminalSummary {
                cols: config.terminal.cols,
                rows: config.terminal.rows,
                term_type: config.terminal.term_type.clone(),
            },
            ssh: SshSummary {
                ready_timeout: config.ssh.ready_timeout_ms,
                keepalive_interval: config.ssh.keepalive_interval_ms,
                keepalive_count_max: config.ssh.keepalive_count_max,
            },
            logging: LoggingSummary {
                level: config.logging.level.clone(),
                log_ssh_io: config.logging.log_ssh_io,
            },
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub active_sessions: usize,
    pub sessions: Vec<SessionSummary>,
    pub config: ConfigSummary,
}

/// Body of `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionsReport {
    pub sessions: Vec<SessionSummary>,
}

/// Builds health snapshots. Never mutates the registry.
#[derive(Debug)]
pub struct HealthReporter {
    registry: Arc<SessionRegistry>,
    config: ConfigSummary,
}

impl HealthReporter {
    pub fn new(registry: Arc<SessionRegistry>, config: &Config) -> Self {
        Self {
            registry,
            config: ConfigSummary::from(config),
        }
    }

    pub fn snapshot(&self) -> HealthReport {
        let sessions = self.registry.snapshot();
        HealthReport {
            status: "ok",
            timestamp: Utc::now(),
            active_sessions: sessions.len(),
            sessions,
            config: self.config.clone(),
        }
    }

    pub fn sessions(&self) -> SessionsReport {
        SessionsReport {
            sessions: self.registry.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::tests::test_session;

    #[test]
    fn test_empty_snapshot() {
        let reporter = HealthReporter::new(Arc::new(SessionRegistry::new()), &Config::default());
        let report = reporter.snapshot();

        assert_eq!(report.status, "ok");
        assert_eq!(report.active_sessions, 0);
        assert!(report.sessions.is_empty());
        assert_eq!(report.config.port, 2222);
    }

    #[test]
    fn test_snapshot_counts_registered_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        registry.put(Arc::new(test_session("s1", "c1"))).unwrap();
        registry.put(Arc::new(test_session("s2", "c2"))).unwrap();

        let reporter = HealthReporter::new(Arc::clone(&registry), &Config::default());
        let report = reporter.snapshot();

        assert_eq!(report.active_sessions, 2);
        assert_eq!(report.sessions.len(), 2);
        assert_eq!(reporter.sessions().sessions.len(), 2);
        // Reading does not change the registry.
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_report_json_shape() {
        let mut config = Config::default();
        config.ssh.keepalive_interval_ms = 0;
        let reporter = HealthReporter::new(Arc::new(SessionRegistry::new()), &config);

        let value = serde_json::to_value(reporter.snapshot()).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["activeSessions"], 0);
        assert!(value["timestamp"].is_string());
        assert!(value["sessions"].as_array().unwrap().is_empty());
        assert_eq!(value["config"]["port"], 2222);
        assert_eq!(value["config"]["terminal"]["cols"], 80);
        assert_eq!(value["config"]["terminal"]["termType"], "xterm-256color");
        assert_eq!(value["config"]["ssh"]["readyTimeout"], 20_000);
        assert_eq!(value["config"]["ssh"]["keepaliveInterval"], 0);
        assert_eq!(value["config"]["ssh"]["keepaliveCountMax"], 3);
        assert_eq!(value["config"]["logging"]["logSshIo"], false);

        let value = serde_json::to_value(reporter.sessions()).unwrap();
        assert_eq!(value, serde_json::json!({ "sessions": [] }));
    }
}
