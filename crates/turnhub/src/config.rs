// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

/// Coordinator configuration. Every tunable named in the spec's data model
/// and concurrency section gets a field here, mirroring the teacher's
/// `MuxConfig` (clap-derived, env-var fallback per flag).
#[derive(Debug, Clone, clap::Args)]
pub struct CoordinatorConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "TURNHUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8700, env = "TURNHUB_PORT")]
    pub port: u16,

    /// Bearer/query token for client auth. If unset, auth is disabled.
    #[arg(long, env = "TURNHUB_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Max simultaneously live client connections (C1).
    #[arg(long, default_value_t = 512, env = "TURNHUB_MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Per-connection bounded outbox capacity (C1).
    #[arg(long, default_value_t = 256, env = "TURNHUB_CONN_OUTBOX_SIZE")]
    pub conn_outbox_size: usize,

    /// Outbox depth at/above which new requests get a retryable overload
    /// error instead of being enqueued (C1).
    #[arg(long, default_value_t = 192, env = "TURNHUB_CONN_BACKLOG_CUT")]
    pub conn_backlog_cut: usize,

    /// Per-write deadline for the connection write-loop, in milliseconds.
    #[arg(long, default_value_t = 5000, env = "TURNHUB_WRITE_DEADLINE_MS")]
    pub write_deadline_ms: u64,

    /// Turn watchdog timeout (C6), in seconds. Default 10 minutes.
    #[arg(long, default_value_t = 600, env = "TURNHUB_TURN_WATCHDOG_SECS")]
    pub turn_watchdog_secs: u64,

    /// Stall threshold (C6) — silence before the first stall warning, in
    /// seconds.
    #[arg(long, default_value_t = 60, env = "TURNHUB_STALL_THRESHOLD_SECS")]
    pub stall_threshold_secs: u64,

    /// Turn summary cache TTL (C6/§3), in seconds. Default 30 minutes.
    #[arg(long, default_value_t = 1800, env = "TURNHUB_SUMMARY_TTL_SECS")]
    pub turn_summary_ttl_secs: u64,

    /// Turn summary cache capacity (§3).
    #[arg(long, default_value_t = 512, env = "TURNHUB_SUMMARY_CACHE_CAP")]
    pub turn_summary_cache_cap: usize,

    /// Global UI-state throttle window (C9), in milliseconds.
    #[arg(long, default_value_t = 500, env = "TURNHUB_UI_STATE_THROTTLE_MS")]
    pub ui_state_throttle_ms: u64,

    /// Orchestration pending-report TTL (§3), in seconds. Default 30 min.
    #[arg(long, default_value_t = 1800, env = "TURNHUB_ORCH_REPORT_TTL_SECS")]
    pub orchestration_report_ttl_secs: u64,

    /// Program used to launch a worker subprocess (C4).
    #[arg(long, default_value = "codex", env = "TURNHUB_WORKER_PROGRAM")]
    pub worker_program: String,

    /// Extra args passed to every worker launch.
    #[arg(long, env = "TURNHUB_WORKER_ARGS", value_delimiter = ',')]
    pub worker_args: Vec<String>,
}

impl CoordinatorConfig {
    pub fn turn_watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_watchdog_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    /// Stall-timer arm interval: `max(stallThreshold/3, 10s)` per spec §4.6.
    pub fn stall_timer_interval(&self) -> Duration {
        let third = self.stall_threshold() / 3;
        third.max(Duration::from_secs(10))
    }

    pub fn turn_summary_ttl(&self) -> Duration {
        Duration::from_secs(self.turn_summary_ttl_secs)
    }

    pub fn ui_state_throttle(&self) -> Duration {
        Duration::from_millis(self.ui_state_throttle_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn orchestration_report_ttl(&self) -> Duration {
        Duration::from_secs(self.orchestration_report_ttl_secs)
    }

    pub fn launch_spec(&self, cwd: Option<String>) -> crate::worker::LaunchSpec {
        crate::worker::LaunchSpec { program: self.worker_program.clone(), args: self.worker_args.clone(), cwd }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> CoordinatorConfig {
        CoordinatorConfig {
            host: "127.0.0.1".to_owned(),
            port: 8700,
            auth_token: None,
            max_connections: 512,
            conn_outbox_size: 256,
            conn_backlog_cut: 192,
            write_deadline_ms: 5000,
            turn_watchdog_secs: 600,
            stall_threshold_secs: 60,
            turn_summary_ttl_secs: 1800,
            turn_summary_cache_cap: 512,
            ui_state_throttle_ms: 500,
            orchestration_report_ttl_secs: 1800,
            worker_program: "codex".to_owned(),
            worker_args: Vec::new(),
        }
    }

    #[test]
    fn stall_timer_interval_has_floor() {
        let mut cfg = default_config();
        cfg.stall_threshold_secs = 9;
        assert_eq!(cfg.stall_timer_interval(), Duration::from_secs(10));
    }

    #[test]
    fn stall_timer_interval_scales() {
        let cfg = default_config();
        assert_eq!(cfg.stall_timer_interval(), Duration::from_secs(20));
    }
}
