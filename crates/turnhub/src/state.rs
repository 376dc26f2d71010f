// SPDX-License-Identifier: BUSL-1.1

//! Shared coordinator state, handed to every RPC handler and background
//! task (analogous to the teacher's `MuxState`).

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalBroker, DynamicToolDispatcher, NoNotifyHook};
use crate::audit::{AuditSink, MemoryAuditSink};
use crate::binding::{BindingStore, MemoryBindingStore};
use crate::config::CoordinatorConfig;
use crate::connection::ConnectionHub;
use crate::events::FileChangeMemo;
use crate::orchestration::OrchestrationPendingReports;
use crate::rpc::{Correlator, Dispatcher};
use crate::skills::AgentSkillConfig;
use crate::turn::{TrackerEvent, TurnTracker};
use crate::ui_state::UiStateThrottle;
use crate::worker::{WorkerEvent, WorkerSupervisor};

pub struct CoordinatorState {
    pub config: CoordinatorConfig,
    pub hub: Arc<ConnectionHub>,
    pub correlator: Arc<Correlator>,
    pub dispatcher: Dispatcher,
    pub workers: Arc<WorkerSupervisor>,
    pub tracker: Arc<TurnTracker>,
    pub file_memo: Mutex<FileChangeMemo>,
    pub skills: AgentSkillConfig,
    pub orchestration: Arc<OrchestrationPendingReports>,
    pub ui_state: Arc<UiStateThrottle>,
    pub audit: Arc<dyn AuditSink>,
    pub bindings: Arc<dyn BindingStore>,
    pub approval: Arc<ApprovalBroker>,
    pub dynamic_tools: Arc<DynamicToolDispatcher>,
    pub shutdown: CancellationToken,
}

/// Background receivers a caller must drain to turn tracker/throttle events
/// into outbound notifications; owned separately so `CoordinatorState`
/// itself stays `Sync` without an internal lock around the channels.
pub struct CoordinatorChannels {
    pub tracker_events: tokio::sync::mpsc::UnboundedReceiver<TrackerEvent>,
    pub ui_state_emits: tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>,
    pub worker_events: tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>,
}

impl CoordinatorState {
    pub fn new(config: CoordinatorConfig) -> (Arc<Self>, CoordinatorChannels) {
        let shutdown = CancellationToken::new();
        let hub = Arc::new(ConnectionHub::new(config.max_connections, config.conn_outbox_size, config.conn_backlog_cut));
        let correlator = Arc::new(Correlator::new());
        let (workers, worker_events) = WorkerSupervisor::new(shutdown.child_token());
        let workers = Arc::new(workers);
        let (tracker, tracker_events) = TurnTracker::new(
            config.turn_watchdog_timeout(),
            config.stall_threshold(),
            config.stall_timer_interval(),
            config.turn_summary_cache_cap,
            config.turn_summary_ttl(),
        );
        let (ui_state, ui_state_emits) = UiStateThrottle::new(config.ui_state_throttle());
        let orchestration = Arc::new(OrchestrationPendingReports::new());
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
        let bindings: Arc<dyn BindingStore> = Arc::new(MemoryBindingStore::new());
        let approval = Arc::new(ApprovalBroker::new(
            hub.clone(),
            correlator.clone(),
            tracker.clone(),
            audit.clone(),
            config.stall_threshold(),
            Arc::new(NoNotifyHook),
        ));
        let dynamic_tools = Arc::new(DynamicToolDispatcher::new(hub.clone(), orchestration.clone()));
        let dispatcher = crate::methods::build_dispatcher();

        let state = Arc::new(Self {
            config,
            hub,
            correlator,
            dispatcher,
            workers,
            tracker,
            file_memo: Mutex::new(FileChangeMemo::default()),
            skills: AgentSkillConfig::new(),
            orchestration,
            ui_state,
            audit,
            bindings,
            approval,
            dynamic_tools,
            shutdown,
        });
        (state, CoordinatorChannels { tracker_events, ui_state_emits, worker_events })
    }

    pub fn file_memo(&self) -> std::sync::MutexGuard<'_, FileChangeMemo> {
        self.file_memo.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// A minimal, fully in-memory instance for unit tests that need a
    /// `CoordinatorState` but exercise no transport or worker processes.
    #[cfg(test)]
    pub fn for_tests() -> Arc<Self> {
        let config = CoordinatorConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            auth_token: None,
            max_connections: 16,
            conn_outbox_size: 32,
            conn_backlog_cut: 24,
            write_deadline_ms: 1000,
            turn_watchdog_secs: 600,
            stall_threshold_secs: 60,
            turn_summary_ttl_secs: 1800,
            turn_summary_cache_cap: 64,
            ui_state_throttle_ms: 500,
            orchestration_report_ttl_secs: 1800,
            worker_program: "true".to_owned(),
            worker_args: Vec::new(),
        };
        Self::new(config).0
    }
}
