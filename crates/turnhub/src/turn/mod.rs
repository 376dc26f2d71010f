// SPDX-License-Identifier: BUSL-1.1

pub mod summary_cache;
pub mod tracker;

pub use summary_cache::TurnSummaryCache;
pub use tracker::{
    classify_terminal_event, InterruptMode, StallAlert, StallAlertKind, TerminalClassification, TrackerEvent,
    TurnCompletion, TurnTracker,
};
