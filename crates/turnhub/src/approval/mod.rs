// SPDX-License-Identifier: BUSL-1.1

//! Approval & Dynamic-Tool Broker (C7).

pub mod broker;
pub mod dynamic_tool;

pub use broker::{ApprovalBroker, ApprovalDecision, NoNotifyHook, NotifyHook};
pub use dynamic_tool::{parse_dynamic_tool_call, DynamicToolCall, DynamicToolDispatcher, DynamicToolResult};
