// SPDX-License-Identifier: BUSL-1.1

pub mod conn;
pub mod hub;

pub use conn::Connection;
pub use hub::{ConnId, ConnectionHub};
