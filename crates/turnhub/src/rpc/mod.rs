// SPDX-License-Identifier: BUSL-1.1

pub mod correlator;
pub mod dispatcher;
pub mod envelope;

pub use correlator::Correlator;
pub use dispatcher::{Dispatcher, Handler, HandlerContext};
