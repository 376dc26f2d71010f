// SPDX-License-Identifier: BUSL-1.1

//! Method Registry (C2 registration side): binds every client→server method
//! name to its typed handler.

pub mod turn_methods;

use std::sync::Arc;

use crate::rpc::dispatcher::FnHandler;
use crate::rpc::Dispatcher;

pub fn build_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("turn/start", Arc::new(FnHandler(turn_methods::turn_start)));
    dispatcher.register("turn/steer", Arc::new(FnHandler(turn_methods::turn_steer)));
    dispatcher.register("turn/interrupt", Arc::new(FnHandler(turn_methods::turn_interrupt)));
    dispatcher.register("turn/forceComplete", Arc::new(FnHandler(turn_methods::turn_force_complete)));
    dispatcher.register("thread/resume", Arc::new(FnHandler(turn_methods::thread_resume)));
    dispatcher
}
