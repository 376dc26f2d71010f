// SPDX-License-Identifier: BUSL-1.1

//! Panic containment (§4.1 "on panic, log + disconnect; never crash the
//! process"; §5 "every read-loop and every broker/heartbeat task runs under
//! a recover guard"). A panic inside a guarded future is caught, logged, and
//! turned into `None` rather than unwinding into the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Run `fut` under a panic guard, logging `label` and the panic message on
/// unwind instead of propagating it. Returns `None` if it panicked.
pub async fn guard<F, T>(label: &str, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Some(value),
        Err(payload) => {
            error!(label, message = %panic_message(&*payload), "task panicked, recovering");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_passes_through_normal_output() {
        let result = guard("test", async { 42 }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn guard_catches_panics() {
        let result = guard("test", async { panic!("boom") }).await;
        assert_eq!(result, None);
    }
}
