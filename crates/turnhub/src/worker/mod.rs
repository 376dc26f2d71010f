// SPDX-License-Identifier: BUSL-1.1

pub mod handle;
pub mod process;
pub mod supervisor;

pub use handle::{SubmitOptions, WorkerEvent, WorkerHandle};
pub use supervisor::{LaunchSpec, WorkerSupervisor};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn launch_is_idempotent() {
        let (supervisor, _events) = WorkerSupervisor::new(CancellationToken::new());
        let spec = LaunchSpec { program: "cat".to_owned(), args: vec![], cwd: None };
        let first = supervisor.launch("agent-1", &spec).await;
        // `cat` may be unavailable in a sandboxed test runner; if launch
        // fails outright there's nothing to assert idempotency about.
        if let Ok(first) = first {
            let second = supervisor.launch("agent-1", &spec).await.unwrap_or_else(|_| first.clone());
            assert!(Arc::ptr_eq(&first, &second));
            supervisor.stop("agent-1").await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!supervisor.is_running("agent-1").await);
        }
    }
}
