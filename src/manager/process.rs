//! # Process launch and exit watcher.
//!
//! One watcher task per launch. It owns the [`Child`] and reports exactly one
//! [`ExitReport`] when the process ends, whether on its own or after a kill
//! request.
//!
//! ```text
//! spawn(program, args) ──► Child ──► watch()
//!                                      ├─ child.wait()        ─► ExitReport{requested: false}
//!                                      └─ cancel.cancelled()  ─► start_kill, wait
//!                                                              ─► ExitReport{requested: true}
//! ```

use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a launch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExitReport {
    /// The exit was caused by a kill request.
    pub requested: bool,
    /// Rendered exit status (or wait error).
    pub status: String,
}

/// Spawns `program` with `args`. The child is killed if its handle is dropped.
pub(crate) fn spawn(program: &str, args: &[String]) -> std::io::Result<Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

/// Waits for `child` to exit or for `cancel`, whichever comes first.
pub(crate) async fn watch(service: &str, mut child: Child, cancel: CancellationToken) -> ExitReport {
    let (requested, status) = tokio::select! {
        st = child.wait() => (false, st),
        _ = cancel.cancelled() => {
            debug!(service, "killing process");
            if let Err(e) = child.start_kill() {
                warn!(service, err = %e, "kill failed");
            }
            (true, child.wait().await)
        }
    };

    ExitReport {
        requested,
        status: render(status),
    }
}

fn render(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(st) => st.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_natural_exit_is_not_requested() {
        let child = spawn("true", &[]).unwrap();
        let report = watch("t", child, CancellationToken::new()).await;
        assert!(!report.requested);
        assert!(report.status.contains("0"));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let child = spawn("sleep", &["30".to_string()]).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let report = watch("t", child, token).await;
        assert!(report.requested);
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            assert!(spawn("/definitely/not/a/program", &[]).is_err());
        });
    }
}
