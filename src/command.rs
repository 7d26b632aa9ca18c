use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RESTART_PAUSE: Duration = Duration::from_secs(1);

/// A configured external command (`runOnInit`, `runOnDemand`, `runOnReady`,
/// `runOnRead`) scoped to a path state. Closing (or dropping) the handle
/// kills the process; with `restart` the command is respawned whenever it
/// exits on its own.
pub(crate) struct ExternalCmd {
    token: CancellationToken,
}

impl ExternalCmd {
    pub fn new(
        cmdstr: impl ToString,
        restart: bool,
        env: Vec<(String, String)>,
        label: impl ToString,
    ) -> Self {
        let cmdstr = cmdstr.to_string();
        let label = label.to_string();
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            loop {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(&cmdstr).kill_on_drop(true);
                for (k, v) in &env {
                    cmd.env(k, v);
                }

                let mut child = match cmd.spawn() {
                    Ok(child) => child,
                    Err(err) => {
                        warn!("[{}] command failed to start: {}", label, err);
                        if !restart {
                            return;
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(RESTART_PAUSE) => continue,
                            _ = task_token.cancelled() => return,
                        }
                    }
                };
                debug!("[{}] command started", label);

                tokio::select! {
                    status = child.wait() => {
                        match status {
                            Ok(status) => info!("[{}] command exited: {}", label, status),
                            Err(err) => warn!("[{}] command wait error: {}", label, err),
                        }
                        if !restart {
                            return;
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(RESTART_PAUSE) => {}
                            _ = task_token.cancelled() => return,
                        }
                    }
                    _ = task_token.cancelled() => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        debug!("[{}] command stopped", label);
                        return;
                    }
                }
            }
        });

        ExternalCmd { token }
    }

    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for ExternalCmd {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_command_runs_and_stops() {
        let dir = std::env::temp_dir().join(format!("livepath-cmd-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let marker = dir.join("ran");

        let cmd = ExternalCmd::new(
            format!("touch {}", marker.display()),
            false,
            vec![],
            "test",
        );
        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(marker.exists());
        cmd.close();
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_close_kills_long_running_command() {
        let cmd = ExternalCmd::new("sleep 600", false, vec![], "test");
        tokio::time::sleep(Duration::from_millis(50)).await;
        cmd.close();
        // Nothing to assert beyond not hanging: kill_on_drop plus the
        // cancellation branch reap the child.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
