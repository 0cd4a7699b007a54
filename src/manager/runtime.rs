//! Lifecycle of the managed local-model runtime process: spawned into a
//! sandboxed directory at boot, health-polled until ready, reaped at
//! shutdown.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::i18n;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime binary not installed at {0}")]
    NotInstalled(String),
    #[error("runtime failed to start: {0}")]
    StartFailed(String),
    #[error("runtime did not become ready in time")]
    ReadyTimeout,
}

/// Host OS dialog collaborator; the desktop shell shows real dialogs, the
/// daemon's default just logs.
pub trait HostDialog: Send + Sync {
    fn warn_user(&self, message: &str);
}

pub struct LogDialog;

impl HostDialog for LogDialog {
    fn warn_user(&self, message: &str) {
        warn!("{}", message);
    }
}

pub struct RuntimeProcess {
    dir: PathBuf,
    port: u16,
    child: Mutex<Option<Child>>,
}

impl RuntimeProcess {
    pub fn new(dir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            dir: dir.into(),
            port,
            child: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.dir.join("bin").join("runtime")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.dir.join("models")
    }

    pub fn installed(&self) -> bool {
        self.binary_path().exists()
    }

    /// A user-level runtime install outside the sandbox conflicts with the
    /// managed copy; surface a warning through the host dialog and proceed.
    pub fn warn_on_conflicting_install(&self, dialog: &dyn HostDialog) {
        let home = std::env::var("HOME").unwrap_or_default();
        let candidates = [
            PathBuf::from(&home).join(".ollama"),
            PathBuf::from("/usr/local/bin/ollama"),
        ];
        if candidates.iter().any(|p| p.exists()) {
            dialog.warn_user(&i18n::phrase("manager.conflicting_install"));
        }
    }

    pub fn start(&self) -> Result<(), RuntimeError> {
        let binary = self.binary_path();
        if !binary.exists() {
            return Err(RuntimeError::NotInstalled(binary.display().to_string()));
        }
        let mut guard = self.child.lock().expect("runtime lock poisoned");
        if guard.is_some() {
            return Ok(());
        }
        std::fs::create_dir_all(self.models_dir())
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))?;

        info!("starting local runtime on port {}", self.port);
        let child = Command::new(&binary)
            .arg("serve")
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--models")
            .arg(self.models_dir())
            .current_dir(&self.dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))?;
        debug!("runtime started with pid {}", child.id());
        *guard = Some(child);
        Ok(())
    }

    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), RuntimeError> {
        let url = format!("{}/api/tags", self.base_url());
        let client = reqwest::Client::new();
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("local runtime is ready");
                    return Ok(());
                }
                _ => sleep(Duration::from_millis(500)).await,
            }
        }
        Err(RuntimeError::ReadyTimeout)
    }

    pub fn is_running(&self) -> bool {
        let mut guard = self.child.lock().expect("runtime lock poisoned");
        match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(_)) => {
                    *guard = None;
                    false
                }
                Ok(None) => true,
                Err(_) => false,
            },
            None => false,
        }
    }

    pub fn stop(&self) {
        let mut guard = self.child.lock().expect("runtime lock poisoned");
        if let Some(mut child) = guard.take() {
            info!("stopping local runtime (pid {})", child.id());
            match child.try_wait() {
                Ok(Some(status)) => debug!("runtime already exited: {:?}", status),
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

impl Drop for RuntimeProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_are_sandboxed() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeProcess::new(dir.path(), 12345);
        assert!(runtime.binary_path().starts_with(dir.path()));
        assert!(runtime.models_dir().starts_with(dir.path()));
        assert_eq!(runtime.base_url(), "http://127.0.0.1:12345");
    }

    #[test]
    fn test_start_without_binary_fails() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeProcess::new(dir.path(), 12345);
        assert!(!runtime.installed());
        assert!(matches!(
            runtime.start(),
            Err(RuntimeError::NotInstalled(_))
        ));
        assert!(!runtime.is_running());
    }
}
