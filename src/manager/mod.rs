pub mod runtime;

use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::manager::{InstallJob, InstallStatus, VisibleModel};
use crate::models::supplier::{Capabilities, ModelEntry};
use crate::registry::SupplierRegistry;
use crate::services::local;
use crate::services::providers::HttpConfig;
use crate::storage::ObjectStore;
use runtime::{HostDialog, RuntimeProcess};

const INSTALLED_FILE: &str = "models/installed.json";

/// Download hosts for the runtime archive, tried in rotation via
/// `reconnect_model_download`.
const DOWNLOAD_MIRRORS: &[&str] = &[
    "https://releases.loomchat.dev",
    "https://mirror-a.loomchat.dev",
    "https://mirror-b.loomchat.dev",
];

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct JobKey {
    name: String,
    parameters: String,
}

/// Catalog of installable artifacts shown by `list_visible_models`.
fn visible_catalog() -> Vec<VisibleModel> {
    let entries = [
        ("qwen3", "4b", "Qwen3 4B", "2.6 GB", false),
        ("qwen3", "8b", "Qwen3 8B", "5.2 GB", false),
        ("llama3.1", "8b", "Llama 3.1 8B", "4.9 GB", false),
        ("deepseek-r1", "7b", "DeepSeek R1 7B", "4.7 GB", false),
        ("deepseek-r1", "14b", "DeepSeek R1 14B", "9.0 GB", false),
        ("nomic-embed-text", "", "Nomic Embed Text", "274 MB", true),
    ];
    entries
        .iter()
        .map(|(name, parameters, title, size, embedding)| VisibleModel {
            name: name.to_string(),
            parameters: parameters.to_string(),
            title: title.to_string(),
            size: size.to_string(),
            embedding: *embedding,
        })
        .collect()
}

/// Model manager: install jobs for local models and for the runtime itself,
/// plus the runtime process the local supplier talks to.
pub struct ModelManager {
    store: Arc<ObjectStore>,
    registry: Arc<SupplierRegistry>,
    runtime: Arc<RuntimeProcess>,
    dialog: Arc<dyn HostDialog>,
    jobs: Arc<Mutex<HashMap<JobKey, InstallJob>>>,
    manager_job: Arc<Mutex<Option<InstallJob>>>,
    mirror_index: Arc<Mutex<usize>>,
    timeout: Duration,
}

impl ModelManager {
    pub fn new(
        store: Arc<ObjectStore>,
        registry: Arc<SupplierRegistry>,
        runtime: Arc<RuntimeProcess>,
        dialog: Arc<dyn HostDialog>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            runtime,
            dialog,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            manager_job: Arc::new(Mutex::new(None)),
            mirror_index: Arc::new(Mutex::new(0)),
            timeout,
        }
    }

    fn runtime_http(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.runtime.base_url(),
            api_key: String::new(),
            timeout: self.timeout,
        }
    }

    /// Boot-time startup: warn about conflicting user installs, start the
    /// runtime when its binary is present, and mirror the installed list
    /// into the local supplier.
    pub async fn bootstrap(&self) {
        self.runtime.warn_on_conflicting_install(self.dialog.as_ref());
        if !self.runtime.installed() {
            info!("local runtime not installed; model manager is idle");
            return;
        }
        if let Err(e) = self.runtime.start() {
            warn!("could not start local runtime: {}", e);
            return;
        }
        if let Err(e) = self.runtime.wait_ready(Duration::from_secs(30)).await {
            warn!("local runtime not ready: {}", e);
        }
        if let Err(e) = self
            .registry
            .ensure_local_supplier(&self.runtime.base_url())
            .await
        {
            warn!("could not register local supplier: {}", e);
            return;
        }
        let installed = self.installed_models().await;
        if let Err(e) = self.registry.sync_local_models(installed).await {
            warn!("could not sync local models: {}", e);
        }
    }

    pub fn shutdown(&self) {
        self.runtime.stop();
    }

    async fn installed_models(&self) -> Vec<ModelEntry> {
        self.store
            .read_as::<Vec<ModelEntry>>(INSTALLED_FILE)
            .await
            .unwrap_or_default()
    }

    async fn persist_installed(&self, models: &[ModelEntry]) -> Result<(), AppError> {
        self.store.write(INSTALLED_FILE, &models).await?;
        Ok(())
    }

    /// Start (or report) an install job for a local model. Calling this
    /// while the job is `done` is a no-op that returns the terminal job.
    pub async fn install_model(&self, name: &str, parameters: &str) -> InstallJob {
        let key = JobKey {
            name: name.to_string(),
            parameters: parameters.to_string(),
        };
        let already_installed = self
            .installed_models()
            .await
            .iter()
            .any(|m| m.name == name && m.parameters == parameters);
        {
            let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
            if let Some(existing) = jobs.get(&key) {
                if existing.status != InstallStatus::Failed {
                    return existing.clone();
                }
            }
            if already_installed {
                let done = InstallJob {
                    name: name.to_string(),
                    parameters: parameters.to_string(),
                    status: InstallStatus::Done,
                    progress: 1.0,
                    notice: "already installed".to_string(),
                };
                jobs.insert(key, done.clone());
                return done;
            }
            jobs.insert(key.clone(), InstallJob::queued(name, parameters));
        }

        let tag = artifact_tag(name, parameters);
        let jobs = self.jobs.clone();
        let registry = self.registry.clone();
        let store = self.store.clone();
        let http = self.runtime_http();
        let key2 = key.clone();
        let name = name.to_string();
        let parameters = parameters.to_string();
        tokio::spawn(async move {
            advance(&jobs, &key2, InstallStatus::Downloading, 0.0, "downloading");
            let result = local::pull(&http, &tag, |event| {
                let progress = match (event.completed, event.total) {
                    (Some(done), Some(total)) if total > 0 => {
                        (done as f32 / total as f32).min(1.0) * 0.95
                    }
                    _ => 0.0,
                };
                let status = if event.status.contains("verifying")
                    || event.status.contains("writing")
                    || event.status == "success"
                {
                    InstallStatus::Installing
                } else {
                    InstallStatus::Downloading
                };
                advance(&jobs, &key2, status, progress, &event.status);
            })
            .await;

            match result {
                Ok(()) => {
                    let entry = ModelEntry {
                        name: name.clone(),
                        title: name.clone(),
                        parameters: parameters.clone(),
                        capabilities: Capabilities {
                            chat: !name.contains("embed"),
                            embedding: name.contains("embed"),
                            ..Capabilities::default()
                        },
                        enabled: true,
                    };
                    let mut installed = store
                        .read_as::<Vec<ModelEntry>>(INSTALLED_FILE)
                        .await
                        .unwrap_or_default();
                    installed.retain(|m| m.artifact_tag() != entry.artifact_tag());
                    installed.push(entry.clone());
                    if let Err(e) = store.write(INSTALLED_FILE, &installed).await {
                        warn!("could not persist installed models: {}", e);
                    }
                    if let Err(e) = registry.add_local_model(entry).await {
                        warn!("could not register installed model: {}", e);
                    }
                    advance(&jobs, &key2, InstallStatus::Done, 1.0, "installed");
                    info!("model {} installed", tag);
                }
                Err(e) => {
                    warn!("install of {} failed: {}", tag, e);
                    fail(&jobs, &key2, &e.to_string());
                }
            }
        });

        self.jobs
            .lock()
            .expect("jobs lock poisoned")
            .get(&key)
            .cloned()
            .unwrap_or_else(|| InstallJob::queued(&key.name, &key.parameters))
    }

    pub fn get_model_install_progress(
        &self,
        name: &str,
        parameters: &str,
    ) -> Result<InstallJob, AppError> {
        let key = JobKey {
            name: name.to_string(),
            parameters: parameters.to_string(),
        };
        self.jobs
            .lock()
            .expect("jobs lock poisoned")
            .get(&key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("install job for {}", artifact_tag(name, parameters))))
    }

    /// Remove an installed artifact: the runtime deletes it, the local
    /// supplier's model list and the installed file follow.
    pub async fn remove_model(&self, name: &str, parameters: &str) -> Result<(), AppError> {
        let tag = artifact_tag(name, parameters);
        local::delete_model(&self.runtime_http(), &tag)
            .await
            .map_err(AppError::from)?;

        let mut installed = self.installed_models().await;
        installed.retain(|m| !(m.name == name && m.parameters == parameters));
        self.persist_installed(&installed).await?;
        self.registry.remove_local_model(name, parameters).await?;

        let key = JobKey {
            name: name.to_string(),
            parameters: parameters.to_string(),
        };
        self.jobs.lock().expect("jobs lock poisoned").remove(&key);
        info!("model {} removed", tag);
        Ok(())
    }

    pub async fn list_installed_models(&self) -> Vec<ModelEntry> {
        self.installed_models().await
    }

    pub fn list_visible_models(&self) -> Vec<VisibleModel> {
        visible_catalog()
    }

    /// Bootstrap the runtime itself: download the binary from the active
    /// mirror with streamed progress, then start it.
    pub async fn install_model_manager(&self, manager_name: &str) -> InstallJob {
        {
            let mut job = self.manager_job.lock().expect("manager job lock poisoned");
            if let Some(existing) = job.as_ref() {
                if existing.status != InstallStatus::Failed {
                    return existing.clone();
                }
            }
            if self.runtime.installed() {
                let done = InstallJob {
                    name: manager_name.to_string(),
                    parameters: String::new(),
                    status: InstallStatus::Done,
                    progress: 1.0,
                    notice: "already installed".to_string(),
                };
                *job = Some(done.clone());
                return done;
            }
            *job = Some(InstallJob::queued(manager_name, ""));
        }

        let url = format!(
            "{}/{}/{}-{}",
            self.active_mirror(),
            manager_name,
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        let manager_job = self.manager_job.clone();
        let runtime = self.runtime.clone();
        let registry = self.registry.clone();
        let manager_name = manager_name.to_string();
        tokio::spawn(async move {
            set_manager_job(&manager_job, InstallStatus::Downloading, 0.0, "downloading");
            match download_binary(&url, &runtime).await {
                Ok(()) => {
                    set_manager_job(&manager_job, InstallStatus::Installing, 0.95, "starting");
                    if let Err(e) = runtime.start() {
                        set_manager_failed(&manager_job, &e.to_string());
                        return;
                    }
                    if let Err(e) = runtime.wait_ready(Duration::from_secs(30)).await {
                        set_manager_failed(&manager_job, &e.to_string());
                        return;
                    }
                    if let Err(e) = registry.ensure_local_supplier(&runtime.base_url()).await {
                        set_manager_failed(&manager_job, &e.to_string());
                        return;
                    }
                    set_manager_job(&manager_job, InstallStatus::Done, 1.0, "installed");
                    info!("runtime manager {} installed", manager_name);
                }
                Err(e) => {
                    warn!("runtime install failed: {}", e);
                    set_manager_failed(&manager_job, &e);
                }
            }
        });

        self.manager_job
            .lock()
            .expect("manager job lock poisoned")
            .clone()
            .expect("job set above")
    }

    pub fn get_model_manager_install_progress(&self) -> Result<InstallJob, AppError> {
        self.manager_job
            .lock()
            .expect("manager job lock poisoned")
            .clone()
            .ok_or_else(|| AppError::NotFound("runtime manager install job".into()))
    }

    fn active_mirror(&self) -> String {
        let index = *self.mirror_index.lock().expect("mirror lock poisoned");
        DOWNLOAD_MIRRORS[index % DOWNLOAD_MIRRORS.len()].to_string()
    }

    /// Rotate to the next download mirror; a failed runtime download may be
    /// reissued afterwards.
    pub fn reconnect_model_download(&self) -> String {
        let mut index = self.mirror_index.lock().expect("mirror lock poisoned");
        *index = (*index + 1) % DOWNLOAD_MIRRORS.len();
        DOWNLOAD_MIRRORS[*index].to_string()
    }
}

fn artifact_tag(name: &str, parameters: &str) -> String {
    if parameters.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", name, parameters)
    }
}

/// Advance a job, never moving a terminal or later state backwards.
fn advance(
    jobs: &Mutex<HashMap<JobKey, InstallJob>>,
    key: &JobKey,
    status: InstallStatus,
    progress: f32,
    notice: &str,
) {
    let mut jobs = jobs.lock().expect("jobs lock poisoned");
    if let Some(job) = jobs.get_mut(key) {
        if job.status.is_terminal() || job.status.code() > status.code() {
            return;
        }
        job.status = status;
        job.progress = job.progress.max(progress);
        job.notice = notice.to_string();
    }
}

fn fail(jobs: &Mutex<HashMap<JobKey, InstallJob>>, key: &JobKey, reason: &str) {
    let mut jobs = jobs.lock().expect("jobs lock poisoned");
    if let Some(job) = jobs.get_mut(key) {
        if job.status.is_terminal() {
            return;
        }
        job.status = InstallStatus::Failed;
        job.notice = reason.to_string();
    }
}

fn set_manager_job(
    slot: &Mutex<Option<InstallJob>>,
    status: InstallStatus,
    progress: f32,
    notice: &str,
) {
    let mut slot = slot.lock().expect("manager job lock poisoned");
    if let Some(job) = slot.as_mut() {
        if job.status.is_terminal() || job.status.code() > status.code() {
            return;
        }
        job.status = status;
        job.progress = job.progress.max(progress);
        job.notice = notice.to_string();
    }
}

fn set_manager_failed(slot: &Mutex<Option<InstallJob>>, reason: &str) {
    let mut slot = slot.lock().expect("manager job lock poisoned");
    if let Some(job) = slot.as_mut() {
        if !job.status.is_terminal() {
            job.status = InstallStatus::Failed;
            job.notice = reason.to_string();
        }
    }
}

async fn download_binary(url: &str, runtime: &RuntimeProcess) -> Result<(), String> {
    let binary = runtime.binary_path();
    if let Some(parent) = binary.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let client = reqwest::Client::new();
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("download failed: HTTP {}", resp.status()));
    }

    let tmp = binary.with_extension("download");
    let mut file = std::fs::File::create(&tmp).map_err(|e| e.to_string())?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk).map_err(|e| e.to_string())?;
    }
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| e.to_string())?;
    }
    std::fs::rename(&tmp, &binary).map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_tag() {
        assert_eq!(artifact_tag("qwen3", "8b"), "qwen3:8b");
        assert_eq!(artifact_tag("nomic-embed-text", ""), "nomic-embed-text");
    }

    #[test]
    fn test_visible_catalog_is_nonempty() {
        let catalog = visible_catalog();
        assert!(!catalog.is_empty());
        assert!(catalog.iter().any(|m| m.embedding));
    }

    #[test]
    fn test_advance_never_regresses() {
        let key = JobKey {
            name: "m".to_string(),
            parameters: "7b".to_string(),
        };
        let jobs = Mutex::new(HashMap::from([(key.clone(), InstallJob::queued("m", "7b"))]));

        advance(&jobs, &key, InstallStatus::Installing, 0.9, "writing");
        advance(&jobs, &key, InstallStatus::Downloading, 0.1, "late chunk");
        let job = jobs.lock().unwrap().get(&key).cloned().unwrap();
        assert_eq!(job.status, InstallStatus::Installing);
        assert!(job.progress >= 0.9);

        advance(&jobs, &key, InstallStatus::Done, 1.0, "installed");
        advance(&jobs, &key, InstallStatus::Downloading, 0.0, "ghost");
        let job = jobs.lock().unwrap().get(&key).cloned().unwrap();
        assert_eq!(job.status, InstallStatus::Done);
    }

    #[test]
    fn test_fail_is_terminal() {
        let key = JobKey {
            name: "m".to_string(),
            parameters: "7b".to_string(),
        };
        let jobs = Mutex::new(HashMap::from([(key.clone(), InstallJob::queued("m", "7b"))]));
        fail(&jobs, &key, "disk full");
        advance(&jobs, &key, InstallStatus::Done, 1.0, "late");
        let job = jobs.lock().unwrap().get(&key).cloned().unwrap();
        assert_eq!(job.status, InstallStatus::Failed);
        assert_eq!(job.notice, "disk full");
    }
}
