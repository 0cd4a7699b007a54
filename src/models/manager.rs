use serde::{Serialize, Serializer};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Queued,
    Downloading,
    Installing,
    Done,
    Failed,
}

impl InstallStatus {
    /// Wire code: queued(0), downloading(1), installing(2), done(3), failed(-1).
    pub fn code(&self) -> i8 {
        match self {
            InstallStatus::Queued => 0,
            InstallStatus::Downloading => 1,
            InstallStatus::Installing => 2,
            InstallStatus::Done => 3,
            InstallStatus::Failed => -1,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallStatus::Done | InstallStatus::Failed)
    }
}

impl Serialize for InstallStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.code())
    }
}

/// Ephemeral install job, polled by the client at 1 Hz. States advance
/// monotonically; `done` and `failed` are terminal.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InstallJob {
    pub name: String,
    pub parameters: String,
    #[schema(value_type = i8)]
    pub status: InstallStatus,
    pub progress: f32,
    pub notice: String,
}

impl InstallJob {
    pub fn queued(name: &str, parameters: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: parameters.to_string(),
            status: InstallStatus::Queued,
            progress: 0.0,
            notice: String::new(),
        }
    }
}

/// An installable artifact shown in the model market.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VisibleModel {
    pub name: String,
    pub parameters: String,
    pub title: String,
    pub size: String,
    pub embedding: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(InstallStatus::Queued.code(), 0);
        assert_eq!(InstallStatus::Downloading.code(), 1);
        assert_eq!(InstallStatus::Installing.code(), 2);
        assert_eq!(InstallStatus::Done.code(), 3);
        assert_eq!(InstallStatus::Failed.code(), -1);
    }

    #[test]
    fn test_job_serializes_status_as_number() {
        let job = InstallJob::queued("qwen3", "8b");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["progress"], 0.0);
    }
}
