//! Persistent deployment stage record.
//!
//! A multi-step host workflow is interrupted by restarts. Before each
//! deliberate restart the workflow calls [`StageController::advance`], which
//! durably records the stage to resume into plus a snapshot of the
//! configuration gathered so far. The next process reads it back with
//! [`StageController::resume`].
//!
//! A missing, unreadable or corrupt record means "start from stage 1"; it is
//! logged and never fatal.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use vmforge_shared::errors::{ForgeError, ForgeResult};

pub const STAGE_RECORD_VERSION: u32 = 1;

/// Position of a deployment run as read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkflowState {
    /// No usable record: a fresh run starts at stage 1.
    NotStarted,
    /// Paused before the given stage (1-based).
    InProgress(u32),
    /// The last run finished every stage.
    Completed,
}

/// On-disk format of the stage record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub version: u32,
    pub stage: u32,
    #[serde(default)]
    pub completed: bool,
    /// Action that caused the record to be written (e.g. the stage name).
    #[serde(default)]
    pub trigger: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub snapshot: Option<serde_json::Value>,
}

/// Reads and writes the deployment stage record at a fixed path.
#[derive(Debug, Clone)]
pub struct StageController {
    path: PathBuf,
}

impl StageController {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, treating anything unusable as absent.
    pub fn read_record(&self) -> Option<StageRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Stage record unreadable, starting from stage 1"
                );
                return None;
            }
        };

        match serde_json::from_str::<StageRecord>(&contents) {
            Ok(record) if record.stage >= 1 => Some(record),
            Ok(record) => {
                tracing::warn!(
                    path = %self.path.display(),
                    stage = record.stage,
                    "Stage record has invalid stage, starting from stage 1"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Stage record corrupt, starting from stage 1"
                );
                None
            }
        }
    }

    pub fn resume_state(&self) -> WorkflowState {
        match self.read_record() {
            None => WorkflowState::NotStarted,
            Some(record) if record.completed => WorkflowState::Completed,
            Some(record) => WorkflowState::InProgress(record.stage),
        }
    }

    /// Stage to run next. 1 when there is no record or the last run completed.
    pub fn resume(&self) -> u32 {
        let stage = match self.resume_state() {
            WorkflowState::InProgress(stage) => stage,
            WorkflowState::NotStarted | WorkflowState::Completed => 1,
        };
        tracing::debug!(stage, path = %self.path.display(), "Resuming deployment");
        stage
    }

    /// Configuration snapshot saved with the record, if it can be decoded as `T`.
    pub fn snapshot<T: DeserializeOwned>(&self) -> Option<T> {
        let value = self.read_record()?.snapshot?;
        match serde_json::from_value(value) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable deployment snapshot"
                );
                None
            }
        }
    }

    /// Record that `current_stage` finished and the run resumes at the next one.
    ///
    /// Call only once the work that makes resuming safe is done, immediately
    /// before the restart. Returns the recorded stage.
    ///
    /// # Errors
    ///
    /// `InvalidState` if `current_stage` is 0 or the record would move backwards.
    pub fn advance<T: Serialize>(
        &self,
        current_stage: u32,
        trigger: &str,
        snapshot: Option<&T>,
    ) -> ForgeResult<u32> {
        if current_stage == 0 {
            return Err(ForgeError::InvalidState(
                "stages are numbered from 1".into(),
            ));
        }
        let next = current_stage.checked_add(1).ok_or_else(|| {
            ForgeError::InvalidState(format!("no stage after stage {}", current_stage))
        })?;

        if let WorkflowState::InProgress(recorded) = self.resume_state()
            && recorded > next
        {
            return Err(ForgeError::InvalidState(format!(
                "cannot move deployment back from stage {} to stage {}",
                recorded, next
            )));
        }

        let snapshot = snapshot.map(serde_json::to_value).transpose()?;
        self.write(&StageRecord {
            version: STAGE_RECORD_VERSION,
            stage: next,
            completed: false,
            trigger: Some(trigger.to_string()),
            updated_at: Utc::now(),
            snapshot,
        })?;

        tracing::info!(
            from = current_stage,
            to = next,
            trigger = %trigger,
            path = %self.path.display(),
            "Deployment stage advanced"
        );

        Ok(next)
    }

    /// Mark the run as finished at `final_stage`.
    pub fn complete(&self, final_stage: u32) -> ForgeResult<()> {
        let snapshot = self.read_record().and_then(|r| r.snapshot);
        self.write(&StageRecord {
            version: STAGE_RECORD_VERSION,
            stage: final_stage.max(1),
            completed: true,
            trigger: Some("completed".into()),
            updated_at: Utc::now(),
            snapshot,
        })?;
        tracing::info!(stage = final_stage, "Deployment completed");
        Ok(())
    }

    /// Remove the record so the next run starts fresh.
    pub fn reset(&self) -> ForgeResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Deployment stage reset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write atomically: temp file in the same directory, fsync, rename.
    fn write(&self, record: &StageRecord) -> ForgeResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            ForgeError::Storage(format!(
                "Failed to write stage record {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a subscriber that records plain-text log lines.
    fn with_captured_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        (result, output)
    }

    fn controller() -> (TempDir, StageController) {
        let dir = TempDir::new().unwrap();
        let controller = StageController::new(dir.path().join("state").join("stage.json"));
        (dir, controller)
    }

    #[test]
    fn test_resume_without_record_is_stage_one() {
        let (_dir, controller) = controller();
        assert_eq!(controller.resume(), 1);
        assert_eq!(controller.resume_state(), WorkflowState::NotStarted);
    }

    #[test]
    fn test_advance_then_resume() {
        let (_dir, controller) = controller();
        let next = controller
            .advance(1, "network-identity", Some(&json!({"hostname": "SRV01"})))
            .unwrap();

        assert_eq!(next, 2);
        assert_eq!(controller.resume(), 2);
        assert_eq!(controller.resume_state(), WorkflowState::InProgress(2));

        let snapshot: serde_json::Value = controller.snapshot().unwrap();
        assert_eq!(snapshot["hostname"], "SRV01");

        controller.advance::<()>(2, "roles-domain", None).unwrap();
        assert_eq!(controller.resume(), 3);
        assert!(controller.snapshot::<serde_json::Value>().is_none());
    }

    #[test]
    fn test_corrupt_record_defaults_to_stage_one() {
        let (_dir, controller) = controller();
        std::fs::create_dir_all(controller.path().parent().unwrap()).unwrap();
        std::fs::write(controller.path(), "stage=three").unwrap();

        let (stage, logs) = with_captured_logs(|| controller.resume());
        assert_eq!(stage, 1);
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("Stage record corrupt"), "{logs}");
        assert_eq!(controller.resume_state(), WorkflowState::NotStarted);
    }

    #[test]
    fn test_zero_stage_record_is_ignored() {
        let (_dir, controller) = controller();
        std::fs::create_dir_all(controller.path().parent().unwrap()).unwrap();
        std::fs::write(
            controller.path(),
            r#"{"version":1,"stage":0,"updated_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let (stage, logs) = with_captured_logs(|| controller.resume());
        assert_eq!(stage, 1);
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("invalid stage"), "{logs}");
    }

    #[test]
    fn test_missing_record_is_not_a_warning() {
        let (_dir, controller) = controller();
        let (stage, logs) = with_captured_logs(|| controller.resume());
        assert_eq!(stage, 1);
        assert!(!logs.contains("WARN"), "{logs}");
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let (_dir, controller) = controller();
        controller.advance::<()>(3, "stage-3", None).unwrap();

        let err = controller.advance::<()>(1, "stage-1", None).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidState(_)));
        assert_eq!(controller.resume(), 4);

        // Re-recording the same position is allowed
        controller.advance::<()>(3, "stage-3", None).unwrap();
        assert_eq!(controller.resume(), 4);
    }

    #[test]
    fn test_advance_from_zero_rejected() {
        let (_dir, controller) = controller();
        assert!(controller.advance::<()>(0, "bad", None).is_err());
    }

    #[test]
    fn test_advance_past_last_stage_number_rejected() {
        let (_dir, controller) = controller();
        let err = controller.advance::<()>(u32::MAX, "overflow", None).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidState(_)));
        assert_eq!(controller.resume_state(), WorkflowState::NotStarted);
    }

    #[test]
    fn test_complete_is_distinguishable_from_fresh() {
        let (_dir, controller) = controller();
        controller
            .advance(1, "network-identity", Some(&json!({"hostname": "SRV01"})))
            .unwrap();
        controller.complete(3).unwrap();

        assert_eq!(controller.resume_state(), WorkflowState::Completed);
        assert_eq!(controller.resume(), 1);
        // Snapshot of the finished run is kept for inspection
        assert!(controller.snapshot::<serde_json::Value>().is_some());
    }

    #[test]
    fn test_reset() {
        let (_dir, controller) = controller();
        controller.advance::<()>(1, "stage-1", None).unwrap();
        controller.reset().unwrap();
        assert_eq!(controller.resume_state(), WorkflowState::NotStarted);
        // Resetting again is a no-op
        controller.reset().unwrap();
    }

    #[test]
    fn test_record_is_plain_json() {
        let (_dir, controller) = controller();
        controller.advance::<()>(1, "network-identity", None).unwrap();

        let raw = std::fs::read_to_string(controller.path()).unwrap();
        let record: StageRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.stage, 2);
        assert_eq!(record.version, STAGE_RECORD_VERSION);
        assert_eq!(record.trigger.as_deref(), Some("network-identity"));
        assert!(!record.completed);
    }
}
