//! Wiki backup lifecycle: retention cleanup, archive creation, off-site upload
//! and remote verification, sequenced by the [`Orchestrator`].

pub mod artifact;
pub mod creator;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod process;
pub mod remote;
pub mod retention;
pub mod run_log;

pub use artifact::{ArtifactPattern, ArtifactStore, BackupArtifact};
pub use creator::{BackupCreator, CreateRequest, ScriptCreator};
pub use error::LifecycleError;
pub use lock::RunLock;
pub use orchestrator::{Orchestrator, OrchestratorSettings, Phase, RunReport, RunStatus};
pub use remote::{RcloneRemote, RemoteEntry, RemoteInventory, RemoteStore, UploadRequest};
pub use retention::{CleanupResult, RetentionCleaner, RetentionPolicy};
pub use run_log::RunLog;
