//! Age-based retention of local backup archives.
//!
//! - `policy`: the expiry predicate (whole days since modification)
//! - `cleaner`: best-effort deletion of every expired archive
//!
//! ## Usage
//!
//! ```no_run
//! use chrono::Utc;
//! use lifecycle::artifact::{ArtifactPattern, ArtifactStore};
//! use lifecycle::retention::{RetentionCleaner, RetentionPolicy};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = ArtifactStore::new(
//!     "/var/backups/wiki",
//!     ArtifactPattern::new("wiki-backup-", ".tar.gz.gpg"),
//! );
//! let cleaner = RetentionCleaner::new(RetentionPolicy::new(7), false);
//! let result = cleaner.cleanup(&store, Utc::now()).await?;
//! println!("deleted {} archives", result.deleted.len());
//! # Ok(())
//! # }
//! ```

pub mod cleaner;
pub mod policy;

pub use cleaner::{CleanupResult, RetentionCleaner};
pub use policy::RetentionPolicy;
