#![forbid(unsafe_code)]

//! Moves a processed package from the incoming folder to the archive folder.
//!
//! Moves are staged first and then committed one by one. If a commit fails,
//! the moves that already went through are reversed (newest first) so the
//! package ends up back in the incoming folder as a unit.

use tracing::{error, info, warn};

use crate::drive::{RemoteFile, Storage};
use crate::error::{PipelineError, Result};
use crate::folders::ResolvedFolders;
use crate::package::VideoPackage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub file_id: String,
    pub name: String,
}

impl From<&RemoteFile> for PlannedMove {
    fn from(file: &RemoteFile) -> Self {
        Self {
            file_id: file.id.clone(),
            name: file.name.clone(),
        }
    }
}

/// Moves a single file from `from` to `to` by rewriting its parents.
pub fn move_file<S: Storage + ?Sized>(storage: &S, file_id: &str, from: &str, to: &str) -> Result<()> {
    storage.update_parents(file_id, to, from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    from: String,
    to: String,
    moves: Vec<PlannedMove>,
}

impl ArchivePlan {
    /// Stages the video, its description and, if present, its thumbnail.
    pub fn stage(package: &VideoPackage, folders: &ResolvedFolders) -> Self {
        Self {
            from: folders.incoming.clone(),
            to: folders.archive.clone(),
            moves: package.files().into_iter().map(PlannedMove::from).collect(),
        }
    }

    pub fn moves(&self) -> &[PlannedMove] {
        &self.moves
    }

    /// Applies every staged move; returns the names moved.
    pub fn commit<S: Storage + ?Sized>(&self, storage: &S) -> Result<Vec<String>> {
        let mut done: Vec<&PlannedMove> = Vec::with_capacity(self.moves.len());
        for planned in &self.moves {
            match move_file(storage, &planned.file_id, &self.from, &self.to) {
                Ok(()) => {
                    info!(file = %planned.name, "archived");
                    done.push(planned);
                }
                Err(err) => {
                    error!(file = %planned.name, error = %err, "archive move failed, rolling back");
                    return Err(self.roll_back(storage, &done, planned, err));
                }
            }
        }
        Ok(done.into_iter().map(|planned| planned.name.clone()).collect())
    }

    fn roll_back<S: Storage + ?Sized>(
        &self,
        storage: &S,
        done: &[&PlannedMove],
        failed: &PlannedMove,
        cause: PipelineError,
    ) -> PipelineError {
        let mut rolled_back = Vec::new();
        let mut rollback_failures = Vec::new();
        for planned in done.iter().rev() {
            match move_file(storage, &planned.file_id, &self.to, &self.from) {
                Ok(()) => rolled_back.push(planned.name.clone()),
                Err(err) => {
                    warn!(file = %planned.name, error = %err, "could not undo archive move");
                    rollback_failures.push(planned.name.clone());
                }
            }
        }
        PipelineError::ArchiveIncomplete {
            failed: format!("{} ({cause})", failed.name),
            rolled_back,
            rollback_failures,
        }
    }
}
