#![forbid(unsafe_code)]

use crate::drive::Storage;
use crate::error::{PipelineError, Result};

/// Ids of the three folders a run works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFolders {
    pub root: String,
    pub incoming: String,
    pub archive: String,
}

/// Resolves `root`, `root/incoming` and `root/archive`. Any missing folder is
/// a configuration problem; nothing is created.
pub fn resolve_folders<S: Storage + ?Sized>(
    storage: &S,
    root_name: &str,
    incoming_name: &str,
    archive_name: &str,
) -> Result<ResolvedFolders> {
    let root = storage
        .find_folder(root_name, None)?
        .ok_or_else(|| PipelineError::config(format!("Folder {root_name} not found")))?;

    let incoming = storage.find_folder(incoming_name, Some(&root))?;
    let archive = storage.find_folder(archive_name, Some(&root))?;
    match (incoming, archive) {
        (Some(incoming), Some(archive)) => Ok(ResolvedFolders {
            root,
            incoming,
            archive,
        }),
        (incoming, archive) => {
            let missing: Vec<&str> = [(incoming, incoming_name), (archive, archive_name)]
                .into_iter()
                .filter(|(id, _)| id.is_none())
                .map(|(_, name)| name)
                .collect();
            Err(PipelineError::config(format!(
                "{} folder not found under {root_name}",
                missing.join("/")
            )))
        }
    }
}
