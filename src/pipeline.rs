#![forbid(unsafe_code)]

//! One end-to-end run: find a package, download it, upload it, archive it.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::archive::ArchivePlan;
use crate::config::Settings;
use crate::description::parse_description;
use crate::download::{DEFAULT_CHUNK_SIZE, download};
use crate::drive::{RemoteFile, Storage};
use crate::error::Result;
use crate::folders::resolve_folders;
use crate::package::{Selection, select_package};
use crate::progress::ProgressObserver;
use crate::youtube::VideoHost;

pub const LOCAL_VIDEO: &str = "video.mp4";
pub const LOCAL_DESCRIPTION: &str = "desc.txt";
pub const LOCAL_THUMBNAIL: &str = "thumb.jpg";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub root_folder: String,
    pub incoming_folder: String,
    pub archive_folder: String,
    pub work_dir: PathBuf,
    pub download_chunk_size: u64,
    pub set_thumbnail: bool,
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            root_folder: settings.root_folder.clone(),
            incoming_folder: settings.incoming_folder.clone(),
            archive_folder: settings.archive_folder.clone(),
            work_dir: settings.work_dir.clone(),
            download_chunk_size: DEFAULT_CHUNK_SIZE,
            set_thumbnail: settings.set_thumbnail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NoFiles,
    NoVideo,
    MissingDescription {
        video: String,
    },
    Uploaded {
        video_id: String,
        archived: Vec<String>,
        thumbnail_set: bool,
    },
}

impl RunOutcome {
    /// The line printed for this outcome.
    pub fn message(&self) -> String {
        match self {
            RunOutcome::NoFiles => "No files to upload.".to_string(),
            RunOutcome::NoVideo => "No mp4 found.".to_string(),
            RunOutcome::MissingDescription { video } => {
                format!("TXT not found for {video}, skip.")
            }
            RunOutcome::Uploaded { video_id, .. } => {
                format!("Done: https://www.youtube.com/watch?v={video_id}")
            }
        }
    }
}

pub struct Pipeline<'a, S: ?Sized, H: ?Sized> {
    storage: &'a S,
    host: &'a H,
    config: PipelineConfig,
}

impl<'a, S, H> Pipeline<'a, S, H>
where
    S: Storage + ?Sized,
    H: VideoHost + ?Sized,
{
    pub fn new(storage: &'a S, host: &'a H, config: PipelineConfig) -> Self {
        Self {
            storage,
            host,
            config,
        }
    }

    fn local_path(&self, name: &str) -> PathBuf {
        self.config.work_dir.join(name)
    }

    fn fetch(&self, file: &RemoteFile, local: &Path) -> Result<()> {
        println!("Downloading {} -> {}", file.name, local.display());
        let bytes = download(self.storage, file, local, self.config.download_chunk_size)?;
        info!(file = %file.name, bytes, "downloaded");
        Ok(())
    }

    pub fn run(&self, observer: &mut dyn ProgressObserver) -> Result<RunOutcome> {
        let folders = resolve_folders(
            self.storage,
            &self.config.root_folder,
            &self.config.incoming_folder,
            &self.config.archive_folder,
        )?;
        info!(incoming = %folders.incoming, archive = %folders.archive, "folders resolved");

        let package = match select_package(self.storage, &folders.incoming)? {
            Selection::NoFiles => return Ok(RunOutcome::NoFiles),
            Selection::NoVideo => return Ok(RunOutcome::NoVideo),
            Selection::MissingDescription { video } => {
                return Ok(RunOutcome::MissingDescription { video: video.name });
            }
            Selection::Ready(package) => package,
        };
        println!("Processing {}", package.video.name);

        let video_path = self.local_path(LOCAL_VIDEO);
        let description_path = self.local_path(LOCAL_DESCRIPTION);
        let thumbnail_path = self.local_path(LOCAL_THUMBNAIL);
        self.fetch(&package.video, &video_path)?;
        self.fetch(&package.description, &description_path)?;
        if let Some(thumbnail) = &package.thumbnail {
            self.fetch(thumbnail, &thumbnail_path)?;
        }

        let metadata = parse_description(&description_path)?;
        info!(title = %metadata.title, "parsed description");

        let video_id = self.host.upload(&video_path, &metadata, observer)?;
        println!("UPLOAD DONE: {video_id}");

        let thumbnail_set = if self.config.set_thumbnail && package.thumbnail.is_some() {
            match self.host.set_thumbnail(&video_id, &thumbnail_path) {
                Ok(()) => true,
                Err(err) => {
                    warn!(%video_id, error = %err, "thumbnail not applied");
                    false
                }
            }
        } else {
            false
        };

        let archived = ArchivePlan::stage(&package, &folders).commit(self.storage)?;
        println!("Moved to {} folder.", self.config.archive_folder);

        Ok(RunOutcome::Uploaded {
            video_id,
            archived,
            thumbnail_set,
        })
    }
}
