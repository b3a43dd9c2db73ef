//! In-memory stand-ins for Drive and YouTube used across unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::description::VideoMetadata;
use crate::drive::{FOLDER_MIME_TYPE, FileQuery, RangeRead, RemoteFile, Storage};
use crate::error::{PipelineError, Result};
use crate::progress::ProgressObserver;
use crate::youtube::VideoHost;

#[derive(Default)]
struct DriveState {
    next_id: u32,
    files: Vec<RemoteFile>,
    contents: HashMap<String, Vec<u8>>,
    trashed: HashSet<String>,
    calls: Vec<String>,
    reads: HashMap<String, usize>,
    fail_reads_after: HashMap<String, usize>,
    moves: HashMap<String, usize>,
    fail_all_moves: HashSet<String>,
    fail_later_moves: HashSet<String>,
}

/// Drive fake. Ids are handed out in increasing order (`id-0001`, ...).
#[derive(Default)]
pub struct FakeDrive {
    state: RefCell<DriveState>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        format!("id-{:04}", state.next_id)
    }

    pub fn add_folder(&self, name: &str, parent: Option<&str>) -> String {
        let id = self.next_id();
        self.add_folder_with_id(&id, name, parent);
        id
    }

    pub fn add_folder_with_id(&self, id: &str, name: &str, parent: Option<&str>) {
        self.state.borrow_mut().files.push(RemoteFile {
            id: id.to_string(),
            name: name.to_string(),
            size: None,
            parents: parent.map(str::to_string).into_iter().collect(),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
        });
    }

    pub fn add_file(&self, name: &str, parent: &str, content: &[u8]) -> RemoteFile {
        let file = RemoteFile {
            id: self.next_id(),
            name: name.to_string(),
            size: Some(content.len() as u64),
            parents: vec![parent.to_string()],
            mime_type: None,
        };
        let mut state = self.state.borrow_mut();
        state.contents.insert(file.id.clone(), content.to_vec());
        state.files.push(file.clone());
        file
    }

    pub fn trash(&self, id: &str) {
        self.state.borrow_mut().trashed.insert(id.to_string());
    }

    /// Lets `n` range reads of `id` succeed, then fails the rest.
    pub fn fail_reads_after(&self, id: &str, n: usize) {
        self.state
            .borrow_mut()
            .fail_reads_after
            .insert(id.to_string(), n);
    }

    /// Every parent update of `id` fails.
    pub fn fail_moves_of(&self, id: &str) {
        self.state.borrow_mut().fail_all_moves.insert(id.to_string());
    }

    /// The first parent update of `id` succeeds, later ones fail.
    pub fn fail_moves_back_of(&self, id: &str) {
        self.state.borrow_mut().fail_later_moves.insert(id.to_string());
    }

    pub fn parents_of(&self, id: &str) -> Vec<String> {
        self.state
            .borrow()
            .files
            .iter()
            .find(|file| file.id == id)
            .map(|file| file.parents.clone())
            .unwrap_or_default()
    }

    pub fn range_reads(&self, id: &str) -> usize {
        self.state.borrow().reads.get(id).copied().unwrap_or(0)
    }

    /// Log of backend calls: `search <q>`, `read <id>`, `move <id>`.
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

impl Storage for FakeDrive {
    fn search(&self, query: &FileQuery) -> Result<Vec<RemoteFile>> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("search {}", query.to_query_string()));
        Ok(state
            .files
            .iter()
            .filter(|file| !state.trashed.contains(&file.id) && query.matches(file))
            .cloned()
            .collect())
    }

    fn read_range(
        &self,
        file_id: &str,
        start: u64,
        len: u64,
        sink: &mut dyn Write,
    ) -> Result<RangeRead> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("read {file_id}"));
        let count = state.reads.entry(file_id.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        if let Some(limit) = state.fail_reads_after.get(file_id)
            && count > *limit
        {
            return Err(PipelineError::transfer(
                format!("downloading {file_id}"),
                "connection reset",
            ));
        }

        let content = state
            .contents
            .get(file_id)
            .ok_or_else(|| PipelineError::transfer(format!("downloading {file_id}"), "404"))?;
        let total = content.len() as u64;
        let begin = start.min(total) as usize;
        let end = (start + len).min(total) as usize;
        sink.write_all(&content[begin..end])
            .map_err(|err| PipelineError::transfer("writing chunk", err))?;
        Ok(RangeRead {
            written: (end - begin) as u64,
            total: Some(total),
        })
    }

    fn update_parents(&self, file_id: &str, add_parent: &str, remove_parent: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("move {file_id}"));
        let count = state.moves.entry(file_id.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        if state.fail_all_moves.contains(file_id)
            || (count > 1 && state.fail_later_moves.contains(file_id))
        {
            return Err(PipelineError::transfer(
                format!("moving {file_id}"),
                "backend refused",
            ));
        }

        let file = state
            .files
            .iter_mut()
            .find(|file| file.id == file_id)
            .ok_or_else(|| PipelineError::transfer(format!("moving {file_id}"), "404"))?;
        file.parents.retain(|parent| parent != remove_parent);
        if !file.parents.iter().any(|parent| parent == add_parent) {
            file.parents.push(add_parent.to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub metadata: VideoMetadata,
}

/// YouTube fake. Reads the local file so tests can check what was sent.
#[derive(Default)]
pub struct FakeHost {
    uploads: RefCell<Vec<RecordedUpload>>,
    thumbnails: RefCell<Vec<(String, Vec<u8>)>>,
    fail_uploads: bool,
    fail_thumbnails: bool,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn failing_thumbnails() -> Self {
        Self {
            fail_thumbnails: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.borrow().clone()
    }

    pub fn thumbnails(&self) -> Vec<(String, Vec<u8>)> {
        self.thumbnails.borrow().clone()
    }
}

impl VideoHost for FakeHost {
    fn upload(
        &self,
        video: &Path,
        metadata: &VideoMetadata,
        observer: &mut dyn ProgressObserver,
    ) -> Result<String> {
        if self.fail_uploads {
            return Err(PipelineError::upload("quota exceeded"));
        }
        let bytes = fs::read(video).map_err(|err| PipelineError::upload(err.to_string()))?;
        observer.on_progress(0.5);
        observer.on_progress(1.0);
        let mut uploads = self.uploads.borrow_mut();
        uploads.push(RecordedUpload {
            path: video.to_path_buf(),
            bytes,
            metadata: metadata.clone(),
        });
        Ok(format!("yt-{}", uploads.len()))
    }

    fn set_thumbnail(&self, video_id: &str, image: &Path) -> Result<()> {
        if self.fail_thumbnails {
            return Err(PipelineError::upload("thumbnails not allowed"));
        }
        let bytes = fs::read(image).map_err(|err| PipelineError::upload(err.to_string()))?;
        self.thumbnails
            .borrow_mut()
            .push((video_id.to_string(), bytes));
        Ok(())
    }
}

/// Records every fraction reported.
impl ProgressObserver for Vec<f64> {
    fn on_progress(&mut self, fraction: f64) {
        self.push(fraction);
    }
}
