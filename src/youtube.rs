#![forbid(unsafe_code)]

//! YouTube Data API v3 uploads.
//!
//! Uploads use the resumable protocol: one POST opens a session carrying the
//! video metadata, then the file is PUT in fixed-size chunks. The server
//! answers `308` with a `Range` header until the last chunk lands, and then
//! returns the created video resource.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{DEFAULT_CATEGORY_ID, DEFAULT_PRIVACY_STATUS};
use crate::credentials::TokenProvider;
use crate::description::VideoMetadata;
use crate::error::{PipelineError, Result, describe_http_error};
use crate::progress::ProgressObserver;

const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3";
/// Must stay a multiple of 256 KiB for the resumable protocol.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;
const RESUME_INCOMPLETE: u16 = 308;

pub trait VideoHost {
    /// Uploads the local video and returns the new video id.
    fn upload(
        &self,
        video: &Path,
        metadata: &VideoMetadata,
        observer: &mut dyn ProgressObserver,
    ) -> Result<String>;

    /// Replaces the custom thumbnail of an uploaded video.
    fn set_thumbnail(&self, video_id: &str, image: &Path) -> Result<()>;
}

/// Fixed parts of every insert request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub category_id: String,
    pub privacy_status: String,
    pub chunk_size: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy_status: DEFAULT_PRIVACY_STATUS.to_string(),
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        }
    }
}

/// Body of `videos.insert` with `part=snippet,status`.
pub fn insert_body(metadata: &VideoMetadata, options: &UploadOptions) -> Value {
    json!({
        "snippet": {
            "title": metadata.title,
            "description": metadata.description,
            "categoryId": options.category_id,
        },
        "status": {
            "privacyStatus": options.privacy_status,
        }
    })
}

/// Next byte the server expects, from a `308` response's `Range: bytes=0-N`.
/// No header means nothing was persisted yet.
pub fn next_offset_from_range(header: Option<&str>) -> Result<u64> {
    let Some(header) = header else {
        return Ok(0);
    };
    let last = header
        .trim()
        .strip_prefix("bytes=")
        .and_then(|range| range.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .ok_or_else(|| PipelineError::upload(format!("unexpected Range header {header:?}")))?;
    Ok(last + 1)
}

fn content_type_for(path: &Path, fallback: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
}

pub struct YouTubeClient {
    agent: ureq::Agent,
    upload_base: String,
    tokens: Arc<dyn TokenProvider>,
    options: UploadOptions,
}

impl YouTubeClient {
    pub fn new(tokens: Arc<dyn TokenProvider>, options: UploadOptions) -> Self {
        Self::with_base_url(tokens, options, DEFAULT_UPLOAD_BASE)
    }

    pub fn with_base_url(
        tokens: Arc<dyn TokenProvider>,
        options: UploadOptions,
        upload_base: &str,
    ) -> Self {
        // 308 is the protocol's "keep going" answer, not a redirect to follow.
        let agent = ureq::AgentBuilder::new()
            .redirects(0)
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .user_agent(concat!("autoupload-tools/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            upload_base: upload_base.trim_end_matches('/').to_string(),
            tokens,
            options,
        }
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.tokens.access_token()?))
    }

    fn start_session(
        &self,
        metadata: &VideoMetadata,
        content_type: &str,
        total: u64,
    ) -> Result<String> {
        let response = self
            .agent
            .post(&format!("{}/videos", self.upload_base))
            .set("Authorization", &self.bearer()?)
            .set("X-Upload-Content-Length", &total.to_string())
            .set("X-Upload-Content-Type", content_type)
            .query("uploadType", "resumable")
            .query("part", "snippet,status")
            .send_json(insert_body(metadata, &self.options))
            .map_err(|err| {
                PipelineError::upload(format!("starting upload session: {}", describe_http_error(err)))
            })?;
        response
            .header("Location")
            .map(str::to_string)
            .ok_or_else(|| PipelineError::upload("upload session response had no Location header"))
    }

    fn send_chunk(
        &self,
        session: &str,
        content_type: &str,
        chunk: &[u8],
        offset: u64,
        total: u64,
    ) -> Result<ChunkOutcome> {
        let end = offset + chunk.len() as u64 - 1;
        let response = self
            .agent
            .put(session)
            .set("Authorization", &self.bearer()?)
            .set("Content-Type", content_type)
            .set("Content-Range", &format!("bytes {offset}-{end}/{total}"))
            .send_bytes(chunk)
            .map_err(|err| {
                PipelineError::upload(format!(
                    "sending bytes {offset}-{end}: {}",
                    describe_http_error(err)
                ))
            })?;

        match response.status() {
            RESUME_INCOMPLETE => Ok(ChunkOutcome::Continue(next_offset_from_range(
                response.header("Range"),
            )?)),
            200 | 201 => {
                let video: VideoResource = response.into_json().map_err(|err| {
                    PipelineError::upload(format!("decoding upload response: {err}"))
                })?;
                Ok(ChunkOutcome::Done(video.id))
            }
            status => Err(PipelineError::upload(format!(
                "unexpected HTTP {status} while sending bytes {offset}-{end}"
            ))),
        }
    }
}

enum ChunkOutcome {
    Continue(u64),
    Done(String),
}

impl VideoHost for YouTubeClient {
    fn upload(
        &self,
        video: &Path,
        metadata: &VideoMetadata,
        observer: &mut dyn ProgressObserver,
    ) -> Result<String> {
        let mut file = File::open(video)
            .map_err(|err| PipelineError::upload(format!("opening {}: {err}", video.display())))?;
        let total = file
            .metadata()
            .map_err(|err| PipelineError::upload(format!("stat {}: {err}", video.display())))?
            .len();
        if total == 0 {
            return Err(PipelineError::upload(format!("{} is empty", video.display())));
        }

        let content_type = content_type_for(video, "video/*");
        let session = self.start_session(metadata, &content_type, total)?;
        info!(title = %metadata.title, bytes = total, "upload session opened");

        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut offset = 0u64;
        loop {
            file.seek(SeekFrom::Start(offset))
                .map_err(|err| PipelineError::upload(format!("seeking video: {err}")))?;
            let wanted = buf.len().min((total - offset) as usize);
            file.read_exact(&mut buf[..wanted])
                .map_err(|err| PipelineError::upload(format!("reading video: {err}")))?;

            match self.send_chunk(&session, &content_type, &buf[..wanted], offset, total)? {
                ChunkOutcome::Continue(next) => {
                    if next <= offset {
                        return Err(PipelineError::upload(format!(
                            "server stored nothing past byte {offset} of {total}"
                        )));
                    }
                    if next > total {
                        return Err(PipelineError::upload(format!(
                            "server acknowledged {next} bytes of {total}"
                        )));
                    }
                    if next == total {
                        return Err(PipelineError::upload(
                            "server stored every byte but did not return a video",
                        ));
                    }
                    offset = next;
                    observer.on_progress(offset as f64 / total as f64);
                    debug!(offset, total, "chunk accepted");
                }
                ChunkOutcome::Done(id) => {
                    observer.on_progress(1.0);
                    return Ok(id);
                }
            }
        }
    }

    fn set_thumbnail(&self, video_id: &str, image: &Path) -> Result<()> {
        let bytes = fs::read(image)
            .map_err(|err| PipelineError::upload(format!("reading {}: {err}", image.display())))?;
        self.agent
            .post(&format!("{}/thumbnails/set", self.upload_base))
            .set("Authorization", &self.bearer()?)
            .set("Content-Type", &content_type_for(image, "image/jpeg"))
            .query("videoId", video_id)
            .query("uploadType", "media")
            .send_bytes(&bytes)
            .map_err(|err| {
                PipelineError::upload(format!("setting thumbnail: {}", describe_http_error(err)))
            })?;
        Ok(())
    }
}
