#![forbid(unsafe_code)]

//! Google Drive v3 access.
//!
//! Only four backend operations are needed: query files, stream a byte range
//! of a file's content, and swap a file's parent folder. [`Storage`] captures
//! exactly those so the pipeline can run against an in-memory fake.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::debug;

use crate::credentials::TokenProvider;
use crate::error::{PipelineError, Result, describe_http_error};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,size,parents,mimeType)";
const PAGE_SIZE: &str = "1000";

/// A file or folder as returned by a list query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    /// Drive reports sizes as decimal strings; folders have none.
    #[serde(default, deserialize_with = "size_from_string")]
    pub size: Option<u64>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

fn size_from_string<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }

    match Option::<Size>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Size::Number(value)) => Ok(Some(value)),
        Some(Size::Text(text)) => text.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Result of reading one byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRead {
    pub written: u64,
    /// Full size of the remote object when the backend reported it.
    pub total: Option<u64>,
}

/// A parsed Drive search. Rendered to the `q` parameter by [`FileQuery::to_query_string`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQuery {
    pub name: Option<String>,
    pub parent: Option<String>,
    pub folders_only: bool,
}

impl FileQuery {
    pub fn folder(name: &str, parent: Option<&str>) -> Self {
        Self {
            name: Some(name.to_string()),
            parent: parent.map(str::to_string),
            folders_only: true,
        }
    }

    pub fn children(parent: &str) -> Self {
        Self {
            parent: Some(parent.to_string()),
            ..Self::default()
        }
    }

    pub fn named_child(parent: &str, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            parent: Some(parent.to_string()),
            folders_only: false,
        }
    }

    pub fn to_query_string(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(name) = &self.name {
            clauses.push(format!("name = '{}'", escape_query_value(name)));
        }
        if self.folders_only {
            clauses.push(format!("mimeType = '{FOLDER_MIME_TYPE}'"));
        }
        if let Some(parent) = &self.parent {
            clauses.push(format!("'{}' in parents", escape_query_value(parent)));
        }
        clauses.push("trashed = false".to_string());
        clauses.join(" and ")
    }

    /// Whether `file` satisfies this query; used by fakes and as a sanity
    /// filter on backend results.
    pub fn matches(&self, file: &RemoteFile) -> bool {
        if let Some(name) = &self.name
            && &file.name != name
        {
            return false;
        }
        if self.folders_only && file.mime_type.as_deref() != Some(FOLDER_MIME_TYPE) {
            return false;
        }
        if let Some(parent) = &self.parent
            && !file.parents.iter().any(|candidate| candidate == parent)
        {
            return false;
        }
        true
    }
}

/// Escapes a string literal for the Drive query language.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Ambiguity policy for name lookups: the lexicographically smallest id wins.
pub fn smallest_id(files: Vec<RemoteFile>) -> Option<RemoteFile> {
    files.into_iter().min_by(|a, b| a.id.cmp(&b.id))
}

/// Backend operations the pipeline relies on.
pub trait Storage {
    /// Returns every non-trashed entry matching `query`, in backend order.
    fn search(&self, query: &FileQuery) -> Result<Vec<RemoteFile>>;

    /// Streams bytes `start..start + len` of the file into `sink`.
    fn read_range(
        &self,
        file_id: &str,
        start: u64,
        len: u64,
        sink: &mut dyn Write,
    ) -> Result<RangeRead>;

    /// Adds `add_parent` to and removes `remove_parent` from the file's parents.
    fn update_parents(&self, file_id: &str, add_parent: &str, remove_parent: &str) -> Result<()>;

    /// Id of a non-trashed folder named `name`, optionally under `parent_id`.
    fn find_folder(&self, name: &str, parent_id: Option<&str>) -> Result<Option<String>> {
        let folders = self.search(&FileQuery::folder(name, parent_id))?;
        Ok(smallest_id(folders).map(|folder| folder.id))
    }
}

/// Blocking Drive v3 client.
pub struct DriveClient {
    agent: ureq::Agent,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl DriveClient {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_url(tokens, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(tokens: Arc<dyn TokenProvider>, base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(120))
            .user_agent(concat!("autoupload-tools/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.tokens.access_token()?))
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.base_url, file_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl Storage for DriveClient {
    fn search(&self, query: &FileQuery) -> Result<Vec<RemoteFile>> {
        let q = query.to_query_string();
        let url = format!("{}/files", self.base_url);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .agent
                .get(&url)
                .set("Authorization", &self.bearer()?)
                .query("q", &q)
                .query("fields", LIST_FIELDS)
                .query("pageSize", PAGE_SIZE)
                .query("orderBy", "name")
                .query("supportsAllDrives", "true")
                .query("includeItemsFromAllDrives", "true");
            if let Some(token) = &page_token {
                request = request.query("pageToken", token);
            }

            let page: FileList = request
                .call()
                .map_err(|err| {
                    PipelineError::transfer(format!("listing `{q}`"), describe_http_error(err))
                })?
                .into_json()
                .map_err(|err| PipelineError::transfer(format!("decoding listing `{q}`"), err))?;

            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(query = %q, count = files.len(), "drive search");
        Ok(files)
    }

    fn read_range(
        &self,
        file_id: &str,
        start: u64,
        len: u64,
        sink: &mut dyn Write,
    ) -> Result<RangeRead> {
        let end = start + len.max(1) - 1;
        let result = self
            .agent
            .get(&self.file_url(file_id))
            .set("Authorization", &self.bearer()?)
            .set("Range", &format!("bytes={start}-{end}"))
            .query("alt", "media")
            .query("supportsAllDrives", "true")
            .call();

        let response = match result {
            Ok(response) => response,
            // An empty object has no satisfiable range.
            Err(ureq::Error::Status(416, _)) if start == 0 => {
                return Ok(RangeRead {
                    written: 0,
                    total: Some(0),
                });
            }
            Err(err) => {
                return Err(PipelineError::transfer(
                    format!("downloading {file_id} at offset {start}"),
                    describe_http_error(err),
                ));
            }
        };

        let status = response.status();
        let total = match status {
            206 => response.header("Content-Range").and_then(parse_content_range_total),
            _ => None,
        };
        let full_length = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());

        let mut reader = response.into_reader();
        let written = io::copy(&mut reader, sink).map_err(|err| {
            PipelineError::transfer(format!("streaming {file_id} at offset {start}"), err)
        })?;

        // A plain 200 means the range was ignored and we got everything.
        let total = match status {
            200 => Some(full_length.unwrap_or(start + written)),
            _ => total,
        };
        Ok(RangeRead { written, total })
    }

    fn update_parents(&self, file_id: &str, add_parent: &str, remove_parent: &str) -> Result<()> {
        self.agent
            .request("PATCH", &self.file_url(file_id))
            .set("Authorization", &self.bearer()?)
            .query("addParents", add_parent)
            .query("removeParents", remove_parent)
            .query("fields", "id,parents")
            .query("supportsAllDrives", "true")
            .send_json(json!({}))
            .map_err(|err| {
                PipelineError::transfer(
                    format!("moving {file_id} from {remove_parent} to {add_parent}"),
                    describe_http_error(err),
                )
            })?;
        Ok(())
    }
}

/// Extracts the total from `bytes 0-99/1234`. `*` means unknown.
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}
