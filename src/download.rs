#![forbid(unsafe_code)]

//! Chunked download of a remote file to a fixed local path.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::drive::{RemoteFile, Storage};
use crate::error::{PipelineError, Result};

pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Downloads `file` into `local_path`, one range request per chunk.
///
/// Bytes go to `<local_path>.part` first and are renamed into place once the
/// last chunk arrives; on any failure the partial file is removed.
pub fn download<S: Storage + ?Sized>(
    storage: &S,
    file: &RemoteFile,
    local_path: &Path,
    chunk_size: u64,
) -> Result<u64> {
    let part_path = part_path_for(local_path);
    let outcome = download_to(storage, file, &part_path, chunk_size).and_then(|written| {
        fs::rename(&part_path, local_path).map_err(|err| {
            PipelineError::transfer(format!("finalizing {}", local_path.display()), err)
        })?;
        Ok(written)
    });

    if outcome.is_err()
        && part_path.exists()
        && let Err(err) = fs::remove_file(&part_path)
    {
        warn!(path = %part_path.display(), error = %err, "could not remove partial download");
    }
    outcome
}

fn part_path_for(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    local_path.with_file_name(name)
}

fn download_to<S: Storage + ?Sized>(
    storage: &S,
    file: &RemoteFile,
    part_path: &Path,
    chunk_size: u64,
) -> Result<u64> {
    if let Some(parent) = part_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            PipelineError::transfer(format!("creating {}", parent.display()), err)
        })?;
    }
    let handle = File::create(part_path)
        .map_err(|err| PipelineError::transfer(format!("creating {}", part_path.display()), err))?;
    let mut writer = BufWriter::new(handle);

    let chunk_size = chunk_size.max(1);
    let mut offset = 0u64;
    let mut total = file.size;
    loop {
        if let Some(total) = total
            && offset >= total
        {
            break;
        }
        let read = storage.read_range(&file.id, offset, chunk_size, &mut writer)?;
        offset += read.written;
        if total.is_none() {
            total = read.total;
        }
        debug!(file = %file.name, offset, ?total, "downloaded chunk");

        // Without a known size, a short chunk is the only end marker.
        if read.written == 0 || (total.is_none() && read.written < chunk_size) {
            break;
        }
    }

    if let Some(total) = total
        && offset != total
    {
        return Err(PipelineError::transfer(
            format!("downloading {}", file.name),
            format!("received {offset} of {total} bytes"),
        ));
    }

    writer
        .flush()
        .map_err(|err| PipelineError::transfer(format!("writing {}", part_path.display()), err))?;
    Ok(offset)
}
