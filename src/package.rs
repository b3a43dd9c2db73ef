#![forbid(unsafe_code)]

//! Picks the video package to process from the incoming folder.

use tracing::debug;

use crate::drive::{FOLDER_MIME_TYPE, FileQuery, RemoteFile, Storage, smallest_id};
use crate::error::Result;

pub const VIDEO_EXTENSION: &str = ".mp4";
pub const DESCRIPTION_EXTENSION: &str = ".txt";
pub const THUMBNAIL_EXTENSION: &str = ".jpg";

/// One video plus the files that share its base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPackage {
    pub video: RemoteFile,
    pub description: RemoteFile,
    pub thumbnail: Option<RemoteFile>,
}

impl VideoPackage {
    /// Every remote file belonging to the package, video first.
    pub fn files(&self) -> Vec<&RemoteFile> {
        let mut files = vec![&self.video, &self.description];
        files.extend(self.thumbnail.as_ref());
        files
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    NoFiles,
    NoVideo,
    MissingDescription { video: RemoteFile },
    Ready(VideoPackage),
}

/// All non-trashed entries directly inside the incoming folder.
pub fn list_incoming<S: Storage + ?Sized>(storage: &S, incoming: &str) -> Result<Vec<RemoteFile>> {
    storage.search(&FileQuery::children(incoming))
}

fn has_video_extension(name: &str) -> bool {
    name.len()
        .checked_sub(VIDEO_EXTENSION.len())
        .and_then(|start| name.get(start..))
        .is_some_and(|suffix| suffix.eq_ignore_ascii_case(VIDEO_EXTENSION))
}

/// First entry, in listing order, whose name ends with `.mp4` in any case.
/// Folders are never picked.
pub fn select_video(files: &[RemoteFile]) -> Option<&RemoteFile> {
    files.iter().find(|file| {
        file.mime_type.as_deref() != Some(FOLDER_MIME_TYPE) && has_video_extension(&file.name)
    })
}

/// Name with its last extension removed. A leading dot does not start an
/// extension, so `.mp4` stays `.mp4`.
pub fn base_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(index) if name[..index].chars().any(|ch| ch != '.') => &name[..index],
        _ => name,
    }
}

/// Exact, case-sensitive lookup of `base_name + extension` in `incoming`.
pub fn find_sibling<S: Storage + ?Sized>(
    storage: &S,
    incoming: &str,
    base_name: &str,
    extension: &str,
) -> Result<Option<RemoteFile>> {
    let query = FileQuery::named_child(incoming, &format!("{base_name}{extension}"));
    let matches: Vec<RemoteFile> = storage
        .search(&query)?
        .into_iter()
        .filter(|file| query.matches(file))
        .collect();
    Ok(smallest_id(matches))
}

/// Lists the incoming folder and assembles the package for the first video.
pub fn select_package<S: Storage + ?Sized>(storage: &S, incoming: &str) -> Result<Selection> {
    let files = list_incoming(storage, incoming)?;
    if files.is_empty() {
        return Ok(Selection::NoFiles);
    }
    let Some(video) = select_video(&files).cloned() else {
        return Ok(Selection::NoVideo);
    };

    let base = base_name(&video.name);
    debug!(video = %video.name, base, "selected video");
    let description = find_sibling(storage, incoming, base, DESCRIPTION_EXTENSION)?;
    let thumbnail = find_sibling(storage, incoming, base, THUMBNAIL_EXTENSION)?;

    Ok(match description {
        Some(description) => Selection::Ready(VideoPackage {
            video,
            description,
            thumbnail,
        }),
        None => Selection::MissingDescription { video },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDrive;

    fn named(name: &str) -> RemoteFile {
        RemoteFile {
            id: format!("id-{name}"),
            name: name.into(),
            size: None,
            parents: vec!["in".into()],
            mime_type: None,
        }
    }

    #[test]
    fn select_video_ignores_position_of_other_files() {
        let orders = [
            vec!["a.txt", "b.jpg", "clip.mp4"],
            vec!["clip.mp4", "a.txt", "b.jpg"],
            vec!["a.txt", "clip.mp4", "notes.MP3"],
        ];
        for order in orders {
            let files: Vec<_> = order.iter().map(|name| named(name)).collect();
            assert_eq!(select_video(&files).unwrap().name, "clip.mp4");
        }
    }

    #[test]
    fn select_video_is_case_insensitive_and_takes_first() {
        let files = vec![named("readme.txt"), named("LOUD.MP4"), named("quiet.mp4")];
        assert_eq!(select_video(&files).unwrap().name, "LOUD.MP4");
    }

    #[test]
    fn select_video_skips_folders_and_non_videos() {
        let mut folder = named("archive.mp4");
        folder.mime_type = Some(FOLDER_MIME_TYPE.into());
        let files = vec![folder, named("clip.mp4.txt"), named("été")];
        assert!(select_video(&files).is_none());
    }

    #[test]
    fn base_name_strips_last_extension_only() {
        assert_eq!(base_name("clip.mp4"), "clip");
        assert_eq!(base_name("my.holiday.MP4"), "my.holiday");
        assert_eq!(base_name(".mp4"), ".mp4");
        assert_eq!(base_name("noext"), "noext");
    }

    #[test]
    fn find_sibling_requires_exact_name() {
        let drive = FakeDrive::new();
        let inbox = drive.add_folder("videos", None);
        drive.add_file("Clip.txt", &inbox, b"x");
        drive.add_file("clip.txt.bak", &inbox, b"x");
        assert!(find_sibling(&drive, &inbox, "clip", ".txt").unwrap().is_none());

        let exact = drive.add_file("clip.txt", &inbox, b"x");
        assert_eq!(find_sibling(&drive, &inbox, "clip", ".txt").unwrap(), Some(exact));
    }

    #[test]
    fn find_sibling_stays_inside_incoming() {
        let drive = FakeDrive::new();
        let inbox = drive.add_folder("videos", None);
        let other = drive.add_folder("done", None);
        drive.add_file("clip.txt", &other, b"x");
        assert!(find_sibling(&drive, &inbox, "clip", ".txt").unwrap().is_none());
    }

    #[test]
    fn empty_incoming_yields_no_files() {
        let drive = FakeDrive::new();
        let inbox = drive.add_folder("videos", None);
        assert_eq!(select_package(&drive, &inbox).unwrap(), Selection::NoFiles);
    }

    #[test]
    fn no_video_yields_no_video() {
        let drive = FakeDrive::new();
        let inbox = drive.add_folder("videos", None);
        drive.add_file("notes.txt", &inbox, b"x");
        assert_eq!(select_package(&drive, &inbox).unwrap(), Selection::NoVideo);
    }

    #[test]
    fn missing_description_is_reported() {
        let drive = FakeDrive::new();
        let inbox = drive.add_folder("videos", None);
        let video = drive.add_file("clip.mp4", &inbox, b"v");
        drive.add_file("clip.jpg", &inbox, b"j");
        assert_eq!(
            select_package(&drive, &inbox).unwrap(),
            Selection::MissingDescription { video }
        );
    }

    #[test]
    fn thumbnail_is_optional() {
        let drive = FakeDrive::new();
        let inbox = drive.add_folder("videos", None);
        let video = drive.add_file("clip.mp4", &inbox, b"v");
        let description = drive.add_file("clip.txt", &inbox, b"t");

        let Selection::Ready(package) = select_package(&drive, &inbox).unwrap() else {
            panic!("expected a ready package");
        };
        assert_eq!(package.video, video);
        assert_eq!(package.description, description);
        assert!(package.thumbnail.is_none());
        assert_eq!(package.files().len(), 2);
    }
}
