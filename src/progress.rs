#![forbid(unsafe_code)]

//! Upload progress observers.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

pub trait ProgressObserver {
    /// `fraction` is in `0.0..=1.0`.
    fn on_progress(&mut self, fraction: f64);
}

fn as_percent(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8
}

/// Prints `Upload N%` to stdout whenever the whole percentage changes.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    last: Option<u8>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&mut self, fraction: f64) {
        let percent = as_percent(fraction);
        if self.last != Some(percent) {
            self.last = Some(percent);
            println!("Upload {percent}%");
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressReport {
    progress: u8,
    message: String,
}

/// Mirrors progress into a small JSON file so wrappers can poll it.
#[derive(Clone, Debug)]
pub struct ProgressWriter {
    path: PathBuf,
}

impl ProgressWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn write(&self, progress: u8, message: &str) {
        let report = ProgressReport {
            progress: progress.min(100),
            message: message.to_string(),
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!(error = %err, "could not create progress dir");
            return;
        }

        let tmp_path = self.path.with_extension("tmp");
        match serde_json::to_vec(&report) {
            Ok(payload) => {
                if let Err(err) = fs::write(&tmp_path, payload) {
                    warn!(error = %err, "could not write progress file");
                    return;
                }
                if let Err(err) = fs::rename(&tmp_path, &self.path) {
                    warn!(error = %err, "could not finalize progress file");
                }
            }
            Err(err) => {
                warn!(error = %err, "could not serialize progress report");
            }
        }
    }
}

impl ProgressObserver for ProgressWriter {
    fn on_progress(&mut self, fraction: f64) {
        let percent = as_percent(fraction);
        self.write(percent, &format!("Uploading video ({percent}%)"));
    }
}

/// Forwards every report to each wrapped observer.
#[derive(Default)]
pub struct ProgressFanout {
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl ProgressFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }
}

impl ProgressObserver for ProgressFanout {
    fn on_progress(&mut self, fraction: f64) {
        for observer in &mut self.observers {
            observer.on_progress(fraction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<f64>>>);

    impl ProgressObserver for Recorder {
        fn on_progress(&mut self, fraction: f64) {
            self.0.borrow_mut().push(fraction);
        }
    }

    #[test]
    fn percent_is_clamped_and_floored() {
        assert_eq!(as_percent(-0.5), 0);
        assert_eq!(as_percent(0.499), 49);
        assert_eq!(as_percent(1.0), 100);
        assert_eq!(as_percent(3.0), 100);
    }

    #[test]
    fn console_progress_skips_repeated_percentages() {
        let mut console = ConsoleProgress::new();
        console.on_progress(0.101);
        assert_eq!(console.last, Some(10));
        console.on_progress(0.109);
        assert_eq!(console.last, Some(10));
        console.on_progress(1.0);
        assert_eq!(console.last, Some(100));
    }

    #[test]
    fn progress_writer_writes_json_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("progress.json");
        let mut writer = ProgressWriter::new(path.clone());

        writer.on_progress(0.425);

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["progress"], 42);
        assert_eq!(value["message"], "Uploading video (42%)");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn fanout_reaches_every_observer() {
        let first = Rc::new(RefCell::new(Vec::new()));
        let second = Rc::new(RefCell::new(Vec::new()));
        let mut fanout = ProgressFanout::new()
            .with(Recorder(first.clone()))
            .with(Recorder(second.clone()));

        fanout.on_progress(0.5);
        fanout.on_progress(1.0);

        assert_eq!(*first.borrow(), vec![0.5, 1.0]);
        assert_eq!(*second.borrow(), vec![0.5, 1.0]);
    }
}
