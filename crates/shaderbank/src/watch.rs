use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::ShaderError;

type Snapshot = BTreeMap<PathBuf, (Option<SystemTime>, u64)>;

/// Polls a shader folder for added, removed or rewritten `.spv` files.
///
/// Change batches are delivered over a channel so the thread owning the
/// registry decides when to reload. Dropping the watcher stops the polling
/// thread and joins it.
pub struct FolderWatcher {
    folder: PathBuf,
    changes: Receiver<Vec<PathBuf>>,
    stop: Option<Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl FolderWatcher {
    pub fn spawn(folder: impl Into<PathBuf>, interval: Duration) -> Result<Self, ShaderError> {
        let folder = folder.into();
        let (stop_tx, stop_rx) = bounded(1);
        let (change_tx, change_rx) = unbounded();

        let initial = snapshot(&folder);
        debug!(folder = %folder.display(), files = initial.len(), ?interval, "watching shader folder");

        let thread_folder = folder.clone();
        let handle = thread::Builder::new()
            .name("shaderbank-watch".into())
            .spawn(move || poll_folder(thread_folder, interval, initial, stop_rx, change_tx))
            .map_err(|source| ShaderError::Io {
                path: folder.clone(),
                source,
            })?;

        Ok(Self {
            folder,
            changes: change_rx,
            stop: Some(stop_tx),
            join_handle: Some(handle),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Drains every pending batch without blocking. Paths are sorted and
    /// deduplicated; an empty result means nothing changed.
    pub fn try_changes(&self) -> Vec<PathBuf> {
        merge(self.changes.try_iter())
    }

    /// Blocks up to `timeout` for the next batch, then drains the rest.
    pub fn wait_changes(&self, timeout: Duration) -> Vec<PathBuf> {
        match self.changes.recv_timeout(timeout) {
            Ok(first) => merge(std::iter::once(first).chain(self.changes.try_iter())),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                warn!(folder = %self.folder.display(), "shader folder watcher panicked");
            }
        }
    }
}

fn merge(batches: impl Iterator<Item = Vec<PathBuf>>) -> Vec<PathBuf> {
    batches
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn poll_folder(
    folder: PathBuf,
    interval: Duration,
    mut previous: Snapshot,
    stop: Receiver<()>,
    changes: Sender<Vec<PathBuf>>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let current = snapshot(&folder);
        let changed = diff(&previous, &current);
        previous = current;
        if changed.is_empty() {
            continue;
        }

        trace!(count = changed.len(), "shader files changed");
        if changes.send(changed).is_err() {
            break;
        }
    }
}

fn snapshot(folder: &Path) -> Snapshot {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            trace!(folder = %folder.display(), %err, "shader folder not readable");
            return Snapshot::new();
        }
    };

    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "spv"))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            meta.is_file()
                .then(|| (path, (meta.modified().ok(), meta.len())))
        })
        .collect()
}

fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<PathBuf> {
    let mut changed: Vec<PathBuf> = current
        .iter()
        .filter(|(path, stamp)| previous.get(*path) != Some(*stamp))
        .map(|(path, _)| path.clone())
        .collect();
    changed.extend(
        previous
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned(),
    );
    changed.sort();
    changed
}
