//! Document store for the four persisted collections.
//!
//! # Storage layout
//!
//! ```text
//! ~/.plategate/
//!   data/
//!     plates.yaml    (plate registry — replace-all, mode 0600)
//!     cameras.yaml   (camera settings — replace-all, mode 0600)
//!     gates.yaml     (gate channel configuration — replace-all, mode 0600)
//!     events.jsonl   (access events — append-only, one JSON object per line)
//! ```
//!
//! # Consistency
//!
//! Replace-all writes go through a `.tmp` sibling and `rename`, so a reader
//! sees either the old or the new collection, never a torn one. Readers take
//! a fresh snapshot on every call; there is no cross-collection transaction.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::plategate_root;
use crate::error::StoreError;
use crate::types::{AccessEvent, CameraIp, CameraSettings, ChannelConfig, EventFilter, PlateRecord};

pub const PLATES_FILE: &str = "plates.yaml";
pub const CAMERAS_FILE: &str = "cameras.yaml";
pub const GATES_FILE: &str = "gates.yaml";
pub const EVENTS_FILE: &str = "events.jsonl";

/// Default number of events returned by [`DocumentStore::recent_events`].
pub const RECENT_EVENTS_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// 1. Store boundary
// ---------------------------------------------------------------------------

/// Find-all / replace-all / append access to the persisted collections.
///
/// Find-by-field and event queries have default implementations on top of
/// the find-all primitives.
pub trait DocumentStore: Send + Sync {
    fn plates(&self) -> Result<Vec<PlateRecord>, StoreError>;
    fn replace_plates(&self, records: &[PlateRecord]) -> Result<usize, StoreError>;

    fn cameras(&self) -> Result<Vec<CameraSettings>, StoreError>;
    fn replace_cameras(&self, cameras: &[CameraSettings]) -> Result<usize, StoreError>;

    fn gate_channels(&self) -> Result<Vec<ChannelConfig>, StoreError>;
    fn replace_gate_channels(&self, channels: &[ChannelConfig]) -> Result<usize, StoreError>;

    fn append_event(&self, event: &AccessEvent) -> Result<(), StoreError>;
    fn events(&self) -> Result<Vec<AccessEvent>, StoreError>;

    fn find_camera(&self, ip: &CameraIp) -> Result<Option<CameraSettings>, StoreError> {
        Ok(self.cameras()?.into_iter().find(|camera| &camera.ip == ip))
    }

    fn find_gate_channel(&self, channel: u8) -> Result<Option<ChannelConfig>, StoreError> {
        Ok(self
            .gate_channels()?
            .into_iter()
            .find(|config| config.channel == channel))
    }

    /// The last `limit` events of `channel`, oldest first.
    fn recent_events(&self, channel: u8, limit: usize) -> Result<Vec<AccessEvent>, StoreError> {
        let mut events: Vec<AccessEvent> = self
            .events()?
            .into_iter()
            .filter(|event| event.channel_number == Some(channel))
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events.reverse();
        Ok(events)
    }

    /// Events matching `filter`, newest first.
    fn query_events(&self, filter: &EventFilter) -> Result<Vec<AccessEvent>, StoreError> {
        let mut events: Vec<AccessEvent> = self
            .events()?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// 2. File-backed store
// ---------------------------------------------------------------------------

/// YAML/JSONL store rooted at `<home>/.plategate/data/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store under an explicit home; used in tests with `TempDir`.
    pub fn at(home: &Path) -> Self {
        Self {
            dir: data_dir_at(home),
        }
    }

    /// Store under `dirs::home_dir()`.
    pub fn open() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
        Ok(Self::at(&home))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
            set_dir_permissions(&self.dir)?;
        }
        Ok(())
    }

    fn load_collection<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StoreError> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(vec![]);
        }
        let contents = std::fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(vec![]);
        }
        serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
    }

    /// Write flow: serialize → `<file>.tmp` sibling → `chmod 0600` → `rename`.
    fn replace_collection<T: Serialize>(&self, file: &str, items: &[T]) -> Result<usize, StoreError> {
        self.ensure_dir()?;
        let path = self.path(file);
        let tmp_path = path.with_file_name(format!("{file}.tmp"));

        let yaml = serde_yaml::to_string(items)?;
        std::fs::write(&tmp_path, yaml)?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(items.len())
    }
}

impl DocumentStore for FileStore {
    fn plates(&self) -> Result<Vec<PlateRecord>, StoreError> {
        self.load_collection(PLATES_FILE)
    }

    fn replace_plates(&self, records: &[PlateRecord]) -> Result<usize, StoreError> {
        self.replace_collection(PLATES_FILE, records)
    }

    fn cameras(&self) -> Result<Vec<CameraSettings>, StoreError> {
        self.load_collection(CAMERAS_FILE)
    }

    fn replace_cameras(&self, cameras: &[CameraSettings]) -> Result<usize, StoreError> {
        self.replace_collection(CAMERAS_FILE, cameras)
    }

    fn gate_channels(&self) -> Result<Vec<ChannelConfig>, StoreError> {
        self.load_collection(GATES_FILE)
    }

    fn replace_gate_channels(&self, channels: &[ChannelConfig]) -> Result<usize, StoreError> {
        self.replace_collection(GATES_FILE, channels)
    }

    /// One `write_all` per event so concurrent appenders never interleave a line.
    fn append_event(&self, event: &AccessEvent) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.path(EVENTS_FILE);
        let mut line = Vec::new();
        if ends_torn(&path)? {
            line.push(b'\n');
        }
        line.extend(serde_json::to_vec(event)?);
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        set_file_permissions(&path)?;
        Ok(())
    }

    /// Lines that do not parse are skipped with a warning. A daemon killed
    /// mid-append leaves a torn last line; it must not hide the history.
    fn events(&self) -> Result<Vec<AccessEvent>, StoreError> {
        let path = self.path(EVENTS_FILE);
        if !path.exists() {
            return Ok(vec![]);
        }
        let contents = std::fs::read_to_string(&path)?;
        let events = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %err,
                        "skipping unreadable access event",
                    );
                    None
                }
            })
            .collect();
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// True when the log's last byte is not a newline, i.e. an earlier append
/// was cut short.
fn ends_torn(path: &Path) -> Result<bool, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// `<home>/.plategate/data/`. Pure, no I/O.
pub fn data_dir_at(home: &Path) -> PathBuf {
    plategate_root(home).join("data")
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
