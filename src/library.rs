//! A file-backed list of songs this user has uploaded, newest first.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::upload::UploadReceipt;

/// Errors from loading or saving the library file.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to access library file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("library file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One uploaded song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRecord {
    pub id: String,
    pub short_name: String,
    /// Name of the file as the uploader picked it.
    pub file_name: String,
    pub file_size: u64,
    pub file_url: String,
    pub uploaded_by: String,
    pub upload_date: DateTime<Utc>,
    #[serde(default)]
    pub play_count: u64,
}

impl SongRecord {
    /// Build a record for a finished upload of `file_name`, stamped with
    /// the current time.
    pub fn from_receipt(receipt: &UploadReceipt, file_name: &str, file_size: u64) -> Self {
        Self::from_receipt_at(receipt, file_name, file_size, Utc::now())
    }

    pub fn from_receipt_at(
        receipt: &UploadReceipt,
        file_name: &str,
        file_size: u64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: at.timestamp_millis().to_string(),
            short_name: receipt.short_name.clone(),
            file_name: file_name.to_owned(),
            file_size,
            file_url: receipt.url.clone(),
            uploaded_by: receipt.uploaded_by.clone(),
            upload_date: at,
            play_count: 0,
        }
    }

    fn matches(&self, needle: &str) -> bool {
        [
            &self.short_name,
            &self.file_name,
            &self.uploaded_by,
            &self.file_url,
        ]
        .iter()
        .any(|s| s.to_lowercase().contains(needle))
    }
}

/// The song list together with the file it lives in.
#[derive(Debug)]
pub struct Library {
    path: PathBuf,
    songs: Vec<SongRecord>,
}

impl Library {
    /// Load the library at `path`; a missing file is an empty library.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let path = path.into();
        let songs = match std::fs::read(&path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(data) => serde_json::from_slice(&data).map_err(|source| LibraryError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(LibraryError::Io { path, source }),
        };
        debug!(path = %path.display(), songs = songs.len(), "library loaded");
        Ok(Self { path, songs })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Songs, newest first.
    pub fn songs(&self) -> &[SongRecord] {
        &self.songs
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&SongRecord> {
        self.songs.iter().find(|s| s.id == id)
    }

    /// Put `song` at the front and save. On error the library is unchanged.
    pub fn add(&mut self, song: SongRecord) -> Result<(), LibraryError> {
        let mut songs = Vec::with_capacity(self.songs.len() + 1);
        songs.push(song);
        songs.extend(self.songs.iter().cloned());
        self.replace(songs)
    }

    /// Remove the song with `id` and save. Returns whether one was removed.
    /// On error the library is unchanged.
    pub fn remove(&mut self, id: &str) -> Result<bool, LibraryError> {
        if self.find(id).is_none() {
            return Ok(false);
        }
        let songs = self.songs.iter().filter(|s| s.id != id).cloned().collect();
        self.replace(songs)?;
        Ok(true)
    }

    /// Drop every song and delete the file.
    pub fn clear(&mut self) -> Result<(), LibraryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(self.io_error(source)),
        }
        self.songs.clear();
        Ok(())
    }

    /// Case-insensitive search over name, file name, uploader and URL.
    /// An empty term matches everything.
    pub fn search(&self, term: &str) -> Vec<&SongRecord> {
        let needle = term.trim().to_lowercase();
        self.songs.iter().filter(|s| s.matches(&needle)).collect()
    }

    /// Persist `songs`, then adopt them.
    fn replace(&mut self, songs: Vec<SongRecord>) -> Result<(), LibraryError> {
        self.save(&songs)?;
        self.songs = songs;
        Ok(())
    }

    fn save(&self, songs: &[SongRecord]) -> Result<(), LibraryError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }

        let data = serde_json::to_vec_pretty(songs).map_err(|source| LibraryError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let written = std::fs::write(&tmp, data).and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.io_error(e));
        }
        debug!(path = %self.path.display(), songs = songs.len(), "library saved");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> LibraryError {
        LibraryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
