//! Persisted user registry: name → (face encoding, plate number, registration time).
//!
//! The whole registry is one JSON document rewritten atomically on every
//! successful registration. Readers take an `Arc` snapshot; registration
//! holds a writer lock across check, insert and save. Enrolment photos are
//! kept next to the document as `<name>.jpg`.

use crate::face::{FaceIdentityMatcher, DEFAULT_SIMILARITY_THRESHOLD};
use crate::frame::Frame;
use crate::models::ModelError;
use crate::types::{Encoding, UserRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Read-only view of the registry at one point in time.
pub type RegistrySnapshot = Arc<HashMap<String, UserRecord>>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no face detected in registration image")]
    NoFaceDetected,
    #[error("face is too similar to registered user {existing} (distance {distance:.3})")]
    DuplicateFace { existing: String, distance: f32 },
    #[error("user {0} is already registered")]
    NameTaken(String),
    #[error("invalid user name: {0:?}")]
    InvalidName(String),
    #[error("face encoding is empty")]
    EmptyEncoding,
    #[error("face encoding has {actual} values, registry holds {expected}")]
    EncodingLength { expected: usize, actual: usize },
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("failed to read registry {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist registry to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to save enrolment photo {path}: {source}")]
    Photo {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk layout.
#[derive(Serialize, Deserialize)]
struct RegistryFile {
    users: Vec<UserRecord>,
}

pub struct UserRegistry {
    path: PathBuf,
    similarity_threshold: f32,
    records: RwLock<RegistrySnapshot>,
    writer: Mutex<()>,
}

impl UserRegistry {
    /// Load the registry from `path`.
    ///
    /// Never fails. A missing file yields an empty registry. An unreadable
    /// file, or one holding records with empty or odd-length encodings, is
    /// moved aside to `<path>.corrupt` so the next save cannot destroy it;
    /// whatever records were valid are kept.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_file(&path) {
            Ok(Some(users)) => {
                let (records, rejected) = validated(users);
                if rejected > 0 {
                    tracing::warn!(path = %path.display(), rejected, "registry holds invalid records");
                    back_up(&path);
                }
                tracing::info!(path = %path.display(), users = records.len(), "registry loaded");
                records
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "no registry file, starting empty");
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "registry unreadable, starting empty");
                back_up(&path);
                HashMap::new()
            }
        };

        Self {
            path,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            records: RwLock::new(Arc::new(records)),
            writer: Mutex::new(()),
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the enrolment photo for `name` is kept.
    pub fn photo_path(&self, name: &str) -> PathBuf {
        self.dir().join(format!("{name}.jpg"))
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<UserRecord> {
        self.snapshot().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, sorted by name.
    pub fn users(&self) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self.snapshot().values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    /// Register a user from a face image and keep the image as their
    /// enrolment photo.
    ///
    /// Uses the largest face when the image holds several.
    pub fn register(
        &self,
        matcher: &mut FaceIdentityMatcher,
        name: &str,
        plate_number: &str,
        face_image: &Frame,
    ) -> Result<UserRecord, RegistryError> {
        check_name(name)?;
        let encoding = matcher
            .encode_largest(face_image)?
            .ok_or(RegistryError::NoFaceDetected)?;
        self.insert(name, plate_number, encoding, Some(face_image))
    }

    /// Insert a precomputed encoding, rejecting duplicate names and faces.
    ///
    /// The in-memory registry only changes once the new file is on disk.
    pub fn register_encoding(
        &self,
        name: &str,
        plate_number: &str,
        encoding: Encoding,
    ) -> Result<UserRecord, RegistryError> {
        self.insert(name, plate_number, encoding, None)
    }

    fn insert(
        &self,
        name: &str,
        plate_number: &str,
        encoding: Encoding,
        photo: Option<&Frame>,
    ) -> Result<UserRecord, RegistryError> {
        check_name(name)?;
        if encoding.is_empty() {
            return Err(RegistryError::EmptyEncoding);
        }

        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.snapshot();

        if current.contains_key(name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }

        // Load validation keeps every stored encoding the same length.
        if let Some(expected) = current.values().next().map(|r| r.face_encoding.len()) {
            if encoding.len() != expected {
                return Err(RegistryError::EncodingLength {
                    expected,
                    actual: encoding.len(),
                });
            }
        }

        for existing in current.values() {
            let distance = encoding.distance(&existing.face_encoding);
            if distance < self.similarity_threshold {
                tracing::warn!(
                    user = name,
                    existing = %existing.name,
                    distance,
                    "registration rejected: face matches existing user"
                );
                return Err(RegistryError::DuplicateFace {
                    existing: existing.name.clone(),
                    distance,
                });
            }
        }

        let record = UserRecord {
            name: name.to_string(),
            face_encoding: encoding,
            plate_number: plate_number.to_string(),
            registered_at: Utc::now(),
        };

        let photo_path = photo.map(|frame| self.save_photo(name, frame)).transpose()?;

        let mut next = (*current).clone();
        next.insert(record.name.clone(), record.clone());
        if let Err(e) = self.save(&next) {
            if let Some(photo_path) = &photo_path {
                let _ = std::fs::remove_file(photo_path);
            }
            return Err(e);
        }

        *self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(next);
        tracing::info!(user = name, users = current.len() + 1, "user registered");

        Ok(record)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn persist_err(&self, source: std::io::Error) -> RegistryError {
        RegistryError::Persist {
            path: self.path.clone(),
            source,
        }
    }

    fn save_photo(&self, name: &str, frame: &Frame) -> Result<PathBuf, RegistryError> {
        std::fs::create_dir_all(self.dir()).map_err(|e| self.persist_err(e))?;

        let path = self.photo_path(name);
        if let Err(source) = image::save_buffer(
            &path,
            frame.data(),
            frame.width(),
            frame.height(),
            image::ColorType::Rgb8,
        ) {
            let _ = std::fs::remove_file(&path);
            return Err(RegistryError::Photo { path, source });
        }

        tracing::debug!(path = %path.display(), "enrolment photo saved");
        Ok(path)
    }

    /// Atomically replace the registry file with `records`.
    fn save(&self, records: &HashMap<String, UserRecord>) -> Result<(), RegistryError> {
        let mut users: Vec<UserRecord> = records.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        let bytes = serde_json::to_vec_pretty(&RegistryFile { users })?;

        std::fs::create_dir_all(self.dir()).map_err(|e| self.persist_err(e))?;

        let tmp = sibling(&self.path, ".tmp");
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        };
        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.persist_err(e));
        }

        tracing::debug!(path = %self.path.display(), users = records.len(), "registry saved");
        Ok(())
    }
}

/// Names double as photo file stems.
fn check_name(name: &str) -> Result<(), RegistryError> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn back_up(path: &Path) {
    let backup = sibling(path, ".corrupt");
    match std::fs::rename(path, &backup) {
        Ok(()) => tracing::warn!(backup = %backup.display(), "unusable registry moved aside"),
        Err(e) => tracing::error!(path = %path.display(), error = %e, "could not move unusable registry aside"),
    }
}

fn read_file(path: &Path) -> Result<Option<Vec<UserRecord>>, RegistryError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).map_err(|source| RegistryError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    let file: RegistryFile = serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(file.users))
}

/// Keep records whose encoding is non-empty and of the most common length.
fn validated(users: Vec<UserRecord>) -> (HashMap<String, UserRecord>, usize) {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for user in users.iter().filter(|u| !u.face_encoding.is_empty()) {
        *counts.entry(user.face_encoding.len()).or_default() += 1;
    }
    let expected = counts
        .into_iter()
        .max_by_key(|&(len, count)| (count, len))
        .map(|(len, _)| len);

    let total = users.len();
    let records: HashMap<String, UserRecord> = users
        .into_iter()
        .filter(|u| {
            let ok = Some(u.face_encoding.len()) == expected;
            if !ok {
                tracing::warn!(user = %u.name, len = u.face_encoding.len(), ?expected, "dropping record with bad encoding");
            }
            ok
        })
        .map(|u| (u.name.clone(), u))
        .collect();
    let rejected = total - records.len();
    (records, rejected)
}
