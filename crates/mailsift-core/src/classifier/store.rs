//! Persisted classifier artifacts.
//!
//! A snapshot is two JSON files in the data directory, named after the
//! configuration that produced them:
//!
//! - `vocabulary-<vectorizer>-<min>_<max>.json`
//! - `model-<model>-<vectorizer>-<min>_<max>.json`
//!
//! Both start with an [`ArtifactHeader`]. The header tags are checked
//! against the configuration on load, and both files must carry the same
//! generation so a vocabulary is never paired with a model from another
//! save.

use super::model::{Model, ModelKind};
use super::transform::VectorizerKind;
use super::vocabulary::Vocabulary;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Identifies what produced an artifact and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Model kind; absent on the vocabulary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_kind: Option<ModelKind>,
    /// Vectorizer kind.
    pub vectorizer_kind: VectorizerKind,
    /// Inclusive n-gram range.
    pub ngram_range: (usize, usize),
    /// Stamp shared by the files of one save.
    pub generation: u64,
    /// Time of the save.
    pub saved_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Artifact<T> {
    header: ArtifactHeader,
    body: T,
}

/// Reads and writes snapshots for one configuration.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    model_kind: ModelKind,
    vectorizer_kind: VectorizerKind,
    ngram_range: (usize, usize),
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Creates a store rooted at `dir`.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        model_kind: ModelKind,
        vectorizer_kind: VectorizerKind,
        ngram_range: (usize, usize),
    ) -> Self {
        Self {
            dir: dir.into(),
            model_kind,
            vectorizer_kind,
            ngram_range,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the model kind this store reads and writes.
    #[must_use]
    pub const fn model_kind(&self) -> ModelKind {
        self.model_kind
    }

    /// Path of the vocabulary artifact.
    #[must_use]
    pub fn vocabulary_path(&self) -> PathBuf {
        let (min, max) = self.ngram_range;
        self.dir
            .join(format!("vocabulary-{}-{min}_{max}.json", self.vectorizer_kind))
    }

    /// Path of the model artifact.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        let (min, max) = self.ngram_range;
        self.dir.join(format!(
            "model-{}-{}-{min}_{max}.json",
            self.model_kind, self.vectorizer_kind
        ))
    }


    /// Writes both artifacts atomically and returns their generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a file cannot
    /// be written.
    pub fn save(&self, vocabulary: &Vocabulary, model: &Model) -> Result<u64> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&self.dir)?;

        let saved_at = Utc::now();
        let generation = saved_at
            .timestamp_nanos_opt()
            .and_then(|nanos| u64::try_from(nanos).ok())
            .unwrap_or_default();

        let header = ArtifactHeader {
            model_kind: None,
            vectorizer_kind: self.vectorizer_kind,
            ngram_range: self.ngram_range,
            generation,
            saved_at,
        };
        let vocabulary_artifact = Artifact {
            header: header.clone(),
            body: vocabulary,
        };
        let model_artifact = Artifact {
            header: ArtifactHeader {
                model_kind: Some(self.model_kind),
                ..header
            },
            body: model,
        };

        write_atomic(
            &self.vocabulary_path(),
            &serde_json::to_vec(&vocabulary_artifact)?,
        )?;
        write_atomic(&self.model_path(), &serde_json::to_vec(&model_artifact)?)?;

        info!(
            dir = %self.dir.display(),
            generation,
            tokens = vocabulary.len(),
            "classifier saved"
        );
        Ok(generation)
    }

    /// Loads and verifies both artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] if a file is missing, unreadable or from a
    /// different save, and [`Error::TypeMismatch`] if a tag does not match
    /// this store's configuration.
    pub fn load(&self) -> Result<(Vocabulary, Model, ArtifactHeader)> {
        let vocabulary_path = self.vocabulary_path();
        let model_path = self.model_path();

        let vocabulary = self.read_vocabulary()?;

        let model: Artifact<Model> = read_artifact(&model_path)?;
        self.verify(&model_path, &model.header, Some(self.model_kind))?;
        if model.body.kind() != self.model_kind {
            return Err(mismatch(&model_path, self.model_kind, model.body.kind()));
        }

        if vocabulary.header.generation != model.header.generation {
            return Err(Error::Load(format!(
                "{} (generation {}) and {} (generation {}) come from different saves",
                vocabulary_path.display(),
                vocabulary.header.generation,
                model_path.display(),
                model.header.generation
            )));
        }

        debug!(
            generation = model.header.generation,
            tokens = vocabulary.body.len(),
            "classifier artifacts read"
        );
        Ok((vocabulary.body, model.body, model.header))
    }

    /// Loads and verifies the vocabulary artifact alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] if the file is missing or unreadable and
    /// [`Error::TypeMismatch`] if a tag does not match this store's
    /// configuration.
    pub fn load_vocabulary(&self) -> Result<(Vocabulary, ArtifactHeader)> {
        self.read_vocabulary()
            .map(|artifact| (artifact.body, artifact.header))
    }

    fn read_vocabulary(&self) -> Result<Artifact<Vocabulary>> {
        let path = self.vocabulary_path();
        let vocabulary: Artifact<Vocabulary> = read_artifact(&path)?;
        self.verify(&path, &vocabulary.header, None)?;
        Ok(vocabulary)
    }

    fn verify(
        &self,
        path: &Path,
        header: &ArtifactHeader,
        model_kind: Option<ModelKind>,
    ) -> Result<()> {
        if header.vectorizer_kind != self.vectorizer_kind {
            return Err(mismatch(path, self.vectorizer_kind, header.vectorizer_kind));
        }
        if header.ngram_range != self.ngram_range {
            return Err(mismatch(
                path,
                format!("{:?}", self.ngram_range),
                format!("{:?}", header.ngram_range),
            ));
        }
        if header.model_kind != model_kind {
            return Err(mismatch(
                path,
                format!("{model_kind:?}"),
                format!("{:?}", header.model_kind),
            ));
        }
        Ok(())
    }
}

fn mismatch(path: &Path, expected: impl ToString, found: impl ToString) -> Error {
    Error::TypeMismatch {
        artifact: path.display().to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<Artifact<T>> {
    let bytes = fs::read(path)
        .map_err(|err| Error::Load(format!("cannot read {}: {err}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| Error::Load(format!("cannot parse {}: {err}", path.display())))
}

/// Writes to a temporary sibling, syncs it, then renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = File::create(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    Ok(())
}
