//! Shared, reloadable classifier.

use super::Label;
use super::model::Model;
use super::store::SnapshotStore;
use super::tokenizer::Tokenizer;
use super::transform::{FeatureTransform, SparseVector};
use super::vocabulary::Vocabulary;
use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use mailsift_mime::MailContent;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Everything a prediction reads, swapped as one unit.
#[derive(Debug, Clone)]
struct Snapshot {
    transform: Arc<FeatureTransform>,
    vocabulary: Vocabulary,
    model: Model,
}

/// Owns the active classifier snapshot.
///
/// The snapshot is loaded lazily on first use. Predictions clone the
/// current `Arc` under the lock and compute outside it. Learning mutates
/// through copy-on-write, so predictions already running keep the snapshot
/// they started with. Reload builds the new snapshot before taking the lock
/// and only swaps the reference under it. Learning and reloading exclude
/// each other.
///
/// All methods block; async callers run them on a blocking worker.
#[derive(Debug)]
pub struct ClassifierService {
    store: SnapshotStore,
    transform: Arc<FeatureTransform>,
    training: bool,
    chunk_size: usize,
    state: Mutex<Option<Arc<Snapshot>>>,
    update_gate: Mutex<()>,
}

impl ClassifierService {
    /// Creates a service. Nothing is read from disk until first use.
    #[must_use]
    pub fn new(
        store: SnapshotStore,
        transform: FeatureTransform,
        training: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            transform: Arc::new(transform),
            training,
            chunk_size: chunk_size.max(1),
            state: Mutex::new(None),
            update_gate: Mutex::new(()),
        }
    }

    /// Creates a service from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid n-gram range or an
    /// unknown stopword language.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let tokenizer = Tokenizer::new(config.ngram_range(), &config.stopword_languages)?;
        let store = SnapshotStore::new(
            &config.data_dir,
            config.model,
            config.vectorizer,
            config.ngram_range(),
        );
        Ok(Self::new(
            store,
            FeatureTransform::new(config.vectorizer, tokenizer),
            config.training,
            config.train_chunk_size,
        ))
    }

    /// Returns the artifact store.
    #[must_use]
    pub const fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Returns the current vocabulary size, loading if needed.
    ///
    /// # Errors
    ///
    /// Returns a load error if no snapshot can be loaded.
    pub fn vocabulary_len(&self) -> Result<usize> {
        Ok(self.current()?.vocabulary.len())
    }

    /// Classifies one message.
    ///
    /// # Errors
    ///
    /// Returns a load error if no snapshot can be loaded, or
    /// [`Error::Untrained`] if the model has never been fitted.
    pub fn predict(&self, content: &MailContent) -> Result<Label> {
        let snapshot = self.current()?;
        let features = snapshot.transform.transform(content, &snapshot.vocabulary);
        let label = snapshot.model.predict(&features)?;
        debug!(%label, features = features.len(), "message classified");
        Ok(label)
    }

    /// Learns labelled messages in chunks.
    ///
    /// The terms and document frequencies of every message are added to the
    /// vocabulary first; the chunks are then vectorized against it and
    /// fitted. The chunk size only bounds how many vectors exist at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTraining`] outside training mode and
    /// [`Error::InvalidTraining`] if the slices differ in length.
    pub fn learn(&self, contents: &[MailContent], labels: &[Label]) -> Result<()> {
        if !self.training {
            return Err(Error::NotTraining);
        }
        if contents.len() != labels.len() {
            return Err(Error::InvalidTraining(format!(
                "{} messages but {} labels",
                contents.len(),
                labels.len()
            )));
        }

        let _gate = self.lock_update_gate();

        let added = {
            let mut state = self.lock_state();
            let snapshot = Arc::make_mut(self.ensure_loaded(&mut state)?);
            snapshot
                .transform
                .extend(contents, &mut snapshot.vocabulary)
        };
        debug!(documents = contents.len(), new_terms = added, "vocabulary extended");

        for (chunk, (contents, labels)) in contents
            .chunks(self.chunk_size)
            .zip(labels.chunks(self.chunk_size))
            .enumerate()
        {
            let mut state = self.lock_state();
            let snapshot = Arc::make_mut(self.ensure_loaded(&mut state)?);

            let features: Vec<SparseVector> = contents
                .iter()
                .map(|content| snapshot.transform.transform(content, &snapshot.vocabulary))
                .collect();
            snapshot
                .model
                .fit(&features, labels, snapshot.vocabulary.len())?;

            debug!(
                chunk,
                documents = contents.len(),
                vocabulary = snapshot.vocabulary.len(),
                "training chunk fitted"
            );
        }

        Ok(())
    }

    /// Re-reads the persisted snapshot and swaps it in.
    ///
    /// Returns false without touching disk if nothing was loaded yet; the
    /// next prediction loads the current files anyway.
    ///
    /// # Errors
    ///
    /// Returns a load error if the files cannot be read; the active snapshot
    /// is kept.
    pub fn reload(&self) -> Result<bool> {
        let _gate = self.lock_update_gate();

        if self.lock_state().is_none() {
            info!("classifier not loaded yet, nothing to reload");
            return Ok(false);
        }

        let snapshot = Arc::new(self.load_snapshot()?);
        let tokens = snapshot.vocabulary.len();
        *self.lock_state() = Some(snapshot);

        info!(tokens, "classifier reloaded");
        Ok(true)
    }

    /// Persists the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded or written.
    pub fn save(&self) -> Result<u64> {
        let snapshot = self.current()?;
        self.store.save(&snapshot.vocabulary, &snapshot.model)
    }

    fn lock_update_gate(&self) -> MutexGuard<'_, ()> {
        self.update_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<Arc<Snapshot>>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Result<Arc<Snapshot>> {
        let mut state = self.lock_state();
        self.ensure_loaded(&mut state).map(|snapshot| Arc::clone(snapshot))
    }

    fn ensure_loaded<'a>(
        &self,
        state: &'a mut MutexGuard<'_, Option<Arc<Snapshot>>>,
    ) -> Result<&'a mut Arc<Snapshot>> {
        if state.is_none() {
            **state = Some(Arc::new(self.initial_snapshot()?));
        }
        state
            .as_mut()
            .ok_or_else(|| Error::Load("classifier state missing".into()))
    }

    /// Serving loads both artifacts. Training starts from whatever exists:
    /// nothing without a vocabulary, a fresh model on the saved vocabulary
    /// without a model file, the full snapshot otherwise.
    fn initial_snapshot(&self) -> Result<Snapshot> {
        if !self.training {
            return self.load_snapshot();
        }

        if !self.store.vocabulary_path().exists() {
            info!(
                vectorizer = %self.transform.kind(),
                "no classifier artifacts, starting empty for training"
            );
            return Ok(self.fresh_snapshot(Vocabulary::new()));
        }

        if !self.store.model_path().exists() {
            let (vocabulary, header) = self.store.load_vocabulary()?;
            info!(
                generation = header.generation,
                tokens = vocabulary.len(),
                "no saved model, training a fresh one on the saved vocabulary"
            );
            return Ok(self.fresh_snapshot(vocabulary));
        }

        self.load_snapshot()
    }

    fn fresh_snapshot(&self, vocabulary: Vocabulary) -> Snapshot {
        Snapshot {
            transform: Arc::clone(&self.transform),
            vocabulary,
            model: Model::new(self.store.model_kind()),
        }
    }

    fn load_snapshot(&self) -> Result<Snapshot> {
        let (vocabulary, model, header) = self.store.load()?;
        info!(
            generation = header.generation,
            saved_at = %header.saved_at,
            tokens = vocabulary.len(),
            "classifier loaded"
        );
        Ok(Snapshot {
            transform: Arc::clone(&self.transform),
            vocabulary,
            model,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classifier::{ModelKind, VectorizerKind};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn service(dir: &Path, training: bool, chunk_size: usize) -> ClassifierService {
        service_with(dir, VectorizerKind::Count, training, chunk_size)
    }

    fn service_with(
        dir: &Path,
        vectorizer: VectorizerKind,
        training: bool,
        chunk_size: usize,
    ) -> ClassifierService {
        let config = ClassifierConfig {
            data_dir: dir.to_path_buf(),
            model: ModelKind::MultinomialNb,
            vectorizer,
            ngram_min: 1,
            ngram_max: 1,
            training,
            train_chunk_size: chunk_size,
            ..ClassifierConfig::default()
        };
        ClassifierService::from_config(&config).unwrap()
    }

    fn corpus() -> (Vec<MailContent>, Vec<Label>) {
        (
            vec![
                MailContent::new("deals@pharma.example", "cheap pills", "buy cheap pills now"),
                MailContent::new("win@lottery.example", "you won", "claim your prize money"),
                MailContent::new("alice@corp.example", "meeting notes", "agenda for the meeting"),
                MailContent::new("bob@corp.example", "project status", "status report attached"),
            ],
            vec![Label::Spam, Label::Spam, Label::Ham, Label::Ham],
        )
    }

    #[test]
    fn test_serving_mode_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), false, 10);
        let err = service
            .predict(&MailContent::new("a", "b", "c"))
            .unwrap_err();
        assert!(err.is_load_error());
        assert!(matches!(
            service.learn(&[], &[]),
            Err(Error::NotTraining)
        ));
    }

    #[test]
    fn test_untrained_training_service() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), true, 10);
        assert!(matches!(
            service.predict(&MailContent::default()),
            Err(Error::Untrained)
        ));
    }

    #[test]
    fn test_learn_then_predict_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), true, 1);
        let (contents, labels) = corpus();
        service.learn(&contents, &labels).unwrap();

        let sample = MailContent::new("x@pharma.example", "cheap pills", "cheap");
        let first = service.predict(&sample).unwrap();
        assert_eq!(first, Label::Spam);
        for _ in 0..5 {
            assert_eq!(service.predict(&sample).unwrap(), first);
        }
        assert_eq!(
            service
                .predict(&MailContent::new("", "meeting agenda", "status"))
                .unwrap(),
            Label::Ham
        );
    }

    #[test]
    fn test_learned_document_predicts_after_extend() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), true, 10);
        let (contents, labels) = corpus();
        service.learn(&contents[..2], &labels[..2]).unwrap();

        let unseen = MailContent::new("new@sender.example", "brand new words", "zebra quartz");
        service.learn(std::slice::from_ref(&unseen), &[Label::Ham]).unwrap();
        assert!(service.predict(&unseen).is_ok());
    }

    #[test]
    fn test_chunk_size_does_not_change_the_model() {
        let contents = [
            MailContent::new("", "", "cheap pills cheap"),
            MailContent::new("", "", "meeting agenda pills"),
            MailContent::new("", "", "cheap offer"),
            MailContent::new("", "", "agenda notes meeting"),
        ];
        let labels = [Label::Spam, Label::Ham, Label::Spam, Label::Ham];

        for vectorizer in [VectorizerKind::Count, VectorizerKind::Tfidf] {
            let whole_dir = tempfile::tempdir().unwrap();
            let chunked_dir = tempfile::tempdir().unwrap();
            let whole = service_with(whole_dir.path(), vectorizer, true, 100);
            let chunked = service_with(chunked_dir.path(), vectorizer, true, 1);
            whole.learn(&contents, &labels).unwrap();
            chunked.learn(&contents, &labels).unwrap();

            let whole = whole.current().unwrap();
            let chunked = chunked.current().unwrap();
            assert_eq!(whole.vocabulary, chunked.vocabulary, "{vectorizer}");
            assert_eq!(
                serde_json::to_string(&whole.model).unwrap(),
                serde_json::to_string(&chunked.model).unwrap(),
                "{vectorizer}"
            );
        }
    }

    #[test]
    fn test_training_without_model_file_keeps_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let (contents, labels) = corpus();
        let trainer = service(dir.path(), true, 10);
        trainer.learn(&contents, &labels).unwrap();
        trainer.save().unwrap();
        let tokens = trainer.vocabulary_len().unwrap();
        std::fs::remove_file(trainer.store().model_path()).unwrap();

        let server = service(dir.path(), false, 10);
        assert!(server.predict(&contents[0]).unwrap_err().is_load_error());

        let retrainer = service(dir.path(), true, 10);
        assert_eq!(retrainer.vocabulary_len().unwrap(), tokens);
        assert!(matches!(
            retrainer.predict(&contents[0]),
            Err(Error::Untrained)
        ));
        retrainer.learn(&contents, &labels).unwrap();
        assert_eq!(retrainer.vocabulary_len().unwrap(), tokens);
        assert_eq!(retrainer.predict(&contents[0]).unwrap(), Label::Spam);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), true, 10);
        let (contents, _) = corpus();
        assert!(matches!(
            service.learn(&contents, &[Label::Spam]),
            Err(Error::InvalidTraining(_))
        ));
    }

    #[test]
    fn test_save_then_fresh_load_reproduces_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = service(dir.path(), true, 2);
        let (contents, labels) = corpus();
        trainer.learn(&contents, &labels).unwrap();
        trainer.save().unwrap();

        let server = service(dir.path(), false, 2);
        for content in &contents {
            assert_eq!(
                server.predict(content).unwrap(),
                trainer.predict(content).unwrap()
            );
        }
    }

    #[test]
    fn test_reload_before_first_use_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), false, 10);
        assert!(!service.reload().unwrap());
    }

    #[test]
    fn test_reload_swaps_in_new_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (contents, labels) = corpus();

        let trainer = service(dir.path(), true, 10);
        trainer.learn(&contents[..1], &labels[..1]).unwrap();
        trainer.learn(&contents[2..3], &labels[2..3]).unwrap();
        trainer.save().unwrap();

        let server = service(dir.path(), false, 10);
        let before = server.vocabulary_len().unwrap();

        trainer.learn(&contents, &labels).unwrap();
        trainer.save().unwrap();
        assert!(server.reload().unwrap());
        assert!(server.vocabulary_len().unwrap() > before);
    }

    #[test]
    fn test_failed_reload_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (contents, labels) = corpus();
        let trainer = service(dir.path(), true, 10);
        trainer.learn(&contents, &labels).unwrap();
        trainer.save().unwrap();

        let server = service(dir.path(), false, 10);
        let label = server.predict(&contents[0]).unwrap();

        std::fs::remove_file(server.store().model_path()).unwrap();
        assert!(server.reload().unwrap_err().is_load_error());
        assert_eq!(server.predict(&contents[0]).unwrap(), label);
    }

    fn signature(snapshot: &Snapshot, content: &MailContent) -> (usize, Label) {
        let features = snapshot.transform.transform(content, &snapshot.vocabulary);
        (
            snapshot.vocabulary.len(),
            snapshot.model.predict(&features).unwrap(),
        )
    }

    #[test]
    fn test_reload_during_predictions_swaps_whole_snapshots() {
        let (contents, labels) = corpus();
        let flipped: Vec<Label> = labels
            .iter()
            .map(|label| match label {
                Label::Spam => Label::Ham,
                Label::Ham => Label::Spam,
            })
            .collect();

        let first = tempfile::tempdir().unwrap();
        let first_trainer = service(first.path(), true, 10);
        first_trainer
            .learn(&[contents[0].clone(), contents[2].clone()], &[Label::Spam, Label::Ham])
            .unwrap();
        first_trainer.save().unwrap();

        let second = tempfile::tempdir().unwrap();
        let second_trainer = service(second.path(), true, 10);
        second_trainer.learn(&contents, &flipped).unwrap();
        second_trainer.save().unwrap();

        let message = MailContent::new("", "cheap pills", "cheap pills");
        let expected = [first.path(), second.path()].map(|dir| {
            signature(&service(dir, false, 10).current().unwrap(), &message)
        });
        assert_ne!(expected[0], expected[1]);

        let live = tempfile::tempdir().unwrap();
        let server = service(live.path(), false, 10);
        let install = |source: &ClassifierService| {
            for (from, to) in [
                (source.store().vocabulary_path(), server.store().vocabulary_path()),
                (source.store().model_path(), server.store().model_path()),
            ] {
                std::fs::copy(from, to).unwrap();
            }
        };
        install(&first_trainer);
        assert_eq!(signature(&server.current().unwrap(), &message), expected[0]);

        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        let seen = signature(&server.current().unwrap(), &message);
                        assert!(expected.contains(&seen), "mixed snapshot: {seen:?}");
                        assert!(server.predict(&message).is_ok());
                    }
                });
            }

            for round in 0..50 {
                install(if round % 2 == 0 { &second_trainer } else { &first_trainer });
                assert!(server.reload().unwrap());
            }
            done.store(true, Ordering::Relaxed);
        });

        assert_eq!(signature(&server.current().unwrap(), &message), expected[0]);
    }
}
