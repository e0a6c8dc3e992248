//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use mailsift_core::{ClassifierService, Config, Label, MailContent, Pipeline};
use mailsift_mime::ContentExtractor;
use tracing::info;

use crate::listener::Listener;
use crate::reload;
use crate::session::SessionSettings;

/// Runs the content filter until interrupted.
pub async fn serve(config: Config) -> Result<()> {
    let classifier = Arc::new(
        ClassifierService::from_config(&config.classifier)
            .context("invalid classifier configuration")?,
    );
    let pipeline = Arc::new(
        Pipeline::from_config(&config, Arc::clone(&classifier))
            .context("invalid filter configuration")?,
    );
    let settings = Arc::new(SessionSettings {
        hostname: config.server.hostname.clone(),
        max_message_size: config.server.max_message_size,
    });

    let (trigger, _reload_task) = reload::start(classifier);
    reload::watch_hangup(trigger).context("failed to install SIGHUP handler")?;

    let listener = Listener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.server.listen))?;
    info!(
        next_hop = %config.server.next_hop,
        training = config.classifier.training,
        "mailsift running"
    );

    tokio::select! {
        () = listener.run(pipeline, settings) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to wait for shutdown signal")?;
            info!("shutting down");
        }
    }

    Ok(())
}

/// Trains the classifier from stored messages and saves it.
pub async fn learn(mut config: Config, spam: Vec<PathBuf>, ham: Vec<PathBuf>) -> Result<()> {
    if spam.is_empty() && ham.is_empty() {
        bail!("nothing to learn: pass --spam and/or --ham files");
    }
    config.classifier.training = true;

    let extractor = extractor(&config)?;
    let mut contents = Vec::with_capacity(spam.len() + ham.len());
    let mut labels = Vec::with_capacity(spam.len() + ham.len());
    for (files, label) in [(spam, Label::Spam), (ham, Label::Ham)] {
        for file in files {
            contents.push(read_content(&extractor, &file).await?);
            labels.push(label);
        }
    }

    let classifier = ClassifierService::from_config(&config.classifier)
        .context("invalid classifier configuration")?;
    let documents = contents.len();
    let generation = tokio::task::spawn_blocking(move || -> Result<u64> {
        classifier
            .learn(&contents, &labels)
            .context("training failed")?;
        classifier.save().context("failed to save classifier")
    })
    .await??;

    info!(
        documents,
        generation,
        data_dir = %config.classifier.data_dir.display(),
        "classifier saved"
    );
    Ok(())
}

/// Prints the label of one stored message.
pub async fn classify(config: Config, file: &Path) -> Result<()> {
    let extractor = extractor(&config)?;
    let content = read_content(&extractor, file).await?;

    let classifier = ClassifierService::from_config(&config.classifier)
        .context("invalid classifier configuration")?;
    let label = tokio::task::spawn_blocking(move || classifier.predict(&content))
        .await?
        .context("classification failed")?;

    println!("{label}");
    Ok(())
}

fn extractor(config: &Config) -> Result<ContentExtractor> {
    ContentExtractor::new(
        &config.filter.spam_subject_patterns,
        config.classifier.max_body_chars,
    )
    .context("invalid spam subject pattern")
}

async fn read_content(extractor: &ContentExtractor, path: &Path) -> Result<MailContent> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(extractor.extract(&raw))
}
