//! Per-envelope orchestration.
//!
//! ```text
//! Envelope ─→ partition by policy ─┬─ skip  ─→ peer header ───────────────────────→ deliver ─┐
//!                                  └─ apply ─→ peer header ─→ classify ─→ rewrite ─→ deliver ─┴─→ merge ─→ response
//! ```

use crate::classifier::{ClassifierService, Label};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::forward::{DeliveryForwarder, RefusalMap};
use crate::policy::RecipientPolicy;
use crate::rewrite::ContentRewriter;
use mailsift_mime::ContentExtractor;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reply for a successful envelope.
pub const RESPONSE_OK: &str = "250 OK";

/// Reply for an envelope without content.
pub const RESPONSE_EMPTY: &str = "500 Empty message";

/// One inbound message as handed over by the session layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// `MAIL FROM` address; empty for the null sender.
    pub sender: String,
    /// `RCPT TO` addresses in arrival order.
    pub recipients: Vec<String>,
    /// Raw message bytes.
    pub content: Vec<u8>,
    /// Client address; `None` for unix-socket clients.
    pub peer: Option<String>,
}

/// Classifies, rewrites and relays envelopes.
#[derive(Debug)]
pub struct Pipeline {
    policy: RecipientPolicy,
    rewriter: ContentRewriter,
    extractor: ContentExtractor,
    classifier: Arc<ClassifierService>,
    forwarder: DeliveryForwarder,
}

impl Pipeline {
    /// Creates a pipeline from its parts.
    #[must_use]
    pub const fn new(
        policy: RecipientPolicy,
        rewriter: ContentRewriter,
        extractor: ContentExtractor,
        classifier: Arc<ClassifierService>,
        forwarder: DeliveryForwarder,
    ) -> Self {
        Self {
            policy,
            rewriter,
            extractor,
            classifier,
            forwarder,
        }
    }

    /// Creates a pipeline from configuration around a shared classifier.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid recipient rules, subject patterns or
    /// next-hop address.
    pub fn from_config(config: &Config, classifier: Arc<ClassifierService>) -> Result<Self> {
        Ok(Self::new(
            RecipientPolicy::from_config(&config.filter)?,
            ContentRewriter::from_config(&config.filter),
            ContentExtractor::new(
                &config.filter.spam_subject_patterns,
                config.classifier.max_body_chars,
            )?,
            classifier,
            DeliveryForwarder::from_config(&config.server)?,
        ))
    }

    /// Processes one envelope and returns the reply for the sending peer,
    /// without a trailing line break.
    pub async fn process(&self, envelope: &Envelope) -> String {
        if envelope.content.is_empty() {
            debug!(sender = %envelope.sender, "{}", Error::EmptyContent);
            return RESPONSE_EMPTY.to_string();
        }

        let (skip, apply) = self.policy.partition(&envelope.recipients);
        let content = self
            .rewriter
            .insert_peer(&envelope.content, envelope.peer.as_deref());
        debug!(skip = skip.len(), apply = apply.len(), "recipients partitioned");

        let mut refusals = self
            .forwarder
            .deliver(&envelope.sender, &skip, &content)
            .await;

        if !apply.is_empty() {
            let delivered = match self.classify(&content).await {
                Ok(label) => {
                    info!(
                        %label,
                        sender = %envelope.sender,
                        recipients = apply.len(),
                        "message classified"
                    );
                    self.rewriter.rewrite(&content, label)
                }
                Err(err) => {
                    warn!(error = %err, "classification unavailable, passing message through");
                    content
                }
            };
            refusals.extend(
                self.forwarder
                    .deliver(&envelope.sender, &apply, &delivered)
                    .await,
            );
        }

        format_response(&refusals)
    }

    async fn classify(&self, content: &[u8]) -> Result<Label> {
        let mail = self.extractor.extract(content);
        let classifier = Arc::clone(&self.classifier);
        tokio::task::spawn_blocking(move || classifier.predict(&mail))
            .await
            .map_err(|err| Error::Load(format!("classifier task failed: {err}")))?
    }
}

/// Renders merged refusals as the reply to the sending peer.
///
/// ```text
/// 554-Delivery to the following recipients failed:
/// 554-<recipient>: <code> <message>
/// 554 OK
/// ```
#[must_use]
pub fn format_response(refusals: &RefusalMap) -> String {
    if refusals.is_empty() {
        return RESPONSE_OK.to_string();
    }

    let mut response = String::from("554-Delivery to the following recipients failed:\r\n");
    for (recipient, refusal) in refusals {
        let _ = write!(response, "554-{recipient}: {refusal}\r\n");
    }
    response.push_str("554 OK");
    response
}
