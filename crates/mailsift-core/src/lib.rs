//! # mailsift-core
//!
//! Filtering logic for the `Mailsift` content filter.
//!
//! This crate provides:
//! - **Classifier** - tokenizer, vocabulary, naive Bayes model and versioned
//!   snapshots with hot reload
//! - **Recipient policy** - ordered regex rules deciding who gets filtered
//! - **Content rewriting** - subject prefix and diagnostic headers
//! - **Delivery** - relay to the next-hop SMTP server with per-recipient
//!   refusals
//! - **Pipeline** - the per-envelope flow tying everything together

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod classifier;
pub mod config;
mod error;
pub mod forward;
pub mod pipeline;
pub mod policy;
pub mod rewrite;

pub use classifier::{
    ArtifactHeader, ClassifierService, FeatureTransform, Label, Model, ModelKind, SnapshotStore,
    SparseVector, Tokenizer, VectorizerKind, Vocabulary,
};
pub use config::{ClassifierConfig, Config, FilterConfig, LogConfig, RuleConfig, ServerConfig};
pub use error::{Error, Result};
pub use forward::{DeliveryForwarder, NextHop, Refusal, RefusalMap};
pub use pipeline::{Envelope, Pipeline, format_response};
pub use policy::{RecipientPolicy, RecipientRule};
pub use rewrite::ContentRewriter;

pub use mailsift_mime::{ContentExtractor, MailContent};
