//! End-to-end tests for the envelope pipeline.
//!
//! A loopback SMTP sink plays the next hop, so delivery, refusals and
//! rewriting are checked on the bytes that actually arrive.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{SmtpSink, unreachable_address};
use mailsift_core::{
    ClassifierService, ContentExtractor, ContentRewriter, DeliveryForwarder, Envelope,
    FeatureTransform, Label, MailContent, ModelKind, NextHop, Pipeline, RecipientPolicy,
    SnapshotStore, Tokenizer, VectorizerKind,
};
use tempfile::TempDir;

const SPAM_MESSAGE: &[u8] = b"From: Deals <deals@cheap.example>\r\n\
Subject: Cheap pills discount\r\n\
\r\n\
Buy cheap pills now. Huge discount, limited offer, click now!\r\n";

const HAM_MESSAGE: &[u8] = b"From: Alice <alice@example.com>\r\n\
Subject: Project meeting agenda\r\n\
\r\n\
Please review the agenda for tomorrow's project meeting.\r\n";

fn classifier(dir: &TempDir, training: bool) -> Arc<ClassifierService> {
    let tokenizer = Tokenizer::new((1, 1), &["english"]).unwrap();
    let store = SnapshotStore::new(
        dir.path(),
        ModelKind::MultinomialNb,
        VectorizerKind::Count,
        (1, 1),
    );
    Arc::new(ClassifierService::new(
        store,
        FeatureTransform::new(VectorizerKind::Count, tokenizer),
        training,
        2,
    ))
}

fn trained_classifier(dir: &TempDir) -> Arc<ClassifierService> {
    let service = classifier(dir, true);
    let contents = [
        MailContent::new("deals@cheap.example", "Cheap pills", "buy cheap pills discount offer"),
        MailContent::new("win@lottery.example", "You won", "claim your prize money now click"),
        MailContent::new("promo@cheap.example", "Discount offer", "limited offer buy now cheap"),
        MailContent::new("alice@example.com", "Meeting", "agenda for the project meeting"),
        MailContent::new("bob@example.com", "Review", "please review the project report"),
        MailContent::new("carol@example.com", "Lunch", "lunch tomorrow after the meeting"),
    ];
    let labels = [
        Label::Spam,
        Label::Spam,
        Label::Spam,
        Label::Ham,
        Label::Ham,
        Label::Ham,
    ];
    service.learn(&contents, &labels).unwrap();
    service
}

fn pipeline(
    next_hop: &str,
    rules: &[(&str, bool)],
    classifier: Arc<ClassifierService>,
) -> Pipeline {
    Pipeline::new(
        RecipientPolicy::new(rules.iter().copied(), true).unwrap(),
        ContentRewriter::new("Mailsift", Some("[SPAM] ".to_string())),
        ContentExtractor::default(),
        classifier,
        DeliveryForwarder::new(
            NextHop::parse(next_hop).unwrap(),
            "filter.test",
            Duration::from_secs(5),
        ),
    )
}

fn envelope(recipients: &[&str], content: &[u8]) -> Envelope {
    Envelope {
        sender: "sender@example.com".to_string(),
        recipients: recipients.iter().map(ToString::to_string).collect(),
        content: content.to_vec(),
        peer: Some("192.0.2.10".to_string()),
    }
}

#[tokio::test]
async fn test_spam_is_tagged() {
    let sink = SmtpSink::start(&[]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&sink.address(), &[], trained_classifier(&dir));

    let response = pipeline
        .process(&envelope(&["a@test"], SPAM_MESSAGE))
        .await;
    assert_eq!(response, "250 OK");

    let received = sink.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].sender, "sender@example.com");
    assert_eq!(received[0].recipients, ["a@test"]);
    let text = received[0].text();
    assert!(text.contains("Subject: [SPAM] Cheap pills discount\r\n"));
    assert!(text.contains("Mailsift-Result: spam\r\n"));
    assert!(text.contains("Mailsift-Peer: 192.0.2.10\r\n"));
}

#[tokio::test]
async fn test_ham_keeps_subject() {
    let sink = SmtpSink::start(&[]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&sink.address(), &[], trained_classifier(&dir));

    let response = pipeline.process(&envelope(&["a@test"], HAM_MESSAGE)).await;
    assert_eq!(response, "250 OK");

    let text = sink.received()[0].text();
    assert!(text.contains("Subject: Project meeting agenda\r\n"));
    assert!(text.contains("Mailsift-Result: ham\r\n"));
}

#[tokio::test]
async fn test_partial_refusal_is_reported() {
    let sink = SmtpSink::start(&["b@test", "c@test"]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&sink.address(), &[], trained_classifier(&dir));

    let response = pipeline
        .process(&envelope(&["a@test", "c@test", "b@test"], HAM_MESSAGE))
        .await;
    assert_eq!(
        response,
        "554-Delivery to the following recipients failed:\r\n\
         554-b@test: 550 5.1.1 no such user\r\n\
         554-c@test: 550 5.1.1 no such user\r\n\
         554 OK"
    );

    let received = sink.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].recipients, ["a@test"]);
}

#[tokio::test]
async fn test_every_rule_match_tags_one_delivery() {
    let sink = SmtpSink::start(&[]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&sink.address(), &[(".*", true)], trained_classifier(&dir));

    let response = pipeline
        .process(&envelope(&["a@x", "b@x"], SPAM_MESSAGE))
        .await;
    assert_eq!(response, "250 OK");

    let received = sink.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].recipients, ["a@x", "b@x"]);
    let text = received[0].text();
    assert!(text.contains("Subject: [SPAM] Cheap pills discount\r\n"));
    assert!(text.contains("Mailsift-Result: spam\r\n"));
}

#[tokio::test]
async fn test_unavailable_classifier_passes_through() {
    let sink = SmtpSink::start(&[]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(
        &sink.address(),
        &[("^postmaster@", false), ("^abuse@", false)],
        classifier(&dir, false),
    );

    let response = pipeline
        .process(&envelope(
            &["postmaster@test", "a@test", "abuse@test"],
            SPAM_MESSAGE,
        ))
        .await;
    assert_eq!(response, "250 OK");

    let received = sink.received();
    assert_eq!(received.len(), 2);
    let mut recipients: Vec<&str> = received
        .iter()
        .flat_map(|m| m.recipients.iter().map(String::as_str))
        .collect();
    recipients.sort_unstable();
    assert_eq!(recipients, ["a@test", "abuse@test", "postmaster@test"]);

    // Both deliveries carry the same untouched message.
    assert_eq!(received[0].content, received[1].content);
    let text = received[0].text();
    assert!(text.contains("Subject: Cheap pills discount\r\n"));
    assert!(text.contains("Mailsift-Peer: 192.0.2.10\r\n"));
    assert!(!text.contains("Mailsift-Result"));
}

#[tokio::test]
async fn test_skipped_recipients_get_original() {
    let sink = SmtpSink::start(&[]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(
        &sink.address(),
        &[("postmaster@", false)],
        trained_classifier(&dir),
    );

    let response = pipeline
        .process(&envelope(&["a@test", "postmaster@test"], SPAM_MESSAGE))
        .await;
    assert_eq!(response, "250 OK");

    let received = sink.received();
    assert_eq!(received.len(), 2);

    let skipped = received
        .iter()
        .find(|m| m.recipients == ["postmaster@test"])
        .unwrap()
        .text();
    assert!(skipped.contains("Subject: Cheap pills discount\r\n"));
    assert!(skipped.contains("Mailsift-Peer: 192.0.2.10\r\n"));
    assert!(!skipped.contains("Mailsift-Result"));

    let filtered = received
        .iter()
        .find(|m| m.recipients == ["a@test"])
        .unwrap()
        .text();
    assert!(filtered.contains("Subject: [SPAM] Cheap pills discount\r\n"));
    assert!(filtered.contains("Mailsift-Result: spam\r\n"));
}

#[tokio::test]
async fn test_next_hop_outage_refuses_everyone() {
    let dir = TempDir::new().unwrap();
    let address = unreachable_address().await;
    let pipeline = pipeline(&address, &[("b@", false)], trained_classifier(&dir));

    let response = pipeline
        .process(&envelope(&["a@test", "b@test"], HAM_MESSAGE))
        .await;

    let lines: Vec<&str> = response.split("\r\n").collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "554-Delivery to the following recipients failed:");
    assert!(lines[1].starts_with("554-a@test: -1 "));
    assert!(lines[2].starts_with("554-b@test: -1 "));
    assert_eq!(lines[3], "554 OK");
}

#[tokio::test]
async fn test_empty_message() {
    let sink = SmtpSink::start(&[]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&sink.address(), &[], trained_classifier(&dir));

    let response = pipeline.process(&envelope(&["a@test"], b"")).await;
    assert_eq!(response, "500 Empty message");
    assert!(sink.received().is_empty());
}

#[tokio::test]
async fn test_unix_peer_header() {
    let sink = SmtpSink::start(&[]).await;
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&sink.address(), &[], classifier(&dir, false));

    let mut envelope = envelope(&["a@test"], HAM_MESSAGE);
    envelope.peer = None;
    assert_eq!(pipeline.process(&envelope).await, "250 OK");

    assert!(sink.received()[0].text().contains("Mailsift-Peer: unix-socket\r\n"));
}
