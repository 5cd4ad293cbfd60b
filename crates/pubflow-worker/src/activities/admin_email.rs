//! Periodic admin status email.
//!
//! Reports the backlog of every deposit outbox so operators see stuck
//! pipelines without opening the bucket.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::Collaborators;
use pubflow_durable::activity::{Activity, ActivityContext, Outcome};
use pubflow_providers::email::OutgoingEmail;
use pubflow_storage::Outbox;

const REPORTED_OUTBOXES: &[&str] = &["crossref", "crossref_peer_review", "pubmed"];

pub struct AdminEmail {
    collaborators: Collaborators,
}

impl AdminEmail {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl Activity for AdminEmail {
    const NAME: &'static str = "AdminEmail";
    const PRETTY_NAME: &'static str = "Email admin status report";
    type Input = Value;

    async fn do_activity(
        &self,
        _ctx: &ActivityContext,
        _input: Self::Input,
    ) -> anyhow::Result<Outcome> {
        let settings = &self.collaborators.settings;

        let mut total = 0usize;
        let mut lines: Vec<String> = Vec::new();
        for name in REPORTED_OUTBOXES {
            let outbox = Outbox::new(
                self.collaborators.store.clone(),
                settings.storage_provider.clone(),
                settings.publishing_bucket.clone(),
                *name,
            );
            match outbox.list(".xml").await {
                Ok(keys) => {
                    total += keys.len();
                    lines.push(format!("{name} outbox: {} files", keys.len()));
                    for key in keys {
                        lines.push(format!("  {key}"));
                    }
                }
                Err(err) => {
                    lines.push(format!("{name} outbox: listing failed ({err})"));
                }
            }
        }

        let datetime_string = Utc::now().format("%Y-%m-%d %H:%M").to_string();
        let subject = format!(
            "AdminEmail outbox files: {total}, {datetime_string}, workflow domain: {}",
            settings.domain
        );
        let body = format!("Deposit outbox backlog:\n\n{}\n", lines.join("\n"));

        for recipient in &settings.admin_email_recipients {
            let email = OutgoingEmail {
                from: settings.sender_email.clone(),
                to: vec![recipient.clone()],
                subject: subject.clone(),
                body: body.clone(),
                attachment: None,
            };
            if let Err(err) = self.collaborators.mailer.send(email).await {
                tracing::error!(%recipient, "admin status email failed: {err}");
            }
        }

        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::tests_support::collaborators_with;
    use pubflow_core::monitor::Monitor;
    use pubflow_core::session::InMemorySessionStore;
    use pubflow_durable::memory::InMemoryBackend;
    use pubflow_providers::email::MemoryMailer;
    use pubflow_storage::InMemoryObjectStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_backlog_counts() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.seed("pubflow-packaging", "crossref/outbox/elife-1-v1.xml", "x");
        store.seed("pubflow-packaging", "pubmed/outbox/elife-2-v1.xml", "y");
        let mailer = Arc::new(MemoryMailer::new());
        let collaborators = collaborators_with(|c| {
            c.store = store.clone();
            c.mailer = mailer.clone();
        });

        let ctx = ActivityContext::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemorySessionStore::new()),
            Monitor::null(),
            "run-1",
            "AdminEmail",
            "AdminEmail",
            "atask-1",
            1,
        )
        .unwrap();

        let outcome = AdminEmail::new(collaborators)
            .do_activity(&ctx, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::success());

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("outbox files: 2"));
        assert!(sent[0].body.contains("crossref outbox: 1 files"));
        assert!(sent[0].body.contains("pubmed/outbox/elife-2-v1.xml"));
    }
}
