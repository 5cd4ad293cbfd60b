//! Crossref deposit pipeline.
//!
//! Walks the Crossref outbox: download article XML, generate deposit
//! documents, POST them to the Crossref endpoint, archive the outbox into
//! the datestamped published folder, and email the admins a status report.
//! Two registered variants share the pipeline: journal-article deposits and
//! peer-review deposits.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::Collaborators;
use crate::article::{enrich_review_articles, parse_article_xml};
use crate::deposit::xml::{crossref_deposit_xml, crossref_file_name, crossref_peer_review_xml};
use crate::deposit::{
    approve_to_generate, article_first_pub_date, email_body_foot, email_body_head,
    email_body_middle, email_subject, GeneratedFile, Statuses,
};
use pubflow_core::identity::{file_name_from_key, ArticleIdentity};
use pubflow_core::monitor::Phase;
use pubflow_durable::activity::{Activity, ActivityContext, Outcome};
use pubflow_durable::workflow::TaskTimeouts;
use pubflow_providers::email::OutgoingEmail;
use pubflow_providers::warehouse::review_date;
use pubflow_storage::Outbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Article,
    PeerReview,
}

impl Variant {
    fn outbox_name(self) -> &'static str {
        match self {
            Self::Article => "crossref",
            Self::PeerReview => "crossref_peer_review",
        }
    }

    fn activity_name(self) -> &'static str {
        match self {
            Self::Article => "DepositCrossref",
            Self::PeerReview => "DepositCrossrefPeerReview",
        }
    }
}

struct CrossrefDeposit {
    collaborators: Collaborators,
    variant: Variant,
}

impl CrossrefDeposit {
    async fn run_deposit(&self, ctx: &ActivityContext) -> anyhow::Result<Outcome> {
        let settings = &self.collaborators.settings;
        let name = self.variant.activity_name();
        let outbox = Outbox::new(
            self.collaborators.store.clone(),
            settings.storage_provider.clone(),
            settings.publishing_bucket.clone(),
            self.variant.outbox_name(),
        );

        ctx.monitor
            .event("", None, &ctx.run, name, Phase::Start, "Starting deposit run")
            .await;

        let mut statuses = Statuses::default();
        let now = Utc::now();
        let date_stamp = pubflow_storage::outbox::datestamp(now);

        let outbox_keys = match outbox.list(".xml").await {
            Ok(keys) => keys,
            // The outbox listing is the very first touch; nothing has
            // happened yet, so let the backend retry the whole task.
            Err(err) => {
                ctx.monitor
                    .event("", None, &ctx.run, name, Phase::Error, err.to_string())
                    .await;
                return Ok(Outcome::TemporaryFailure(format!(
                    "listing outbox failed: {err}"
                )));
            }
        };

        // Download phase. An IO failure aborts the run; retries happen on
        // the next scheduled run against the untouched outbox.
        let mut downloads: Vec<(String, String, Vec<u8>)> = Vec::new();
        statuses.download = Some(true);
        for key in &outbox_keys {
            match outbox.get(key).await {
                Ok(bytes) => {
                    let file_name = file_name_from_key(key).to_string();
                    let local_path = ctx.input_dir().join(&file_name);
                    std::fs::write(&local_path, &bytes)?;
                    downloads.push((key.clone(), file_name, bytes.to_vec()));
                }
                Err(err) => {
                    tracing::error!(%key, "failed to download outbox file: {err}");
                    statuses.download = Some(false);
                    break;
                }
            }
        }
        if statuses.download == Some(false) {
            statuses.record_activity();
            tracing::info!(%statuses, "{name} aborted in download");
            ctx.monitor
                .event("", None, &ctx.run, name, Phase::End, "Deposit run aborted in download")
                .await;
            return Ok(Outcome::success());
        }

        // Generate phase.
        let today = now.date_naive();
        let mut published: Vec<String> = Vec::new();
        let mut not_published: Vec<String> = Vec::new();
        let mut generated: Vec<GeneratedFile> = Vec::new();

        for (_key, file_name, bytes) in &downloads {
            let xml = String::from_utf8_lossy(bytes);
            let mut article = match parse_article_xml(&xml) {
                Ok(article) => article,
                Err(err) => {
                    tracing::info!(%file_name, "article xml not usable: {err}");
                    not_published.push(file_name.clone());
                    continue;
                }
            };

            if article.version.is_none() {
                article.version = ArticleIdentity::parse(file_name)
                    .ok()
                    .and_then(|identity| identity.version);
            }
            if article.version.is_none() {
                article.version = self
                    .collaborators
                    .lax
                    .highest_version(&article.article_id)
                    .await
                    .and_then(|v| v.parse().ok());
            }

            let pub_date = article_first_pub_date(&article, self.collaborators.lax.as_ref()).await;
            if let Some(date) = &pub_date {
                if article.first_pub_date(crate::deposit::PUB_DATE_TYPES).is_none() {
                    article.add_date(date.clone());
                }
            }
            if !approve_to_generate(pub_date.as_ref(), today) {
                tracing::info!(%file_name, "excluding article, publication date is in the future");
                not_published.push(file_name.clone());
                continue;
            }

            if self.variant == Variant::PeerReview {
                if article.reviews.is_empty() {
                    tracing::info!(
                        doi = %article.doi,
                        "pruning article from peer review deposit, it has no peer reviews"
                    );
                    not_published.push(file_name.clone());
                    continue;
                }
                enrich_review_articles(&mut article);
                if let Some(dates) = self
                    .collaborators
                    .warehouse
                    .manuscript_dates(&article.doi)
                    .await
                {
                    for review in &mut article.reviews {
                        if review.review_date.is_none() {
                            review.review_date = review_date(&dates, &review.article_type);
                        }
                    }
                }
            }

            let batch_id = format!("pubflow-{}-{date_stamp}", article.article_id);
            let content = match self.variant {
                Variant::Article => crossref_deposit_xml(
                    &article,
                    &batch_id,
                    &date_stamp,
                    &settings.domain,
                    &settings.sender_email,
                ),
                Variant::PeerReview => crossref_peer_review_xml(
                    &article,
                    &batch_id,
                    &date_stamp,
                    &settings.domain,
                    &settings.sender_email,
                ),
            };

            let deposit_name = crossref_file_name(&article.article_id);
            std::fs::write(ctx.tmp_dir().join(&deposit_name), content.as_bytes())?;
            generated.push(GeneratedFile {
                file_name: deposit_name,
                content: content.into_bytes(),
            });
            published.push(file_name.clone());
        }
        // A generated batch is a success even when single articles dropped
        // out; they stay in the outbox for inspection.
        statuses.generate = Some(true);

        // Approve phase: something to publish exists.
        statuses.approve = Some(!generated.is_empty());

        // Publish phase.
        let mut detail_lines: Vec<String> = Vec::new();
        if statuses.approve == Some(true) {
            let mut publish_ok = true;
            for file in &generated {
                // Keep the task claimed while a large batch uploads.
                if let Err(err) = ctx.heartbeat().await {
                    tracing::debug!("heartbeat not recorded: {err}");
                }
                match self
                    .collaborators
                    .crossref
                    .deposit_file(&file.file_name, file.content.clone())
                    .await
                {
                    Ok(result) => {
                        if !result.success() {
                            publish_ok = false;
                        }
                        detail_lines.extend(result.detail_lines());
                    }
                    Err(err) => {
                        publish_ok = false;
                        detail_lines.push(format!("Deposit error for {}: {err}", file.file_name));
                    }
                }
            }
            statuses.publish = Some(publish_ok);

            // Archive phase, only after every deposit was accepted.
            if publish_ok {
                tracing::info!("moving files from outbox folder to published folder");
                match outbox.archive(&published, &date_stamp).await {
                    Ok(()) => {
                        for file in &generated {
                            outbox
                                .upload_batch_file(
                                    &date_stamp,
                                    &file.file_name,
                                    file.content.clone().into(),
                                )
                                .await?;
                        }
                        statuses.outbox = Some(true);
                    }
                    Err(err) => {
                        tracing::error!("archiving outbox failed: {err}");
                        statuses.outbox = Some(false);
                    }
                }
            }
        }

        statuses.record_activity();

        // Notify phase.
        if !published.is_empty() {
            let datetime_string = now.format("%Y-%m-%d %H:%M").to_string();
            let subject = email_subject(
                name,
                statuses.activity_ok(),
                &settings.domain,
                outbox_keys.len(),
                &datetime_string,
            );
            let mut body = email_body_head(name, statuses.activity_ok(), &statuses);
            body.push_str(&email_body_middle(
                &outbox_keys,
                &published,
                &not_published,
                &detail_lines,
            ));
            body.push_str(&email_body_foot(
                &ctx.activity_id,
                &ctx.workflow_id,
                &datetime_string,
                &settings.domain,
            ));

            let mut email_ok = true;
            for recipient in &settings.admin_email_recipients {
                let email = OutgoingEmail {
                    from: settings.sender_email.clone(),
                    to: vec![recipient.clone()],
                    subject: subject.clone(),
                    body: body.clone(),
                    attachment: None,
                };
                if let Err(err) = self.collaborators.mailer.send(email).await {
                    tracing::error!(%recipient, "admin email failed: {err}");
                    email_ok = false;
                }
            }
            statuses.email = Some(email_ok);
        }

        tracing::info!(%statuses, "{name} finished");
        ctx.monitor
            .event("", None, &ctx.run, name, Phase::End, format!("{statuses}"))
            .await;
        Ok(Outcome::success())
    }
}

/// Journal-article Crossref deposits.
pub struct DepositCrossref {
    inner: CrossrefDeposit,
}

impl DepositCrossref {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            inner: CrossrefDeposit {
                collaborators,
                variant: Variant::Article,
            },
        }
    }
}

#[async_trait]
impl Activity for DepositCrossref {
    const NAME: &'static str = "DepositCrossref";
    const PRETTY_NAME: &'static str = "Deposit article metadata with Crossref";
    type Input = Value;

    fn timeouts(&self) -> TaskTimeouts {
        TaskTimeouts::long()
    }

    async fn do_activity(
        &self,
        ctx: &ActivityContext,
        _input: Self::Input,
    ) -> anyhow::Result<Outcome> {
        self.inner.run_deposit(ctx).await
    }
}

/// Peer-review Crossref deposits.
pub struct DepositCrossrefPeerReview {
    inner: CrossrefDeposit,
}

impl DepositCrossrefPeerReview {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            inner: CrossrefDeposit {
                collaborators,
                variant: Variant::PeerReview,
            },
        }
    }
}

#[async_trait]
impl Activity for DepositCrossrefPeerReview {
    const NAME: &'static str = "DepositCrossrefPeerReview";
    const PRETTY_NAME: &'static str = "Deposit peer reviews with Crossref";
    type Input = Value;

    fn timeouts(&self) -> TaskTimeouts {
        TaskTimeouts::long()
    }

    async fn do_activity(
        &self,
        ctx: &ActivityContext,
        _input: Self::Input,
    ) -> anyhow::Result<Outcome> {
        self.inner.run_deposit(ctx).await
    }
}
