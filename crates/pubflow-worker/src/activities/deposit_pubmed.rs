//! PubMed deposit pipeline.
//!
//! Same outbox walk as the Crossref deposit, but the publish phase uploads
//! over SFTP: each article is repackaged as a zip whose inner file names
//! are stripped of `-v<N>` version tokens, and the batch article-set XML is
//! archived alongside the outbox files.

use std::io::Write;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::Collaborators;
use crate::article::{parse_article_xml, ArticleRecord};
use crate::deposit::xml::{pubmed_article_set_xml, pubmed_file_name};
use crate::deposit::{
    approve_to_generate, article_first_pub_date, email_body_foot, email_body_head,
    email_body_middle, email_subject, GeneratedFile, Statuses,
};
use pubflow_core::identity::{file_name_from_key, strip_version_token};
use pubflow_core::monitor::Phase;
use pubflow_durable::activity::{Activity, ActivityContext, Outcome};
use pubflow_durable::workflow::TaskTimeouts;
use pubflow_providers::email::OutgoingEmail;
use pubflow_storage::Outbox;

const JOURNAL_TITLE: &str = "eLife";

/// Zip one article file under its outbound name.
fn zip_single_file(inner_name: &str, content: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer.start_file(inner_name, zip::write::FileOptions::default())?;
    writer.write_all(content)?;
    Ok(writer.finish()?.into_inner())
}

pub struct PubmedArticleDeposit {
    collaborators: Collaborators,
}

impl PubmedArticleDeposit {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl Activity for PubmedArticleDeposit {
    const NAME: &'static str = "PubmedArticleDeposit";
    const PRETTY_NAME: &'static str = "Deposit article packages with PubMed";
    type Input = Value;

    fn timeouts(&self) -> TaskTimeouts {
        TaskTimeouts::long()
    }

    async fn do_activity(
        &self,
        ctx: &ActivityContext,
        _input: Self::Input,
    ) -> anyhow::Result<Outcome> {
        let settings = &self.collaborators.settings;
        let outbox = Outbox::new(
            self.collaborators.store.clone(),
            settings.storage_provider.clone(),
            settings.publishing_bucket.clone(),
            "pubmed",
        );

        ctx.monitor
            .event("", None, &ctx.run, Self::NAME, Phase::Start, "Starting deposit run")
            .await;

        let mut statuses = Statuses::default();
        let now = Utc::now();
        let date_stamp = pubflow_storage::outbox::datestamp(now);

        let outbox_keys = match outbox.list(".xml").await {
            Ok(keys) => keys,
            Err(err) => {
                ctx.monitor
                    .event("", None, &ctx.run, Self::NAME, Phase::Error, err.to_string())
                    .await;
                return Ok(Outcome::TemporaryFailure(format!(
                    "listing outbox failed: {err}"
                )));
            }
        };

        let mut downloads: Vec<(String, Vec<u8>)> = Vec::new();
        statuses.download = Some(true);
        for key in &outbox_keys {
            match outbox.get(key).await {
                Ok(bytes) => {
                    let file_name = file_name_from_key(key).to_string();
                    std::fs::write(ctx.input_dir().join(&file_name), &bytes)?;
                    downloads.push((file_name, bytes.to_vec()));
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
            tracing::info!(%statuses, "{} aborted in download", Self::NAME);
            ctx.monitor
                .event("", None, &ctx.run, Self::NAME, Phase::End, "Deposit run aborted in download")
                .await;
            return Ok(Outcome::success());
        }

        // Generate: one zip per approved article, with version tokens
        // stripped from the inner file name, plus the batch article set.
        let today = now.date_naive();
        let mut published: Vec<String> = Vec::new();
        let mut not_published: Vec<String> = Vec::new();
        let mut articles: Vec<ArticleRecord> = Vec::new();
        let mut zips: Vec<GeneratedFile> = Vec::new();

        for (file_name, bytes) in &downloads {
            let xml = String::from_utf8_lossy(bytes);
            let mut article = match parse_article_xml(&xml) {
                Ok(article) => article,
                Err(err) => {
                    tracing::info!(%file_name, "article xml not usable: {err}");
                    not_published.push(file_name.clone());
                    continue;
                }
            };

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

            let inner_name = strip_version_token(file_name);
            let zip_name = format!("elife-{}.zip", article.padded_id());
            let zip_bytes = zip_single_file(&inner_name, bytes)?;
            std::fs::write(ctx.tmp_dir().join(&zip_name), &zip_bytes)?;
            zips.push(GeneratedFile {
                file_name: zip_name,
                content: zip_bytes,
            });
            articles.push(article);
            published.push(file_name.clone());
        }
        statuses.generate = Some(true);
        statuses.approve = Some(!zips.is_empty());

        let mut detail_lines: Vec<String> = Vec::new();
        if statuses.approve == Some(true) {
            let article_set = pubmed_article_set_xml(&articles, JOURNAL_TITLE);
            let batch_name = pubmed_file_name(&date_stamp);

            // Publish over SFTP; the upload is binary.
            let mut publish_ok = true;
            for file in &zips {
                // Keep the task claimed while a large batch uploads.
                if let Err(err) = ctx.heartbeat().await {
                    tracing::debug!("heartbeat not recorded: {err}");
                }
                match self
                    .collaborators
                    .transport
                    .upload(&file.file_name, file.content.clone(), &[])
                    .await
                {
                    Ok(()) => {
                        detail_lines.push(format!("Uploaded: {}", file.file_name));
                    }
                    Err(err) => {
                        publish_ok = false;
                        detail_lines.push(format!("Upload error for {}: {err}", file.file_name));
                    }
                }
            }
            statuses.publish = Some(publish_ok);

            if publish_ok {
                tracing::info!("moving files from outbox folder to published folder");
                match outbox.archive(&published, &date_stamp).await {
                    Ok(()) => {
                        outbox
                            .upload_batch_file(&date_stamp, &batch_name, article_set.into_bytes().into())
                            .await?;
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

        if !published.is_empty() {
            let datetime_string = now.format("%Y-%m-%d %H:%M").to_string();
            let subject = email_subject(
                Self::NAME,
                statuses.activity_ok(),
                &settings.domain,
                outbox_keys.len(),
                &datetime_string,
            );
            let mut body = email_body_head(Self::NAME, statuses.activity_ok(), &statuses);
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

        tracing::info!(%statuses, "{} finished", Self::NAME);
        ctx.monitor
            .event("", None, &ctx.run, Self::NAME, Phase::End, format!("{statuses}"))
            .await;
        Ok(Outcome::success())
    }
}
