//! Ingest digest to the API endpoint.
//!
//! Runs after a version lookup has populated the session. The approval
//! predicate decides whether this run should touch the digest at all; an
//! approved run composes the digest JSON from the outbox source document,
//! the article JATS, and related-article data, then upserts it. The
//! endpoint is the source of truth: an already published digest keeps its
//! stage and published timestamp.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Collaborators;
use pubflow_core::monitor::Phase;
use pubflow_durable::activity::{Activity, ActivityContext, Outcome};
use pubflow_durable::workflow::TaskTimeouts;
use pubflow_providers::digests::{preserve_published_fields, DigestError};
use pubflow_providers::lax::VersionsResult;
use pubflow_storage::StorageAddress;

#[derive(Debug, Default, Deserialize)]
pub struct IngestDigestInput {
    /// Only ingest on the first version-of-record.
    #[serde(default)]
    pub first_vor_only: bool,
}

/// Disapproval reason by article status: PoA articles do not get a digest.
pub fn approve_by_status(article_id: &str, status: &str) -> Option<String> {
    if status == "poa" {
        Some(format!("Not ingesting digest for PoA article {article_id}"))
    } else {
        None
    }
}

/// Disapproval reason for silent corrections: the corrected version must be
/// at least the highest known version. A version that does not parse, or an
/// unknown highest version, is disapproval.
pub fn approve_by_run_type(
    article_id: &str,
    run_type: Option<&str>,
    version: &str,
    highest_version: Option<&str>,
) -> Option<String> {
    if run_type != Some("silent-correction") {
        return None;
    }

    let parsed_version: Option<i64> = version.parse().ok();
    let parsed_highest: Option<i64> = highest_version.and_then(|v| v.parse().ok());
    match (parsed_version, parsed_highest) {
        (Some(version), Some(highest)) if version >= highest => None,
        (Some(version), Some(highest)) => Some(format!(
            "Not ingesting digest for silent correction {article_id} version {version} is less than highest version {highest}"
        )),
        _ => Some(format!(
            "Not ingesting digest for silent correction {article_id}, could not compare versions"
        )),
    }
}

/// Disapproval reason for first-vor-only variants: this version must be the
/// first version-of-record.
pub fn approve_first_vor(
    article_id: &str,
    version: &str,
    first_vor: Option<u32>,
) -> Option<String> {
    let parsed: Option<u32> = version.parse().ok();
    match (parsed, first_vor) {
        (Some(version), Some(first)) if version == first => None,
        _ => Some(format!(
            "Not ingesting digest for {article_id}, version {version} is not the first vor"
        )),
    }
}

pub struct IngestDigestToEndpoint {
    collaborators: Collaborators,
}

impl IngestDigestToEndpoint {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    fn digest_source_address(&self, padded_id: &str, extension: &str) -> StorageAddress {
        let settings = &self.collaborators.settings;
        StorageAddress::new(
            settings.storage_provider.clone(),
            settings.digests_bucket.clone(),
            format!("digests/outbox/{padded_id}/digest-{padded_id}.{extension}"),
        )
    }

    /// Title from the expanded article JATS, when the session knows where
    /// it is. Absence of the JATS is not an error.
    async fn title_from_jats(&self, expanded_folder: Option<&str>) -> Option<String> {
        let settings = &self.collaborators.settings;
        let folder = expanded_folder?;
        let prefix = StorageAddress::new(
            settings.storage_provider.clone(),
            settings.articles_bucket.clone(),
            format!("{}/", folder.trim_end_matches('/')),
        );
        let keys = self.collaborators.store.list(&prefix).await.ok()?;
        let xml_key = keys.into_iter().find(|key| key.ends_with(".xml"))?;
        let bytes = self
            .collaborators
            .store
            .get(&prefix.with_key(xml_key))
            .await
            .ok()?;
        let article = crate::article::parse_article_xml(&String::from_utf8_lossy(&bytes)).ok()?;
        Some(article.title)
    }
}

#[async_trait]
impl Activity for IngestDigestToEndpoint {
    const NAME: &'static str = "IngestDigestToEndpoint";
    const PRETTY_NAME: &'static str = "Ingest Digest to API endpoint";
    type Input = IngestDigestInput;

    fn timeouts(&self) -> TaskTimeouts {
        TaskTimeouts::default()
    }

    async fn do_activity(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> anyhow::Result<Outcome> {
        let session = ctx.session();
        let run = ctx.run.clone();

        // Required session values; absence is an input-shape failure.
        let (article_id, version, status) = match (
            session.get_string("article_id").await?,
            session.get_string("version").await?,
            session.get_string("status").await?,
        ) {
            (Some(article_id), Some(version), Some(status)) => (article_id, version, status),
            _ => {
                let message =
                    "session is missing article_id, version or status for the digest ingest"
                        .to_string();
                ctx.monitor
                    .event("", None, &run, Self::PRETTY_NAME, Phase::Error, message.clone())
                    .await;
                return Ok(Outcome::PermanentFailure(message));
            }
        };
        let run_type = session.get_string("run_type").await?;
        let expanded_folder = session.get_string("expanded_folder").await?;

        ctx.monitor
            .event(
                &article_id,
                Some(&version),
                &run,
                Self::PRETTY_NAME,
                Phase::Start,
                format!("Starting ingest digest to endpoint for {article_id}"),
            )
            .await;

        // Approval predicate.
        let mut disapprovals: Vec<String> = Vec::new();
        if let Some(reason) = approve_by_status(&article_id, &status) {
            disapprovals.push(reason);
        }
        if run_type.as_deref() == Some("silent-correction") {
            let highest = self.collaborators.lax.highest_version(&article_id).await;
            if let Some(reason) =
                approve_by_run_type(&article_id, run_type.as_deref(), &version, highest.as_deref())
            {
                disapprovals.push(reason);
            }
        }
        if input.first_vor_only {
            let first_vor = self
                .collaborators
                .lax
                .first_version_with_status(&article_id, "vor")
                .await;
            if let Some(reason) = approve_first_vor(&article_id, &version, first_vor) {
                disapprovals.push(reason);
            }
        }

        if !disapprovals.is_empty() {
            let message = disapprovals.join("; ");
            tracing::info!(%article_id, "{message}");
            ctx.monitor
                .event(
                    &article_id,
                    Some(&version),
                    &run,
                    Self::PRETTY_NAME,
                    Phase::End,
                    message,
                )
                .await;
            return Ok(Outcome::success());
        }

        let padded_id = format!("{article_id:0>5}");

        // Digest source document from the outbox prefix.
        let source_address = self.digest_source_address(&padded_id, "json");
        let source: Value = match self.collaborators.store.get(&source_address).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({})),
            Err(_) => {
                let message =
                    format!("No digest source found for {article_id}, not ingesting");
                tracing::info!(%article_id, "{message}");
                ctx.monitor
                    .event(
                        &article_id,
                        Some(&version),
                        &run,
                        Self::PRETTY_NAME,
                        Phase::End,
                        message,
                    )
                    .await;
                return Ok(Outcome::success());
            }
        };

        // Compose the digest JSON, enriched from the JATS when available.
        let mut title = source
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if title.is_empty() {
            if let Some(jats_title) = self.title_from_jats(expanded_folder.as_deref()).await {
                title = jats_title;
            }
        }

        let mut digest = json!({
            "id": article_id,
            "title": title,
            "content": source.get("content").cloned().unwrap_or(Value::Array(vec![])),
        });

        // Optional image; absent is fine.
        let image_address = self.digest_source_address(&padded_id, "jpg");
        if self
            .collaborators
            .store
            .exists(&image_address)
            .await
            .unwrap_or(false)
        {
            digest["image"] = json!({ "uri": image_address.to_string() });
        }

        // Related-article data from the versions service.
        if let VersionsResult::Found(versions) =
            self.collaborators.lax.versions(&article_id).await
        {
            let related: Vec<Value> = versions
                .iter()
                .filter(|record| record.version.to_string() == version)
                .map(|record| {
                    json!({
                        "id": article_id,
                        "status": record.status,
                        "published": record.published,
                    })
                })
                .collect();
            if !related.is_empty() {
                digest["relatedContent"] = Value::Array(related);
            }
        }

        // Upsert, preserving the stage of an already published digest.
        let existing = match self.collaborators.digests.get(&article_id).await {
            Ok(existing) => existing,
            Err(DigestError::Transport(message)) => {
                return Ok(Outcome::TemporaryFailure(message))
            }
            Err(err) => return Ok(Outcome::PermanentFailure(err.to_string())),
        };
        preserve_published_fields(&mut digest, existing.as_ref());

        match self.collaborators.digests.put(&article_id, digest).await {
            Ok(()) => {}
            Err(DigestError::Transport(message)) => {
                return Ok(Outcome::TemporaryFailure(message))
            }
            Err(err) => return Ok(Outcome::PermanentFailure(err.to_string())),
        }

        let preview_url = self
            .collaborators
            .settings
            .digest_preview_url
            .replace("{digest_id}", &article_id);
        ctx.monitor
            .event(
                &article_id,
                Some(&version),
                &run,
                Self::PRETTY_NAME,
                Phase::End,
                format!("Finished ingest digest to endpoint for {article_id}. Preview: {preview_url}"),
            )
            .await;
        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::tests_support::collaborators_with;
    use pubflow_core::monitor::{MemorySink, Monitor};
    use pubflow_core::session::{InMemorySessionStore, SessionStore};
    use pubflow_durable::memory::InMemoryBackend;
    use pubflow_providers::digests::MemoryDigestEndpoint;
    use pubflow_providers::lax::FixedArticleVersions;
    use pubflow_storage::InMemoryObjectStore;
    use std::sync::Arc;

    async fn seeded_session(
        version: &str,
        status: &str,
        run_type: Option<&str>,
    ) -> Arc<dyn SessionStore> {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        store.store("run-1", "article_id", json!("353")).await.unwrap();
        store.store("run-1", "version", json!(version)).await.unwrap();
        store.store("run-1", "status", json!(status)).await.unwrap();
        if let Some(run_type) = run_type {
            store.store("run-1", "run_type", json!(run_type)).await.unwrap();
        }
        store
    }

    fn context(session: Arc<dyn SessionStore>, sink: Arc<MemorySink>) -> ActivityContext {
        ActivityContext::new(
            Arc::new(InMemoryBackend::new()),
            session,
            Monitor::new(sink),
            "run-1",
            "IngestDigest_1",
            "IngestDigestToEndpoint",
            "atask-1",
            1,
        )
        .unwrap()
    }

    #[test]
    fn approval_matrix() {
        // (status, run_type, version, highest, expected approval)
        let rows: Vec<(&str, Option<&str>, &str, Option<&str>, bool)> = vec![
            ("vor", None, "1", None, true),
            ("poa", None, "1", None, false),
            ("vor", Some("silent-correction"), "2", Some("2"), true),
            ("vor", Some("silent-correction"), "3", Some("2"), true),
            ("vor", Some("silent-correction"), "1", Some("2"), false),
            ("vor", Some("silent-correction"), "x", Some("2"), false),
            ("vor", Some("silent-correction"), "2", None, false),
            ("poa", Some("silent-correction"), "2", Some("2"), false),
        ];

        for (status, run_type, version, highest, expected) in rows {
            let approved = approve_by_status("353", status).is_none()
                && approve_by_run_type("353", run_type, version, highest).is_none();
            assert_eq!(
                approved, expected,
                "status={status} run_type={run_type:?} version={version} highest={highest:?}"
            );
        }
    }

    #[test]
    fn first_vor_approval() {
        assert!(approve_first_vor("353", "2", Some(2)).is_none());
        assert!(approve_first_vor("353", "3", Some(2)).is_some());
        assert!(approve_first_vor("353", "2", None).is_some());
        assert!(approve_first_vor("353", "x", Some(2)).is_some());
    }

    #[tokio::test]
    async fn silent_correction_of_older_vor_is_not_ingested() {
        let session = seeded_session("1", "vor", Some("silent-correction")).await;
        let sink = Arc::new(MemorySink::new());
        let endpoint = Arc::new(MemoryDigestEndpoint::new());
        let collaborators = collaborators_with(|c| {
            c.digests = endpoint.clone();
            c.lax = Arc::new(FixedArticleVersions::single_vor(2, "2017-12-12T00:00:00Z"));
        });

        let outcome = IngestDigestToEndpoint::new(collaborators)
            .do_activity(&context(session, sink.clone()), IngestDigestInput::default())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::success());
        assert_eq!(endpoint.put_count(), 0);

        let end_event = sink
            .events()
            .into_iter()
            .find(|e| e.phase == Phase::End)
            .expect("end event emitted");
        assert!(end_event.message.contains("Not ingesting"));
    }

    #[tokio::test]
    async fn poa_articles_do_not_get_a_digest() {
        let session = seeded_session("1", "poa", None).await;
        let sink = Arc::new(MemorySink::new());
        let endpoint = Arc::new(MemoryDigestEndpoint::new());
        let collaborators = collaborators_with(|c| c.digests = endpoint.clone());

        let outcome = IngestDigestToEndpoint::new(collaborators)
            .do_activity(&context(session, sink), IngestDigestInput::default())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::success());
        assert_eq!(endpoint.put_count(), 0);
    }

    #[tokio::test]
    async fn approved_run_upserts_a_preview_digest() {
        let session = seeded_session("1", "vor", None).await;
        let sink = Arc::new(MemorySink::new());
        let object_store = Arc::new(InMemoryObjectStore::new());
        object_store.seed(
            "pubflow-digests",
            "digests/outbox/00353/digest-00353.json",
            r#"{"title": "A digest", "content": ["first paragraph"]}"#,
        );
        let endpoint = Arc::new(MemoryDigestEndpoint::new());
        let collaborators = collaborators_with(|c| {
            c.store = object_store.clone();
            c.digests = endpoint.clone();
            c.lax = Arc::new(FixedArticleVersions::single_vor(1, "2017-12-12T00:00:00Z"));
        });

        let outcome = IngestDigestToEndpoint::new(collaborators)
            .do_activity(&context(session, sink.clone()), IngestDigestInput::default())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::success());

        let record = endpoint.record("353").expect("digest upserted");
        assert_eq!(record["stage"], "preview");
        assert_eq!(record["title"], "A digest");
        assert_eq!(record["relatedContent"][0]["status"], "vor");

        let end_event = sink
            .events()
            .into_iter()
            .find(|e| e.phase == Phase::End)
            .unwrap();
        assert!(end_event.message.contains("/digests/353/preview"));
    }

    #[tokio::test]
    async fn published_digest_keeps_its_stage_and_timestamp() {
        let session = seeded_session("2", "vor", None).await;
        let sink = Arc::new(MemorySink::new());
        let object_store = Arc::new(InMemoryObjectStore::new());
        object_store.seed(
            "pubflow-digests",
            "digests/outbox/00353/digest-00353.json",
            r#"{"title": "A digest"}"#,
        );
        let endpoint = Arc::new(MemoryDigestEndpoint::new().with_record(
            "353",
            json!({"id": "353", "stage": "published", "published": "2018-01-05T09:00:00Z"}),
        ));
        let collaborators = collaborators_with(|c| {
            c.store = object_store.clone();
            c.digests = endpoint.clone();
        });

        IngestDigestToEndpoint::new(collaborators)
            .do_activity(&context(session, sink), IngestDigestInput::default())
            .await
            .unwrap();

        let record = endpoint.record("353").unwrap();
        assert_eq!(record["stage"], "published");
        assert_eq!(record["published"], "2018-01-05T09:00:00Z");
    }

    #[tokio::test]
    async fn missing_session_values_fail_permanently() {
        let session: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let sink = Arc::new(MemorySink::new());
        let collaborators = collaborators_with(|_| {});

        let outcome = IngestDigestToEndpoint::new(collaborators)
            .do_activity(&context(session, sink.clone()), IngestDigestInput::default())
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::PermanentFailure(_)));
        assert!(sink.events().iter().any(|e| e.phase == Phase::Error));
    }

    #[tokio::test]
    async fn missing_digest_source_is_not_an_error() {
        let session = seeded_session("1", "vor", None).await;
        let sink = Arc::new(MemorySink::new());
        let endpoint = Arc::new(MemoryDigestEndpoint::new());
        let collaborators = collaborators_with(|c| c.digests = endpoint.clone());

        let outcome = IngestDigestToEndpoint::new(collaborators)
            .do_activity(&context(session, sink.clone()), IngestDigestInput::default())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::success());
        assert_eq!(endpoint.put_count(), 0);
        let end_event = sink
            .events()
            .into_iter()
            .find(|e| e.phase == Phase::End)
            .unwrap();
        assert!(end_event.message.contains("not ingesting"));
    }
}
