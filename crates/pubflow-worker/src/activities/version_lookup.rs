//! Version lookup.
//!
//! Derives the article version from the incoming file name, falling back to
//! the article-versions service, and publishes the values later activities
//! of the run consume from the session: `filename_last_element`,
//! `article_id`, `version`, `status`, and `run_type`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::Collaborators;
use pubflow_core::identity::{file_name_from_key, ArticleIdentity, ArticleKind};
use pubflow_core::monitor::Phase;
use pubflow_durable::activity::{Activity, ActivityContext, Outcome};
use pubflow_durable::workflow::TaskTimeouts;

#[derive(Debug, Deserialize)]
pub struct VersionLookupInput {
    #[serde(default)]
    pub file_name: Option<String>,
    /// Object key as delivered by the router; used when `file_name` is
    /// absent.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub run_type: Option<String>,
    /// Either `article_highest_version` or `article_next_version`.
    #[serde(default)]
    pub version_lookup_function: Option<String>,
}

pub struct VersionLookup {
    collaborators: Collaborators,
}

impl VersionLookup {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    async fn lookup_version(&self, identity: &ArticleIdentity, function: Option<&str>) -> String {
        if let Some(version) = identity.version {
            return version.to_string();
        }
        let article_id = identity.id_string();
        match function {
            Some("article_next_version") => self.collaborators.lax.next_version(&article_id).await,
            _ => self
                .collaborators
                .lax
                .highest_version(&article_id)
                .await
                .unwrap_or_else(|| "-1".to_string()),
        }
    }
}

#[async_trait]
impl Activity for VersionLookup {
    const NAME: &'static str = "VersionLookup";
    const PRETTY_NAME: &'static str = "Version Lookup";
    type Input = VersionLookupInput;

    fn timeouts(&self) -> TaskTimeouts {
        TaskTimeouts::default()
    }

    async fn do_activity(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> anyhow::Result<Outcome> {
        let session = ctx.session();

        let Some(full_name) = input.file_name.or(input.key) else {
            return Ok(Outcome::PermanentFailure(
                "no file name in the version lookup input".to_string(),
            ));
        };
        let file_name = file_name_from_key(&full_name).to_string();
        session
            .store_value("filename_last_element", json!(file_name))
            .await?;

        let identity = match ArticleIdentity::parse(&file_name) {
            Ok(identity) => identity,
            Err(err) => {
                ctx.monitor
                    .event(
                        "",
                        None,
                        &ctx.run,
                        Self::PRETTY_NAME,
                        Phase::Error,
                        format!("file name did not match the article pattern: {err}"),
                    )
                    .await;
                return Ok(Outcome::PermanentFailure(err.to_string()));
            }
        };
        let article_id = identity.id_string();

        ctx.monitor
            .event(
                &article_id,
                None,
                &ctx.run,
                Self::PRETTY_NAME,
                Phase::Start,
                format!("Starting version lookup for article {article_id}"),
            )
            .await;

        let version = self
            .lookup_version(&identity, input.version_lookup_function.as_deref())
            .await;
        if version == "-1" {
            let message = format!(
                "could not determine version for {file_name} from its name or the versions service"
            );
            ctx.monitor
                .event(
                    &article_id,
                    None,
                    &ctx.run,
                    Self::PRETTY_NAME,
                    Phase::Error,
                    message.clone(),
                )
                .await;
            return Ok(Outcome::PermanentFailure(message));
        }

        let status = match identity.kind {
            ArticleKind::Poa => "poa",
            _ => "vor",
        };

        session.store_value("article_id", json!(article_id)).await?;
        session.store_value("version", json!(version)).await?;
        session.store_value("status", json!(status)).await?;
        if let Some(run_type) = &input.run_type {
            session.store_value("run_type", json!(run_type)).await?;
        }

        ctx.monitor
            .event(
                &article_id,
                Some(&version),
                &ctx.run,
                Self::PRETTY_NAME,
                Phase::End,
                format!("Finished version lookup for article {article_id} version: {version}"),
            )
            .await;
        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::tests_support::collaborators_with;
    use pubflow_core::monitor::MemorySink;
    use pubflow_core::session::{InMemorySessionStore, SessionStore};
    use pubflow_durable::activity::ActivityRegistry;
    use pubflow_durable::memory::InMemoryBackend;
    use pubflow_providers::lax::{FixedArticleVersions, VersionsResult};
    use std::sync::Arc;

    fn context(
        session: Arc<dyn SessionStore>,
        sink: Arc<MemorySink>,
    ) -> ActivityContext {
        ActivityContext::new(
            Arc::new(InMemoryBackend::new()),
            session,
            pubflow_core::monitor::Monitor::new(sink),
            "run-1",
            "IngestDigest_1",
            "VersionLookup",
            "atask-1",
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn version_from_file_name_is_preferred() {
        let session: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let sink = Arc::new(MemorySink::new());
        let collaborators =
            collaborators_with(|c| c.lax = Arc::new(FixedArticleVersions::new(VersionsResult::Unavailable(500))));
        let activity = VersionLookup::new(collaborators);

        let outcome = activity
            .do_activity(
                &context(session.clone(), sink),
                VersionLookupInput {
                    file_name: None,
                    key: Some("inbox/elife-00353-vor-v2.zip".into()),
                    run_type: Some("silent-correction".into()),
                    version_lookup_function: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::success());
        assert_eq!(
            session.load("run-1", "version").await.unwrap().unwrap(),
            json!("2")
        );
        assert_eq!(
            session.load("run-1", "article_id").await.unwrap().unwrap(),
            json!("353")
        );
        assert_eq!(
            session.load("run-1", "status").await.unwrap().unwrap(),
            json!("vor")
        );
        assert_eq!(
            session.load("run-1", "run_type").await.unwrap().unwrap(),
            json!("silent-correction")
        );
    }

    #[tokio::test]
    async fn unparseable_name_is_a_permanent_failure() {
        let session: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let sink = Arc::new(MemorySink::new());
        let activity = VersionLookup::new(collaborators_with(|_| {}));

        let outcome = activity
            .do_activity(
                &context(session, sink.clone()),
                VersionLookupInput {
                    file_name: Some("not-an-article.bin".into()),
                    key: None,
                    run_type: None,
                    version_lookup_function: None,
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::PermanentFailure(_)));
        assert!(sink
            .events()
            .iter()
            .any(|e| e.phase == Phase::Error));
    }

    #[tokio::test]
    async fn versionless_name_falls_back_to_the_versions_service() {
        let session: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let sink = Arc::new(MemorySink::new());
        let collaborators = collaborators_with(|c| {
            c.lax = Arc::new(FixedArticleVersions::single_vor(3, "2017-12-12T00:00:00Z"))
        });
        let activity = VersionLookup::new(collaborators);

        let outcome = activity
            .do_activity(
                &context(session.clone(), sink),
                VersionLookupInput {
                    file_name: Some("elife-29353.xml".into()),
                    key: None,
                    run_type: None,
                    version_lookup_function: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::success());
        assert_eq!(
            session.load("run-1", "version").await.unwrap().unwrap(),
            json!("3")
        );
    }

    #[tokio::test]
    async fn registers_under_its_name() {
        let mut registry = ActivityRegistry::new();
        registry.register(VersionLookup::new(collaborators_with(|_| {})));
        assert!(registry.contains("VersionLookup"));
    }
}
