//! The activities this deployment registers.

mod admin_email;
mod deposit_crossref;
mod deposit_pubmed;
mod ingest_digest;
mod ping;
mod version_lookup;

pub use admin_email::AdminEmail;
pub use deposit_crossref::{DepositCrossref, DepositCrossrefPeerReview};
pub use deposit_pubmed::PubmedArticleDeposit;
pub use ingest_digest::IngestDigestToEndpoint;
pub use ping::Ping;
pub use version_lookup::VersionLookup;

use std::sync::Arc;

use pubflow_core::settings::Settings;
use pubflow_durable::ActivityRegistry;
use pubflow_providers::crossref::DepositEndpoint;
use pubflow_providers::digests::DigestEndpoint;
use pubflow_providers::email::Mailer;
use pubflow_providers::lax::ArticleVersions;
use pubflow_providers::pubmed::DepositTransport;
use pubflow_providers::warehouse::ManuscriptSource;
use pubflow_storage::ObjectStore;

/// Everything the activities collaborate with, injected once at process
/// start.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn ObjectStore>,
    pub lax: Arc<dyn ArticleVersions>,
    pub crossref: Arc<dyn DepositEndpoint>,
    pub transport: Arc<dyn DepositTransport>,
    pub mailer: Arc<dyn Mailer>,
    pub warehouse: Arc<dyn ManuscriptSource>,
    pub digests: Arc<dyn DigestEndpoint>,
}

/// Register every activity this worker executes.
pub fn register_all(registry: &mut ActivityRegistry, collaborators: &Collaborators) {
    registry.register(Ping);
    registry.register(VersionLookup::new(collaborators.clone()));
    registry.register(DepositCrossref::new(collaborators.clone()));
    registry.register(DepositCrossrefPeerReview::new(collaborators.clone()));
    registry.register(PubmedArticleDeposit::new(collaborators.clone()));
    registry.register(IngestDigestToEndpoint::new(collaborators.clone()));
    registry.register(AdminEmail::new(collaborators.clone()));
}
