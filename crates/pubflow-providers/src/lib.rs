//! External service adapters.
//!
//! Every adapter sits behind a trait seam so pipelines are tested against
//! in-memory fakes; the HTTP/SFTP/SMTP implementations are thin and typed.

pub mod crossref;
pub mod digests;
pub mod email;
pub mod fastly;
pub mod lax;
pub mod pubmed;
pub mod sqs;
pub mod warehouse;

pub use crossref::{CrossrefClient, DepositEndpoint, DepositResult};
pub use digests::DigestEndpoint;
pub use email::{Mailer, OutgoingEmail, SmtpMailer};
pub use fastly::FastlyClient;
pub use lax::{ArticleVersions, HttpArticleVersions, VersionRecord, VersionsResult};
pub use pubmed::{DepositTransport, SftpTransport};
pub use warehouse::ManuscriptSource;
