//! Article identity derived from file names.
//!
//! Every pipeline downstream of the S3 router re-parses incoming file names
//! into an [`ArticleIdentity`]. The accepted shape is one documented
//! pattern:
//!
//! ```text
//! <journal>-<id>[-poa|-vor][-v<version>][-r<revision>][-silent-correction].<ext>
//! digest-<id>[-v<version>].<ext>
//! ```
//!
//! e.g. `elife-00353-vor-v1.zip`, `elife-29353-v1.xml`,
//! `digest-99999.docx`, `elife-00353-vor-v2-silent-correction.zip`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What kind of package a file name denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleKind {
    /// Publish-on-accept package.
    Poa,
    /// Version-of-record package.
    Vor,
    /// Digest source document.
    Digest,
    /// Silent correction of an already published version.
    Silent,
}

impl std::fmt::Display for ArticleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poa => write!(f, "poa"),
            Self::Vor => write!(f, "vor"),
            Self::Digest => write!(f, "digest"),
            Self::Silent => write!(f, "silent"),
        }
    }
}

/// Error parsing an article identity out of a file name.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("file name {0:?} did not match the expected article pattern")]
pub struct IdentityError(pub String);

/// Identity of one article package, derived from its file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleIdentity {
    pub kind: ArticleKind,
    /// Numeric article id, without zero padding.
    pub id: u32,
    pub version: Option<u32>,
    pub revision: Option<u32>,
}

fn article_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^[a-z][a-z0-9]*-(?P<id>\d+)(?:-(?P<status>poa|vor))?(?:-v(?P<version>\d+))?(?:-r(?P<revision>\d+))?(?P<silent>-silent-correction)?\.[A-Za-z0-9.]+$",
        )
        .expect("article pattern compiles")
    })
}

fn digest_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^digest-(?P<id>\d+)(?:-v(?P<version>\d+))?\.[A-Za-z0-9.]+$")
            .expect("digest pattern compiles")
    })
}

fn version_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-v\d+").expect("version token pattern compiles"))
}

impl ArticleIdentity {
    /// Parse an identity from a bare file name (no key prefix).
    pub fn parse(file_name: &str) -> Result<Self, IdentityError> {
        if let Some(captures) = digest_pattern().captures(file_name) {
            return Ok(Self {
                kind: ArticleKind::Digest,
                id: capture_u32(&captures, "id").ok_or_else(|| IdentityError(file_name.into()))?,
                version: capture_u32(&captures, "version"),
                revision: None,
            });
        }

        let captures = article_pattern()
            .captures(file_name)
            .ok_or_else(|| IdentityError(file_name.to_string()))?;

        let kind = if captures.name("silent").is_some() {
            ArticleKind::Silent
        } else {
            match captures.name("status").map(|m| m.as_str()) {
                Some("poa") => ArticleKind::Poa,
                // Plain article XML carries no status token and is treated
                // as version-of-record content.
                _ => ArticleKind::Vor,
            }
        };

        Ok(Self {
            kind,
            id: capture_u32(&captures, "id").ok_or_else(|| IdentityError(file_name.into()))?,
            version: capture_u32(&captures, "version"),
            revision: capture_u32(&captures, "revision"),
        })
    }

    /// Parse from a full object key, using the last path element.
    pub fn parse_key(key: &str) -> Result<Self, IdentityError> {
        Self::parse(file_name_from_key(key))
    }

    /// Zero-padded five-digit article id, as used in CDN surrogate keys.
    pub fn padded_id(&self) -> String {
        format!("{:05}", self.id)
    }

    /// Article id as the string every external service expects.
    pub fn id_string(&self) -> String {
        self.id.to_string()
    }
}

/// Last path element of an object key.
pub fn file_name_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Remove `-v<N>` version tokens from a file name.
///
/// Deposit packages must not carry internal version tokens, so
/// `elife-29353-v1.xml` becomes `elife-29353.xml` before the file is
/// written into an outbound zip.
pub fn strip_version_token(file_name: &str) -> String {
    version_token_pattern().replace_all(file_name, "").to_string()
}

fn capture_u32(captures: &regex::Captures<'_>, name: &str) -> Option<u32> {
    captures.name(name).and_then(|m| m.as_str().parse().ok())
}
