//! Shared pieces of the batch deposit pipelines.
//!
//! A deposit pipeline walks one outbox: list, download, generate deposit
//! documents, approve, publish to the endpoint, archive, and notify. Phase
//! failures after approval are bookkeeping only: the activity still
//! succeeds so the workflow does not loop, and the admin email carries the
//! details. Unsent files stay in the outbox for the next scheduled run.

pub mod xml;

use chrono::NaiveDate;

use crate::article::{ArticleDate, ArticleRecord};
use pubflow_providers::lax::ArticleVersions;

/// Publication date types a deposit looks for, in priority order.
pub const PUB_DATE_TYPES: &[&str] = &["pub", "publication"];

/// Per-phase outcomes of one deposit run. `None` means the phase did not
/// run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statuses {
    pub download: Option<bool>,
    pub generate: Option<bool>,
    pub approve: Option<bool>,
    pub publish: Option<bool>,
    pub outbox: Option<bool>,
    pub email: Option<bool>,
    pub activity: Option<bool>,
}

impl Statuses {
    /// Collapse the phase outcomes into the activity outcome: failed
    /// generation or publication means a failed run, everything else is
    /// routine.
    pub fn record_activity(&mut self) {
        self.activity = Some(self.publish != Some(false) && self.generate != Some(false));
    }

    pub fn activity_ok(&self) -> bool {
        self.activity == Some(true)
    }
}

impl std::fmt::Display for Statuses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "activity: {:?}, download: {:?}, generate: {:?}, approve: {:?}, publish: {:?}, outbox: {:?}, email: {:?}",
            self.activity,
            self.download,
            self.generate,
            self.approve,
            self.publish,
            self.outbox,
            self.email
        )
    }
}

/// A deposit document generated for one outbox file.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    /// Name the document is published and archived under.
    pub file_name: String,
    pub content: Vec<u8>,
}

/// First publication date of the article: the first configured date type
/// the article carries, else the version-1 date from the article-versions
/// service synthesized as the first configured type.
pub async fn article_first_pub_date(
    article: &ArticleRecord,
    lax: &dyn ArticleVersions,
) -> Option<ArticleDate> {
    if let Some(date) = article.first_pub_date(PUB_DATE_TYPES) {
        return Some(date.clone());
    }

    let stamp = lax.publication_date(&article.article_id).await?;
    let date = chrono::NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S")
        .ok()?
        .date();
    Some(ArticleDate {
        date_type: PUB_DATE_TYPES[0].to_string(),
        date,
    })
}

/// Embargo check: an article whose first publication date is in the future
/// is excluded from the deposit; no date at all is approval.
pub fn approve_to_generate(pub_date: Option<&ArticleDate>, today: NaiveDate) -> bool {
    match pub_date {
        Some(date) => date.date <= today,
        None => true,
    }
}

pub fn activity_status_text(ok: bool) -> &'static str {
    if ok {
        "Success!"
    } else {
        "FAILED."
    }
}

/// Admin email subject; includes the outbox file count.
pub fn email_subject(
    name: &str,
    activity_ok: bool,
    domain: &str,
    outbox_file_count: usize,
    datetime_string: &str,
) -> String {
    format!(
        "{name} {} files: {outbox_file_count}, {datetime_string}, workflow domain: {domain}",
        activity_status_text(activity_ok)
    )
}

/// Head of the admin email body: the phase statuses.
pub fn email_body_head(name: &str, activity_ok: bool, statuses: &Statuses) -> String {
    let mut body = String::new();
    body.push_str(&format!("{name} status:\n\n"));
    body.push_str(&format!("{}\n\n", activity_status_text(activity_ok)));
    body.push_str(&format!("activity_status: {:?}\n", statuses.activity));
    body.push_str(&format!("download_status: {:?}\n", statuses.download));
    body.push_str(&format!("generate_status: {:?}\n", statuses.generate));
    body.push_str(&format!("approve_status: {:?}\n", statuses.approve));
    body.push_str(&format!("publish_status: {:?}\n", statuses.publish));
    body.push_str(&format!("outbox_status: {:?}\n", statuses.outbox));
    body.push('\n');
    body
}

/// Middle of the admin email body: the file lists and the endpoint detail
/// log.
pub fn email_body_middle(
    outbox_keys: &[String],
    published_file_names: &[String],
    not_published_file_names: &[String],
    detail_lines: &[String],
) -> String {
    let mut body = String::new();

    body.push_str("\nOutbox files:\n");
    if outbox_keys.is_empty() {
        body.push_str("No files in outbox.\n");
    } else {
        for key in outbox_keys {
            body.push_str(key);
            body.push('\n');
        }
    }

    if !published_file_names.is_empty() {
        body.push_str("\nPublished files generated deposit documents:\n");
        for name in published_file_names {
            body.push_str(pubflow_core::identity::file_name_from_key(name));
            body.push('\n');
        }
    }

    if !not_published_file_names.is_empty() {
        body.push_str("\nFiles not approved or failed deposit generation:\n");
        for name in not_published_file_names {
            body.push_str(pubflow_core::identity::file_name_from_key(name));
            body.push('\n');
        }
    }

    body.push_str("\n-------------------------------\n");
    body.push_str("Deposit details:\n");
    for line in detail_lines {
        body.push_str(line);
        body.push('\n');
    }
    body
}

/// Foot of the admin email body: where this run came from.
pub fn email_body_foot(
    activity_id: &str,
    workflow_id: &str,
    datetime_string: &str,
    domain: &str,
) -> String {
    format!(
        "\n\nSincerely,\n\npubflow {activity_id} activity\nworkflow_id: {workflow_id}\nat {datetime_string}, domain: {domain}\n"
    )
}
