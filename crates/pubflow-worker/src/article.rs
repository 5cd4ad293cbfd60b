//! Article records parsed from JATS XML.
//!
//! The deposit pipelines need only a narrow slice of the article: ids,
//! title, publication dates, contributors, and any review sub-articles.
//! Anything else in the JATS is ignored.

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Error parsing an article out of JATS XML.
#[derive(Debug, thiserror::Error)]
pub enum ArticleError {
    #[error("article xml did not parse: {0}")]
    Xml(String),

    #[error("article xml is missing {0}")]
    Missing(&'static str),
}

/// One contributor (author, editor, reviewer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub contrib_type: String,
    pub surname: String,
    pub given_name: String,
}

/// A dated event on the article, e.g. `pub` or `publication`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleDate {
    pub date_type: String,
    pub date: NaiveDate,
}

/// A review sub-article (decision letter, referee report, reply).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewArticle {
    pub article_type: String,
    pub doi: Option<String>,
    pub contributors: Vec<Contributor>,
    pub review_date: Option<String>,
}

/// The slice of an article the pipelines work with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleRecord {
    pub article_id: String,
    pub doi: String,
    pub title: String,
    /// Filled from the file name or the article-versions service when the
    /// XML does not carry one.
    pub version: Option<u32>,
    pub dates: Vec<ArticleDate>,
    pub authors: Vec<Contributor>,
    pub editors: Vec<Contributor>,
    pub reviews: Vec<ReviewArticle>,
}

impl ArticleRecord {
    pub fn date_of_type(&self, date_type: &str) -> Option<&ArticleDate> {
        self.dates.iter().find(|d| d.date_type == date_type)
    }

    /// First date whose type appears in the configured list, in list order.
    pub fn first_pub_date(&self, date_types: &[&str]) -> Option<&ArticleDate> {
        date_types
            .iter()
            .find_map(|date_type| self.date_of_type(date_type))
    }

    pub fn add_date(&mut self, date: ArticleDate) {
        self.dates.push(date);
    }

    pub fn padded_id(&self) -> String {
        format!("{:0>5}", self.article_id)
    }
}

fn attribute(
    element: &quick_xml::events::BytesStart<'_>,
    name: &str,
) -> Result<Option<String>, ArticleError> {
    element
        .try_get_attribute(name)
        .map_err(|err| ArticleError::Xml(err.to_string()))?
        .map(|attr| {
            attr.unescape_value()
                .map(|v| v.to_string())
                .map_err(|err| ArticleError::Xml(err.to_string()))
        })
        .transpose()
}

/// Parse one JATS document into an [`ArticleRecord`].
pub fn parse_article_xml(xml: &str) -> Result<ArticleRecord, ArticleError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut article = ArticleRecord::default();
    let mut current_sub: Option<ReviewArticle> = None;
    let mut current_contrib: Option<Contributor> = None;
    let mut pending_id_type: Option<String> = None;
    let mut pending_date_type: Option<String> = None;
    let mut date_parts: (Option<u32>, Option<u32>, Option<i32>) = (None, None, None);
    let mut path: Vec<String> = Vec::new();
    let mut title_done = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                match name.as_str() {
                    "sub-article" => {
                        current_sub = Some(ReviewArticle {
                            article_type: attribute(&element, "article-type")?
                                .unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    "article-id" => {
                        pending_id_type = attribute(&element, "pub-id-type")?;
                    }
                    "pub-date" => {
                        pending_date_type = attribute(&element, "date-type")?
                            .or(attribute(&element, "pub-type")?);
                        date_parts = (None, None, None);
                    }
                    "contrib" => {
                        current_contrib = Some(Contributor {
                            contrib_type: attribute(&element, "contrib-type")?
                                .unwrap_or_default(),
                            surname: String::new(),
                            given_name: String::new(),
                        });
                    }
                    _ => {}
                }
                path.push(name);
            }

            Ok(Event::Empty(element)) => {
                // Self-closing elements carry no text we need, except ids.
                let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                if name == "article-id" {
                    pending_id_type = None;
                }
            }

            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| ArticleError::Xml(err.to_string()))?
                    .to_string();
                let Some(parent) = path.last().map(String::as_str) else {
                    continue;
                };
                match parent {
                    "article-id" => {
                        let target_doi = pending_id_type.as_deref() == Some("doi");
                        let target_id = matches!(
                            pending_id_type.as_deref(),
                            Some("publisher-id") | Some("manuscript")
                        );
                        match &mut current_sub {
                            Some(sub) if target_doi => sub.doi = Some(value),
                            Some(_) => {}
                            None if target_doi => article.doi = value,
                            None if target_id => article.article_id = value,
                            None => {}
                        }
                    }
                    "article-title" => {
                        if current_sub.is_none() && !title_done {
                            if !article.title.is_empty() {
                                article.title.push(' ');
                            }
                            article.title.push_str(&value);
                        }
                    }
                    "day" => date_parts.0 = value.parse().ok(),
                    "month" => date_parts.1 = value.parse().ok(),
                    "year" => date_parts.2 = value.parse().ok(),
                    "surname" => {
                        if let Some(contrib) = &mut current_contrib {
                            contrib.surname = value;
                        }
                    }
                    "given-names" => {
                        if let Some(contrib) = &mut current_contrib {
                            contrib.given_name = value;
                        }
                    }
                    _ => {}
                }
            }

            Ok(Event::End(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                path.pop();
                match name.as_str() {
                    "sub-article" => {
                        if let Some(sub) = current_sub.take() {
                            article.reviews.push(sub);
                        }
                    }
                    "article-id" => pending_id_type = None,
                    "article-title" => {
                        if current_sub.is_none() && !article.title.is_empty() {
                            title_done = true;
                        }
                    }
                    "pub-date" => {
                        if let (Some(date_type), (Some(day), Some(month), Some(year))) =
                            (pending_date_type.take(), date_parts)
                        {
                            if current_sub.is_none() {
                                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                                    article.add_date(ArticleDate { date_type, date });
                                }
                            }
                        }
                        pending_date_type = None;
                    }
                    "contrib" => {
                        if let Some(contrib) = current_contrib.take() {
                            match &mut current_sub {
                                Some(sub) => sub.contributors.push(contrib),
                                None => match contrib.contrib_type.as_str() {
                                    "editor" | "senior_editor" => article.editors.push(contrib),
                                    "author" => article.authors.push(contrib),
                                    _ => {}
                                },
                            }
                        }
                    }
                    _ => {}
                }
            }

            Ok(Event::Eof) => break,
            Err(err) => return Err(ArticleError::Xml(err.to_string())),
            _ => {}
        }
    }

    if article.article_id.is_empty() {
        return Err(ArticleError::Missing("article-id"));
    }
    if article.doi.is_empty() {
        return Err(ArticleError::Missing("doi"));
    }
    Ok(article)
}

/// Copy parent editors into each review sub-article when absent, rewriting
/// `senior_editor` to `editor`, and give replies with no explicit
/// contributors the parent's authors.
pub fn enrich_review_articles(article: &mut ArticleRecord) {
    let editors = article.editors.clone();
    let authors: Vec<Contributor> = article
        .authors
        .iter()
        .filter(|c| c.contrib_type == "author")
        .cloned()
        .collect();

    for sub in &mut article.reviews {
        if sub.article_type != "reply" {
            for editor in &editors {
                let present = sub.contributors.iter().any(|c| {
                    (
                        c.contrib_type.as_str(),
                        c.surname.as_str(),
                        c.given_name.as_str(),
                    ) == (
                        editor.contrib_type.as_str(),
                        editor.surname.as_str(),
                        editor.given_name.as_str(),
                    )
                });
                if !present {
                    let mut copied = editor.clone();
                    if copied.contrib_type == "senior_editor" {
                        copied.contrib_type = "editor".to_string();
                    }
                    sub.contributors.push(copied);
                }
            }
        }

        if sub.article_type == "reply" && sub.contributors.is_empty() {
            sub.contributors = authors.clone();
        }
    }
}

/// Drop articles with zero review sub-articles from a peer-review batch.
pub fn prune_articles_without_reviews(
    articles: Vec<(String, ArticleRecord)>,
) -> Vec<(String, ArticleRecord)> {
    articles
        .into_iter()
        .filter(|(file_name, article)| {
            if article.reviews.is_empty() {
                tracing::info!(
                    %file_name,
                    doi = %article.doi,
                    "pruning article from peer review deposit, it has no peer reviews"
                );
                false
            } else {
                true
            }
        })
        .collect()
}
