//! Deposit document generation.
//!
//! Crossref metadata deposits and PubMed article sets. The documents carry
//! the metadata slice the endpoints require; full-text transforms are not
//! this system's job.

use crate::article::ArticleRecord;
use crate::deposit::PUB_DATE_TYPES;

/// Name a Crossref deposit document is written under.
pub fn crossref_file_name(article_id: &str) -> String {
    format!("crossref-{article_id}.xml")
}

/// Name a PubMed article-set document is written under.
pub fn pubmed_file_name(date_stamp: &str) -> String {
    format!("pubmed-{date_stamp}.xml")
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn publication_date_block(article: &ArticleRecord) -> String {
    match article.first_pub_date(PUB_DATE_TYPES) {
        Some(date) => format!(
            "      <publication_date media_type=\"online\">\n        <month>{}</month>\n        <day>{}</day>\n        <year>{}</year>\n      </publication_date>\n",
            date.date.format("%m"),
            date.date.format("%d"),
            date.date.format("%Y"),
        ),
        None => String::new(),
    }
}

/// Render a Crossref journal-article deposit for one article.
pub fn crossref_deposit_xml(
    article: &ArticleRecord,
    batch_id: &str,
    timestamp: &str,
    registrant: &str,
    depositor_email: &str,
) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(
        "<doi_batch version=\"4.4.2\" xmlns=\"http://www.crossref.org/schema/4.4.2\">\n",
    );
    xml.push_str("  <head>\n");
    xml.push_str(&format!("    <doi_batch_id>{}</doi_batch_id>\n", escape(batch_id)));
    xml.push_str(&format!("    <timestamp>{timestamp}</timestamp>\n"));
    xml.push_str("    <depositor>\n");
    xml.push_str(&format!(
        "      <depositor_name>{}</depositor_name>\n",
        escape(registrant)
    ));
    xml.push_str(&format!(
        "      <email_address>{}</email_address>\n",
        escape(depositor_email)
    ));
    xml.push_str("    </depositor>\n");
    xml.push_str(&format!("    <registrant>{}</registrant>\n", escape(registrant)));
    xml.push_str("  </head>\n");
    xml.push_str("  <body>\n");
    xml.push_str("    <journal_article publication_type=\"full_text\">\n");
    xml.push_str("      <titles>\n");
    xml.push_str(&format!("        <title>{}</title>\n", escape(&article.title)));
    xml.push_str("      </titles>\n");
    xml.push_str(&publication_date_block(article));
    xml.push_str("      <doi_data>\n");
    xml.push_str(&format!("        <doi>{}</doi>\n", escape(&article.doi)));
    xml.push_str(&format!(
        "        <resource>https://elifesciences.org/articles/{}</resource>\n",
        escape(&article.padded_id())
    ));
    xml.push_str("      </doi_data>\n");
    xml.push_str("    </journal_article>\n");
    xml.push_str("  </body>\n");
    xml.push_str("</doi_batch>\n");
    xml
}

/// Render a Crossref peer-review deposit: one `<review>` per sub-article.
pub fn crossref_peer_review_xml(
    article: &ArticleRecord,
    batch_id: &str,
    timestamp: &str,
    registrant: &str,
    depositor_email: &str,
) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(
        "<doi_batch version=\"4.4.2\" xmlns=\"http://www.crossref.org/schema/4.4.2\">\n",
    );
    xml.push_str("  <head>\n");
    xml.push_str(&format!("    <doi_batch_id>{}</doi_batch_id>\n", escape(batch_id)));
    xml.push_str(&format!("    <timestamp>{timestamp}</timestamp>\n"));
    xml.push_str("    <depositor>\n");
    xml.push_str(&format!(
        "      <depositor_name>{}</depositor_name>\n",
        escape(registrant)
    ));
    xml.push_str(&format!(
        "      <email_address>{}</email_address>\n",
        escape(depositor_email)
    ));
    xml.push_str("    </depositor>\n");
    xml.push_str(&format!("    <registrant>{}</registrant>\n", escape(registrant)));
    xml.push_str("  </head>\n");
    xml.push_str("  <body>\n");

    for review in &article.reviews {
        xml.push_str(&format!(
            "    <review type=\"{}\" stage=\"pre-publication\">\n",
            escape(&review.article_type)
        ));
        if !review.contributors.is_empty() {
            xml.push_str("      <contributors>\n");
            for contributor in &review.contributors {
                xml.push_str(&format!(
                    "        <person_name contributor_role=\"{}\">\n          <given_name>{}</given_name>\n          <surname>{}</surname>\n        </person_name>\n",
                    escape(&contributor.contrib_type),
                    escape(&contributor.given_name),
                    escape(&contributor.surname),
                ));
            }
            xml.push_str("      </contributors>\n");
        }
        if let Some(review_date) = &review.review_date {
            xml.push_str(&format!(
                "      <review_date>{}</review_date>\n",
                escape(review_date)
            ));
        }
        if let Some(doi) = &review.doi {
            xml.push_str("      <doi_data>\n");
            xml.push_str(&format!("        <doi>{}</doi>\n", escape(doi)));
            xml.push_str(&format!(
                "        <resource>https://elifesciences.org/articles/{}</resource>\n",
                escape(&article.padded_id())
            ));
            xml.push_str("      </doi_data>\n");
        }
        xml.push_str("    </review>\n");
    }

    xml.push_str("  </body>\n");
    xml.push_str("</doi_batch>\n");
    xml
}

/// Render a PubMed article set covering a batch of articles.
pub fn pubmed_article_set_xml(articles: &[ArticleRecord], journal_title: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<ArticleSet>\n");
    for article in articles {
        xml.push_str("  <Article>\n");
        xml.push_str(&format!(
            "    <Journal><JournalTitle>{}</JournalTitle></Journal>\n",
            escape(journal_title)
        ));
        xml.push_str(&format!(
            "    <ArticleTitle>{}</ArticleTitle>\n",
            escape(&article.title)
        ));
        xml.push_str(&format!(
            "    <ELocationID EIdType=\"doi\">{}</ELocationID>\n",
            escape(&article.doi)
        ));
        if let Some(date) = article.first_pub_date(PUB_DATE_TYPES) {
            xml.push_str(&format!(
                "    <History><PubDate PubStatus=\"epublish\"><Year>{}</Year><Month>{}</Month><Day>{}</Day></PubDate></History>\n",
                date.date.format("%Y"),
                date.date.format("%m"),
                date.date.format("%d"),
            ));
        }
        xml.push_str("  </Article>\n");
    }
    xml.push_str("</ArticleSet>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ArticleDate, Contributor, ReviewArticle};
    use chrono::NaiveDate;

    fn article() -> ArticleRecord {
        let mut article = ArticleRecord {
            article_id: "29353".into(),
            doi: "10.7554/eLife.29353".into(),
            title: "Replication Study: <i>in vivo</i>".into(),
            ..Default::default()
        };
        article.add_date(ArticleDate {
            date_type: "pub".into(),
            date: NaiveDate::from_ymd_opt(2017, 12, 12).unwrap(),
        });
        article
    }

    #[test]
    fn journal_deposit_carries_doi_and_date() {
        let xml = crossref_deposit_xml(
            &article(),
            "pubflow-20171212000000",
            "20171212000000",
            "pubflow",
            "admin@example.org",
        );
        assert!(xml.contains("<doi>10.7554/eLife.29353</doi>"));
        assert!(xml.contains("<year>2017</year>"));
        assert!(xml.contains("<doi_batch_id>pubflow-20171212000000</doi_batch_id>"));
        // Markup in the title is escaped, not emitted.
        assert!(xml.contains("&lt;i&gt;"));
    }

    #[test]
    fn peer_review_deposit_renders_each_review() {
        let mut with_reviews = article();
        with_reviews.reviews = vec![ReviewArticle {
            article_type: "decision-letter".into(),
            doi: Some("10.7554/eLife.29353.010".into()),
            contributors: vec![Contributor {
                contrib_type: "editor".into(),
                surname: "Davidson".into(),
                given_name: "Irwin".into(),
            }],
            review_date: Some("2017-11-01".into()),
        }];

        let xml = crossref_peer_review_xml(
            &with_reviews,
            "batch",
            "20171212000000",
            "pubflow",
            "admin@example.org",
        );
        assert!(xml.contains("<review type=\"decision-letter\""));
        assert!(xml.contains("<surname>Davidson</surname>"));
        assert!(xml.contains("<review_date>2017-11-01</review_date>"));
        assert!(xml.contains("<doi>10.7554/eLife.29353.010</doi>"));
    }

    #[test]
    fn pubmed_set_covers_all_articles() {
        let xml = pubmed_article_set_xml(&[article(), article()], "eLife");
        assert_eq!(xml.matches("<Article>").count(), 2);
        assert!(xml.contains("<ELocationID EIdType=\"doi\">10.7554/eLife.29353</ELocationID>"));
    }

    #[test]
    fn file_names() {
        assert_eq!(crossref_file_name("29353"), "crossref-29353.xml");
        assert_eq!(
            pubmed_file_name("20171212000000"),
            "pubmed-20171212000000.xml"
        );
    }
}
