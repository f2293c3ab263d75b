use digest_common::{Digest, Impact, Recommendation};

use crate::collaborators::{DocumentSection, RenderedDocument};

/// High-impact titles listed in the summary message.
pub const TOP_N: usize = 3;

pub fn document_title(period: &str) -> String {
    format!("Content Intelligence Digest — {period}")
}

/// Recommendations ordered high impact first; order within an impact level
/// is kept.
fn by_impact(recommendations: &[Recommendation]) -> Vec<&Recommendation> {
    let mut ordered: Vec<&Recommendation> = recommendations.iter().collect();
    ordered.sort_by(|a, b| b.impact.cmp(&a.impact));
    ordered
}

pub fn render_document(digest: &Digest, recommendations: &[Recommendation]) -> RenderedDocument {
    let mut sections = vec![DocumentSection {
        heading: "Overview".to_string(),
        body: format!(
            "Sources fetched: {}\nRecommendations: {}\nTask drafts: {}\nSOP drafts: {}",
            digest.sources_fetched,
            digest.recommendations_generated,
            digest.task_drafts_created,
            digest.sop_drafts_created,
        ),
    }];

    for rec in by_impact(recommendations) {
        let mut body = format!(
            "Impact: {} | Confidence: {} | Category: {}\n\n{}",
            rec.impact, rec.confidence, rec.category, rec.summary
        );
        if !rec.details.is_empty() {
            body.push_str("\n\n");
            body.push_str(&rec.details);
        }
        if !rec.citations.is_empty() {
            body.push_str("\n\nSources:");
            for c in &rec.citations {
                body.push_str(&format!("\n- {} ({})", c.source_name, c.source_url));
                if !c.excerpt.is_empty() {
                    body.push_str(&format!(": \"{}\"", c.excerpt));
                }
            }
        }
        sections.push(DocumentSection {
            heading: rec.title.clone(),
            body,
        });
    }

    RenderedDocument {
        title: document_title(&digest.period),
        sections,
    }
}

pub fn summary_message(
    digest: &Digest,
    recommendations: &[Recommendation],
    document_url: Option<&str>,
) -> String {
    let mut lines = vec![
        format!("*Content Intelligence Digest — {}*", digest.period),
        format!(
            "{} sources, {} recommendations, {} task drafts, {} SOP drafts",
            digest.sources_fetched,
            digest.recommendations_generated,
            digest.task_drafts_created,
            digest.sop_drafts_created,
        ),
    ];

    let top: Vec<&Recommendation> = by_impact(recommendations)
        .into_iter()
        .filter(|r| r.impact == Impact::High)
        .take(TOP_N)
        .collect();
    if !top.is_empty() {
        lines.push("*Top recommendations:*".to_string());
        for rec in top {
            lines.push(format!("  - {}", rec.title));
        }
    }

    if let Some(url) = document_url {
        lines.push(format!("Full report: {url}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use digest_common::{Confidence, DigestStatus};
    use uuid::Uuid;

    fn digest() -> Digest {
        Digest {
            id: Uuid::new_v4(),
            period: "2025-11".into(),
            status: DigestStatus::Delivering,
            sources_fetched: 3,
            recommendations_generated: 4,
            task_drafts_created: 5,
            sop_drafts_created: 1,
            error_message: None,
            google_doc_url: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn rec(title: &str, impact: Impact) -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            digest_id: Uuid::nil(),
            category: "operations".into(),
            title: title.into(),
            summary: "Summary".into(),
            details: String::new(),
            impact,
            confidence: Confidence::Estimated,
            source_count: 0,
            citations: vec![],
            created_at: Utc::now(),
        }
    }

    fn recs() -> Vec<Recommendation> {
        vec![
            rec("low one", Impact::Low),
            rec("high one", Impact::High),
            rec("medium one", Impact::Medium),
            rec("high two", Impact::High),
            rec("high three", Impact::High),
            rec("high four", Impact::High),
        ]
    }

    #[test]
    fn document_orders_by_impact() {
        let doc = render_document(&digest(), &recs());
        assert_eq!(doc.title, "Content Intelligence Digest — 2025-11");
        let headings: Vec<_> = doc.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(
            headings,
            vec!["Overview", "high one", "high two", "high three", "high four", "medium one", "low one"]
        );
    }

    #[test]
    fn summary_lists_top_three_and_link() {
        let text = summary_message(&digest(), &recs(), Some("https://docs.example/d/1"));
        assert!(text.contains("3 sources, 4 recommendations, 5 task drafts, 1 SOP drafts"));
        assert!(text.contains("high three"));
        assert!(!text.contains("high four"));
        assert!(text.ends_with("Full report: https://docs.example/d/1"));

        let without = summary_message(&digest(), &[], None);
        assert!(!without.contains("Top recommendations"));
        assert!(!without.contains("Full report"));
    }
}
