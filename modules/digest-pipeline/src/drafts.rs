//! Draft generators: recommendation → task drafts and at most one SOP draft.
//!
//! Everything except the template lookup is a pure function so the mappings
//! can be tested on their own.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::warn;

use digest_common::{
    Confidence, Impact, NewSopDraft, NewTaskDraft, Recommendation, SopDraftType, TaskPriority,
};

use crate::collaborators::{SopAssociation, TemplateStore};

/// Most task drafts produced from one recommendation.
pub const MAX_TASKS_PER_RECOMMENDATION: usize = 5;

/// Categories that warrant a new SOP when none exists yet.
pub const PROCEDURAL_CATEGORIES: &[&str] = &[
    "operations",
    "process",
    "compliance",
    "sop",
    "workflow",
    "policy",
    "safety",
    "training",
];

/// Suggested priority and due window for a recommendation.
pub fn suggest(impact: Impact, confidence: Confidence) -> (TaskPriority, i32) {
    use Confidence::*;
    use Impact::*;
    match (impact, confidence) {
        (High, Verified) => (TaskPriority::Urgent, 3),
        (High, Estimated) => (TaskPriority::High, 7),
        (Medium, Verified) => (TaskPriority::High, 14),
        (Medium, Estimated) => (TaskPriority::Medium, 14),
        (Low, Verified) => (TaskPriority::Medium, 30),
        (Low, Estimated) => (TaskPriority::Low, 30),
    }
}

fn action_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*]|\d+[.)])\s+(.+?)\s*$").expect("valid action item regex")
    })
}

/// Bulleted or numbered lines in `details`, at most five.
pub fn action_items(details: &str) -> Vec<String> {
    details
        .lines()
        .filter_map(|line| action_item_re().captures(line))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .take(MAX_TASKS_PER_RECOMMENDATION)
        .collect()
}

fn sources_list(rec: &Recommendation) -> String {
    if rec.citations.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = rec
        .citations
        .iter()
        .map(|c| format!("- {} ({})", c.source_name, c.source_url))
        .collect();
    format!("\n\nSources:\n{}", lines.join("\n"))
}

fn first_chars(text: &str, max: usize) -> String {
    let cut = digest_common::text::truncate_chars(text, max);
    if cut.len() < text.len() {
        format!("{}…", cut.trim_end())
    } else {
        cut.to_string()
    }
}

pub fn task_drafts(rec: &Recommendation) -> Vec<NewTaskDraft> {
    let (priority, due_in_days) = suggest(rec.impact, rec.confidence);
    let sources = sources_list(rec);
    let draft = |title: String, action: Option<&str>| {
        let action = action
            .map(|a| format!("\n\nAction: {a}"))
            .unwrap_or_default();
        NewTaskDraft {
            recommendation_id: rec.id,
            title,
            description: format!("{}{action}{sources}", rec.summary),
            suggested_priority: priority,
            suggested_due_in_days: due_in_days,
        }
    };

    let items = action_items(&rec.details);
    if items.is_empty() {
        return vec![draft(rec.title.clone(), None)];
    }
    items
        .iter()
        .map(|item| draft(first_chars(item, 120), Some(item)))
        .collect()
}

fn proposed_section(rec: &Recommendation) -> String {
    let mut section = format!("## {}\n\n{}", rec.title, rec.summary);
    if !rec.details.is_empty() {
        section.push_str("\n\n");
        section.push_str(&rec.details);
    }
    section.push_str(&sources_list(rec));
    section
}

pub fn is_procedural(category: &str) -> bool {
    PROCEDURAL_CATEGORIES.contains(&category.trim().to_lowercase().as_str())
}

/// `edit` when an SOP is already associated, `new` for procedural categories,
/// otherwise nothing.
pub fn sop_draft(rec: &Recommendation, association: Option<&SopAssociation>) -> Option<NewSopDraft> {
    match association {
        Some(assoc) => Some(NewSopDraft {
            recommendation_id: rec.id,
            draft_type: SopDraftType::Edit,
            sop_title: Some(assoc.sop_title.clone()),
            sop_doc_id: Some(assoc.sop_doc_id.clone()),
            template_set_id: Some(assoc.template_set_id.clone()),
            before_content: assoc.content.clone(),
            after_content: proposed_section(rec),
            description: format!("Update \"{}\": {}", assoc.sop_title, rec.summary),
        }),
        None if is_procedural(&rec.category) => Some(NewSopDraft {
            recommendation_id: rec.id,
            draft_type: SopDraftType::New,
            sop_title: Some(rec.title.clone()),
            sop_doc_id: None,
            template_set_id: None,
            before_content: None,
            after_content: proposed_section(rec),
            description: format!("New procedure: {}", rec.summary),
        }),
        None => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drafts {
    pub tasks: Vec<NewTaskDraft>,
    pub sop: Option<NewSopDraft>,
}

pub struct DraftGenerator {
    templates: Arc<dyn TemplateStore>,
    min_impact: Impact,
}

impl DraftGenerator {
    pub fn new(templates: Arc<dyn TemplateStore>, min_impact: Impact) -> Self {
        Self {
            templates,
            min_impact,
        }
    }

    /// Drafts for one recommendation; empty below the impact threshold. A
    /// template store failure costs only the SOP draft.
    pub async fn generate(&self, rec: &Recommendation) -> Drafts {
        if rec.impact < self.min_impact {
            return Drafts::default();
        }

        let sop = match self.templates.sop_for_category(&rec.category).await {
            Ok(association) => sop_draft(rec, association.as_ref()),
            Err(e) => {
                warn!(
                    recommendation_id = %rec.id,
                    category = rec.category.as_str(),
                    error = %e,
                    "Template lookup failed, skipping SOP draft"
                );
                None
            }
        };

        Drafts {
            tasks: task_drafts(rec),
            sop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use digest_common::Citation;
    use uuid::Uuid;

    fn rec(category: &str, impact: Impact, details: &str) -> Recommendation {
        let id = Uuid::new_v4();
        Recommendation {
            id,
            digest_id: Uuid::new_v4(),
            category: category.into(),
            title: "Adopt a shared shift board".into(),
            summary: "Swaps take too long.".into(),
            details: details.into(),
            impact,
            confidence: Confidence::Estimated,
            source_count: 1,
            citations: vec![Citation {
                id: Uuid::new_v4(),
                recommendation_id: id,
                source_name: "Ops Weekly".into(),
                source_url: "https://ops.example/1".into(),
                excerpt: String::new(),
            }],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn suggestion_table() {
        assert_eq!(suggest(Impact::High, Confidence::Verified), (TaskPriority::Urgent, 3));
        assert_eq!(suggest(Impact::High, Confidence::Estimated), (TaskPriority::High, 7));
        assert_eq!(suggest(Impact::Medium, Confidence::Verified), (TaskPriority::High, 14));
        assert_eq!(suggest(Impact::Medium, Confidence::Estimated), (TaskPriority::Medium, 14));
        assert_eq!(suggest(Impact::Low, Confidence::Verified), (TaskPriority::Medium, 30));
        assert_eq!(suggest(Impact::Low, Confidence::Estimated), (TaskPriority::Low, 30));
    }

    #[test]
    fn higher_impact_never_gets_a_longer_window() {
        for confidence in [Confidence::Estimated, Confidence::Verified] {
            let (_, low) = suggest(Impact::Low, confidence);
            let (_, med) = suggest(Impact::Medium, confidence);
            let (_, high) = suggest(Impact::High, confidence);
            assert!(high <= med && med <= low);
        }
    }

    #[test]
    fn action_items_from_bullets_and_numbers() {
        let details = "Context first.\n- Print the board\n* Train leads\n1. Review weekly\n2) Retire the old sheet\nplain line";
        assert_eq!(
            action_items(details),
            vec!["Print the board", "Train leads", "Review weekly", "Retire the old sheet"]
        );
        let many: String = (0..9).map(|i| format!("- step {i}\n")).collect();
        assert_eq!(action_items(&many).len(), MAX_TASKS_PER_RECOMMENDATION);
    }

    #[test]
    fn one_task_per_action_item_or_one_from_title() {
        let r = rec("marketing", Impact::High, "- Print the board\n- Train leads");
        let tasks = task_drafts(&r);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "Print the board");
        assert!(tasks[0].description.contains("Sources:\n- Ops Weekly"));
        assert_eq!(tasks[0].suggested_priority, TaskPriority::High);

        let plain = task_drafts(&rec("marketing", Impact::High, "No bullets here."));
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].title, "Adopt a shared shift board");
    }

    #[test]
    fn sop_draft_type_follows_association() {
        let assoc = SopAssociation {
            template_set_id: "ts-1".into(),
            sop_doc_id: "doc-1".into(),
            sop_title: "Scheduling SOP".into(),
            content: Some("Old text".into()),
        };
        let edit = sop_draft(&rec("marketing", Impact::High, ""), Some(&assoc)).unwrap();
        assert_eq!(edit.draft_type, SopDraftType::Edit);
        assert_eq!(edit.sop_doc_id.as_deref(), Some("doc-1"));
        assert_eq!(edit.before_content.as_deref(), Some("Old text"));

        let new = sop_draft(&rec("Operations", Impact::High, ""), None).unwrap();
        assert_eq!(new.draft_type, SopDraftType::New);
        assert!(new.sop_doc_id.is_none());

        assert!(sop_draft(&rec("marketing", Impact::High, ""), None).is_none());
    }
}
