//! Prompt Templates
//!
//! Grounded prompt construction. Rendering is pure: the same document, issue
//! and budget always produce the same prompt pair.

use serde::Serialize;
use tera::{Context, Tera};
use tracing::warn;

use crate::knowledge::KnowledgeDocument;
use crate::{Error, Result};

/// System prompt for grounded Redshift analysis
pub const SYSTEM_PROMPT: &str = r#"You are an Amazon Redshift data-warehouse performance expert.
Ground every statement only in the knowledge base supplied in the user message.
If the knowledge base does not cover the question, answer "unknown" rather than guessing.
Provide a detailed analysis followed by concrete, numbered remediation steps."#;

const USER_PROMPT_TEMPLATE: &str = r#"Use only the knowledge base below to reason about the user's Redshift issue.

Knowledge base ({{ source }}):
<knowledge>
{{ knowledge }}
</knowledge>
{% if truncation %}
Note: the knowledge base was truncated to its first {{ truncation.kept_chars }} of {{ truncation.total_chars }} characters. Treat anything beyond that point as unknown.
{% endif %}
User issue:
{{ issues }}

Provide a detailed analysis and a numbered to-do list of concrete solution steps."#;

/// Records that the knowledge document was cut to fit the prompt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub kept_chars: usize,
    pub total_chars: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundedPrompt {
    pub system: String,
    pub user: String,
    pub truncation: Option<Truncation>,
}

/// Cut `content` to at most `max_chars` characters on a char boundary.
fn fit_to_budget(content: &str, max_chars: usize) -> (&str, Option<Truncation>) {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => (
            &content[..cut],
            Some(Truncation {
                kept_chars: max_chars,
                total_chars: content.chars().count(),
            }),
        ),
        None => (content, None),
    }
}

/// Build the system/user prompt pair grounding `issues` in `document`.
///
/// A document longer than `max_knowledge_chars` is truncated explicitly: the
/// cut is reported in the returned prompt, logged, and stated in the user
/// prompt so the model knows material is missing.
pub fn build_grounded_prompt(
    document: &KnowledgeDocument,
    issues: &str,
    max_knowledge_chars: usize,
) -> Result<GroundedPrompt> {
    let (knowledge, truncation) = fit_to_budget(&document.content, max_knowledge_chars);
    if let Some(t) = &truncation {
        warn!(
            "Knowledge document {} truncated to {} of {} characters",
            document.location, t.kept_chars, t.total_chars
        );
    }

    let mut tera = Tera::default();
    tera.add_raw_template("user_prompt", USER_PROMPT_TEMPLATE)
        .map_err(|e| Error::Internal(format!("Failed to parse template: {}", e)))?;

    let mut context = Context::new();
    context.insert("source", &document.location.to_string());
    context.insert("knowledge", knowledge);
    context.insert("truncation", &truncation);
    context.insert("issues", issues.trim());

    let user = tera
        .render("user_prompt", &context)
        .map_err(|e| Error::Internal(format!("Failed to render template: {}", e)))?;

    Ok(GroundedPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        truncation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeLocation;

    fn document(content: &str) -> KnowledgeDocument {
        KnowledgeDocument::new(KnowledgeLocation::new("kb", "rules.md"), content.to_string())
    }

    #[test]
    fn interpolates_knowledge_and_issue() {
        let prompt =
            build_grounded_prompt(&document("Rule 1: vacuum tables weekly."), "queries are slow", 1000)
                .unwrap();

        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt.system.contains("unknown"));
        assert!(prompt.user.contains("Rule 1: vacuum tables weekly."));
        assert!(prompt.user.contains("queries are slow"));
        assert!(prompt.user.contains("s3://kb/rules.md"));
        assert!(!prompt.user.contains("truncated"));
        assert_eq!(prompt.truncation, None);
    }

    #[test]
    fn is_deterministic() {
        let doc = document("Rule 1: vacuum tables weekly.");
        let a = build_grounded_prompt(&doc, "queries are slow", 1000).unwrap();
        let b = build_grounded_prompt(&doc, "queries are slow", 1000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn leaves_template_syntax_in_content_alone() {
        let prompt = build_grounded_prompt(&document("use {{ this }} {% literally %}"), "why?", 1000)
            .unwrap();
        assert!(prompt.user.contains("use {{ this }} {% literally %}"));
    }

    #[test]
    fn truncates_explicitly_on_char_boundary() {
        let content = "é".repeat(10);
        let prompt = build_grounded_prompt(&document(&content), "disk full", 4).unwrap();

        assert_eq!(
            prompt.truncation,
            Some(Truncation {
                kept_chars: 4,
                total_chars: 10
            })
        );
        assert!(prompt.user.contains(&"é".repeat(4)));
        assert!(!prompt.user.contains(&"é".repeat(5)));
        assert!(prompt.user.contains("truncated to its first 4 of 10 characters"));
    }

    #[test]
    fn exact_budget_is_not_truncated() {
        let (kept, truncation) = fit_to_budget("abcd", 4);
        assert_eq!(kept, "abcd");
        assert_eq!(truncation, None);
    }
}
