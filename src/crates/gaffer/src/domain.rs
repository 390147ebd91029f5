//! Keyword-based domain inference over the outcomes text.
//!
//! Used when the planner omits `domain` from its graph payload. Counts
//! word-boundary keyword matches for the software and content buckets; a
//! bucket that more than doubles the other wins, both-positive without
//! dominance is `mixed`, and no signal defaults to `software`.

use std::sync::OnceLock;

use gaffer_graph::Domain;
use regex::Regex;
use tracing::debug;

const SOFTWARE_KEYWORDS: [&str; 13] = [
    "git", "code", "test", "deploy", "api", "function", "class", "module", "build", "compile",
    "commit", "branch", "merge",
];

const CONTENT_KEYWORDS: [&str; 11] = [
    "write", "draft", "publish", "research", "report", "article", "document", "review", "edit",
    "commentary", "presentation",
];

fn bucket_pattern(keywords: &[&str]) -> Regex {
    Regex::new(&format!(r"(?i)\b(?:{})\b", keywords.join("|")))
        .expect("keyword pattern is valid")
}

fn software_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| bucket_pattern(&SOFTWARE_KEYWORDS))
}

fn content_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| bucket_pattern(&CONTENT_KEYWORDS))
}

/// Infer the project domain from outcomes text
pub fn infer_domain(outcomes_text: &str) -> Domain {
    let software = software_pattern().find_iter(outcomes_text).count();
    let content = content_pattern().find_iter(outcomes_text).count();
    debug!(software, content, "domain keyword counts");

    if software > content * 2 {
        Domain::Software
    } else if content > software * 2 {
        Domain::Content
    } else if software > 0 && content > 0 {
        Domain::Mixed
    } else {
        Domain::Software
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_dominant() {
        let text = "Build the API, write tests, merge each branch, deploy the module.";
        assert_eq!(infer_domain(text), Domain::Software);
    }

    #[test]
    fn test_content_dominant() {
        let text = "Research the market, draft an article, edit the report, publish a commentary.";
        assert_eq!(infer_domain(text), Domain::Content);
    }

    #[test]
    fn test_mixed_when_neither_dominates() {
        let text = "Write a report about the code and the API, then publish the document and merge.";
        assert_eq!(infer_domain(text), Domain::Mixed);
    }

    #[test]
    fn test_default_is_software() {
        assert_eq!(infer_domain("Make everything wonderful."), Domain::Software);
        assert_eq!(infer_domain(""), Domain::Software);
    }

    #[test]
    fn test_word_boundaries_respected() {
        // "encode" and "testing" must not count as "code"/"test".
        assert_eq!(infer_domain("encode retesting decoder"), Domain::Software);
        let text = "draft drafts redrafting";
        // only the bare "draft" matches
        assert_eq!(infer_domain(text), Domain::Content);
    }
}
