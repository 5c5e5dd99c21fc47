//! Text matching for action patterns.
//!
//! Matching is loose: case-insensitive substrings, keywords
//! with simple English inflections, and built-in vocabularies for the
//! semantic [`ActionCategory`] set. Patterns are configuration, so this
//! module only guarantees that the same input always gives the same answer.

use conclave_types::action::ActionCategory;
use conclave_types::role_card::ActionPattern;
use regex::{Regex, RegexBuilder};

/// Suffixes accepted after a keyword ("post" matches "posts", "posting").
const SUFFIXES: &[&str] = &["s", "es", "ed", "d", "ing", "er"];

// ---------------------------------------------------------------------------
// Category vocabularies
// ---------------------------------------------------------------------------

/// Terms that place a text in a category. Single words match inflected
/// forms; entries containing spaces or punctuation match as substrings.
pub fn category_vocabulary(category: ActionCategory) -> &'static [&'static str] {
    match category {
        ActionCategory::ExternalPublish => &[
            "post",
            "publish",
            "tweet",
            "retweet",
            "broadcast",
            "announce",
            "upload",
            "go live",
            "press release",
        ],
        ActionCategory::ExternalCommunication => &[
            "email",
            "e-mail",
            "dm",
            "direct message",
            "sms",
            "reach out",
            "outreach",
            "newsletter",
            "contact the customer",
            "contact the client",
        ],
        ActionCategory::Financial => &[
            "pay",
            "payment",
            "purchase",
            "buy",
            "refund",
            "invoice",
            "spend",
            "wire transfer",
            "transfer funds",
            "credit card",
        ],
        ActionCategory::Destructive => &[
            "delete",
            "wipe",
            "purge",
            "destroy",
            "truncate",
            "erase",
            "drop table",
            "drop database",
            "rm -rf",
            "force push",
            "force-push",
        ],
        ActionCategory::Deployment => &[
            "deploy",
            "release",
            "rollout",
            "roll out",
            "to production",
            "to prod",
            "merge to main",
            "merge into main",
        ],
        ActionCategory::CredentialAccess => &[
            "password",
            "passwd",
            "credential",
            "secret",
            "api key",
            "api token",
            "access token",
            "private key",
            "ssh key",
            ".env",
        ],
    }
}

// ---------------------------------------------------------------------------
// Normalized text
// ---------------------------------------------------------------------------

/// A lowercased text with its word tokens, computed once per check.
#[derive(Debug, Clone)]
pub struct MatchText {
    lower: String,
    words: Vec<String>,
}

impl MatchText {
    pub fn new(text: &str) -> Self {
        // Collapse whitespace so multi-word phrases match across line breaks.
        let lower = text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let words = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self { lower, words }
    }

    pub fn as_str(&self) -> &str {
        &self.lower
    }

    pub fn contains_phrase(&self, phrase: &str) -> bool {
        let phrase = phrase.trim().to_lowercase();
        !phrase.is_empty() && self.lower.contains(&phrase)
    }

    /// Whether some word is `keyword` or a simple inflection of it.
    pub fn contains_word(&self, keyword: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return false;
        }
        self.words.iter().any(|w| is_word_form(w, &keyword))
    }

    /// Vocabulary terms: words by inflection, everything else by substring.
    fn contains_term(&self, term: &str) -> bool {
        if term.chars().all(char::is_alphanumeric) {
            self.contains_word(term)
        } else {
            self.contains_phrase(term)
        }
    }

    pub fn has_category(&self, category: ActionCategory) -> bool {
        category_vocabulary(category)
            .iter()
            .any(|term| self.contains_term(term))
    }

    /// Every category whose vocabulary occurs in the text.
    pub fn categories(&self) -> Vec<ActionCategory> {
        ActionCategory::ALL
            .into_iter()
            .filter(|c| self.has_category(*c))
            .collect()
    }
}

fn is_word_form(word: &str, keyword: &str) -> bool {
    if word == keyword {
        return true;
    }
    let Some(rest) = word.strip_prefix(keyword) else {
        // "release" -> "releasing", "purchase" -> "purchased"
        return keyword
            .strip_suffix('e')
            .and_then(|stem| word.strip_prefix(stem))
            .is_some_and(|rest| rest == "ing" || rest == "ed");
    };
    if SUFFIXES.contains(&rest) {
        return true;
    }
    // Doubled final consonant: "ship" -> "shipping", "drop" -> "dropped".
    let mut chars = rest.chars();
    match (chars.next(), keyword.chars().last()) {
        (Some(doubled), Some(last)) if doubled == last => SUFFIXES.contains(&chars.as_str()),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// Compile a pattern's regex, if it has one.
pub fn compile_regex(pattern: &ActionPattern) -> Result<Option<Regex>, regex::Error> {
    pattern
        .regex
        .as_deref()
        .map(|src| RegexBuilder::new(src).case_insensitive(true).build())
        .transpose()
}

/// Evaluate a pattern against a text plus categories declared by the caller.
///
/// An uncompilable regex counts as "no match" for that clause; role-card
/// saves reject such patterns, so this only happens for hand-edited stores.
pub fn pattern_matches(
    pattern: &ActionPattern,
    text: &MatchText,
    declared: &[ActionCategory],
) -> bool {
    if pattern.unless.iter().any(|u| text.contains_phrase(u)) {
        return false;
    }

    if pattern.phrases.iter().any(|p| text.contains_phrase(p)) {
        return true;
    }

    if !pattern.keywords.is_empty() && pattern.keywords.iter().all(|k| text.contains_word(k)) {
        return true;
    }

    if pattern
        .categories
        .iter()
        .any(|c| declared.contains(c) || text.has_category(*c))
    {
        return true;
    }

    match compile_regex(pattern) {
        Ok(Some(re)) => re.is_match(text.as_str()),
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring invalid regex in action pattern");
            false
        }
    }
}

/// Check a pattern is usable: it needs a positive clause and a valid regex.
pub fn validate_pattern(pattern: &ActionPattern) -> Result<(), String> {
    if !pattern.has_positive_clause() {
        return Err("pattern needs at least one phrase, keyword, category or regex".to_string());
    }
    if pattern
        .phrases
        .iter()
        .chain(pattern.keywords.iter())
        .any(|s| s.trim().is_empty())
    {
        return Err("pattern contains a blank phrase or keyword".to_string());
    }
    compile_regex(pattern).map_err(|e| format!("invalid regex: {e}"))?;
    Ok(())
}
