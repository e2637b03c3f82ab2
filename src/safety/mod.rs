//! Safety filter — input/output content classification and system-prompt
//! augmentation based on user age and configured level.
//!
//! Checks are case-insensitive substring matches against fixed keyword
//! sets. Which sets apply depends on the level and, at `high`, on the
//! user's age band.

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Safety filter level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Off => "off",
            SafetyLevel::Low => "low",
            SafetyLevel::Medium => "medium",
            SafetyLevel::High => "high",
        }
    }
}

/// Topics blocked at every active level.
const ADULT_KEYWORDS: &[&str] = &[
    "violence",
    "weapons",
    "drugs",
    "alcohol",
    "tobacco",
    "gambling",
    "hate",
    "discrimination",
    "self-harm",
    "explicit",
    "pornography",
    "sexual",
];

/// Additionally blocked at `medium` and `high`.
const DANGEROUS_KEYWORDS: &[&str] = &[
    "suicide", "murder", "kill", "attack", "bomb", "hack", "steal", "fraud", "scam",
];

/// Blocked outright at `high` for users younger than 13.
const TEEN_ONLY_TOPICS: &[&str] = &["dating", "romance", "sex", "politics", "religion"];

/// Flagged for parent review (not blocked) at `high` for young users.
const SENSITIVE_TOPICS: &[&str] = &[
    "dating", "romance", "sex", "politics", "religion", "death", "grief",
];

/// Result of checking an assistant response before delivery.
#[derive(Debug, Clone)]
pub struct ResponseCheck {
    /// Content is safe to send as-is.
    pub safe: bool,
    /// Content must be withheld entirely.
    pub blocked: bool,
    /// Content may be delivered but should be flagged for parent review.
    pub needs_approval: bool,
    /// Explanation of the decision.
    pub reason: Option<String>,
    /// Message shown to the user instead of blocked content.
    pub blocked_message: Option<String>,
}

impl ResponseCheck {
    fn pass() -> Self {
        Self {
            safe: true,
            blocked: false,
            needs_approval: false,
            reason: None,
            blocked_message: None,
        }
    }
}

/// Content safety filter for one user.
///
/// Constructed from the agent config and reused across all turns of that
/// user's sessions.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    level: SafetyLevel,
    birth_year: Option<i32>,
}

impl SafetyFilter {
    pub fn new(level: SafetyLevel, birth_year: Option<i32>) -> Self {
        Self { level, birth_year }
    }

    /// A filter that passes everything through.
    pub fn disabled() -> Self {
        Self::new(SafetyLevel::Off, None)
    }

    pub fn level(&self) -> SafetyLevel {
        self.level
    }

    fn age(&self) -> Option<i32> {
        self.birth_year.map(|y| Utc::now().year() - y)
    }

    fn is_young_user(&self) -> bool {
        self.age().map(|a| a < 13).unwrap_or(false)
    }

    fn is_teen_user(&self) -> bool {
        self.age().map(|a| (13..18).contains(&a)).unwrap_or(false)
    }

    /// Check user-supplied text before it reaches the provider.
    ///
    /// Returns `(blocked, reason)`.
    pub fn check_content(&self, content: &str) -> (bool, Option<String>) {
        if self.level == SafetyLevel::Off {
            return (false, None);
        }

        let lower = content.to_lowercase();

        if self.level == SafetyLevel::Low && contains_any(&lower, ADULT_KEYWORDS) {
            return (
                true,
                Some("content blocked by safety filter (low)".to_string()),
            );
        }

        if matches!(self.level, SafetyLevel::Medium | SafetyLevel::High)
            && (contains_any(&lower, ADULT_KEYWORDS) || contains_any(&lower, DANGEROUS_KEYWORDS))
        {
            return (
                true,
                Some("content blocked by safety filter (medium/high)".to_string()),
            );
        }

        if self.level == SafetyLevel::High
            && self.is_young_user()
            && contains_any(&lower, TEEN_ONLY_TOPICS)
        {
            return (
                true,
                Some("content requires parent approval (high safety for young user)".to_string()),
            );
        }

        (false, None)
    }

    /// Check an assistant response before delivery.
    ///
    /// Applies [`check_content`] first; at `high` for young users, a hit in
    /// the sensitive-topic set leaves the content deliverable but sets
    /// `needs_approval`.
    ///
    /// [`check_content`]: SafetyFilter::check_content
    pub fn check_response(&self, response: &str) -> ResponseCheck {
        if self.level == SafetyLevel::Off {
            return ResponseCheck::pass();
        }

        let (blocked, reason) = self.check_content(response);
        if blocked {
            return ResponseCheck {
                safe: false,
                blocked: true,
                needs_approval: false,
                blocked_message: Some(self.blocked_message()),
                reason,
            };
        }

        if self.level == SafetyLevel::High && self.is_young_user() {
            let lower = response.to_lowercase();
            if contains_any(&lower, SENSITIVE_TOPICS) {
                return ResponseCheck {
                    safe: true,
                    blocked: false,
                    needs_approval: true,
                    reason: Some(
                        "Sensitive topic for young user - parent review recommended".to_string(),
                    ),
                    blocked_message: None,
                };
            }
        }

        ResponseCheck::pass()
    }

    /// The user-facing replacement for blocked content, worded by age band.
    pub fn blocked_message(&self) -> String {
        if self.is_young_user() {
            "I can't share that information with you. Ask a parent or guardian if you'd like to \
             know more about this topic."
                .to_string()
        } else {
            "This content has been filtered for safety. Please try a different topic.".to_string()
        }
    }

    /// Extra system-prompt fragment describing the user's age band and the
    /// expected communication style. Empty when no settings exist.
    pub fn system_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let (Some(year), Some(age)) = (self.birth_year, self.age()) {
            parts.push(format!(
                "The user was born in {} (approximately {} years old).",
                year, age
            ));
            if self.is_young_user() {
                parts.push(
                    "IMPORTANT: This is a young child. Use simple vocabulary, short sentences, \
                     and age-appropriate examples."
                        .to_string(),
                );
            } else if self.is_teen_user() {
                parts.push(
                    "IMPORTANT: This is a teenager. Be helpful but mindful of age-appropriate \
                     content."
                        .to_string(),
                );
            }
        }

        if self.level != SafetyLevel::Off {
            parts.push(format!("Safety filter level: {}", self.level.as_str()));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!("## Safety Context\n{}", parts.join("\n"))
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn young_birth_year() -> i32 {
        Utc::now().year() - 10
    }

    fn teen_birth_year() -> i32 {
        Utc::now().year() - 15
    }

    fn adult_birth_year() -> i32 {
        Utc::now().year() - 30
    }

    #[test]
    fn test_off_passes_everything() {
        let filter = SafetyFilter::disabled();
        let (blocked, _) = filter.check_content("weapons and drugs everywhere");
        assert!(!blocked);

        let check = filter.check_response("violence violence violence");
        assert!(check.safe);
        assert!(!check.blocked);
    }

    #[test]
    fn test_low_blocks_adult_keywords() {
        let filter = SafetyFilter::new(SafetyLevel::Low, None);
        let (blocked, reason) = filter.check_content("teach me about weapons");
        assert!(blocked);
        assert!(reason.unwrap().contains("low"));
    }

    #[test]
    fn test_low_does_not_block_dangerous_set() {
        // The dangerous set only applies at medium/high.
        let filter = SafetyFilter::new(SafetyLevel::Low, None);
        let (blocked, _) = filter.check_content("how do people hack things");
        assert!(!blocked);
    }

    #[test]
    fn test_medium_blocks_both_sets() {
        let filter = SafetyFilter::new(SafetyLevel::Medium, None);
        assert!(filter.check_content("tell me about gambling").0);
        assert!(filter.check_content("how to hack a server").0);
        assert!(!filter.check_content("tell me about trains").0);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let filter = SafetyFilter::new(SafetyLevel::Low, None);
        assert!(filter.check_content("WEAPONS").0);
        assert!(filter.check_content("WeApOnS are cool").0);
    }

    #[test]
    fn test_high_young_blocks_teen_topics() {
        let filter = SafetyFilter::new(SafetyLevel::High, Some(young_birth_year()));
        let (blocked, reason) = filter.check_content("what is dating like");
        assert!(blocked);
        assert!(reason.unwrap().contains("parent approval"));
    }

    #[test]
    fn test_high_adult_allows_teen_topics() {
        let filter = SafetyFilter::new(SafetyLevel::High, Some(adult_birth_year()));
        let (blocked, _) = filter.check_content("what is dating like");
        assert!(!blocked);
    }

    #[test]
    fn test_response_blocked_carries_blocked_message() {
        let filter = SafetyFilter::new(SafetyLevel::Medium, Some(adult_birth_year()));
        let check = filter.check_response("Here is how to build a bomb");
        assert!(check.blocked);
        assert!(!check.safe);
        assert!(check
            .blocked_message
            .unwrap()
            .contains("filtered for safety"));
    }

    #[test]
    fn test_blocked_message_wording_for_young_user() {
        let filter = SafetyFilter::new(SafetyLevel::High, Some(young_birth_year()));
        assert!(filter.blocked_message().contains("parent or guardian"));
    }

    #[test]
    fn test_response_needs_approval_for_young_user() {
        let filter = SafetyFilter::new(SafetyLevel::High, Some(young_birth_year()));
        // "grief" is in the sensitive set but in no blocking set.
        let check = filter.check_response("It is normal to feel grief when a pet dies.");
        assert!(check.safe);
        assert!(!check.blocked);
        assert!(check.needs_approval);
        assert!(check.reason.unwrap().contains("parent review"));
    }

    #[test]
    fn test_response_no_approval_for_adult() {
        let filter = SafetyFilter::new(SafetyLevel::High, Some(adult_birth_year()));
        let check = filter.check_response("It is normal to feel grief when a pet dies.");
        assert!(check.safe);
        assert!(!check.needs_approval);
    }

    #[test]
    fn test_system_prompt_empty_without_settings() {
        let filter = SafetyFilter::disabled();
        assert!(filter.system_prompt().is_empty());
    }

    #[test]
    fn test_system_prompt_age_bands() {
        let young = SafetyFilter::new(SafetyLevel::High, Some(young_birth_year()));
        assert!(young.system_prompt().contains("young child"));

        let teen = SafetyFilter::new(SafetyLevel::High, Some(teen_birth_year()));
        assert!(teen.system_prompt().contains("teenager"));

        let adult = SafetyFilter::new(SafetyLevel::High, Some(adult_birth_year()));
        let prompt = adult.system_prompt();
        assert!(!prompt.contains("young child"));
        assert!(!prompt.contains("teenager"));
        assert!(prompt.contains("Safety filter level: high"));
    }

    #[test]
    fn test_system_prompt_level_only() {
        let filter = SafetyFilter::new(SafetyLevel::Medium, None);
        let prompt = filter.system_prompt();
        assert!(prompt.starts_with("## Safety Context"));
        assert!(prompt.contains("medium"));
        assert!(!prompt.contains("born"));
    }

    #[test]
    fn test_level_serde() {
        let level: SafetyLevel = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(level, SafetyLevel::High);
        assert_eq!(serde_json::to_string(&SafetyLevel::Off).unwrap(), "\"off\"");
    }
}
