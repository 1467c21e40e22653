//! Declarative routing rules: predicate → action.

use serde::{Deserialize, Serialize};

use cb_domain::message::ChatKind;
use cb_domain::{Error, Result};

/// A closed set of text transforms a rule may apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum RuleTransform {
    /// Replace every regex match with the replacement string.
    ReplaceAll { pattern: String, replacement: String },
    Prepend { prefix: String },
    Append { suffix: String },
    Uppercase,
}

impl RuleTransform {
    /// Apply the transform.  An invalid pattern is an error so the router
    /// can skip the rule with a warning.
    pub fn apply(&self, text: &str) -> Result<String> {
        match self {
            Self::ReplaceAll {
                pattern,
                replacement,
            } => {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| Error::Validation(format!("bad transform pattern: {e}")))?;
                Ok(re.replace_all(text, replacement.as_str()).into_owned())
            }
            Self::Prepend { prefix } => Ok(format!("{prefix}{text}")),
            Self::Append { suffix } => Ok(format!("{text}{suffix}")),
            Self::Uppercase => Ok(text.to_uppercase()),
        }
    }
}

/// A routing rule.  Rules live in a global list ordered by descending
/// priority; insertion order breaks ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,

    /// Regex on the chat ID (anchored match from the start).
    #[serde(default)]
    pub chat_pattern: Option<String>,
    /// Empty = any chat kind.
    #[serde(default)]
    pub chat_kinds: Vec<ChatKind>,
    /// Regex searched in the message text.
    #[serde(default)]
    pub message_pattern: Option<String>,
    /// Regex on the leading command (anchored match from the start).
    #[serde(default)]
    pub command_pattern: Option<String>,

    /// Override the target agent (last matched writer wins).
    #[serde(default)]
    pub target_agent: Option<String>,
    /// Extend the forward list.
    #[serde(default)]
    pub forward_to: Vec<String>,
    #[serde(default)]
    pub transform: Option<RuleTransform>,
    /// Hard block: routing short-circuits on the first matched block rule.
    #[serde(default)]
    pub block: bool,
}

impl RouteRule {
    pub fn named(name: &str, priority: i32) -> Self {
        Self {
            name: name.to_owned(),
            priority,
            chat_pattern: None,
            chat_kinds: Vec::new(),
            message_pattern: None,
            command_pattern: None,
            target_agent: None,
            forward_to: Vec::new(),
            transform: None,
            block: false,
        }
    }

    /// Check whether this rule matches.  A predicate with an invalid regex
    /// never matches.
    pub fn matches(
        &self,
        chat_id: &str,
        chat_kind: ChatKind,
        message: &str,
        command: Option<&str>,
    ) -> bool {
        if let Some(pattern) = &self.chat_pattern {
            match regex::Regex::new(pattern) {
                Ok(re) if re.find(chat_id).is_some_and(|m| m.start() == 0) => {}
                _ => return false,
            }
        }

        if !self.chat_kinds.is_empty() && !self.chat_kinds.contains(&chat_kind) {
            return false;
        }

        if let Some(pattern) = &self.message_pattern {
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(message) => {}
                _ => return false,
            }
        }

        if let Some(pattern) = &self.command_pattern {
            let Some(cmd) = command else { return false };
            match regex::Regex::new(pattern) {
                Ok(re) if re.find(cmd).is_some_and(|m| m.start() == 0) => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rule_matches_everything() {
        let rule = RouteRule::named("all", 0);
        assert!(rule.matches("any-chat", ChatKind::Direct, "hello", None));
    }

    #[test]
    fn chat_pattern_is_anchored() {
        let mut rule = RouteRule::named("tg", 0);
        rule.chat_pattern = Some("tg-".into());
        assert!(rule.matches("tg-123", ChatKind::Group, "", None));
        assert!(!rule.matches("other-tg-123", ChatKind::Group, "", None));
    }

    #[test]
    fn kind_filter() {
        let mut rule = RouteRule::named("groups", 0);
        rule.chat_kinds = vec![ChatKind::Group, ChatKind::Thread];
        assert!(rule.matches("c", ChatKind::Group, "", None));
        assert!(!rule.matches("c", ChatKind::Direct, "", None));
    }

    #[test]
    fn command_pattern_requires_a_command() {
        let mut rule = RouteRule::named("echo", 0);
        rule.command_pattern = Some("/echo".into());
        assert!(rule.matches("c", ChatKind::Direct, "/echo hi", Some("/echo")));
        assert!(!rule.matches("c", ChatKind::Direct, "plain", None));
    }

    #[test]
    fn invalid_regex_never_matches() {
        let mut rule = RouteRule::named("broken", 0);
        rule.message_pattern = Some("(unclosed".into());
        assert!(!rule.matches("c", ChatKind::Direct, "anything", None));
    }

    #[test]
    fn transforms_apply() {
        let t = RuleTransform::ReplaceAll {
            pattern: "hello".into(),
            replacement: "HELLO".into(),
        };
        assert_eq!(t.apply("/echo hello").unwrap(), "/echo HELLO");

        assert_eq!(
            RuleTransform::Prepend { prefix: ">> ".into() }.apply("x").unwrap(),
            ">> x"
        );
        assert_eq!(RuleTransform::Uppercase.apply("abc").unwrap(), "ABC");
    }

    #[test]
    fn bad_transform_pattern_errors() {
        let t = RuleTransform::ReplaceAll {
            pattern: "(".into(),
            replacement: "".into(),
        };
        assert!(t.apply("x").is_err());
    }
}
