//! Channel name patterns.
//!
//! A pattern is either static (`lobby`), matching only that exact topic, or
//! a single trailing wildcard (`room:*`), matching any topic that starts with
//! `room:` and has a non-empty remainder. The full topic name stays the key
//! everywhere; the remainder is only reported back as the captured suffix.

use std::fmt;

/// Reserved wildcard suffix.
pub const WILDCARD_SUFFIX: &str = ":*";

/// Rejected pattern strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// The pattern is empty.
    #[error("pattern must not be empty")]
    Empty,
    /// A wildcard pattern with nothing before `:*`.
    #[error("wildcard pattern {0:?} needs a non-empty prefix")]
    EmptyPrefix(String),
    /// `*` somewhere other than the trailing `:*`.
    #[error("pattern {0:?} may only use '*' as a trailing \":*\"")]
    MisplacedWildcard(String),
}

/// A parsed channel pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Matches exactly one topic.
    Static(String),
    /// Matches `prefix` followed by a non-empty remainder. `prefix` keeps its
    /// trailing `:`.
    Wildcard {
        /// Literal prefix including the separator.
        prefix: String,
    },
}

/// Outcome of matching a topic against a pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Match<'a> {
    /// The topic is not covered by the pattern.
    Unmatched,
    /// The topic is covered. Wildcard matches capture the remainder.
    Matched {
        /// Dynamic portion after the prefix; `None` for static patterns.
        suffix: Option<&'a str>,
    },
}

impl Match<'_> {
    /// Whether the topic matched.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

impl Pattern {
    /// Parse a pattern string.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        if let Some(head) = raw.strip_suffix(WILDCARD_SUFFIX) {
            if head.is_empty() {
                return Err(PatternError::EmptyPrefix(raw.to_owned()));
            }
            if head.contains('*') {
                return Err(PatternError::MisplacedWildcard(raw.to_owned()));
            }
            return Ok(Self::Wildcard {
                prefix: format!("{head}:"),
            });
        }
        if raw.contains('*') {
            return Err(PatternError::MisplacedWildcard(raw.to_owned()));
        }
        Ok(Self::Static(raw.to_owned()))
    }

    /// Match `topic` against this pattern.
    pub fn matches<'a>(&self, topic: &'a str) -> Match<'a> {
        match self {
            Self::Static(name) if name == topic => Match::Matched { suffix: None },
            Self::Static(_) => Match::Unmatched,
            Self::Wildcard { prefix } => match topic.strip_prefix(prefix.as_str()) {
                Some(rest) if !rest.is_empty() => Match::Matched { suffix: Some(rest) },
                _ => Match::Unmatched,
            },
        }
    }

    /// Whether some topic could match both patterns.
    pub fn overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Static(a), Self::Static(b)) => a == b,
            (Self::Static(name), wildcard @ Self::Wildcard { .. })
            | (wildcard @ Self::Wildcard { .. }, Self::Static(name)) => {
                wildcard.matches(name).is_match()
            }
            (Self::Wildcard { prefix: a }, Self::Wildcard { prefix: b }) => {
                a.starts_with(b.as_str()) || b.starts_with(a.as_str())
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(name) => f.write_str(name),
            Self::Wildcard { prefix } => write!(f, "{prefix}*"),
        }
    }
}

impl std::str::FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn p(s: &str) -> Pattern {
        Pattern::parse(s).unwrap()
    }

    #[test]
    fn parse_static_and_wildcard() {
        assert_eq!(p("lobby"), Pattern::Static("lobby".into()));
        assert_eq!(
            p("room:*"),
            Pattern::Wildcard {
                prefix: "room:".into()
            }
        );
        assert_eq!(p("a:b:*").to_string(), "a:b:*");
        assert_eq!(p("chat").to_string(), "chat");
    }

    #[test]
    fn parse_rejects_bad_patterns() {
        assert_matches!(Pattern::parse(""), Err(PatternError::Empty));
        assert_matches!(Pattern::parse(":*"), Err(PatternError::EmptyPrefix(_)));
        assert_matches!(Pattern::parse("*"), Err(PatternError::MisplacedWildcard(_)));
        assert_matches!(
            Pattern::parse("room*"),
            Err(PatternError::MisplacedWildcard(_))
        );
        assert_matches!(
            Pattern::parse("a:*:b"),
            Err(PatternError::MisplacedWildcard(_))
        );
        assert_matches!(
            Pattern::parse("a*:*"),
            Err(PatternError::MisplacedWildcard(_))
        );
    }

    #[test]
    fn static_matches_exactly() {
        let pattern = p("chat");
        assert_eq!(pattern.matches("chat"), Match::Matched { suffix: None });
        assert_eq!(pattern.matches("chat:1"), Match::Unmatched);
        assert_eq!(pattern.matches("cha"), Match::Unmatched);
    }

    #[test]
    fn wildcard_captures_suffix() {
        let pattern = p("room:*");
        assert_eq!(
            pattern.matches("room:lobby"),
            Match::Matched {
                suffix: Some("lobby")
            }
        );
        assert_eq!(
            pattern.matches("room:a:b"),
            Match::Matched {
                suffix: Some("a:b")
            }
        );
    }

    #[test]
    fn wildcard_needs_non_empty_remainder() {
        let pattern = p("room:*");
        assert_eq!(pattern.matches("room:"), Match::Unmatched);
        assert_eq!(pattern.matches("room"), Match::Unmatched);
        assert_eq!(pattern.matches("rooms:1"), Match::Unmatched);
    }

    #[test]
    fn overlap_rules() {
        assert!(p("chat").overlaps(&p("chat")));
        assert!(!p("chat").overlaps(&p("chats")));

        assert!(p("room:1").overlaps(&p("room:*")));
        assert!(p("room:*").overlaps(&p("room:1")));
        assert!(!p("room").overlaps(&p("room:*")));

        assert!(p("a:*").overlaps(&p("a:b:*")));
        assert!(p("a:b:*").overlaps(&p("a:*")));
        assert!(p("a:*").overlaps(&p("a:*")));
        assert!(!p("a:*").overlaps(&p("ab:*")));
    }

    proptest! {
        #[test]
        fn any_suffix_matches_wildcard(prefix in "[a-z]{1,8}", suffix in "[a-z0-9:_-]{1,16}") {
            let pattern = Pattern::parse(&format!("{prefix}:*")).unwrap();
            let topic = format!("{prefix}:{suffix}");
            prop_assert_eq!(pattern.matches(&topic), Match::Matched { suffix: Some(suffix.as_str()) });
        }

        #[test]
        fn bare_prefix_never_matches_wildcard(prefix in "[a-z]{1,8}") {
            let pattern = Pattern::parse(&format!("{prefix}:*")).unwrap();
            prop_assert!(!pattern.matches(&prefix).is_match());
            let with_separator = format!("{prefix}:");
            prop_assert!(!pattern.matches(&with_separator).is_match());
        }

        #[test]
        fn overlap_is_symmetric(a in "[a-c]{1,3}(:[a-c]{1,2})?(:\\*)?", b in "[a-c]{1,3}(:[a-c]{1,2})?(:\\*)?") {
            let (a, b) = (Pattern::parse(&a).unwrap(), Pattern::parse(&b).unwrap());
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }
    }
}
