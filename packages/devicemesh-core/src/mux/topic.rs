//! Topic and topic-filter handling.
//!
//! Topics are `/`-separated levels. Filters use the MQTT wildcard grammar:
//!
//! - `+` matches exactly one level
//! - `#` matches every remaining level (including none) and must be the last level
//!
//! Both wildcards must occupy a whole level. A filter that starts with a
//! wildcard never matches a topic whose first level starts with `$`, which keeps
//! broker-internal topics out of catch-all subscriptions.

use thiserror::Error;

/// Level separator for topics and filters.
pub const LEVEL_SEPARATOR: char = '/';

const SINGLE_LEVEL_WILDCARD: &str = "+";
const MULTI_LEVEL_WILDCARD: &str = "#";

/// Errors for malformed topics and filters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Topic or filter is the empty string.
    #[error("topic must not be empty")]
    Empty,

    /// A publish topic contains `+` or `#`.
    #[error("wildcards are not allowed in a publish topic: {0}")]
    WildcardInTopic(String),

    /// `#` appears somewhere other than the last level.
    #[error("'#' must be the last level of a filter: {0}")]
    MultiLevelNotLast(String),

    /// A wildcard shares its level with other characters (e.g. `foo+`).
    #[error("wildcard must occupy a whole level: {0}")]
    PartialWildcard(String),

    /// A name used as one topic level contains `/` or a wildcard, or is empty.
    #[error("not a valid single topic level: '{0}'")]
    InvalidLevel(String),
}

/// Convenient Result alias for topic validation.
pub type TopicResult<T> = Result<T, TopicError>;

/// Validates a concrete topic used for publishing.
pub fn validate_topic(topic: &str) -> TopicResult<()> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}

/// Validates a name that is embedded as exactly one topic level.
pub fn validate_level(level: &str) -> TopicResult<()> {
    if level.is_empty() || level.contains([LEVEL_SEPARATOR, '+', '#']) {
        return Err(TopicError::InvalidLevel(level.to_string()));
    }
    Ok(())
}

/// Validates a subscribe filter.
pub fn validate_filter(filter: &str) -> TopicResult<()> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }

    let mut levels = filter.split(LEVEL_SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        match level {
            MULTI_LEVEL_WILDCARD if levels.peek().is_some() => {
                return Err(TopicError::MultiLevelNotLast(filter.to_string()));
            }
            MULTI_LEVEL_WILDCARD | SINGLE_LEVEL_WILDCARD => {}
            other if other.contains(['+', '#']) => {
                return Err(TopicError::PartialWildcard(filter.to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Returns whether `topic` is matched by `filter`.
///
/// Assumes both inputs are valid; an invalid filter simply fails to match
/// where its malformed level is compared.
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$')
        && (filter.starts_with(MULTI_LEVEL_WILDCARD) || filter.starts_with(SINGLE_LEVEL_WILDCARD))
    {
        return false;
    }

    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_reject_separators_and_wildcards() {
        assert!(validate_level("kitchen-light").is_ok());
        for bad in ["", "a/b", "temp+", "#"] {
            assert_eq!(validate_level(bad), Err(TopicError::InvalidLevel(bad.into())));
        }
    }

    #[test]
    fn exact_filter_only_matches_same_topic() {
        assert!(matches("foo/bar", "foo/bar"));
        assert!(!matches("foo/bar", "foo/bar/baz"));
        assert!(!matches("foo/bar", "foo"));
        assert!(!matches("foo/bar", "foo/baz"));
    }

    #[test]
    fn single_level_wildcard_matches_one_level() {
        assert!(matches("foo/+", "foo/x"));
        assert!(matches("foo/+", "foo/y"));
        assert!(!matches("foo/+", "foo/x/y"));
        assert!(!matches("foo/+", "foo"));
        assert!(matches("foo/+/baz", "foo/bar/baz"));
        assert!(matches("+/+", "a/"));
    }

    #[test]
    fn multi_level_wildcard_matches_remainder() {
        assert!(matches("foo/#", "foo/x"));
        assert!(matches("foo/#", "foo/x/y"));
        assert!(matches("foo/#", "foo"));
        assert!(!matches("foo/#", "bar/x"));
        assert!(matches("#", "anything/at/all"));
    }

    #[test]
    fn leading_wildcard_skips_dollar_topics() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn filter_validation() {
        assert!(validate_filter("foo/+/bar").is_ok());
        assert!(validate_filter("foo/#").is_ok());
        assert!(validate_filter("#").is_ok());
        assert_eq!(validate_filter(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_filter("foo/#/bar"),
            Err(TopicError::MultiLevelNotLast(_))
        ));
        assert!(matches!(
            validate_filter("foo/ba+"),
            Err(TopicError::PartialWildcard(_))
        ));
    }

    #[test]
    fn topic_validation_rejects_wildcards() {
        assert!(validate_topic("ns/device/kitchen").is_ok());
        assert!(matches!(
            validate_topic("ns/device/+"),
            Err(TopicError::WildcardInTopic(_))
        ));
        assert_eq!(validate_topic(""), Err(TopicError::Empty));
    }
}
