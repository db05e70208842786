use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the handler a task is routed to, e.g. `email:welcome`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank task types cannot be routed to a handler.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Default lane for tasks enqueued without an explicit queue.
pub const DEFAULT_QUEUE: &str = "default";

/// Queue names are non-empty and free of whitespace.
pub fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("email:welcome", true)]
    #[case("", false)]
    #[case("   ", false)]
    fn task_type_validity(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(TaskType::new(raw).is_valid(), valid);
    }

    #[rstest]
    #[case("critical", true)]
    #[case("low-priority", true)]
    #[case("", false)]
    #[case("two words", false)]
    fn queue_name_validity(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(is_valid_queue_name(raw), valid);
    }
}
