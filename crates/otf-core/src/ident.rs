//! Reader identity and topic-name helpers.

use std::sync::LazyLock;

use uuid::Uuid;

/// Alphanumeric tokens separated by single or repeated dots, never leading
/// or trailing.
static TOPIC_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // Literal pattern, checked by tests
    regex::Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.]*[A-Za-z0-9])?$").expect("valid topic regex")
});

/// Prefix used for generated reader names.
pub const GENERATED_NAME_PREFIX: &str = "otf-reader";

/// Returns `true` if `topic` is a valid broker topic name.
///
/// # Examples
///
/// ```
/// use otf_core::is_valid_topic;
///
/// assert!(is_valid_topic("otf.raw.csv"));
/// assert!(is_valid_topic("t1"));
/// assert!(!is_valid_topic(".leading"));
/// assert!(!is_valid_topic("has space"));
/// ```
#[must_use]
pub fn is_valid_topic(topic: &str) -> bool {
    TOPIC_REGEX.is_match(topic)
}

/// Generates a unique reader id.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generates a short, human-friendly reader name such as `otf-reader-1a2b3c4d`.
#[must_use]
pub fn generate_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{GENERATED_NAME_PREFIX}-{}", &id[..8])
}
