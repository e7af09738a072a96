//! Unique names for per-run cloud resources.

use rand::Rng;

/// Length of the random suffix appended to generated names.
pub const SUFFIX_LEN: usize = 10;

/// Longest stack name the provider accepts.
pub const MAX_STACK_NAME_LEN: usize = 128;

/// A random lowercase suffix, unique enough to keep concurrent runs apart.
pub fn generate_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect()
}

/// Stack name for a test case: `<prefix><case><suffix>`.
///
/// Underscores in the case name become hyphens; other characters a stack name cannot
/// hold are dropped. The case part is cut short so the whole name fits in
/// [`MAX_STACK_NAME_LEN`].
pub fn stack_name(prefix: &str, case_name: &str, suffix: &str) -> String {
    let room = MAX_STACK_NAME_LEN.saturating_sub(prefix.len() + suffix.len());
    let case: String = case_name
        .chars()
        .map(|c| if c == '_' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(room)
        .collect();
    format!("{prefix}{case}{suffix}")
}

/// Staging bucket name: `<prefix><suffix>`, lowercased.
pub fn bucket_name(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{suffix}").to_ascii_lowercase()
}
