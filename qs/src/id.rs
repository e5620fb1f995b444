//! Task and group ID generation
//!
//! IDs use the format `{20-char-hex}-{kind}-{slug}`. The hex prefix is
//! the leading 80 bits of a UUIDv7: the millisecond timestamp up front
//! keeps lexicographic order tracking creation order, and the random bits
//! behind it keep ids minted within the same millisecond distinct.

/// Generate an ID from a kind tag and a human-readable seed
pub fn generate_id(kind: &str, seed: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex = uuid.simple().to_string();
    format!("{}-{}-{}", &hex[..20], kind, slugify(seed))
}

/// Slugify a seed string for use in IDs
fn slugify(seed: &str) -> String {
    let slug: String = seed
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    slug.chars().take(40).collect()
}
