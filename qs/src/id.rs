//! Task ID helpers
//!
//! Task ids are uuid-v7 hex without dashes; branch names and commit
//! messages only ever use the first 8 characters.

/// Generate a new task id
pub fn generate_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

/// First 8 characters of an id (or the whole id if shorter)
pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}
