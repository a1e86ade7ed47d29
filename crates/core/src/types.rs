//! Shared primitive types.

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new entity id.
///
/// UUIDv7 keeps ids roughly time-ordered, which makes log output and
/// database listings easier to follow.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
