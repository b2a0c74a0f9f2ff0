//! ID generation utilities.

use ulid::Ulid;

/// ID generator for action log entries and synthetic events.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs are lexicographically sortable, so action log entries
    /// ordered by id are also ordered by creation time.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Build a de-duplication key for an event delivered by a transport.
    ///
    /// Transports number their updates independently, so the source name
    /// is part of the key.
    #[must_use]
    pub fn event_id(&self, source: &str, raw: impl std::fmt::Display) -> String {
        format!("{source}:{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ulid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 26);
        assert_eq!(id2.len(), 26);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_event_id_includes_source() {
        let id_gen = IdGenerator::new();
        assert_eq!(id_gen.event_id("telegram", 42), "telegram:42");
    }
}
