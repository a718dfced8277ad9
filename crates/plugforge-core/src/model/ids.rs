use uuid::Uuid;

/// Generate a fresh opaque identifier in 8-4-4-4-12 hex form.
///
/// Uniqueness is probabilistic; nothing in the crate checks for collisions.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_hyphenated_uuids() {
        let id = generate_id();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert!(id.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_differ() {
        assert_ne!(generate_id(), generate_id());
    }
}
