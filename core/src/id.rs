// src/id.rs
// Random ID generation is an external collaborator per the spec this crate
// implements; this is the concrete stand-in so the engine has something to
// link against. 16 lowercase-hex characters sliced from a UUIDv4.

use uuid::Uuid;

pub fn generate_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    raw[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sixteen_chars() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
