//! Tests for identifiers and suffix generation.

use super::*;
use std::collections::HashSet;

#[test]
fn test_random_suffix_shape() {
    for _ in 0..100 {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}

#[test]
fn test_random_suffix_varies() {
    let suffixes: HashSet<String> = (0..50).map(|_| random_suffix()).collect();
    // 50 draws from a 36^5 space colliding down to one value would mean a
    // broken generator, not bad luck.
    assert!(suffixes.len() > 1);
}

#[test]
fn test_event_id_display_matches_as_str() {
    let id = EventId::new();
    assert_eq!(id.to_string(), id.as_str());
    assert_eq!(id.as_str().len(), 5);
}

#[test]
fn test_trigger_id_round_trip() {
    let id = trigger_id("default", "on-push");
    assert_eq!(id, "namespaces/default/triggers/on-push");
    assert_eq!(parse_trigger_id(&id), Some(("default", "on-push")));
}

#[test]
fn test_parse_trigger_id_rejects_other_shapes() {
    assert_eq!(parse_trigger_id(""), None);
    assert_eq!(parse_trigger_id("default/on-push"), None);
    assert_eq!(parse_trigger_id("namespaces/default/bindings/on-push"), None);
    assert_eq!(
        parse_trigger_id("namespaces/default/triggers/on-push/extra"),
        None
    );
}
