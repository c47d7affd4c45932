//! Deletion-guard markers.
//!
//! These only transform a finalizer list; persisting it is up to the caller.

pub fn contains(finalizers: &[String], marker: &str) -> bool {
    finalizers.iter().any(|item| item == marker)
}

/// Appends `marker` unless already present.
pub fn add(finalizers: &[String], marker: &str) -> Vec<String> {
    let mut result = finalizers.to_vec();
    if !contains(finalizers, marker) {
        result.push(marker.to_owned());
    }
    result
}

/// Drops every occurrence of `marker`.
pub fn remove(finalizers: &[String], marker: &str) -> Vec<String> {
    finalizers
        .iter()
        .filter(|item| *item != marker)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_is_idempotent() {
        let once = add(&list(&["other"]), "ours");
        assert_eq!(once, list(&["other", "ours"]));
        assert_eq!(add(&once, "ours"), once);
    }

    #[test]
    fn remove_keeps_foreign_markers() {
        let finalizers = list(&["a", "ours", "b"]);
        assert_eq!(remove(&finalizers, "ours"), list(&["a", "b"]));
        assert_eq!(remove(&finalizers, "missing"), finalizers);
    }

    #[test]
    fn contains_matches_exactly() {
        let finalizers = list(&["ours"]);
        assert!(contains(&finalizers, "ours"));
        assert!(!contains(&finalizers, "our"));
        assert!(!contains(&[], "ours"));
    }
}
