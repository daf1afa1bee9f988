//! Identifier normalizer
//!
//! The catalog grew several identifier conventions over time: database keys,
//! human codes ("MOD-1.1", "module_1.1"), slugs, and legacy string ids, plus
//! nested reference objects wrapping any of these. Normalization maps one
//! raw identifier into the full set of canonical string variants so that any
//! two historical spellings of the same entity share at least one variant.
//!
//! Over-generation is deliberate: a false-positive alias collision is
//! preferred over a failed match (collisions are first-writer-wins and
//! surfaced by the matching context).

use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::warn;
use uuid::Uuid;

/// Prefix tokens rewritten to the canonical `module_` form
const MODULE_PREFIXES: [&str; 2] = ["module", "mod"];

/// Prefix tokens rewritten to the canonical `track_` form
const TRACK_PREFIXES: [&str; 2] = ["track", "trk"];

/// Identity-bearing fields recognized when decomposing reference objects
const IDENTITY_FIELDS: [&str; 9] = [
    "id", "_id", "$oid", "code", "slug", "legacy_id", "legacyId", "key", "uuid",
];

/// Recursion cap for nested reference objects
const MAX_NESTING_DEPTH: usize = 8;

/// Produce every canonical variant of one raw identifier string.
///
/// Variants: the raw (trimmed) string, its lowercase form, the
/// alphanumeric-condensed form, underscore- and hyphen-joined token forms,
/// and a canonical-prefix form when the leading token is a recognized
/// module/track prefix. Pure and deterministic.
pub fn normalize_str(raw: &str) -> BTreeSet<String> {
    let mut variants = BTreeSet::new();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return variants;
    }

    variants.insert(trimmed.to_string());
    let lower = trimmed.to_lowercase();
    variants.insert(lower.clone());

    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return variants;
    }

    variants.insert(tokens.concat());
    variants.insert(tokens.join("_"));
    variants.insert(tokens.join("-"));

    if tokens.len() > 1 {
        if let Some(canonical) = canonical_prefix(tokens[0]) {
            variants.insert(format!("{}_{}", canonical, tokens[1..].join("_")));
        }
    }

    variants
}

fn canonical_prefix(token: &str) -> Option<&'static str> {
    if MODULE_PREFIXES.contains(&token) {
        Some("module")
    } else if TRACK_PREFIXES.contains(&token) {
        Some("track")
    } else {
        None
    }
}

/// Normalize any identifier-like JSON value into its variant set.
///
/// Strings and numbers normalize directly; objects are decomposed over the
/// recognized identity fields and the per-field variants are unioned. A
/// visited set plus depth cap guards against degenerate reference graphs.
pub fn normalize_identifier(value: &Value) -> BTreeSet<String> {
    let mut variants = BTreeSet::new();
    let mut visited = HashSet::new();
    collect_variants(value, &mut variants, &mut visited, 0);
    variants
}

fn collect_variants(
    value: &Value,
    out: &mut BTreeSet<String>,
    visited: &mut HashSet<usize>,
    depth: usize,
) {
    if depth > MAX_NESTING_DEPTH {
        warn!(depth = depth, "Identifier nesting exceeds cap, truncating normalization");
        return;
    }

    match value {
        Value::String(s) => out.extend(normalize_str(s)),
        Value::Number(n) => out.extend(normalize_str(&n.to_string())),
        Value::Object(map) => {
            if !visited.insert(value as *const Value as usize) {
                return;
            }
            for field in IDENTITY_FIELDS {
                if let Some(nested) = map.get(field) {
                    collect_variants(nested, out, visited, depth + 1);
                }
            }
        }
        // Booleans, nulls, and arrays are not identity-bearing
        _ => {}
    }
}

/// Shape test for "looks like a primary key": a 24-char hex legacy key or a
/// UUID. Used by the prerequisite pipeline to decide whether a reference may
/// be interpreted as a module primary key.
pub fn looks_like_primary_key(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.len() == 24 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }
    Uuid::parse_str(trimmed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_is_deterministic() {
        let a = normalize_str("MOD-1.1");
        let b = normalize_str("MOD-1.1");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_code_conventions_intersect() {
        let dashed = normalize_str("MOD-1.1");
        let underscored = normalize_str("module_1.1");
        assert!(
            dashed.intersection(&underscored).next().is_some(),
            "MOD-1.1 and module_1.1 must share a canonical variant"
        );
    }

    #[test]
    fn test_track_prefix_canonicalization() {
        let variants = normalize_str("TRK-2");
        assert!(variants.contains("track_2"));
        assert!(variants.contains("trk-2"));
        assert!(variants.contains("trk2"));
        assert!(variants.contains("TRK-2"));
    }

    #[test]
    fn test_condensed_and_joined_variants() {
        let variants = normalize_str("Intro to Rust!");
        assert!(variants.contains("intro to rust!"));
        assert!(variants.contains("introtorust"));
        assert!(variants.contains("intro_to_rust"));
        assert!(variants.contains("intro-to-rust"));
    }

    #[test]
    fn test_object_decomposition_unions_fields() {
        let reference = json!({
            "_id": {"$oid": "65a1b2c3d4e5f6a7b8c9d0e1"},
            "code": "MOD-1.1",
            "slug": "intro-module",
        });
        let variants = normalize_identifier(&reference);
        assert!(variants.contains("65a1b2c3d4e5f6a7b8c9d0e1"));
        assert!(variants.contains("module_1_1"));
        assert!(variants.contains("intro-module"));
    }

    #[test]
    fn test_numeric_identifier() {
        let variants = normalize_identifier(&json!(42));
        assert!(variants.contains("42"));
    }

    #[test]
    fn test_non_identity_values_are_empty() {
        assert!(normalize_identifier(&json!(null)).is_empty());
        assert!(normalize_identifier(&json!(true)).is_empty());
        assert!(normalize_str("   ").is_empty());
    }

    #[test]
    fn test_deep_nesting_is_capped() {
        let mut value = json!({"id": "leaf"});
        for _ in 0..20 {
            value = json!({"_id": value});
        }
        // Must terminate; variants beyond the cap are simply dropped
        let variants = normalize_identifier(&value);
        assert!(variants.is_empty());
    }

    #[test]
    fn test_primary_key_shapes() {
        assert!(looks_like_primary_key("65a1b2c3d4e5f6a7b8c9d0e1"));
        assert!(looks_like_primary_key("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!looks_like_primary_key("MOD-1.1"));
        assert!(!looks_like_primary_key("intro-module"));
    }
}
