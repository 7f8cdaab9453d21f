//! Content object ids: the same work reported by different sources gets the same id.

use crate::search::document::Document;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

pub const TITLE: &str = "title";
pub const AUTHORS: &str = "authors";
pub const YEAR: &str = "year";

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));
static OID_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid regex"));

/// Lowercase, punctuation folded to single spaces, trimmed.
pub fn normalize_field(value: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&value.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// SHA-256 over normalized `title|authors|year`, hex encoded. `None` without a usable title.
pub fn derive_oid(document: &Document) -> Option<String> {
    let title = normalize_field(document.field(TITLE)?);
    if title.is_empty() {
        return None;
    }
    let authors = document.field(AUTHORS).map(normalize_field).unwrap_or_default();
    let year = document.field(YEAR).map(normalize_field).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(authors.as_bytes());
    hasher.update(b"|");
    hasher.update(year.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

pub fn is_well_formed(oid: &str) -> bool {
    OID_SHAPE.is_match(oid)
}

/// The id a document is merged under: a supplied id must be well formed, otherwise one is derived.
pub fn resolve_oid(document: &Document) -> Option<String> {
    match &document.oid {
        Some(oid) if is_well_formed(oid) => Some(oid.clone()),
        Some(_) => None,
        None => derive_oid(document),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(title: &str, authors: &str, year: &str) -> Document {
        Document::new()
            .with_field(TITLE, title)
            .with_field(AUTHORS, authors)
            .with_field(YEAR, year)
    }

    #[test]
    fn test_equivalent_records_share_an_oid() {
        let acm = paper("Actors: A Model of Concurrent Computation", "Agha, G.", "1986");
        let ieee = paper("actors -- a model of concurrent computation ", "agha g", "1986")
            .with_field("publisher", "MIT Press");

        let oid = derive_oid(&acm).unwrap();
        assert_eq!(Some(oid.clone()), derive_oid(&ieee));
        assert!(is_well_formed(&oid));
    }

    #[test]
    fn test_year_and_authors_distinguish_records() {
        let a = paper("Same Title", "Smith", "2001");
        assert_ne!(derive_oid(&a), derive_oid(&paper("Same Title", "Smith", "2002")));
        assert_ne!(derive_oid(&a), derive_oid(&paper("Same Title", "Jones", "2001")));
    }

    #[test]
    fn test_no_title_no_oid() {
        assert_eq!(derive_oid(&Document::new().with_field(AUTHORS, "Smith")), None);
        assert_eq!(derive_oid(&Document::new().with_field(TITLE, " -- ")), None);
    }

    #[test]
    fn test_supplied_oids_are_checked() {
        let good = "a".repeat(64);
        let mut doc = paper("t", "a", "1");

        doc.oid = Some(good.clone());
        assert_eq!(resolve_oid(&doc), Some(good));

        doc.oid = Some("not-an-oid".to_string());
        assert_eq!(resolve_oid(&doc), None);

        doc.oid = None;
        assert_eq!(resolve_oid(&doc), derive_oid(&doc));
    }
}
