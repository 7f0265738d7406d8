//! Derived content type for catalog items
//!
//! Each synced item is tagged with at most one content type found by keyword
//! matching over its genres, tags, collections and title. The result lives at
//! `metadata.contentAnalysis.contentType` and is what the `content_type` rule
//! field reads.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// JSON pointer of the derived content type inside an item's metadata blob
pub const CONTENT_TYPE_POINTER: &str = "/contentAnalysis/contentType";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Holiday,
    Standup,
    Anime,
    Documentary,
    Concert,
    Kids,
}

/// Checked in order; the first type with a keyword hit wins
const KEYWORDS: &[(ContentType, &[&str])] = &[
    (
        ContentType::Holiday,
        &["christmas", "holiday", "xmas", "thanksgiving", "halloween", "hanukkah"],
    ),
    (
        ContentType::Standup,
        &["stand-up", "standup", "stand up", "comedy special"],
    ),
    (ContentType::Anime, &["anime"]),
    (ContentType::Documentary, &["documentary", "docuseries"]),
    (ContentType::Concert, &["concert", "live performance"]),
    (ContentType::Kids, &["kids", "children", "preschool"]),
];

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Holiday => "holiday",
            ContentType::Standup => "standup",
            ContentType::Anime => "anime",
            ContentType::Documentary => "documentary",
            ContentType::Concert => "concert",
            ContentType::Kids => "kids",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the content type of an item from its descriptive fields.
/// List values are matched before the title.
pub fn detect_content_type(
    title: &str,
    genres: &[String],
    tags: &[String],
    collections: &[String],
) -> Option<ContentType> {
    let labels: Vec<String> = genres
        .iter()
        .chain(tags)
        .chain(collections)
        .map(|s| s.to_lowercase())
        .collect();
    let title = title.to_lowercase();

    KEYWORDS.iter().find_map(|(kind, words)| {
        let hit = words
            .iter()
            .any(|w| labels.iter().any(|l| l.contains(w)) || title.contains(w));
        hit.then_some(*kind)
    })
}

/// Build the stored metadata blob: the provider's raw record plus content analysis
pub fn build_metadata(raw: Value, content_type: Option<ContentType>) -> Value {
    json!({
        "raw": raw,
        "contentAnalysis": {
            "contentType": content_type.map(|c| c.as_str()),
        },
    })
}

/// Read the derived content type; only a JSON string counts
pub fn content_type_of(metadata: &Value) -> Option<&str> {
    metadata.pointer(CONTENT_TYPE_POINTER).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_from_genres() {
        let ct = detect_content_type("Spirited Away", &strings(&["Anime", "Fantasy"]), &[], &[]);
        assert_eq!(ct, Some(ContentType::Anime));
    }

    #[test]
    fn test_detect_from_collection_and_title() {
        assert_eq!(
            detect_content_type("Elf", &[], &[], &strings(&["Christmas Classics"])),
            Some(ContentType::Holiday)
        );
        assert_eq!(
            detect_content_type("Dave Chappelle: Stand-Up Special", &[], &[], &[]),
            Some(ContentType::Standup)
        );
        assert_eq!(detect_content_type("Heat", &strings(&["Crime"]), &[], &[]), None);
    }

    #[test]
    fn test_first_matching_type_wins() {
        let ct = detect_content_type(
            "A Kids Christmas",
            &strings(&["Kids & Family"]),
            &[],
            &[],
        );
        assert_eq!(ct, Some(ContentType::Holiday));
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = build_metadata(json!({"ratingKey": "1"}), Some(ContentType::Concert));
        assert_eq!(content_type_of(&metadata), Some("concert"));
        assert_eq!(metadata["raw"]["ratingKey"], "1");

        let none = build_metadata(json!({}), None);
        assert_eq!(content_type_of(&none), None);
        assert!(none["contentAnalysis"]["contentType"].is_null());
    }
}
