use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub type VideoId = i64;

pub type DestinationId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Video {
    pub id: VideoId,
    pub file_ref: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub file_ref: String,
    pub caption: Option<String>,
}

impl NewVideo {
    pub fn new(file_ref: impl Into<String>) -> Self {
        Self {
            file_ref: file_ref.into(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        let caption = caption.into();
        self.caption = if caption.trim().is_empty() {
            None
        } else {
            Some(caption)
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub videos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RandomSelection {
    #[default]
    Store,
    Client,
}

impl RandomSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RandomSelection::Store => "store",
            RandomSelection::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<RandomSelection> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Some(RandomSelection::Store),
            "client" => Some(RandomSelection::Client),
            _ => None,
        }
    }
}

pub fn normalize_tag(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() { None } else { Some(name) }
}

// Normalized, de-duplicated, in first-seen order.
pub fn normalize_tags(tags: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter_map(|raw| normalize_tag(raw))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag_folds_case_and_space() {
        assert_eq!(normalize_tag(" Cats ").as_deref(), Some("cats"));
        assert_eq!(normalize_tag("CATS").as_deref(), Some("cats"));
        assert_eq!(normalize_tag("cats").as_deref(), Some("cats"));
    }

    #[test]
    fn test_normalize_tag_rejects_blank() {
        assert_eq!(normalize_tag(""), None);
        assert_eq!(normalize_tag("  \t "), None);
    }

    #[test]
    fn test_normalize_tag_keeps_inner_space() {
        assert_eq!(normalize_tag(" Funny Cats").as_deref(), Some("funny cats"));
    }

    #[test]
    fn test_normalize_tags_dedupes_in_order() {
        assert_eq!(
            normalize_tags(&["Funny", " cats", "FUNNY", "", "Cats "]),
            vec!["funny", "cats"]
        );
        assert!(normalize_tags(&[" ", ""]).is_empty());
    }

    #[test]
    fn test_blank_caption_dropped() {
        let video = NewVideo::new("abc").with_caption("   ");
        assert!(video.caption.is_none());
        let video = NewVideo::new("abc").with_caption("cat video");
        assert_eq!(video.caption.as_deref(), Some("cat video"));
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!(RandomSelection::parse("Store"), Some(RandomSelection::Store));
        assert_eq!(RandomSelection::parse("client"), Some(RandomSelection::Client));
        assert_eq!(RandomSelection::parse("rand"), None);
        assert_eq!(RandomSelection::default().as_str(), "store");
    }
}
