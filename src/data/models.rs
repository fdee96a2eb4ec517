//! Data models
//!
//! Rust structs representing database rows and the inputs that create or
//! change them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

// =============================================================================
// Post
// =============================================================================

/// A blog post
///
/// Serialized with the `createdAt`/`updatedAt` field names clients of the
/// posts resource expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes accepted when creating a post
///
/// Unknown fields, including a client-supplied `id`, are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Attributes accepted when updating a post
///
/// The outer `Option` tells whether the field was present in the body;
/// `Some(None)` means it was sent as `null` and clears the column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostChanges {
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub content: Option<Option<String>>,
}

impl PostChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// =============================================================================
// Listing
// =============================================================================

/// Sortable and filterable post attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostField {
    Id,
    Title,
    Content,
    CreatedAt,
    UpdatedAt,
}

impl PostField {
    /// Parse the attribute name used on the wire
    pub fn from_attribute(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Self::Id),
            "title" => Some(Self::Title),
            "content" => Some(Self::Content),
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Content => "content",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: PostField,
    pub descending: bool,
}

impl SortKey {
    /// Parse a comma-separated sort list such as `-createdAt,title`
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, AppError> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (descending, name) = match part.strip_prefix('-') {
                    Some(name) => (true, name),
                    None => (false, part),
                };
                PostField::from_attribute(name)
                    .map(|field| SortKey { field, descending })
                    .ok_or_else(|| {
                        AppError::Validation(format!("Sorting not allowed on given attribute: {name}"))
                    })
            })
            .collect()
    }
}

/// Window and filters for listing posts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostQuery {
    pub offset: i64,
    pub count: i64,
    pub sort: Vec<SortKey>,
    /// Substring searched in title and content
    pub search: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sort_list_handles_direction_prefix() {
        let keys = SortKey::parse_list("-createdAt, title").unwrap();
        assert_eq!(
            keys,
            vec![
                SortKey {
                    field: PostField::CreatedAt,
                    descending: true
                },
                SortKey {
                    field: PostField::Title,
                    descending: false
                },
            ]
        );
    }

    #[test]
    fn parse_sort_list_rejects_unknown_attribute() {
        let error = SortKey::parse_list("author").unwrap_err();
        assert!(matches!(error, AppError::Validation(message) if message.contains("author")));
    }

    #[test]
    fn changes_distinguish_null_from_absent() {
        let changes: PostChanges = serde_json::from_str(r#"{"title": null}"#).unwrap();
        assert_eq!(changes.title, Some(None));
        assert_eq!(changes.content, None);
        assert!(!changes.is_empty());

        let empty: PostChanges = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn post_serializes_timestamps_in_camel_case() {
        let now = Utc::now();
        let post = Post {
            id: 7,
            title: None,
            content: Some("body".to_string()),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["id"], 7);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json["title"].is_null());
    }
}
