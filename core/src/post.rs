/// Post documents, feed snapshots and the compose-form rules
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Opaque post identifier assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub author_display_name: String,
    /// Server-assigned, monotonic per insert
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "Untitled"
        } else {
            &self.title
        }
    }

    pub fn display_author(&self) -> &str {
        if self.author_display_name.is_empty() {
            "Anonymous"
        } else {
            &self.author_display_name
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.author_id == user_id
    }
}

/// Complete result set of a live feed query at one instant.
///
/// Ordered by `created_at` descending as delivered by the source. A snapshot
/// replaces its predecessor wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    posts: Vec<Post>,
}

impl FeedSnapshot {
    pub fn new(posts: Vec<Post>) -> Self {
        Self { posts }
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn get(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

/// Fields sent to the backend when creating a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub author_display_name: String,
}

/// Per-field messages from compose-form validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftErrors {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl DraftErrors {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }

    /// Single-line summary for error reporting
    pub fn summary(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(t) = &self.title {
            parts.push(t);
        }
        if let Some(c) = &self.content {
            if Some(c) != self.title.as_ref() {
                parts.push(c);
            }
        }
        parts.join("; ")
    }
}

/// Contents of the compose form before submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
}

impl PostDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn validate(&self) -> DraftErrors {
        let mut errors = DraftErrors::default();

        if self.title.trim().is_empty() && self.content.trim().is_empty() {
            errors.title = Some("Please add a title or content".to_string());
            errors.content = Some("Please add a title or content".to_string());
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            errors.title = Some(format!(
                "Title must be less than {} characters",
                MAX_TITLE_CHARS
            ));
        }
        if self.content.chars().count() > MAX_CONTENT_CHARS {
            errors.content = Some(format!(
                "Content must be less than {} characters",
                MAX_CONTENT_CHARS
            ));
        }

        errors
    }

    /// Validate and build the backend payload, trimming both fields
    pub fn into_new_post(
        self,
        author_id: &str,
        author_display_name: &str,
    ) -> std::result::Result<NewPost, DraftErrors> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(NewPost {
            title: self.title.trim().to_string(),
            content: self.content.trim().to_string(),
            author_id: author_id.to_string(),
            author_display_name: author_display_name.to_string(),
        })
    }
}

/// Check an edited content value against the post it replaces
pub fn validate_edit(post: &Post, new_content: &str) -> std::result::Result<(), String> {
    if new_content.chars().count() > MAX_CONTENT_CHARS {
        return Err(format!(
            "Content must be less than {} characters",
            MAX_CONTENT_CHARS
        ));
    }
    if post.title.trim().is_empty() && new_content.trim().is_empty() {
        return Err("Please add a title or content".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(title: &str, content: &str) -> Post {
        Post {
            id: PostId::from("p"),
            title: title.to_string(),
            content: content.to_string(),
            author_id: "u1".to_string(),
            author_display_name: String::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_draft_requires_title_or_content() {
        let errors = PostDraft::new("  ", "\n").validate();
        assert!(errors.title.is_some());
        assert!(errors.content.is_some());
        assert_eq!(errors.summary(), "Please add a title or content");

        assert!(PostDraft::new("", "hello").validate().is_empty());
        assert!(PostDraft::new("hi", "").validate().is_empty());
    }

    #[test]
    fn test_draft_length_limits() {
        let long_title = "t".repeat(MAX_TITLE_CHARS + 1);
        let errors = PostDraft::new(long_title, "ok").validate();
        assert_eq!(
            errors.title.as_deref(),
            Some("Title must be less than 100 characters")
        );

        let long_content = "c".repeat(MAX_CONTENT_CHARS + 1);
        let errors = PostDraft::new("ok", long_content).validate();
        assert!(errors.title.is_none());
        assert!(errors.content.is_some());

        // Limits count characters, not bytes
        let emoji = "é".repeat(MAX_TITLE_CHARS);
        assert!(PostDraft::new(emoji, "").validate().is_empty());
    }

    #[test]
    fn test_into_new_post_trims() {
        let new_post = PostDraft::new("  Hello ", " world\n")
            .into_new_post("u1", "alice")
            .unwrap();
        assert_eq!(new_post.title, "Hello");
        assert_eq!(new_post.content, "world");
        assert_eq!(new_post.author_display_name, "alice");
    }

    #[test]
    fn test_display_fallbacks() {
        let p = post("", "body");
        assert_eq!(p.display_title(), "Untitled");
        assert_eq!(p.display_author(), "Anonymous");
    }

    #[test]
    fn test_validate_edit() {
        assert!(validate_edit(&post("", "a"), "").is_err());
        assert!(validate_edit(&post("title", "a"), "").is_ok());
        assert!(validate_edit(&post("title", "a"), &"x".repeat(MAX_CONTENT_CHARS + 1)).is_err());
    }
}
