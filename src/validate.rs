//! Input validation for published posts
//!
//! Runs before any store call; a rejected input never produces a side
//! effect on either backend.

use crate::error::ValidationError;

/// Limits applied to topic and comment submissions.
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    /// Maximum title length in characters.
    pub max_title_chars: usize,
    /// Maximum content length in characters.
    pub max_content_chars: usize,
    /// Words that may not appear in titles or content.
    pub forbidden_words: Vec<String>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_title_chars: 50,
            max_content_chars: 10_000,
            forbidden_words: Vec::new(),
        }
    }
}

impl ValidationLimits {
    /// Validate a topic submission (title + content).
    pub fn validate_topic(&self, title: &str, content: &str) -> Result<(), ValidationError> {
        if title.is_empty() {
            return Err(ValidationError::TitleEmpty);
        }
        if title.chars().count() > self.max_title_chars {
            return Err(ValidationError::TitleTooLong {
                max: self.max_title_chars,
            });
        }
        if self.contains_forbidden(title) {
            return Err(ValidationError::TitleForbiddenWord);
        }
        self.validate_content(content)
    }

    /// Validate comment content.
    pub fn validate_content(&self, content: &str) -> Result<(), ValidationError> {
        if content.is_empty() {
            return Err(ValidationError::ContentEmpty);
        }
        if content.chars().count() > self.max_content_chars {
            return Err(ValidationError::ContentTooLong {
                max: self.max_content_chars,
            });
        }
        if self.contains_forbidden(content) {
            return Err(ValidationError::ContentForbiddenWord);
        }
        Ok(())
    }

    fn contains_forbidden(&self, text: &str) -> bool {
        self.forbidden_words.iter().any(|w| text.contains(w.as_str()))
    }
}
