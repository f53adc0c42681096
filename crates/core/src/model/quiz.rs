use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{QuizId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz title cannot be empty")]
    EmptyTitle,

    #[error("unknown visibility: {0}")]
    UnknownVisibility(String),
}

//
// ─── VISIBILITY ────────────────────────────────────────────────────────────────
//

/// Who may attempt a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Listed and attemptable by everyone.
    Public,
    /// Attemptable by users the creator invited.
    InviteOnly,
    /// Only the creator may attempt it.
    Private,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::InviteOnly => "invite_only",
            Visibility::Private => "private",
        }
    }

    /// Parses the stored representation.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::UnknownVisibility` for anything else.
    pub fn parse(raw: &str) -> Result<Self, QuizError> {
        match raw {
            "public" => Ok(Visibility::Public),
            "invite_only" => Ok(Visibility::InviteOnly),
            "private" => Ok(Visibility::Private),
            other => Err(QuizError::UnknownVisibility(other.to_owned())),
        }
    }
}

//
// ─── QUIZ ──────────────────────────────────────────────────────────────────────
//

/// A scored quiz owned by its creator.
///
/// `total_marks` is the ceiling that the marks of all questions together must
/// never exceed; the quiz itself does not know its questions, the allocation
/// check lives in [`crate::allocation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quiz {
    id: QuizId,
    title: String,
    description: String,
    total_marks: u32,
    visibility: Visibility,
    creator_id: UserId,
    created_at: DateTime<Utc>,
}

impl Quiz {
    /// Creates a new quiz.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::EmptyTitle` if the title is blank.
    pub fn new(
        id: QuizId,
        title: impl Into<String>,
        description: impl Into<String>,
        total_marks: u32,
        visibility: Visibility,
        creator_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Self, QuizError> {
        let title = normalize_title(title.into())?;
        Ok(Self {
            id,
            title,
            description: description.into().trim().to_owned(),
            total_marks,
            visibility,
            creator_id,
            created_at,
        })
    }

    /// Returns a copy of this quiz carrying a store-assigned id.
    #[must_use]
    pub fn with_id(mut self, id: QuizId) -> Self {
        self.id = id;
        self
    }

    /// Applies a creator edit. `created_at` and ownership never change.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::EmptyTitle` if the new title is blank.
    pub fn edit(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        total_marks: u32,
        visibility: Visibility,
    ) -> Result<(), QuizError> {
        self.title = normalize_title(title.into())?;
        self.description = description.into().trim().to_owned();
        self.total_marks = total_marks;
        self.visibility = visibility;
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> QuizId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn total_marks(&self) -> u32 {
        self.total_marks
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[must_use]
    pub fn creator_id(&self) -> &UserId {
        &self.creator_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.creator_id == user
    }
}

fn normalize_title(raw: String) -> Result<String, QuizError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(QuizError::EmptyTitle);
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn build(title: &str) -> Result<Quiz, QuizError> {
        Quiz::new(
            QuizId::new(1),
            title,
            "  about rust ",
            10,
            Visibility::Public,
            UserId::new("creator"),
            fixed_now(),
        )
    }

    #[test]
    fn rejects_blank_title() {
        assert_eq!(build("   ").unwrap_err(), QuizError::EmptyTitle);
    }

    #[test]
    fn trims_title_and_description() {
        let quiz = build("  Rust basics ").unwrap();
        assert_eq!(quiz.title(), "Rust basics");
        assert_eq!(quiz.description(), "about rust");
    }

    #[test]
    fn edit_keeps_owner_and_creation_time() {
        let mut quiz = build("Rust").unwrap();
        quiz.edit("Rust 2", "", 20, Visibility::Private).unwrap();
        assert_eq!(quiz.total_marks(), 20);
        assert_eq!(quiz.visibility(), Visibility::Private);
        assert_eq!(quiz.created_at(), fixed_now());
        assert!(quiz.is_owned_by(&UserId::new("creator")));
    }

    #[test]
    fn visibility_parse_roundtrip() {
        for v in [Visibility::Public, Visibility::InviteOnly, Visibility::Private] {
            assert_eq!(Visibility::parse(v.as_str()).unwrap(), v);
        }
        assert!(matches!(
            Visibility::parse("friends"),
            Err(QuizError::UnknownVisibility(_))
        ));
    }
}
