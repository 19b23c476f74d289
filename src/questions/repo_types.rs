use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Question {
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user_id: i64,
    pub author: String,
    /// Counted from `answers` on every read.
    pub answers_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub title: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

impl NewQuestion {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Answer {
    pub id: i64,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user_id: i64,
    pub question_id: i64,
    pub author: String,
    /// Sum of all votes on the answer; 0 without votes.
    pub rating: i64,
}

#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub content: String,
    pub created_at: OffsetDateTime,
}

impl NewAnswer {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// One user's vote on one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AnswerRating {
    pub answer_id: i64,
    pub user_id: i64,
    pub rating: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    /// `up` votes up; anything else, including nothing, votes down.
    pub fn from_action(action: Option<&str>) -> Self {
        match action {
            Some("up") => Vote::Up,
            _ => Vote::Down,
        }
    }

    pub fn value(self) -> i64 {
        match self {
            Vote::Up => 1,
            Vote::Down => -1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewAnswerRating {
    pub rating: Vote,
}

impl NewAnswerRating {
    pub fn new(rating: Vote) -> Self {
        Self { rating }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_up_votes_up() {
        assert_eq!(Vote::from_action(Some("up")), Vote::Up);
        assert_eq!(Vote::from_action(Some("down")), Vote::Down);
        assert_eq!(Vote::from_action(Some("UP")), Vote::Down);
        assert_eq!(Vote::from_action(None), Vote::Down);
        assert_eq!(Vote::Up.value() + Vote::Down.value(), 0);
    }

    #[test]
    fn new_entities_are_stamped_now() {
        let before = OffsetDateTime::now_utc();
        let question = NewQuestion::new("Q1", "body");
        let answer = NewAnswer::new("A1");
        assert!(question.created_at >= before);
        assert!(answer.created_at >= question.created_at);
    }
}
