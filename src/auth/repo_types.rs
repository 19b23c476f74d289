use serde::Serialize;
use sqlx::FromRow;
use tracing::error;

use crate::auth::password::{hash_password, verify_password};
use crate::questions::repo_types::AnswerRating;

/// Registered account.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string
    /// Votes cast by this user; filled by the loader, not by the row.
    #[sqlx(skip)]
    #[serde(skip)]
    pub ratings: Vec<AnswerRating>,
}

impl User {
    pub fn check_password(&self, candidate: &str) -> bool {
        match verify_password(candidate, &self.password_hash) {
            Ok(ok) => ok,
            Err(e) => {
                error!(user_id = self.id, error = %e, "stored password hash is unreadable");
                false
            }
        }
    }

    /// True once the user has rated the answer, whichever way.
    pub fn voted_for(&self, answer_id: i64) -> bool {
        self.ratings.iter().any(|r| r.answer_id == answer_id)
    }
}

/// Account about to be inserted; the password is hashed on construction.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    password_hash: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>, password: &str) -> anyhow::Result<Self> {
        Ok(Self {
            username: username.into(),
            password_hash: hash_password(password)?,
        })
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }
}
