use sqlx::{query::QueryAs, sqlite::SqliteArguments, Sqlite, SqliteConnection};

use crate::auth::repo_types::{NewUser, User};
use crate::db::{DbSession, StoreError};
use crate::questions::repo_types::AnswerRating;

impl User {
    /// Lookup by id, for the query gateway.
    pub fn by_id<'q>(id: i64) -> QueryAs<'q, Sqlite, User, SqliteArguments<'q>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
    }

    /// Lookup by username, for the query gateway.
    pub fn by_username(username: &str) -> QueryAs<'_, Sqlite, User, SqliteArguments<'_>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
    }

    /// Insert a new account. A taken username comes back as
    /// [`StoreError::Conflict`].
    pub async fn create(conn: &mut SqliteConnection, new: &NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash)
            VALUES ($1, $2)
            RETURNING id, username, password_hash
            "#,
        )
        .bind(&new.username)
        .bind(new.password_hash())
        .fetch_one(conn)
        .await?;
        Ok(user)
    }

    pub async fn count(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(conn)
            .await?;
        Ok(count)
    }
}

/// Loads a user together with the votes they cast.
pub async fn load_user(db: &mut DbSession, id: i64) -> Result<Option<User>, StoreError> {
    let label = format!("user with id {id}");
    let Some(mut user) = db.fetch_one_or_report(User::by_id(id), &label).await? else {
        return Ok(None);
    };
    user.ratings = AnswerRating::list_by_user(db.conn(), user.id).await?;
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn create_then_find_by_username() {
        let pool = memory_pool().await;
        let mut db = DbSession::begin(&pool).await.expect("session");

        let created = User::create(db.conn(), &NewUser::new("alice", "pw1").expect("hash"))
            .await
            .expect("create");
        let found = db
            .fetch_one_or_report(User::by_username("alice"), "user with username alice")
            .await
            .expect("lookup")
            .expect("alice exists");

        assert_eq!(found.id, created.id);
        assert!(found.check_password("pw1"));
        assert!(found.ratings.is_empty());
    }

    #[tokio::test]
    async fn taken_username_is_a_conflict_and_keeps_one_row() {
        let pool = memory_pool().await;
        let mut db = DbSession::begin(&pool).await.expect("session");

        User::create(db.conn(), &NewUser::new("alice", "pw1").expect("hash"))
            .await
            .expect("first create");
        let err = User::create(db.conn(), &NewUser::new("alice", "other").expect("hash"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(User::count(db.conn()).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn load_user_misses_quietly_for_unknown_id() {
        let pool = memory_pool().await;
        let mut db = DbSession::begin(&pool).await.expect("session");
        assert!(load_user(&mut db, 42).await.expect("load").is_none());
    }
}
