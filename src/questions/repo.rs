use sqlx::{query::QueryAs, sqlite::SqliteArguments, Sqlite, SqliteConnection};

use crate::db::StoreError;
use crate::questions::repo_types::{
    Answer, AnswerRating, NewAnswer, NewAnswerRating, NewQuestion, Question,
};

impl Question {
    /// All questions, newest first.
    pub async fn latest(conn: &mut SqliteConnection) -> Result<Vec<Question>, StoreError> {
        let rows = sqlx::query_as::<_, Question>(
            r#"
            SELECT q.id, q.title, q.content, q.created_at, q.user_id,
                   u.username AS author,
                   (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.id) AS answers_count
            FROM questions q
            JOIN users u ON u.id = q.user_id
            ORDER BY q.created_at DESC, q.id DESC
            "#,
        )
        .fetch_all(conn)
        .await?;
        Ok(rows)
    }

    pub fn by_id<'q>(id: i64) -> QueryAs<'q, Sqlite, Question, SqliteArguments<'q>> {
        sqlx::query_as::<_, Question>(
            r#"
            SELECT q.id, q.title, q.content, q.created_at, q.user_id,
                   u.username AS author,
                   (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.id) AS answers_count
            FROM questions q
            JOIN users u ON u.id = q.user_id
            WHERE q.id = $1
            "#,
        )
        .bind(id)
    }

    /// Returns the id of the new question.
    pub async fn create(
        conn: &mut SqliteConnection,
        user_id: i64,
        new: &NewQuestion,
    ) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO questions (title, content, created_at, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.created_at)
        .bind(user_id)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }
}

impl Answer {
    /// Answers of a question, best rated first.
    pub async fn for_question(
        conn: &mut SqliteConnection,
        question_id: i64,
    ) -> Result<Vec<Answer>, StoreError> {
        let rows = sqlx::query_as::<_, Answer>(
            r#"
            SELECT a.id, a.content, a.created_at, a.user_id, a.question_id,
                   u.username AS author,
                   (SELECT COALESCE(SUM(r.rating), 0) FROM answer_ratings r WHERE r.answer_id = a.id) AS rating
            FROM answers a
            JOIN users u ON u.id = a.user_id
            WHERE a.question_id = $1
            ORDER BY rating DESC, a.id ASC
            "#,
        )
        .bind(question_id)
        .fetch_all(conn)
        .await?;
        Ok(rows)
    }

    pub fn by_id<'q>(id: i64) -> QueryAs<'q, Sqlite, Answer, SqliteArguments<'q>> {
        sqlx::query_as::<_, Answer>(
            r#"
            SELECT a.id, a.content, a.created_at, a.user_id, a.question_id,
                   u.username AS author,
                   (SELECT COALESCE(SUM(r.rating), 0) FROM answer_ratings r WHERE r.answer_id = a.id) AS rating
            FROM answers a
            JOIN users u ON u.id = a.user_id
            WHERE a.id = $1
            "#,
        )
        .bind(id)
    }

    pub async fn create(
        conn: &mut SqliteConnection,
        user_id: i64,
        question_id: i64,
        new: &NewAnswer,
    ) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO answers (content, created_at, user_id, question_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&new.content)
        .bind(new.created_at)
        .bind(user_id)
        .bind(question_id)
        .fetch_one(conn)
        .await?;
        Ok(id)
    }
}

impl AnswerRating {
    pub async fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
    ) -> Result<Vec<AnswerRating>, StoreError> {
        let rows = sqlx::query_as::<_, AnswerRating>(
            r#"
            SELECT answer_id, user_id, rating
            FROM answer_ratings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(conn)
        .await?;
        Ok(rows)
    }

    /// A second vote by the same user on the same answer is a
    /// [`StoreError::Conflict`].
    pub async fn create(
        conn: &mut SqliteConnection,
        user_id: i64,
        answer_id: i64,
        new: &NewAnswerRating,
    ) -> Result<AnswerRating, StoreError> {
        let rating = sqlx::query_as::<_, AnswerRating>(
            r#"
            INSERT INTO answer_ratings (answer_id, user_id, rating)
            VALUES ($1, $2, $3)
            RETURNING answer_id, user_id, rating
            "#,
        )
        .bind(answer_id)
        .bind(user_id)
        .bind(new.rating.value())
        .fetch_one(conn)
        .await?;
        Ok(rating)
    }
}
