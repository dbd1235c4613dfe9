use crate::{DbError, DbPool};
use sqlx::Row;

pub async fn add_participant(
    pool: &DbPool,
    conversation_id: i64,
    user_id: i64,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO conversation_participants (conversation_id, user_id)
         VALUES (?1, ?2)
         ON CONFLICT (conversation_id, user_id) DO NOTHING",
    )
    .bind(conversation_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// User IDs participating in a conversation, used for unread-count hints.
pub async fn get_participant_user_ids(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<Vec<i64>, DbError> {
    let rows = sqlx::query(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| row.try_get::<i64, _>("user_id").map_err(DbError::from))
        .collect()
}

pub async fn is_participant(
    pool: &DbPool,
    conversation_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    let row = sqlx::query(
        "SELECT 1 AS present FROM conversation_participants
         WHERE conversation_id = ?1 AND user_id = ?2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}
