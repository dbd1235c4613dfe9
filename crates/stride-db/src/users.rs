use crate::{bool_from_any_row, DbError, DbPool};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub display_name: String,
    pub email: String,
    pub notifications_enabled: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            email: row.try_get("email")?,
            notifications_enabled: bool_from_any_row(row, "notifications_enabled")?,
        })
    }
}

pub async fn create_user(
    pool: &DbPool,
    id: i64,
    display_name: &str,
    email: &str,
) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (id, display_name, email, notifications_enabled)
         VALUES (?1, ?2, ?3, 1)
         RETURNING id, display_name, email, notifications_enabled",
    )
    .bind(id)
    .bind(display_name)
    .bind(email)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, display_name, email, notifications_enabled FROM users WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set_notifications_enabled(
    pool: &DbPool,
    user_id: i64,
    enabled: bool,
) -> Result<(), DbError> {
    sqlx::query("UPDATE users SET notifications_enabled = ?2 WHERE id = ?1")
        .bind(user_id)
        .bind(if enabled { 1_i64 } else { 0 })
        .execute(pool)
        .await?;
    Ok(())
}
