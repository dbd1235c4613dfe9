use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use stride_models::notification::NewNotification;

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub priority: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for NotificationRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let data_raw: String = row.try_get("data")?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: row.try_get("kind")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            data: serde_json::from_str(&data_raw)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            priority: row.try_get("priority")?,
            read: bool_from_any_row(row, "read")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn insert_notification(
    pool: &DbPool,
    notification: &NewNotification,
) -> Result<NotificationRow, DbError> {
    let row = sqlx::query_as::<_, NotificationRow>(
        "INSERT INTO notifications (user_id, kind, title, body, data, priority, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
         RETURNING id, user_id, kind, title, body, data, priority, read, created_at",
    )
    .bind(notification.user_id)
    .bind(notification.kind.as_str())
    .bind(&notification.title)
    .bind(&notification.body)
    .bind(notification.data.to_string())
    .bind(notification.priority.as_str())
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_notifications(
    pool: &DbPool,
    user_id: i64,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<NotificationRow>, DbError> {
    let query = if unread_only {
        "SELECT id, user_id, kind, title, body, data, priority, read, created_at
         FROM notifications WHERE user_id = ?1 AND read = 0
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    } else {
        "SELECT id, user_id, kind, title, body, data, priority, read, created_at
         FROM notifications WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    };
    let rows = sqlx::query_as::<_, NotificationRow>(query)
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn get_unread_count(pool: &DbPool, user_id: i64) -> Result<i64, DbError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS unread FROM notifications WHERE user_id = ?1 AND read = 0",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get::<i64, _>("unread")?)
}

pub async fn mark_all_read(pool: &DbPool, user_id: i64) -> Result<u64, DbError> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
