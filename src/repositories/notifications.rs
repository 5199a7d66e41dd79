use sqlx::PgPool;
use time::OffsetDateTime;

use crate::db::models::Notification;
use crate::db::types::{NotificationKind, NotificationStatus};

const COLUMNS: &str = "\
    id, mentor_id, kind, message, status, created_at, sent_at, transport_message_id, event_id, \
    last_error";

pub(crate) struct CreateNotification<'a> {
    pub(crate) id: &'a str,
    pub(crate) mentor_id: i64,
    pub(crate) kind: NotificationKind,
    pub(crate) message: &'a str,
    pub(crate) event_id: Option<i64>,
    pub(crate) created_at: OffsetDateTime,
}

pub(crate) async fn create(
    executor: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    params: CreateNotification<'_>,
) -> Result<Notification, sqlx::Error> {
    sqlx::query_as::<_, Notification>(&format!(
        "INSERT INTO notifications (id, mentor_id, kind, message, status, created_at, event_id)
         VALUES ($1,$2,$3,$4,$5,$6,$7)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.mentor_id)
    .bind(params.kind)
    .bind(params.message)
    .bind(NotificationStatus::Pending)
    .bind(params.created_at)
    .bind(params.event_id)
    .fetch_one(&mut **executor)
    .await
}

pub(crate) async fn insert_signatures(
    executor: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    notification_id: &str,
    signatures: &[String],
) -> Result<(), sqlx::Error> {
    for signature in signatures {
        sqlx::query(
            "INSERT INTO notification_signatures (notification_id, signature)
             VALUES ($1,$2)
             ON CONFLICT DO NOTHING",
        )
        .bind(notification_id)
        .bind(signature)
        .execute(&mut **executor)
        .await?;
    }

    Ok(())
}

/// True when a pending or sent notification already carries `signature`.
pub(crate) async fn signature_is_active(
    pool: &PgPool,
    signature: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (
            SELECT 1
            FROM notification_signatures s
            JOIN notifications n ON n.id = s.notification_id
            WHERE s.signature = $1
              AND n.status IN ($2, $3)
         )",
    )
    .bind(signature)
    .bind(NotificationStatus::Pending)
    .bind(NotificationStatus::Sent)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_pending(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<Notification>, sqlx::Error> {
    sqlx::query_as::<_, Notification>(&format!(
        "SELECT {COLUMNS}
         FROM notifications
         WHERE status = $1
         ORDER BY created_at, id
         LIMIT $2"
    ))
    .bind(NotificationStatus::Pending)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub(crate) struct DeliveryOutcome<'a> {
    pub(crate) status: NotificationStatus,
    pub(crate) sent_at: Option<OffsetDateTime>,
    pub(crate) transport_message_id: Option<&'a str>,
    pub(crate) last_error: Option<&'a str>,
}

/// Moves a pending notification to its delivery outcome. Returns rows touched.
pub(crate) async fn record_delivery(
    pool: &PgPool,
    notification_id: &str,
    outcome: DeliveryOutcome<'_>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE notifications
         SET status = $1,
             sent_at = $2,
             transport_message_id = $3,
             last_error = $4
         WHERE id = $5
           AND status = $6",
    )
    .bind(outcome.status)
    .bind(outcome.sent_at)
    .bind(outcome.transport_message_id)
    .bind(outcome.last_error)
    .bind(notification_id)
    .bind(NotificationStatus::Pending)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
