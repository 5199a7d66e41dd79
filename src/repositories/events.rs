use sqlx::PgPool;
use time::OffsetDateTime;

use crate::db::models::ActivityEvent;

const COLUMNS: &str = "\
    id, user_id, user_email, user_first_name, user_last_name, answer_id, answer_training_id, \
    answer_lesson_id, answer_status, answer_text, event_date, created_at, processed, \
    processed_at, error_message";

pub(crate) async fn list_unprocessed(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<ActivityEvent>, sqlx::Error> {
    sqlx::query_as::<_, ActivityEvent>(&format!(
        "SELECT {COLUMNS}
         FROM webhook_events
         WHERE processed = FALSE
         ORDER BY created_at, id
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub(crate) async fn mark_processed(
    executor: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i64,
    processed_at: OffsetDateTime,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE webhook_events
         SET processed = TRUE,
             processed_at = $1,
             error_message = $2
         WHERE id = $3",
    )
    .bind(processed_at)
    .bind(error_message)
    .bind(event_id)
    .execute(&mut **executor)
    .await?;

    Ok(())
}

/// Platform user ids with a qualifying answer to the given lesson.
pub(crate) async fn answered_user_ids(
    pool: &PgPool,
    lesson_external_id: &str,
    statuses: &[String],
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT DISTINCT user_id
         FROM webhook_events
         WHERE answer_lesson_id = $1
           AND LOWER(TRIM(answer_status)) = ANY($2)",
    )
    .bind(lesson_external_id)
    .bind(statuses)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_status_between(
    pool: &PgPool,
    status: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<ActivityEvent>, sqlx::Error> {
    sqlx::query_as::<_, ActivityEvent>(&format!(
        "SELECT {COLUMNS}
         FROM webhook_events
         WHERE LOWER(TRIM(answer_status)) = $1
           AND event_date >= $2
           AND event_date < $3
         ORDER BY event_date, id"
    ))
    .bind(status)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EarliestAnswerRow {
    pub(crate) user_id: i64,
    pub(crate) lesson_id: String,
    pub(crate) answered_at: OffsetDateTime,
}

pub(crate) async fn earliest_answers(
    pool: &PgPool,
    user_ids: &[i64],
    lesson_external_ids: &[String],
    statuses: &[String],
) -> Result<Vec<EarliestAnswerRow>, sqlx::Error> {
    if user_ids.is_empty() || lesson_external_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, EarliestAnswerRow>(
        "SELECT user_id,
                answer_lesson_id AS lesson_id,
                MIN(COALESCE(event_date, created_at)) AS answered_at
         FROM webhook_events
         WHERE user_id = ANY($1)
           AND answer_lesson_id = ANY($2)
           AND LOWER(TRIM(answer_status)) = ANY($3)
         GROUP BY user_id, answer_lesson_id",
    )
    .bind(user_ids)
    .bind(lesson_external_ids)
    .bind(statuses)
    .fetch_all(pool)
    .await
}
