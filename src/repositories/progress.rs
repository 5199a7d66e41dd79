use sqlx::PgPool;

use crate::db::models::{ProgressConfig, ProgressOverride};

pub(crate) async fn list_configs_for_trainings(
    pool: &PgPool,
    training_ids: &[i64],
) -> Result<Vec<ProgressConfig>, sqlx::Error> {
    sqlx::query_as::<_, ProgressConfig>(
        "SELECT id, training_id, lesson_id, deadline_override, visibility
         FROM progress_config
         WHERE training_id = ANY($1)
         ORDER BY id",
    )
    .bind(training_ids)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_overrides_for_students(
    pool: &PgPool,
    student_ids: &[i64],
) -> Result<Vec<ProgressOverride>, sqlx::Error> {
    sqlx::query_as::<_, ProgressOverride>(
        "SELECT id, student_id, lesson_id, status_override, expires_at
         FROM progress_overrides
         WHERE student_id = ANY($1)
         ORDER BY created_at, id",
    )
    .bind(student_ids)
    .fetch_all(pool)
    .await
}
