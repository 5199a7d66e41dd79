//! Read-only lookups over the curated reference tables. Every query is scoped
//! to records whose validity interval contains `now`.

use sqlx::PgPool;
use time::OffsetDateTime;

use crate::db::models::{Lesson, Mapping, Mentor, Student, Training};

const MENTOR_COLUMNS: &str =
    "id, external_id, email, first_name, last_name, telegram_id, valid_from, valid_to";
const STUDENT_COLUMNS: &str = "id, external_id, email, first_name, last_name, valid_from, valid_to";
const TRAINING_COLUMNS: &str = "id, external_id, title, valid_from, valid_to";
const LESSON_COLUMNS: &str = "\
    id, external_id, training_id, module_number, title, opening_date, deadline_date, valid_from, \
    valid_to";
const MAPPING_COLUMNS: &str = "id, student_id, mentor_id, training_id, valid_from, valid_to";

const CURRENT: &str = "valid_from <= $1 AND (valid_to IS NULL OR valid_to > $1)";

pub(crate) async fn find_student_by_external_id(
    pool: &PgPool,
    external_id: i64,
    now: OffsetDateTime,
) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students
         WHERE {CURRENT} AND external_id = $2
         ORDER BY valid_from DESC
         LIMIT 1"
    ))
    .bind(now)
    .bind(external_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_training_by_external_id(
    pool: &PgPool,
    external_id: &str,
    now: OffsetDateTime,
) -> Result<Option<Training>, sqlx::Error> {
    sqlx::query_as::<_, Training>(&format!(
        "SELECT {TRAINING_COLUMNS}
         FROM trainings
         WHERE {CURRENT} AND external_id = $2
         ORDER BY valid_from DESC
         LIMIT 1"
    ))
    .bind(now)
    .bind(external_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_lesson_by_external_id(
    pool: &PgPool,
    external_id: &str,
    now: OffsetDateTime,
) -> Result<Option<Lesson>, sqlx::Error> {
    sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {LESSON_COLUMNS}
         FROM lessons
         WHERE {CURRENT} AND external_id = $2
         ORDER BY valid_from DESC
         LIMIT 1"
    ))
    .bind(now)
    .bind(external_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_mapping(
    pool: &PgPool,
    student_id: i64,
    training_id: i64,
    now: OffsetDateTime,
) -> Result<Option<Mapping>, sqlx::Error> {
    sqlx::query_as::<_, Mapping>(&format!(
        "SELECT {MAPPING_COLUMNS}
         FROM mappings
         WHERE {CURRENT} AND student_id = $2 AND training_id = $3
         ORDER BY valid_from DESC
         LIMIT 1"
    ))
    .bind(now)
    .bind(student_id)
    .bind(training_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_mentor(
    pool: &PgPool,
    mentor_id: i64,
    now: OffsetDateTime,
) -> Result<Option<Mentor>, sqlx::Error> {
    sqlx::query_as::<_, Mentor>(&format!(
        "SELECT {MENTOR_COLUMNS}
         FROM mentors
         WHERE {CURRENT} AND id = $2"
    ))
    .bind(now)
    .bind(mentor_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_mentors(
    pool: &PgPool,
    now: OffsetDateTime,
) -> Result<Vec<Mentor>, sqlx::Error> {
    sqlx::query_as::<_, Mentor>(&format!(
        "SELECT {MENTOR_COLUMNS}
         FROM mentors
         WHERE {CURRENT}
         ORDER BY id"
    ))
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Current lessons whose deadline lies in `(after, until]`.
pub(crate) async fn list_lessons_with_deadline_between(
    pool: &PgPool,
    after: OffsetDateTime,
    until: OffsetDateTime,
    now: OffsetDateTime,
) -> Result<Vec<Lesson>, sqlx::Error> {
    sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {LESSON_COLUMNS}
         FROM lessons
         WHERE {CURRENT}
           AND deadline_date IS NOT NULL
           AND deadline_date > $2
           AND deadline_date <= $3
         ORDER BY deadline_date, id"
    ))
    .bind(now)
    .bind(after)
    .bind(until)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_lessons_for_trainings(
    pool: &PgPool,
    training_ids: &[i64],
    now: OffsetDateTime,
) -> Result<Vec<Lesson>, sqlx::Error> {
    sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {LESSON_COLUMNS}
         FROM lessons
         WHERE {CURRENT} AND training_id = ANY($2)
         ORDER BY training_id, module_number NULLS LAST, id"
    ))
    .bind(now)
    .bind(training_ids)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_mappings_for_training(
    pool: &PgPool,
    training_id: i64,
    now: OffsetDateTime,
) -> Result<Vec<Mapping>, sqlx::Error> {
    sqlx::query_as::<_, Mapping>(&format!(
        "SELECT {MAPPING_COLUMNS}
         FROM mappings
         WHERE {CURRENT} AND training_id = $2
         ORDER BY student_id"
    ))
    .bind(now)
    .bind(training_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_mappings_for_mentor(
    pool: &PgPool,
    mentor_id: i64,
    now: OffsetDateTime,
) -> Result<Vec<Mapping>, sqlx::Error> {
    sqlx::query_as::<_, Mapping>(&format!(
        "SELECT {MAPPING_COLUMNS}
         FROM mappings
         WHERE {CURRENT} AND mentor_id = $2
         ORDER BY student_id, training_id"
    ))
    .bind(now)
    .bind(mentor_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_students_by_ids(
    pool: &PgPool,
    ids: &[i64],
    now: OffsetDateTime,
) -> Result<Vec<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students
         WHERE {CURRENT} AND id = ANY($2)
         ORDER BY id"
    ))
    .bind(now)
    .bind(ids)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_trainings_by_ids(
    pool: &PgPool,
    ids: &[i64],
    now: OffsetDateTime,
) -> Result<Vec<Training>, sqlx::Error> {
    sqlx::query_as::<_, Training>(&format!(
        "SELECT {TRAINING_COLUMNS}
         FROM trainings
         WHERE {CURRENT} AND id = ANY($2)
         ORDER BY id"
    ))
    .bind(now)
    .bind(ids)
    .fetch_all(pool)
    .await
}
