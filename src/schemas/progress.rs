use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::pagination::{default_limit, PaginatedResponse};
use crate::core::time::format_rfc3339;
use crate::db::types::ProgressStatus;
use crate::services::progress::{
    AdminOverview, MentorSummary, ProgressFilter, ProgressItem, ProgressOverview, StatusCounts,
};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct MentorProgressQuery {
    #[validate(range(min = 1, message = "training_id must be positive"))]
    pub(crate) training_id: Option<i64>,
    #[validate(range(min = 1, message = "lesson_id must be positive"))]
    pub(crate) lesson_id: Option<i64>,
    #[serde(default)]
    pub(crate) status: Option<ProgressStatus>,
    #[serde(default)]
    pub(crate) include_not_started: bool,
    #[serde(default)]
    #[validate(range(min = 0, message = "offset must be non-negative"))]
    pub(crate) offset: i64,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 500, message = "limit must be between 1 and 500"))]
    pub(crate) limit: i64,
}

impl MentorProgressQuery {
    pub(crate) fn filter(&self) -> ProgressFilter {
        ProgressFilter {
            training_id: self.training_id,
            lesson_id: self.lesson_id,
            status: self.status,
            include_not_started: self.include_not_started,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AdminProgressQuery {
    #[validate(range(min = 1, message = "training_id must be positive"))]
    pub(crate) training_id: Option<i64>,
    #[validate(range(min = 1, message = "lesson_id must be positive"))]
    pub(crate) lesson_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusCountsResponse {
    pub(crate) on_time: u32,
    pub(crate) late: u32,
    pub(crate) no_answer_before_deadline: u32,
    pub(crate) no_answer_after_deadline: u32,
    pub(crate) has_answer: u32,
    pub(crate) no_answer: u32,
    pub(crate) total: u32,
}

impl From<&StatusCounts> for StatusCountsResponse {
    fn from(counts: &StatusCounts) -> Self {
        Self {
            on_time: counts.on_time,
            late: counts.late,
            no_answer_before_deadline: counts.no_answer_before_deadline,
            no_answer_after_deadline: counts.no_answer_after_deadline,
            has_answer: counts.has_answer(),
            no_answer: counts.no_answer(),
            total: counts.total(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LessonCountsResponse {
    pub(crate) lesson_id: i64,
    pub(crate) counts: StatusCountsResponse,
}

#[derive(Debug, Serialize)]
pub(crate) struct StudentCountsResponse {
    pub(crate) student_id: i64,
    pub(crate) counts: StatusCountsResponse,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProgressItemResponse {
    pub(crate) student_id: i64,
    pub(crate) lesson_id: i64,
    pub(crate) training_id: i64,
    pub(crate) status: ProgressStatus,
    pub(crate) deadline: Option<String>,
    pub(crate) answered_at: Option<String>,
}

impl ProgressItemResponse {
    pub(crate) fn from_item(item: &ProgressItem) -> Self {
        Self {
            student_id: item.student_id,
            lesson_id: item.lesson_id,
            training_id: item.training_id,
            status: item.status,
            deadline: item.deadline.map(format_rfc3339),
            answered_at: item.answered_at.map(format_rfc3339),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct MentorProgressResponse {
    pub(crate) mentor_id: i64,
    pub(crate) total_students: usize,
    pub(crate) counts: StatusCountsResponse,
    pub(crate) per_lesson: Vec<LessonCountsResponse>,
    pub(crate) per_student: Vec<StudentCountsResponse>,
    pub(crate) items: PaginatedResponse<ProgressItemResponse>,
}

impl MentorProgressResponse {
    pub(crate) fn from_overview(
        mentor_id: i64,
        overview: &ProgressOverview,
        offset: i64,
        limit: i64,
    ) -> Self {
        let page = overview.page(offset.max(0) as usize, limit.max(0) as usize);
        Self {
            mentor_id,
            total_students: overview.total_students,
            counts: StatusCountsResponse::from(&overview.counts),
            per_lesson: lesson_counts(&overview.per_lesson),
            per_student: student_counts(&overview.per_student),
            items: PaginatedResponse {
                items: page.iter().map(ProgressItemResponse::from_item).collect(),
                total_count: overview.items.len() as i64,
                offset,
                limit,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct MentorSummaryResponse {
    pub(crate) mentor_id: i64,
    pub(crate) total_students: usize,
    pub(crate) counts: StatusCountsResponse,
}

impl MentorSummaryResponse {
    pub(crate) fn from_summary(mentor_id: i64, summary: &MentorSummary) -> Self {
        Self {
            mentor_id,
            total_students: summary.total_students,
            counts: StatusCountsResponse::from(&summary.counts),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AdminProgressResponse {
    pub(crate) mentors: Vec<MentorSummaryResponse>,
    pub(crate) per_lesson: Vec<LessonCountsResponse>,
}

impl AdminProgressResponse {
    pub(crate) fn from_overview(overview: &AdminOverview) -> Self {
        Self {
            mentors: overview
                .mentors
                .iter()
                .map(|(mentor_id, summary)| {
                    MentorSummaryResponse::from_summary(*mentor_id, summary)
                })
                .collect(),
            per_lesson: lesson_counts(&overview.per_lesson),
        }
    }
}

fn lesson_counts(per_lesson: &BTreeMap<i64, StatusCounts>) -> Vec<LessonCountsResponse> {
    per_lesson
        .iter()
        .map(|(lesson_id, counts)| LessonCountsResponse {
            lesson_id: *lesson_id,
            counts: StatusCountsResponse::from(counts),
        })
        .collect()
}

fn student_counts(
    per_student: &BTreeMap<i64, StatusCounts>,
) -> Vec<StudentCountsResponse> {
    per_student
        .iter()
        .map(|(student_id, counts)| StudentCountsResponse {
            student_id: *student_id,
            counts: StatusCountsResponse::from(counts),
        })
        .collect()
}
