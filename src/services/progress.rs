use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Context;
use time::OffsetDateTime;

use crate::core::time::SharedClock;
use crate::db::models::{Lesson, ProgressConfig};
use crate::db::types::{ProgressStatus, Visibility};
use crate::services::classifier::{classify, lesson_state, LessonState};
use crate::store::SharedStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatusCounts {
    pub(crate) on_time: u32,
    pub(crate) late: u32,
    pub(crate) no_answer_before_deadline: u32,
    pub(crate) no_answer_after_deadline: u32,
}

impl StatusCounts {
    /// `Optional` pairs are not outstanding work and are not counted.
    pub(crate) fn add(&mut self, status: ProgressStatus) {
        match status {
            ProgressStatus::OnTime => self.on_time += 1,
            ProgressStatus::Late => self.late += 1,
            ProgressStatus::NoAnswerBeforeDeadline => self.no_answer_before_deadline += 1,
            ProgressStatus::NoAnswerAfterDeadline => self.no_answer_after_deadline += 1,
            ProgressStatus::Optional => {}
        }
    }

    pub(crate) fn merge(&mut self, other: &StatusCounts) {
        self.on_time += other.on_time;
        self.late += other.late;
        self.no_answer_before_deadline += other.no_answer_before_deadline;
        self.no_answer_after_deadline += other.no_answer_after_deadline;
    }

    pub(crate) fn has_answer(&self) -> u32 {
        self.on_time + self.late
    }

    pub(crate) fn no_answer(&self) -> u32 {
        self.no_answer_before_deadline + self.no_answer_after_deadline
    }

    pub(crate) fn total(&self) -> u32 {
        self.has_answer() + self.no_answer()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgressItem {
    pub(crate) student_id: i64,
    pub(crate) lesson_id: i64,
    pub(crate) training_id: i64,
    pub(crate) status: ProgressStatus,
    pub(crate) deadline: Option<OffsetDateTime>,
    pub(crate) answered_at: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ProgressOverview {
    pub(crate) total_students: usize,
    pub(crate) counts: StatusCounts,
    pub(crate) per_lesson: BTreeMap<i64, StatusCounts>,
    pub(crate) per_student: BTreeMap<i64, StatusCounts>,
    /// Sorted by (student id, lesson id).
    pub(crate) items: Vec<ProgressItem>,
}

impl ProgressOverview {
    pub(crate) fn page(&self, offset: usize, limit: usize) -> &[ProgressItem] {
        let start = offset.min(self.items.len());
        let end = start.saturating_add(limit).min(self.items.len());
        &self.items[start..end]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ProgressFilter {
    pub(crate) training_id: Option<i64>,
    pub(crate) lesson_id: Option<i64>,
    pub(crate) status: Option<ProgressStatus>,
    pub(crate) include_not_started: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MentorSummary {
    pub(crate) total_students: usize,
    pub(crate) counts: StatusCounts,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct AdminOverview {
    pub(crate) mentors: BTreeMap<i64, MentorSummary>,
    pub(crate) per_lesson: BTreeMap<i64, StatusCounts>,
}

/// Read-only progress reports built from reference data and answer events.
#[derive(Clone)]
pub(crate) struct ProgressAggregator {
    store: SharedStore,
    clock: SharedClock,
}

struct LessonScope<'a> {
    lesson: &'a Lesson,
    deadline: Option<OffsetDateTime>,
}

fn lesson_scope<'a>(
    lesson: &'a Lesson,
    lesson_configs: &HashMap<i64, &ProgressConfig>,
    training_configs: &HashMap<i64, &ProgressConfig>,
) -> Option<LessonScope<'a>> {
    let lesson_cfg = lesson_configs.get(&lesson.id).copied();
    let training_cfg = training_configs.get(&lesson.training_id).copied();

    // Lesson-level config wins over the training-level one.
    let visibility = lesson_cfg.or(training_cfg).map(|config| config.visibility);
    if visibility == Some(Visibility::Hidden) {
        return None;
    }

    let deadline = lesson_cfg
        .and_then(|config| config.deadline_override)
        .or_else(|| training_cfg.and_then(|config| config.deadline_override))
        .or(lesson.deadline_date);

    Some(LessonScope { lesson, deadline })
}

impl ProgressAggregator {
    pub(crate) fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    pub(crate) async fn overview(
        &self,
        mentor_id: i64,
        filter: &ProgressFilter,
    ) -> anyhow::Result<ProgressOverview> {
        let now = self.clock.now();
        self.overview_at(mentor_id, filter, now).await
    }

    async fn overview_at(
        &self,
        mentor_id: i64,
        filter: &ProgressFilter,
        now: OffsetDateTime,
    ) -> anyhow::Result<ProgressOverview> {
        let mappings = self
            .store
            .mappings_for_mentor(mentor_id, now)
            .await
            .context("Failed to load mentor mappings")?;

        let assignments: BTreeSet<(i64, i64)> = mappings
            .iter()
            .filter(|mapping| filter.training_id.map_or(true, |id| mapping.training_id == id))
            .map(|mapping| (mapping.student_id, mapping.training_id))
            .collect();
        if assignments.is_empty() {
            return Ok(ProgressOverview::default());
        }

        let student_ids: Vec<i64> = assignments
            .iter()
            .map(|(student_id, _)| *student_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let students: HashMap<i64, i64> = self
            .store
            .students_by_ids(&student_ids, now)
            .await
            .context("Failed to load students")?
            .into_iter()
            .map(|student| (student.id, student.external_id))
            .collect();

        let mut overview =
            ProgressOverview { total_students: students.len(), ..Default::default() };
        if students.is_empty() {
            return Ok(overview);
        }

        let training_ids: Vec<i64> = assignments
            .iter()
            .map(|(_, training_id)| *training_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let lessons: Vec<Lesson> = self
            .store
            .lessons_for_trainings(&training_ids, now)
            .await
            .context("Failed to load lessons")?
            .into_iter()
            .filter(|lesson| filter.lesson_id.map_or(true, |id| lesson.id == id))
            .collect();
        if lessons.is_empty() {
            return Ok(overview);
        }

        let configs = self
            .store
            .progress_configs(&training_ids)
            .await
            .context("Failed to load progress config")?;
        let lesson_configs: HashMap<i64, &ProgressConfig> = configs
            .iter()
            .filter_map(|config| config.lesson_id.map(|lesson_id| (lesson_id, config)))
            .collect();
        let training_configs: HashMap<i64, &ProgressConfig> = configs
            .iter()
            .filter(|config| config.lesson_id.is_none())
            .map(|config| (config.training_id, config))
            .collect();

        let mut scoped: BTreeMap<i64, Vec<LessonScope<'_>>> = BTreeMap::new();
        for lesson in &lessons {
            let Some(scope) = lesson_scope(lesson, &lesson_configs, &training_configs) else {
                continue;
            };
            if !filter.include_not_started
                && lesson_state(lesson.opening_date, scope.deadline, now) == LessonState::NotStarted
            {
                continue;
            }
            scoped.entry(lesson.training_id).or_default().push(scope);
        }
        if scoped.is_empty() {
            return Ok(overview);
        }

        let user_ids: Vec<i64> = students.values().copied().collect();
        let lesson_external_ids: Vec<String> = scoped
            .values()
            .flatten()
            .map(|scope| scope.lesson.external_id.clone())
            .collect();
        let earliest = self
            .store
            .earliest_answers(&user_ids, &lesson_external_ids)
            .await
            .context("Failed to load earliest answers")?;

        let mut overrides: HashMap<(i64, i64), ProgressStatus> = HashMap::new();
        for item in self
            .store
            .progress_overrides(&student_ids)
            .await
            .context("Failed to load progress overrides")?
        {
            if let Some(status) = item.active_status(now) {
                overrides.insert((item.student_id, item.lesson_id), status);
            }
        }

        for (student_id, training_id) in &assignments {
            let Some(user_id) = students.get(student_id) else {
                continue;
            };
            let Some(lessons) = scoped.get(training_id) else {
                continue;
            };
            for scope in lessons {
                let answered_at =
                    earliest.get(&(*user_id, scope.lesson.external_id.clone())).copied();
                let status = overrides
                    .get(&(*student_id, scope.lesson.id))
                    .copied()
                    .unwrap_or_else(|| classify(scope.deadline, answered_at, now));

                if filter.status.is_some_and(|wanted| wanted != status) {
                    continue;
                }

                overview.counts.add(status);
                if status != ProgressStatus::Optional {
                    overview.per_lesson.entry(scope.lesson.id).or_default().add(status);
                    overview.per_student.entry(*student_id).or_default().add(status);
                }
                overview.items.push(ProgressItem {
                    student_id: *student_id,
                    lesson_id: scope.lesson.id,
                    training_id: *training_id,
                    status,
                    deadline: scope.deadline,
                    answered_at,
                });
            }
        }

        overview.items.sort_by_key(|item| (item.student_id, item.lesson_id));
        Ok(overview)
    }

    /// Mentor overview for every current mentor, combined per lesson.
    pub(crate) async fn admin_overview(
        &self,
        training_id: Option<i64>,
        lesson_id: Option<i64>,
    ) -> anyhow::Result<AdminOverview> {
        let now = self.clock.now();
        let mentors =
            self.store.current_mentors(now).await.context("Failed to load current mentors")?;
        let filter = ProgressFilter { training_id, lesson_id, ..ProgressFilter::default() };

        let mut admin = AdminOverview::default();
        for mentor in mentors {
            let overview = self
                .overview_at(mentor.id, &filter, now)
                .await
                .with_context(|| format!("Failed to build overview for mentor {}", mentor.id))?;
            admin.mentors.insert(
                mentor.id,
                MentorSummary { total_students: overview.total_students, counts: overview.counts },
            );
            for (lesson_id, counts) in &overview.per_lesson {
                admin.per_lesson.entry(*lesson_id).or_default().merge(counts);
            }
        }

        Ok(admin)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;
    use time::Duration;

    use super::*;
    use crate::core::time::ManualClock;
    use crate::store::memory::MemoryStore;

    const NOW: OffsetDateTime = datetime!(2025-05-10 12:00:00 UTC);

    fn aggregator(store: Arc<MemoryStore>) -> ProgressAggregator {
        ProgressAggregator::new(store, ManualClock::new(NOW))
    }

    struct Seeded {
        mentor: i64,
        anna: i64,
        boris: i64,
        training: i64,
        past: i64,
        upcoming: i64,
        open: i64,
        future: i64,
    }

    fn seed(store: &MemoryStore) -> Seeded {
        let mentor = store.add_mentor("m@example.com", "Мария", Some(1));
        let training = store.add_training("tr-1", "Тренинг");
        let anna = store.add_student(1, "Анна", "А");
        let boris = store.add_student(2, "Борис", "Б");
        store.add_mapping(anna, mentor, training);
        store.add_mapping(boris, mentor, training);

        let opened = NOW - Duration::days(14);
        let past =
            store.add_lesson(training, "past", "Прошедший", opened, Some(NOW - Duration::days(1)));
        let upcoming =
            store.add_lesson(training, "upcoming", "Скоро", opened, Some(NOW + Duration::days(1)));
        let open = store.add_lesson(training, "open", "Без срока", opened, None);
        let future = store.add_lesson(
            training,
            "future",
            "Будущий",
            NOW + Duration::days(3),
            Some(NOW + Duration::days(10)),
        );

        // Anna: past on time, upcoming answered. Boris: past late.
        store.add_event(1, "tr-1", "past", "accepted", NOW - Duration::days(2));
        store.add_event(1, "tr-1", "upcoming", "new", NOW - Duration::hours(3));
        store.add_event(2, "tr-1", "past", "new", NOW - Duration::hours(5));
        // Not a qualifying answer.
        store.add_event(2, "tr-1", "upcoming", "declined", NOW - Duration::hours(5));

        Seeded { mentor, anna, boris, training, past, upcoming, open, future }
    }

    #[tokio::test]
    async fn mentor_without_students_is_empty() {
        let store = MemoryStore::new();
        let mentor = store.add_mentor("m@example.com", "Мария", Some(1));

        let overview =
            aggregator(store).overview(mentor, &ProgressFilter::default()).await.expect("overview");

        assert_eq!(overview.total_students, 0);
        assert_eq!(overview.counts.total(), 0);
        assert!(overview.per_lesson.is_empty());
        assert!(overview.per_student.is_empty());
        assert!(overview.items.is_empty());
    }

    #[tokio::test]
    async fn classifies_every_pair_and_excludes_optional_from_counts() {
        let store = MemoryStore::new();
        let s = seed(&store);

        let overview = aggregator(store)
            .overview(s.mentor, &ProgressFilter::default())
            .await
            .expect("overview");

        assert_eq!(overview.total_students, 2);
        assert_eq!(
            overview.counts,
            StatusCounts {
                on_time: 2,
                late: 1,
                no_answer_before_deadline: 1,
                no_answer_after_deadline: 0,
            }
        );
        assert_eq!(overview.counts.has_answer(), 3);
        assert_eq!(overview.counts.no_answer(), 1);
        assert!(!overview.per_lesson.contains_key(&s.open));
        assert!(!overview.per_lesson.contains_key(&s.future));
        assert_eq!(overview.per_lesson[&s.past].late, 1);
        assert_eq!(overview.per_student[&s.boris].no_answer_before_deadline, 1);

        let keys: Vec<_> =
            overview.items.iter().map(|item| (item.student_id, item.lesson_id)).collect();
        assert_eq!(
            keys,
            vec![
                (s.anna, s.past),
                (s.anna, s.upcoming),
                (s.anna, s.open),
                (s.boris, s.past),
                (s.boris, s.upcoming),
                (s.boris, s.open),
            ]
        );
        assert_eq!(overview.items[2].status, ProgressStatus::Optional);
    }

    #[tokio::test]
    async fn include_not_started_and_status_filter() {
        let store = MemoryStore::new();
        let s = seed(&store);
        let filter = ProgressFilter {
            include_not_started: true,
            status: Some(ProgressStatus::NoAnswerBeforeDeadline),
            ..ProgressFilter::default()
        };

        let overview = aggregator(store).overview(s.mentor, &filter).await.expect("overview");

        assert!(overview
            .items
            .iter()
            .all(|item| item.status == ProgressStatus::NoAnswerBeforeDeadline));
        assert_eq!(overview.counts.no_answer_before_deadline, 3);
        assert_eq!(overview.per_lesson[&s.future].no_answer_before_deadline, 2);
        assert_eq!(overview.page(1, 10).len(), 2);
        assert_eq!(overview.page(10, 10).len(), 0);
    }

    #[tokio::test]
    async fn config_overrides_deadline_and_hides_lessons() {
        let store = MemoryStore::new();
        let s = seed(&store);
        // Moves the past deadline forward so Boris is on time.
        store.add_config(s.training, Some(s.past), Some(NOW), Visibility::Visible);
        store.add_config(s.training, Some(s.upcoming), None, Visibility::Hidden);

        let overview = aggregator(store)
            .overview(s.mentor, &ProgressFilter::default())
            .await
            .expect("overview");

        assert!(!overview.items.iter().any(|item| item.lesson_id == s.upcoming));
        assert_eq!(overview.per_lesson[&s.past].on_time, 2);
        assert_eq!(overview.counts.late, 0);
    }

    #[tokio::test]
    async fn hidden_training_config_hides_all_its_lessons() {
        let store = MemoryStore::new();
        let s = seed(&store);
        store.add_config(s.training, None, None, Visibility::Hidden);

        let overview = aggregator(store)
            .overview(s.mentor, &ProgressFilter::default())
            .await
            .expect("overview");

        assert_eq!(overview.total_students, 2);
        assert!(overview.items.is_empty());
    }

    #[tokio::test]
    async fn active_override_replaces_classified_status() {
        let store = MemoryStore::new();
        let s = seed(&store);
        store.add_override(s.boris, s.past, ProgressStatus::OnTime, Some(NOW + Duration::days(1)));
        store.add_override(
            s.boris,
            s.upcoming,
            ProgressStatus::Late,
            Some(NOW - Duration::days(1)),
        );

        let overview = aggregator(store)
            .overview(s.mentor, &ProgressFilter::default())
            .await
            .expect("overview");

        assert_eq!(overview.per_student[&s.boris].on_time, 1);
        assert_eq!(overview.per_student[&s.boris].late, 0);
        assert_eq!(overview.per_student[&s.boris].no_answer_before_deadline, 1);
    }

    #[tokio::test]
    async fn admin_overview_combines_mentors() {
        let store = MemoryStore::new();
        let s = seed(&store);
        let other = store.add_mentor("o@example.com", "Олег", None);
        let training = store.add_training("tr-2", "Другой");
        let gleb = store.add_student(3, "Глеб", "Г");
        store.add_mapping(gleb, other, training);
        let lesson = store.add_lesson(
            training,
            "other",
            "Урок",
            NOW - Duration::days(5),
            Some(NOW - Duration::days(1)),
        );

        let admin = aggregator(store).admin_overview(None, None).await.expect("admin");

        assert_eq!(admin.mentors.len(), 2);
        assert_eq!(admin.mentors[&s.mentor].total_students, 2);
        assert_eq!(admin.mentors[&other].counts.no_answer_after_deadline, 1);
        assert_eq!(admin.per_lesson[&lesson].no_answer_after_deadline, 1);
        assert_eq!(admin.per_lesson[&s.past].total(), 2);
    }
}
