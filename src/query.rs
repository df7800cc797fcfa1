use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::models::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    DueDate,
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

pub fn filter_by_label<'a>(tasks: &'a [Task], label: &str) -> Vec<&'a Task> {
    tasks.iter().filter(|task| task.has_label(label)).collect()
}

pub fn search_by_title<'a>(tasks: &'a [Task], query: &str) -> Vec<&'a Task> {
    let query = query.to_lowercase();
    tasks
        .iter()
        .filter(|task| task.title.to_lowercase().contains(&query))
        .collect()
}

/// Stable in-place sort. Undated tasks count as the latest date when ascending and the
/// earliest when descending, so they always land after the dated ones.
pub fn sort_tasks(tasks: &mut [Task], key: SortKey) {
    match key.field {
        SortField::DueDate => {
            tasks.sort_by(|a, b| compare_due(a.due_date, b.due_date, key.direction))
        }
        SortField::Priority => tasks.sort_by(|a, b| {
            key.direction
                .apply(a.priority.level().cmp(&b.priority.level()))
        }),
    }
}

fn compare_due(a: Option<NaiveDate>, b: Option<NaiveDate>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => direction.apply(a.cmp(&b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
