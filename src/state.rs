use std::collections::HashSet;

use chrono::Utc;

use crate::models::{
    new_task_id, AppData, NewTask, Priority, Project, Settings, SettingsFile, Task, TaskPatch,
};
use crate::query::{self, SortKey};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(usize),
    #[error("task not found: project {project} task {task}")]
    TaskNotFound { project: usize, task: usize },
    #[error("project name must not be blank")]
    BlankName,
    #[error("task title must not be blank")]
    BlankTitle,
}

/// The in-memory store. Mutations never touch disk; callers persist afterwards.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    data: AppData,
    settings: Settings,
}

impl AppState {
    pub fn new(data: AppData, settings: Settings) -> Self {
        let mut data = data;
        normalize_task_ids(&mut data);
        Self { data, settings }
    }

    pub fn data(&self) -> &AppData {
        &self.data
    }

    pub fn projects(&self) -> &[Project] {
        &self.data.projects
    }

    pub fn project(&self, index: usize) -> Result<&Project, StoreError> {
        self.data
            .projects
            .get(index)
            .ok_or(StoreError::ProjectNotFound(index))
    }

    pub fn task(&self, project: usize, task: usize) -> Result<&Task, StoreError> {
        self.project(project)?
            .tasks
            .get(task)
            .ok_or(StoreError::TaskNotFound { project, task })
    }

    /// Current position of the task with the given id.
    pub fn locate_task(&self, task_id: &str) -> Option<(usize, usize)> {
        self.data
            .projects
            .iter()
            .enumerate()
            .find_map(|(p, project)| {
                project
                    .tasks
                    .iter()
                    .position(|task| task.id == task_id)
                    .map(|t| (p, t))
            })
    }

    /// Swaps in a freshly loaded store. Returns how many task ids had to be assigned.
    pub fn replace_data(&mut self, data: AppData) -> usize {
        let mut data = data;
        let assigned = normalize_task_ids(&mut data);
        self.data = data;
        assigned
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn update_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn settings_file(&self) -> SettingsFile {
        SettingsFile {
            schema_version: SCHEMA_VERSION,
            settings: self.settings.clone(),
        }
    }

    pub fn add_project(&mut self, name: &str) -> Result<Project, StoreError> {
        let name = non_blank(name).ok_or(StoreError::BlankName)?;
        let project = Project::new(name);
        self.data.projects.push(project.clone());
        Ok(project)
    }

    pub fn rename_project(&mut self, index: usize, new_name: &str) -> Result<(), StoreError> {
        let name = non_blank(new_name).ok_or(StoreError::BlankName)?;
        let project = self.project_mut(index)?;
        project.name = name;
        Ok(())
    }

    pub fn delete_project(&mut self, index: usize) -> Result<Project, StoreError> {
        if index >= self.data.projects.len() {
            return Err(StoreError::ProjectNotFound(index));
        }
        Ok(self.data.projects.remove(index))
    }

    pub fn add_task(&mut self, project: usize, new_task: NewTask) -> Result<Task, StoreError> {
        let title = non_blank(&new_task.title).ok_or(StoreError::BlankTitle)?;
        let priority = self.coerce_priority(new_task.priority);
        let target = self.project_mut(project)?;
        let task = Task::new(title, new_task.due_date, priority, new_task.labels);
        target.tasks.push(task.clone());
        Ok(task)
    }

    pub fn edit_task(
        &mut self,
        project: usize,
        task: usize,
        patch: TaskPatch,
    ) -> Result<Task, StoreError> {
        let title = match &patch.title {
            Some(title) => Some(non_blank(title).ok_or(StoreError::BlankTitle)?),
            None => None,
        };
        let priority = patch.priority.map(|level| self.coerce_priority(Some(level)));
        let existing = self.task_mut(project, task)?;
        if let Some(title) = title {
            existing.title = title;
        }
        if let Some(due_date) = patch.due_date {
            existing.due_date = due_date;
        }
        if let Some(priority) = priority {
            existing.priority = priority;
        }
        if let Some(labels) = patch.labels {
            existing.labels = labels;
        }
        Ok(existing.clone())
    }

    pub fn delete_task(&mut self, project: usize, task: usize) -> Result<Task, StoreError> {
        self.task(project, task)?;
        Ok(self.data.projects[project].tasks.remove(task))
    }

    /// Marks the task completed and takes it out of its project.
    pub fn complete_task(&mut self, project: usize, task: usize) -> Result<Task, StoreError> {
        let mut completed = self.delete_task(project, task)?;
        completed.is_completed = true;
        completed.completed_at = Some(Utc::now().timestamp());
        Ok(completed)
    }

    /// Puts a task back at `index` (clamped), undoing a `complete_task` whose archive write failed.
    pub fn restore_task(
        &mut self,
        project: usize,
        index: usize,
        task: Task,
    ) -> Result<(), StoreError> {
        let mut task = task;
        task.is_completed = false;
        task.completed_at = None;
        let target = self.project_mut(project)?;
        let index = index.min(target.tasks.len());
        target.tasks.insert(index, task);
        Ok(())
    }

    /// Moves a task to the end of `dest_project`. The destination is checked before the
    /// task is removed, so a failed move leaves the store unchanged.
    pub fn move_task(
        &mut self,
        source_project: usize,
        source_task: usize,
        dest_project: usize,
    ) -> Result<Task, StoreError> {
        self.project(dest_project)?;
        self.task(source_project, source_task)?;
        let task = self.data.projects[source_project].tasks.remove(source_task);
        self.data.projects[dest_project].tasks.push(task.clone());
        Ok(task)
    }

    /// Drag-reorder within a project: the task ends up at `to`, clamped to the last slot.
    pub fn reorder_task(
        &mut self,
        project: usize,
        from: usize,
        to: usize,
    ) -> Result<Task, StoreError> {
        self.task(project, from)?;
        let tasks = &mut self.data.projects[project].tasks;
        let task = tasks.remove(from);
        let to = to.min(tasks.len());
        tasks.insert(to, task.clone());
        Ok(task)
    }

    pub fn sort_tasks(&mut self, project: usize, key: SortKey) -> Result<(), StoreError> {
        let target = self.project_mut(project)?;
        query::sort_tasks(&mut target.tasks, key);
        Ok(())
    }

    pub fn filter_by_label(&self, project: usize, label: &str) -> Result<Vec<&Task>, StoreError> {
        Ok(query::filter_by_label(&self.project(project)?.tasks, label))
    }

    pub fn search_by_title(&self, project: usize, query: &str) -> Result<Vec<&Task>, StoreError> {
        Ok(query::search_by_title(&self.project(project)?.tasks, query))
    }

    fn project_mut(&mut self, index: usize) -> Result<&mut Project, StoreError> {
        self.data
            .projects
            .get_mut(index)
            .ok_or(StoreError::ProjectNotFound(index))
    }

    fn task_mut(&mut self, project: usize, task: usize) -> Result<&mut Task, StoreError> {
        self.project_mut(project)?
            .tasks
            .get_mut(task)
            .ok_or(StoreError::TaskNotFound { project, task })
    }

    fn coerce_priority(&self, level: Option<i64>) -> Priority {
        level
            .and_then(Priority::from_level)
            .unwrap_or(self.settings.default_priority)
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Gives every task without a usable id (missing, blank or already taken) a fresh one.
/// Returns the number of ids assigned.
pub fn normalize_task_ids(data: &mut AppData) -> usize {
    let mut seen = HashSet::new();
    let mut assigned = 0;
    for task in data.projects.iter_mut().flat_map(|p| p.tasks.iter_mut()) {
        if task.id.trim().is_empty() || seen.contains(&task.id) {
            let fresh = new_task_id();
            if !task.id.is_empty() {
                log::warn!("reassigning task id {:?} -> {fresh}", task.id);
            }
            task.id = fresh;
            assigned += 1;
        }
        seen.insert(task.id.clone());
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupSchedule;
    use crate::query::{SortDirection, SortField};
    use chrono::NaiveDate;

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..NewTask::default()
        }
    }

    fn make_state(projects: Vec<(&str, Vec<&str>)>) -> AppState {
        let mut state = AppState::default();
        for (p, (name, titles)) in projects.into_iter().enumerate() {
            state.add_project(name).unwrap();
            for title in titles {
                state.add_task(p, new_task(title)).unwrap();
            }
        }
        state
    }

    fn titles(state: &AppState, project: usize) -> Vec<String> {
        state.projects()[project]
            .tasks
            .iter()
            .map(|t| t.title.clone())
            .collect()
    }

    #[test]
    fn new_reassigns_duplicate_and_empty_ids() {
        let mut a = Task::new("a".into(), None, Priority::Low, Vec::new());
        a.id = "same".into();
        let mut b = a.clone();
        b.title = "b".into();
        let mut c = a.clone();
        c.id = " ".into();
        let data = AppData {
            projects: vec![Project {
                name: "p".into(),
                tasks: vec![a, b, c],
            }],
        };
        let state = AppState::new(data, Settings::default());
        let ids: HashSet<_> = state.projects()[0].tasks.iter().map(|t| &t.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(state.projects()[0].tasks[0].id, "same");
    }

    #[test]
    fn normalize_task_ids_counts_assignments_once() {
        let legacy = r#"{"Projects":[{"Name":"Work","Tasks":[{"Title":"a"},{"Title":"b"}]}]}"#;
        let mut data: AppData = serde_json::from_str(legacy).unwrap();
        assert_eq!(normalize_task_ids(&mut data), 2);
        assert_eq!(normalize_task_ids(&mut data), 0);

        let mut state = AppState::default();
        let mut legacy: AppData =
            serde_json::from_str(r#"{"projects":[{"name":"p","tasks":[{"title":"x"}]}]}"#).unwrap();
        assert_eq!(state.replace_data(legacy.clone()), 1);
        normalize_task_ids(&mut legacy);
        assert_eq!(state.replace_data(legacy), 0);
    }

    #[test]
    fn project_crud_rejects_blank_names() {
        let mut state = AppState::default();
        assert_eq!(state.add_project("   "), Err(StoreError::BlankName));
        assert!(state.projects().is_empty());

        let work = state.add_project("  Work ").unwrap();
        assert_eq!(work.name, "Work");
        assert!(work.tasks.is_empty());

        assert_eq!(state.rename_project(0, ""), Err(StoreError::BlankName));
        assert_eq!(state.projects()[0].name, "Work");
        state.rename_project(0, "Office").unwrap();
        assert_eq!(state.projects()[0].name, "Office");
        assert_eq!(
            state.rename_project(3, "x"),
            Err(StoreError::ProjectNotFound(3))
        );

        // Names need not be unique.
        state.add_project("Office").unwrap();
        assert_eq!(state.projects().len(), 2);
    }

    #[test]
    fn delete_project_removes_only_its_tasks() {
        let mut state = make_state(vec![
            ("a", vec!["a1", "a2"]),
            ("b", vec!["b1"]),
            ("c", vec!["c1"]),
        ]);
        let removed = state.delete_project(1).unwrap();
        assert_eq!(removed.name, "b");
        assert_eq!(removed.tasks.len(), 1);
        assert_eq!(state.projects().len(), 2);
        assert_eq!(titles(&state, 0), vec!["a1", "a2"]);
        assert_eq!(titles(&state, 1), vec!["c1"]);
        assert_eq!(state.delete_project(5), Err(StoreError::ProjectNotFound(5)));
    }

    #[test]
    fn add_task_validates_title_and_coerces_priority() {
        let mut state = make_state(vec![("p", vec![])]);
        assert_eq!(
            state.add_task(0, new_task(" ")),
            Err(StoreError::BlankTitle)
        );
        assert_eq!(
            state.add_task(1, new_task("x")),
            Err(StoreError::ProjectNotFound(1))
        );

        let task = state
            .add_task(
                0,
                NewTask {
                    title: "Write report".into(),
                    due_date: NaiveDate::from_ymd_opt(2025, 1, 10),
                    priority: Some(1),
                    labels: vec!["urgent".into()],
                },
            )
            .unwrap();
        assert_eq!(task.priority, Priority::High);
        assert!(!task.is_completed);
        assert!(task.created_at > 0);

        let odd = state
            .add_task(
                0,
                NewTask {
                    title: "odd".into(),
                    priority: Some(7),
                    ..NewTask::default()
                },
            )
            .unwrap();
        assert_eq!(odd.priority, Priority::Low);

        let mut settings = Settings::default();
        settings.default_priority = Priority::Medium;
        state.update_settings(settings);
        let defaulted = state.add_task(0, new_task("defaulted")).unwrap();
        assert_eq!(defaulted.priority, Priority::Medium);

        assert_eq!(state.projects()[0].tasks.len(), 3);
        assert_ne!(state.projects()[0].tasks[0].id, state.projects()[0].tasks[1].id);
    }

    #[test]
    fn edit_task_overwrites_only_given_fields() {
        let mut state = make_state(vec![("p", vec![])]);
        state
            .add_task(
                0,
                NewTask {
                    title: "orig".into(),
                    due_date: NaiveDate::from_ymd_opt(2025, 2, 2),
                    priority: Some(2),
                    labels: vec!["x".into()],
                },
            )
            .unwrap();
        let id = state.projects()[0].tasks[0].id.clone();

        let edited = state
            .edit_task(
                0,
                0,
                TaskPatch {
                    labels: Some(vec!["y".into()]),
                    due_date: Some(None),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        assert_eq!(edited.title, "orig");
        assert_eq!(edited.priority, Priority::Medium);
        assert_eq!(edited.due_date, None);
        assert_eq!(edited.labels, vec!["y".to_string()]);
        assert_eq!(edited.id, id);

        // A blank title rejects the whole patch.
        let res = state.edit_task(
            0,
            0,
            TaskPatch {
                title: Some("".into()),
                priority: Some(1),
                ..TaskPatch::default()
            },
        );
        assert_eq!(res, Err(StoreError::BlankTitle));
        assert_eq!(state.task(0, 0).unwrap().priority, Priority::Medium);

        assert_eq!(
            state.edit_task(0, 4, TaskPatch::default()),
            Err(StoreError::TaskNotFound { project: 0, task: 4 })
        );
    }

    #[test]
    fn delete_and_complete_remove_the_task() {
        let mut state = make_state(vec![("p", vec!["a", "b", "c"])]);
        let removed = state.delete_task(0, 1).unwrap();
        assert_eq!(removed.title, "b");
        assert_eq!(titles(&state, 0), vec!["a", "c"]);

        let completed = state.complete_task(0, 0).unwrap();
        assert!(completed.is_completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(titles(&state, 0), vec!["c"]);

        state.restore_task(0, 0, completed.clone()).unwrap();
        assert_eq!(titles(&state, 0), vec!["a", "c"]);
        assert!(!state.task(0, 0).unwrap().is_completed);
        assert_eq!(state.task(0, 0).unwrap().id, completed.id);

        assert!(state.complete_task(0, 9).is_err());
    }

    #[test]
    fn move_task_keeps_task_in_exactly_one_project() {
        let mut state = make_state(vec![("a", vec!["a1", "a2"]), ("b", vec!["b1"])]);
        let id = state.task(0, 0).unwrap().id.clone();

        let moved = state.move_task(0, 0, 1).unwrap();
        assert_eq!(moved.id, id);
        assert_eq!(titles(&state, 0), vec!["a2"]);
        assert_eq!(titles(&state, 1), vec!["b1", "a1"]);
        assert_eq!(state.locate_task(&id), Some((1, 1)));
        assert_eq!(state.data().task_count(), 3);

        // Same project moves to the end.
        state.move_task(1, 0, 1).unwrap();
        assert_eq!(titles(&state, 1), vec!["a1", "b1"]);

        // Bad destination leaves everything in place.
        assert_eq!(state.move_task(0, 0, 7), Err(StoreError::ProjectNotFound(7)));
        assert_eq!(titles(&state, 0), vec!["a2"]);
        assert_eq!(
            state.move_task(0, 3, 1),
            Err(StoreError::TaskNotFound { project: 0, task: 3 })
        );
        assert_eq!(state.data().task_count(), 3);
    }

    #[test]
    fn reorder_task_inserts_at_position() {
        let mut state = make_state(vec![("p", vec!["a", "b", "c", "d"])]);
        state.reorder_task(0, 3, 0).unwrap();
        assert_eq!(titles(&state, 0), vec!["d", "a", "b", "c"]);
        state.reorder_task(0, 0, 2).unwrap();
        assert_eq!(titles(&state, 0), vec!["a", "b", "d", "c"]);
        state.reorder_task(0, 0, 99).unwrap();
        assert_eq!(titles(&state, 0), vec!["b", "d", "c", "a"]);
        assert!(state.reorder_task(0, 4, 0).is_err());
    }

    #[test]
    fn work_project_scenario() {
        let mut state = AppState::default();
        state.add_project("Work").unwrap();
        state
            .add_task(
                0,
                NewTask {
                    title: "Clean desk".into(),
                    due_date: None,
                    priority: Some(3),
                    labels: Vec::new(),
                },
            )
            .unwrap();
        state
            .add_task(
                0,
                NewTask {
                    title: "Write report".into(),
                    due_date: NaiveDate::from_ymd_opt(2025, 1, 10),
                    priority: Some(1),
                    labels: vec!["urgent".into()],
                },
            )
            .unwrap();

        let before = state.projects()[0].tasks.clone();
        let urgent: Vec<String> = state
            .filter_by_label(0, "urgent")
            .unwrap()
            .iter()
            .map(|t| t.title.clone())
            .collect();
        assert_eq!(urgent, vec!["Write report"]);
        assert_eq!(state.filter_by_label(0, "urgent").unwrap().len(), 1);
        assert_eq!(state.search_by_title(0, "DESK").unwrap().len(), 1);
        assert_eq!(state.projects()[0].tasks, before);

        state
            .sort_tasks(0, SortKey::new(SortField::DueDate, SortDirection::Ascending))
            .unwrap();
        assert_eq!(titles(&state, 0), vec!["Write report", "Clean desk"]);
        assert!(state.filter_by_label(2, "urgent").is_err());
    }

    #[test]
    fn settings_file_includes_schema_version() {
        let mut state = AppState::default();
        let mut settings = Settings::default();
        settings.backup_schedule = BackupSchedule::None;
        state.update_settings(settings.clone());
        let file = state.settings_file();
        assert_eq!(file.schema_version, SCHEMA_VERSION);
        assert_eq!(file.settings, settings);
    }
}
