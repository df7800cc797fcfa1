use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::events::StatePayload;
use crate::models::{AppData, BackupSchedule, NewTask, Project, Settings, Task, TaskPatch};
use crate::query::SortKey;
use crate::state::{normalize_task_ids, AppState, StoreError};
use crate::storage::{write_atomic_bytes, Storage, StorageError};

#[derive(Debug, serde::Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> CommandResult<T> {
    pub fn into_result(self) -> Result<T, String> {
        match (self.ok, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_else(|| "unknown error".to_string())),
        }
    }
}

/// What a frontend provides to the command layer.
pub trait CommandCtx {
    fn data_dir(&self) -> Result<PathBuf, StorageError>;
    fn emit_state_updated(&self, payload: StatePayload);
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
    }
}

fn err<T>(message: &str) -> CommandResult<T> {
    log::warn!("command failed: {message}");
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    }
}

fn open_storage(ctx: &impl CommandCtx) -> Result<Storage, StorageError> {
    let storage = Storage::new(ctx.data_dir()?);
    storage.ensure_dirs()?;
    Ok(storage)
}

/// Flushes the whole store (plus settings) and notifies the frontend.
pub fn persist(ctx: &impl CommandCtx, state: &mut AppState) -> Result<(), StorageError> {
    let storage = open_storage(ctx)?;
    let now = Utc::now().timestamp();
    let should_backup = should_auto_backup(state.settings(), now);
    if should_backup {
        storage.save_with_backup(state.data())?;
        let mut settings = state.settings().clone();
        settings.last_backup_at = Some(now);
        state.update_settings(settings);
    } else {
        storage.save(state.data())?;
    }
    storage.save_settings(&state.settings_file())?;
    ctx.emit_state_updated(StatePayload::from_state(state));
    Ok(())
}

fn should_auto_backup(settings: &Settings, now: i64) -> bool {
    match settings.backup_schedule {
        BackupSchedule::None => false,
        BackupSchedule::Daily => {
            is_new_period(settings.last_backup_at, now, |dt| (dt.year(), dt.ordinal()))
        }
        BackupSchedule::Weekly => is_new_period(settings.last_backup_at, now, |dt| {
            let week = dt.iso_week();
            (week.year(), week.week())
        }),
        BackupSchedule::Monthly => {
            is_new_period(settings.last_backup_at, now, |dt| (dt.year(), dt.month()))
        }
    }
}

fn is_new_period(
    last: Option<i64>,
    now: i64,
    period: impl Fn(DateTime<Local>) -> (i32, u32),
) -> bool {
    match last {
        None => true,
        Some(ts) => {
            let last_period = Local.timestamp_opt(ts, 0).single().map(&period);
            let now_period = Local.timestamp_opt(now, 0).single().map(&period);
            last_period != now_period
        }
    }
}

/// Persists after a successful mutation; a failed one leaves disk alone.
fn commit<T>(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    result: Result<T, StoreError>,
) -> CommandResult<T> {
    let value = match result {
        Ok(value) => value,
        Err(error) => return err(&error.to_string()),
    };
    if let Err(error) = persist(ctx, state) {
        return err(&format!("storage error: {error}"));
    }
    ok(value)
}

/// Writes ids handed out at load time straight back so later reads see the same ones.
fn save_assigned_ids(storage: &Storage, data: &AppData, assigned: usize) {
    if assigned == 0 {
        return;
    }
    match storage.save(data) {
        Ok(()) => log::info!("assigned {assigned} task ids"),
        Err(error) => log::warn!("failed to save {assigned} assigned task ids: {error}"),
    }
}

pub fn load_state(ctx: &impl CommandCtx) -> CommandResult<AppState> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let mut data = storage.load();
    let assigned = normalize_task_ids(&mut data);
    save_assigned_ids(&storage, &data, assigned);
    let settings = match storage.load_settings() {
        Ok(file) => file.settings,
        Err(error) => {
            if !error.is_not_found() {
                log::warn!("failed to load settings, using defaults: {error}");
            }
            Settings::default()
        }
    };
    log::info!(
        "loaded {} projects with {} tasks from {}",
        data.projects.len(),
        data.task_count(),
        storage.root().display()
    );
    ok(AppState::new(data, settings))
}

pub fn add_project(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    name: &str,
) -> CommandResult<Project> {
    let result = state.add_project(name);
    if let Ok(project) = &result {
        log::info!("added project {:?}", project.name);
    }
    commit(ctx, state, result)
}

pub fn rename_project(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    index: usize,
    new_name: &str,
) -> CommandResult<bool> {
    let result = state.rename_project(index, new_name).map(|_| true);
    commit(ctx, state, result)
}

pub fn delete_project(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    index: usize,
) -> CommandResult<Project> {
    let result = state.delete_project(index);
    if let Ok(project) = &result {
        log::info!(
            "deleted project {:?} with {} tasks",
            project.name,
            project.tasks.len()
        );
    }
    commit(ctx, state, result)
}

pub fn add_task(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    project: usize,
    new_task: NewTask,
) -> CommandResult<Task> {
    let result = state.add_task(project, new_task);
    if let Ok(task) = &result {
        log::info!("added task {} to project {project}", task.id);
    }
    commit(ctx, state, result)
}

pub fn edit_task(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    project: usize,
    task: usize,
    patch: TaskPatch,
) -> CommandResult<Task> {
    let result = state.edit_task(project, task, patch);
    commit(ctx, state, result)
}

pub fn delete_task(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    project: usize,
    task: usize,
) -> CommandResult<Task> {
    let result = state.delete_task(project, task);
    if let Ok(task) = &result {
        log::info!("deleted task {}", task.id);
    }
    commit(ctx, state, result)
}

/// Takes the task out of its project and into the archive, then persists the store.
/// If either write fails the task goes back where it was, and an archive entry made
/// by this call is dropped again.
pub fn complete_task(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    project: usize,
    task: usize,
) -> CommandResult<Task> {
    let completed = match state.complete_task(project, task) {
        Ok(completed) => completed,
        Err(error) => return err(&error.to_string()),
    };
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => {
            restore_completed(state, project, task, completed);
            return err(&format!("archive error: {error}"));
        }
    };
    let added = match storage.archive_completed(std::slice::from_ref(&completed)) {
        Ok(added) => added,
        Err(error) => {
            restore_completed(state, project, task, completed);
            return err(&format!("archive error: {error}"));
        }
    };
    log::info!("archived task {}", completed.id);
    if let Err(error) = persist(ctx, state) {
        if added > 0 {
            if let Err(unarchive_error) = storage.unarchive(&completed.id) {
                log::error!("failed to drop archived task {}: {unarchive_error}", completed.id);
            }
        }
        restore_completed(state, project, task, completed);
        return err(&format!("storage error: {error}"));
    }
    ok(completed)
}

fn restore_completed(state: &mut AppState, project: usize, task: usize, completed: Task) {
    if let Err(error) = state.restore_task(project, task, completed) {
        log::error!("failed to restore completed task: {error}");
    }
}

pub fn move_task(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    source_project: usize,
    source_task: usize,
    dest_project: usize,
) -> CommandResult<Task> {
    let result = state.move_task(source_project, source_task, dest_project);
    if let Ok(task) = &result {
        log::info!("moved task {} from project {source_project} to {dest_project}", task.id);
    }
    commit(ctx, state, result)
}

pub fn reorder_task(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    project: usize,
    from: usize,
    to: usize,
) -> CommandResult<Task> {
    let result = state.reorder_task(project, from, to);
    commit(ctx, state, result)
}

pub fn sort_tasks(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    project: usize,
    key: SortKey,
) -> CommandResult<bool> {
    let result = state.sort_tasks(project, key).map(|_| true);
    commit(ctx, state, result)
}

pub fn filter_by_label(state: &AppState, project: usize, label: &str) -> CommandResult<Vec<Task>> {
    match state.filter_by_label(project, label) {
        Ok(tasks) => ok(tasks.into_iter().cloned().collect()),
        Err(error) => err(&error.to_string()),
    }
}

pub fn search_by_title(state: &AppState, project: usize, query: &str) -> CommandResult<Vec<Task>> {
    match state.search_by_title(project, query) {
        Ok(tasks) => ok(tasks.into_iter().cloned().collect()),
        Err(error) => err(&error.to_string()),
    }
}

pub fn update_settings(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    settings: Settings,
) -> CommandResult<Settings> {
    let previous = state.settings().clone();
    state.update_settings(settings);
    if let Err(error) = persist(ctx, state) {
        // Keep the running state consistent with what is on disk.
        state.update_settings(previous);
        return err(&format!("storage error: {error}"));
    }
    ok(state.settings().clone())
}

pub fn export_data(ctx: &impl CommandCtx, dest: &Path) -> CommandResult<String> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    if let Err(error) = storage.export_to(dest) {
        return err(&format!("export error: {error}"));
    }
    ok(dest.to_string_lossy().to_string())
}

/// Replaces the store with the file at `source`. Nothing changes when the file is
/// missing or unreadable.
pub fn import_data(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    source: &Path,
) -> CommandResult<AppData> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let data = match storage.import_from(source) {
        Ok(data) => data,
        Err(error) => return err(&format!("import error: {error}")),
    };
    let assigned = state.replace_data(data);
    save_assigned_ids(&storage, state.data(), assigned);
    ctx.emit_state_updated(StatePayload::from_state(state));
    ok(state.data().clone())
}

pub fn list_archive(ctx: &impl CommandCtx) -> CommandResult<Vec<Task>> {
    match open_storage(ctx) {
        Ok(storage) => ok(storage.load_archive()),
        Err(error) => err(&format!("storage error: {error}")),
    }
}

#[derive(Debug, serde::Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub modified_at: i64,
}

pub fn list_backups(ctx: &impl CommandCtx) -> CommandResult<Vec<BackupEntry>> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    match storage.list_backups() {
        Ok(list) => ok(list
            .into_iter()
            .map(|(name, modified_at)| BackupEntry { name, modified_at })
            .collect()),
        Err(error) => err(&format!("storage error: {error}")),
    }
}

pub fn create_backup(ctx: &impl CommandCtx, state: &mut AppState) -> CommandResult<bool> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    if let Err(error) = storage.save_with_backup(state.data()) {
        return err(&format!("storage error: {error}"));
    }
    let mut settings = state.settings().clone();
    settings.last_backup_at = Some(Utc::now().timestamp());
    state.update_settings(settings);
    if let Err(error) = storage.save_settings(&state.settings_file()) {
        return err(&format!("storage error: {error}"));
    }
    ok(true)
}

pub fn restore_backup(
    ctx: &impl CommandCtx,
    state: &mut AppState,
    filename: &str,
) -> CommandResult<AppData> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let data = match storage.restore_backup(filename) {
        Ok(data) => data,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    log::info!("restored backup {filename}");
    let assigned = state.replace_data(data);
    save_assigned_ids(&storage, state.data(), assigned);
    ctx.emit_state_updated(StatePayload::from_state(state));
    ok(state.data().clone())
}

pub fn delete_backup(ctx: &impl CommandCtx, filename: &str) -> CommandResult<bool> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    if let Err(error) = storage.delete_backup(filename) {
        return err(&format!("storage error: {error}"));
    }
    ok(true)
}

fn export_default_path(root: &Path, ext: &str) -> PathBuf {
    let exports_dir = root.join("exports");
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    exports_dir.join(format!("project-todo-{stamp}.{ext}"))
}

pub fn export_markdown(ctx: &impl CommandCtx, state: &AppState) -> CommandResult<String> {
    let storage = match open_storage(ctx) {
        Ok(storage) => storage,
        Err(error) => return err(&format!("storage error: {error}")),
    };
    let path = export_default_path(storage.root(), "md");
    let generated_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let out = render_markdown(state.projects(), &storage.load_archive(), &generated_at);

    let written = path
        .parent()
        .map(fs::create_dir_all)
        .unwrap_or(Ok(()))
        .map_err(StorageError::from)
        .and_then(|_| write_atomic_bytes(&path, out.as_bytes()));
    if let Err(error) = written {
        return err(&format!("export error: {error}"));
    }
    ok(path.to_string_lossy().to_string())
}

fn render_markdown(projects: &[Project], archived: &[Task], generated_at: &str) -> String {
    let mut out = String::new();
    out.push_str("# Project Todo Export\n\n");
    out.push_str(&format!("Generated at: {generated_at}\n\n"));

    let mut write_section = |title: &str, tasks: &[Task]| {
        out.push_str(&format!("## {title}\n\n"));
        if tasks.is_empty() {
            out.push_str("_Empty_\n\n");
            return;
        }
        for task in tasks {
            let mark = if task.is_completed { "x" } else { " " };
            let due = task
                .due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "none".to_string());
            out.push_str(&format!(
                "- [{mark}] {} (due: {due}, priority: {})",
                task.title,
                task.priority.label()
            ));
            for label in &task.labels {
                out.push_str(&format!(" #{label}"));
            }
            out.push('\n');
        }
        out.push('\n');
    };

    for project in projects {
        write_section(&project.name, &project.tasks);
    }
    write_section("Archived", archived);
    out
}
