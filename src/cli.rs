use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::commands::{self, CommandCtx};
use crate::events::{StatePayload, EVENT_STATE_UPDATED};
use crate::models::{parse_due_date, BackupSchedule, NewTask, Priority, Task, TaskPatch};
use crate::query::{SortDirection, SortField, SortKey};
use crate::state::AppState;
use crate::storage::StorageError;

const DATA_DIR_ENV: &str = "PROJECT_TODO_DIR";
const APP_DIR_NAME: &str = "project-todo";

#[derive(Parser)]
#[command(name = "project-todo", about = "Projects and tasks kept in a local JSON file", version)]
pub struct Cli {
    /// Directory holding data.json, settings.json, archive.json and backups/
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show all projects and their tasks
    List,
    /// Add, rename or delete projects
    Project(ProjectCmd),
    /// Add, edit, complete, move and query tasks
    Task(TaskCmd),
    /// Copy the data file to PATH
    Export { path: PathBuf },
    /// Replace the data file with the one at PATH
    Import { path: PathBuf },
    /// Write a markdown summary into exports/
    ExportMd,
    /// Show completed tasks from the archive
    Archive,
    /// Manage backups of the data file
    Backup(BackupCmd),
    /// Show or change settings
    Config(ConfigCmd),
}

#[derive(Args)]
pub struct ProjectCmd {
    #[command(subcommand)]
    pub action: ProjectAction,
}

#[derive(Subcommand)]
pub enum ProjectAction {
    Add { name: String },
    Rename { index: usize, name: String },
    Delete { index: usize },
}

#[derive(Args)]
pub struct TaskCmd {
    #[command(subcommand)]
    pub action: TaskAction,
}

#[derive(Subcommand)]
pub enum TaskAction {
    Add(AddTaskArgs),
    Edit(EditTaskArgs),
    Delete { project: usize, task: usize },
    /// Mark done and move to the archive
    Complete { project: usize, task: usize },
    /// Move to the end of another project
    Move { project: usize, task: usize, dest: usize },
    /// Move within a project to position TO
    Reorder { project: usize, from: usize, to: usize },
    Sort(SortArgs),
    Filter { project: usize, label: String },
    Search { project: usize, query: String },
    /// Print the current position of a task id
    Find { id: String },
}

#[derive(Args)]
pub struct AddTaskArgs {
    pub project: usize,
    pub title: String,
    /// Due date, YYYY-MM-DD
    #[arg(long)]
    pub due: Option<String>,
    /// 1 = high, 2 = medium, 3 = low
    #[arg(long)]
    pub priority: Option<i64>,
    #[arg(long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args)]
pub struct EditTaskArgs {
    pub project: usize,
    pub task: usize,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,
    #[arg(long)]
    pub clear_due: bool,
    #[arg(long)]
    pub priority: Option<i64>,
    /// Replaces all labels
    #[arg(long = "label")]
    pub labels: Vec<String>,
    #[arg(long, conflicts_with = "labels")]
    pub clear_labels: bool,
}

#[derive(Args)]
pub struct SortArgs {
    pub project: usize,
    #[arg(long, value_enum, default_value_t = SortBy::Due)]
    pub by: SortBy,
    #[arg(long)]
    pub desc: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SortBy {
    Due,
    Priority,
}

#[derive(Args)]
pub struct BackupCmd {
    #[command(subcommand)]
    pub action: BackupAction,
}

#[derive(Subcommand)]
pub enum BackupAction {
    Create,
    List,
    Restore { name: String },
    Delete { name: String },
}

#[derive(Args)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Set {
        #[arg(long, value_enum)]
        backup_schedule: Option<ScheduleArg>,
        /// 1 = high, 2 = medium, 3 = low
        #[arg(long)]
        default_priority: Option<i64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ScheduleArg {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl From<ScheduleArg> for BackupSchedule {
    fn from(value: ScheduleArg) -> Self {
        match value {
            ScheduleArg::None => BackupSchedule::None,
            ScheduleArg::Daily => BackupSchedule::Daily,
            ScheduleArg::Weekly => BackupSchedule::Weekly,
            ScheduleArg::Monthly => BackupSchedule::Monthly,
        }
    }
}

struct CliCtx {
    data_dir: PathBuf,
}

impl CommandCtx for CliCtx {
    fn data_dir(&self) -> Result<PathBuf, StorageError> {
        Ok(self.data_dir.clone())
    }

    fn emit_state_updated(&self, payload: StatePayload) {
        log::debug!(
            "{EVENT_STATE_UPDATED}: {} projects",
            payload.projects.len()
        );
    }
}

/// `--data-dir`, then `$PROJECT_TODO_DIR`, then the platform data directory.
pub fn resolve_data_dir(flag: Option<&Path>) -> Result<PathBuf, String> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| format!("no data directory found; pass --data-dir or set {DATA_DIR_ENV}"))
}

pub fn dispatch(data_dir: &Path, command: Commands) -> Result<(), String> {
    let ctx = CliCtx {
        data_dir: data_dir.to_path_buf(),
    };
    let mut state = commands::load_state(&ctx).into_result()?;

    match command {
        Commands::List => print_projects(&state),
        Commands::Project(cmd) => run_project(&ctx, &mut state, cmd.action)?,
        Commands::Task(cmd) => run_task(&ctx, &mut state, cmd.action)?,
        Commands::Export { path } => {
            let path = commands::export_data(&ctx, &path).into_result()?;
            println!("exported to {path}");
        }
        Commands::Import { path } => {
            let data = commands::import_data(&ctx, &mut state, &path).into_result()?;
            println!(
                "imported {} projects with {} tasks",
                data.projects.len(),
                data.task_count()
            );
        }
        Commands::ExportMd => {
            let path = commands::export_markdown(&ctx, &state).into_result()?;
            println!("wrote {path}");
        }
        Commands::Archive => {
            for task in commands::list_archive(&ctx).into_result()? {
                println!("{}", format_task(&task));
            }
        }
        Commands::Backup(cmd) => run_backup(&ctx, &mut state, cmd.action)?,
        Commands::Config(cmd) => run_config(&ctx, &mut state, cmd.action)?,
    }
    Ok(())
}

fn run_project(ctx: &CliCtx, state: &mut AppState, action: ProjectAction) -> Result<(), String> {
    match action {
        ProjectAction::Add { name } => {
            let project = commands::add_project(ctx, state, &name).into_result()?;
            println!("added project [{}] {}", state.projects().len() - 1, project.name);
        }
        ProjectAction::Rename { index, name } => {
            commands::rename_project(ctx, state, index, &name).into_result()?;
        }
        ProjectAction::Delete { index } => {
            let project = commands::delete_project(ctx, state, index).into_result()?;
            println!(
                "deleted project {} and {} tasks",
                project.name,
                project.tasks.len()
            );
        }
    }
    Ok(())
}

fn run_task(ctx: &CliCtx, state: &mut AppState, action: TaskAction) -> Result<(), String> {
    match action {
        TaskAction::Add(args) => {
            let new_task = NewTask {
                title: args.title,
                due_date: due_or_warn(args.due.as_deref()),
                priority: args.priority,
                labels: args.labels,
            };
            let task = commands::add_task(ctx, state, args.project, new_task).into_result()?;
            println!("added {}", format_task(&task));
        }
        TaskAction::Edit(args) => {
            let due_date = if args.clear_due {
                Some(None)
            } else {
                args.due.as_deref().map(|raw| due_or_warn(Some(raw)))
            };
            let labels = if args.clear_labels {
                Some(Vec::new())
            } else if args.labels.is_empty() {
                None
            } else {
                Some(args.labels)
            };
            let patch = TaskPatch {
                title: args.title,
                due_date,
                priority: args.priority,
                labels,
            };
            let task =
                commands::edit_task(ctx, state, args.project, args.task, patch).into_result()?;
            println!("updated {}", format_task(&task));
        }
        TaskAction::Delete { project, task } => {
            let task = commands::delete_task(ctx, state, project, task).into_result()?;
            println!("deleted {}", task.title);
        }
        TaskAction::Complete { project, task } => {
            let task = commands::complete_task(ctx, state, project, task).into_result()?;
            println!("archived {}", task.title);
        }
        TaskAction::Move {
            project,
            task,
            dest,
        } => {
            let task = commands::move_task(ctx, state, project, task, dest).into_result()?;
            println!("moved {} to project {dest}", task.title);
        }
        TaskAction::Reorder { project, from, to } => {
            commands::reorder_task(ctx, state, project, from, to).into_result()?;
            print_project(state, project);
        }
        TaskAction::Sort(args) => {
            let field = match args.by {
                SortBy::Due => SortField::DueDate,
                SortBy::Priority => SortField::Priority,
            };
            let direction = if args.desc {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            let key = SortKey::new(field, direction);
            commands::sort_tasks(ctx, state, args.project, key).into_result()?;
            print_project(state, args.project);
        }
        TaskAction::Filter { project, label } => {
            for task in commands::filter_by_label(state, project, &label).into_result()? {
                println!("{}", format_task(&task));
            }
        }
        TaskAction::Search { project, query } => {
            for task in commands::search_by_title(state, project, &query).into_result()? {
                println!("{}", format_task(&task));
            }
        }
        TaskAction::Find { id } => match state.locate_task(&id) {
            Some((project, task)) => println!("project {project} task {task}"),
            None => return Err(format!("no task with id {id}")),
        },
    }
    Ok(())
}

fn run_backup(ctx: &CliCtx, state: &mut AppState, action: BackupAction) -> Result<(), String> {
    match action {
        BackupAction::Create => {
            commands::create_backup(ctx, state).into_result()?;
            println!("backup created");
        }
        BackupAction::List => {
            for entry in commands::list_backups(ctx).into_result()? {
                println!("{}\t{}", entry.name, entry.modified_at);
            }
        }
        BackupAction::Restore { name } => {
            let data = commands::restore_backup(ctx, state, &name).into_result()?;
            println!("restored {} projects", data.projects.len());
        }
        BackupAction::Delete { name } => {
            commands::delete_backup(ctx, &name).into_result()?;
        }
    }
    Ok(())
}

fn run_config(ctx: &CliCtx, state: &mut AppState, action: ConfigAction) -> Result<(), String> {
    let mut settings = state.settings().clone();
    if let ConfigAction::Set {
        backup_schedule,
        default_priority,
    } = action
    {
        if let Some(schedule) = backup_schedule {
            settings.backup_schedule = schedule.into();
        }
        if let Some(level) = default_priority {
            settings.default_priority = Priority::from_level(level)
                .ok_or_else(|| format!("priority must be 1, 2 or 3, got {level}"))?;
        }
        settings = commands::update_settings(ctx, state, settings).into_result()?;
    }
    let json = serde_json::to_string_pretty(&settings).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn due_or_warn(raw: Option<&str>) -> Option<chrono::NaiveDate> {
    let raw = raw?;
    let parsed = parse_due_date(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        eprintln!("warning: ignoring unparseable due date {raw:?}");
    }
    parsed
}

fn format_task(task: &Task) -> String {
    let mark = if task.is_completed { "x" } else { " " };
    let due = task
        .due_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    let labels = task
        .labels
        .iter()
        .map(|l| format!("#{l}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "[{mark}] {}  due {due}  {}  {labels}  ({})",
        task.title,
        task.priority.label(),
        task.id
    )
}

fn print_project(state: &AppState, index: usize) {
    if let Ok(project) = state.project(index) {
        println!("[{index}] {}", project.name);
        for (t, task) in project.tasks.iter().enumerate() {
            println!("    [{t}] {}", format_task(task));
        }
    }
}

fn print_projects(state: &AppState) {
    if state.projects().is_empty() {
        println!("no projects");
    }
    for index in 0..state.projects().len() {
        print_project(state, index);
    }
}
