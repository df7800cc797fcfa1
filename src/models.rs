use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    /// Persisted level: 1 = High, 2 = Medium, 3 = Low.
    pub fn level(self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Priority::High),
            2 => Some(Priority::Medium),
            3 => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl From<i64> for Priority {
    fn from(level: i64) -> Self {
        Self::from_level(level).unwrap_or_default()
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    #[serde(default, alias = "Id")]
    pub id: String,
    #[serde(alias = "Title")]
    pub title: String,
    #[serde(
        default,
        alias = "DueDate",
        alias = "dueDate",
        deserialize_with = "deserialize_due_date"
    )]
    pub due_date: Option<NaiveDate>,
    #[serde(default, alias = "Priority")]
    pub priority: Priority,
    #[serde(default, alias = "Labels")]
    pub labels: Vec<String>,
    #[serde(default, alias = "IsCompleted", alias = "isCompleted")]
    pub is_completed: bool,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl Task {
    pub fn new(
        title: String,
        due_date: Option<NaiveDate>,
        priority: Priority,
        labels: Vec<String>,
    ) -> Self {
        Self {
            id: new_task_id(),
            title,
            due_date,
            priority,
            labels,
            is_completed: false,
            created_at: Utc::now().timestamp(),
            completed_at: None,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        let wanted = label.to_lowercase();
        self.labels.iter().any(|l| l.to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Project {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Tasks")]
    pub tasks: Vec<Task>,
}

impl Project {
    pub fn new(name: String) -> Self {
        Self {
            name,
            tasks: Vec::new(),
        }
    }
}

/// Root of `data.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AppData {
    #[serde(default, alias = "Projects")]
    pub projects: Vec<Project>,
}

impl AppData {
    pub fn task_count(&self) -> usize {
        self.projects.iter().map(|p| p.tasks.len()).sum()
    }
}

/// Input for a new task. `priority` is the raw level as entered; anything outside 1..=3
/// falls back to the configured default.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<i64>,
    pub labels: Vec<String>,
}

/// Partial update for an existing task; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub due_date: Option<Option<NaiveDate>>,
    pub priority: Option<i64>,
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BackupSchedule {
    None,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    #[serde(default)]
    pub backup_schedule: BackupSchedule,
    #[serde(default)]
    pub last_backup_at: Option<Timestamp>,
    #[serde(default)]
    pub default_priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SettingsFile {
    pub schema_version: u32,
    pub settings: Settings,
}

pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parses a user- or file-supplied due date. Accepts `YYYY-MM-DD` and full ISO-8601
/// date-times (only the date part is kept). Blank or unparseable input yields `None`.
pub fn parse_due_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date);
    }
    input
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn deserialize_due_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(|value| {
        let parsed = parse_due_date(value);
        if parsed.is_none() && !value.trim().is_empty() {
            log::warn!("dropping unparseable due date {value:?}");
        }
        parsed
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.backup_schedule, BackupSchedule::Daily);
        assert_eq!(settings.last_backup_at, None);
        assert_eq!(settings.default_priority, Priority::Low);
    }

    #[test]
    fn settings_serde_applies_defaults_for_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{ "backup_schedule": "weekly" }"#).expect("settings");
        assert_eq!(settings.backup_schedule, BackupSchedule::Weekly);
        assert_eq!(settings.default_priority, Priority::Low);
        assert_eq!(settings.last_backup_at, None);
    }

    #[test]
    fn priority_serializes_as_level_and_coerces_out_of_range() {
        assert_eq!(serde_json::to_value(Priority::High).unwrap(), serde_json::json!(1));
        assert_eq!(serde_json::to_value(Priority::Low).unwrap(), serde_json::json!(3));

        let p: Priority = serde_json::from_str("2").unwrap();
        assert_eq!(p, Priority::Medium);
        let p: Priority = serde_json::from_str("9").unwrap();
        assert_eq!(p, Priority::Low);
        let p: Priority = serde_json::from_str("-1").unwrap();
        assert_eq!(p, Priority::Low);

        assert_eq!(Priority::from_level(0), None);
        assert_eq!(Priority::from_level(1), Some(Priority::High));
    }

    #[test]
    fn task_missing_optional_fields_take_defaults() {
        let json = r#"{ "title": "bare" }"#;
        let task: Task = serde_json::from_str(json).expect("task should deserialize");
        assert_eq!(task.title, "bare");
        assert_eq!(task.due_date, None);
        assert_eq!(task.priority, Priority::Low);
        assert!(task.labels.is_empty());
        assert!(!task.is_completed);
        assert_eq!(task.created_at, 0);
        assert!(task.id.is_empty());
    }

    #[test]
    fn task_serialization_uses_iso_dates_and_snake_case() {
        let mut task = Task::new(
            "Write report".into(),
            NaiveDate::from_ymd_opt(2025, 1, 10),
            Priority::High,
            vec!["urgent".into()],
        );
        task.id = "t1".into();
        task.created_at = 5;
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "t1",
                "title": "Write report",
                "due_date": "2025-01-10",
                "priority": 1,
                "labels": ["urgent"],
                "is_completed": false,
                "created_at": 5,
                "completed_at": null
            })
        );
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn legacy_pascal_case_file_loads() {
        let json = r#"
        {
          "Projects": [
            {
              "Name": "Work",
              "Tasks": [
                { "Title": "Old task", "DueDate": "2024-03-01T00:00:00", "Priority": 2 },
                { "Title": "No date", "DueDate": null, "Labels": ["home"], "IsCompleted": true }
              ]
            },
            { "Name": "Empty" }
          ]
        }
        "#;
        let data: AppData = serde_json::from_str(json).expect("legacy layout");
        assert_eq!(data.projects.len(), 2);
        let work = &data.projects[0];
        assert_eq!(work.name, "Work");
        assert_eq!(work.tasks[0].due_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(work.tasks[0].priority, Priority::Medium);
        assert_eq!(work.tasks[1].due_date, None);
        assert!(work.tasks[1].is_completed);
        assert_eq!(work.tasks[1].labels, vec!["home".to_string()]);
        assert!(data.projects[1].tasks.is_empty());
        assert_eq!(data.task_count(), 2);
    }

    #[test]
    fn unparseable_due_date_in_file_becomes_none() {
        let task: Task =
            serde_json::from_str(r#"{ "title": "x", "due_date": "someday" }"#).unwrap();
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn parse_due_date_accepts_dates_and_datetimes() {
        assert_eq!(parse_due_date("2025-01-10"), NaiveDate::from_ymd_opt(2025, 1, 10));
        assert_eq!(
            parse_due_date(" 2025-01-10T08:30:00Z "),
            NaiveDate::from_ymd_opt(2025, 1, 10)
        );
        assert_eq!(parse_due_date(""), None);
        assert_eq!(parse_due_date("2025-13-40"), None);
        assert_eq!(parse_due_date("tomorrow"), None);
    }

    #[test]
    fn has_label_is_case_insensitive_exact_match() {
        let task = Task::new("t".into(), None, Priority::Low, vec!["Urgent".into()]);
        assert!(task.has_label("urgent"));
        assert!(task.has_label("URGENT"));
        assert!(!task.has_label("urg"));
    }
}
