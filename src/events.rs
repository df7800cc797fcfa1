use crate::models::{Project, Settings};
use crate::state::AppState;

pub const EVENT_STATE_UPDATED: &str = "state_updated";

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatePayload {
    pub projects: Vec<Project>,
    pub settings: Settings,
}

impl StatePayload {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            projects: state.projects().to_vec(),
            settings: state.settings().clone(),
        }
    }
}
