use super::{failure_notice, spawn_refresh_on_change, InFlight};
use crate::errors::{AppError, AppResult};
use crate::models::TrackedProject;
use crate::protocol::{Repository, TrackState};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::RwLock;

static PROJECT_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/project/(\d+)").expect("valid project path regex"));

pub fn project_id_from_url(url: &str) -> Option<String> {
    PROJECT_PATH_RE
        .captures(url)
        .map(|captures| captures[1].to_string())
}

// What the scraper hands over; extraction itself lives outside this core.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDetails {
    pub title: String,
    pub url: String,
    pub status: String,
    pub communications: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackButton {
    Tracked,
    Untracked,
}

// The context injected into a single project page: one button, one id.
pub struct PageController {
    repository: Repository,
    project_id: String,
    button: RwLock<TrackButton>,
    toggle_busy: InFlight,
    notice: RwLock<Option<String>>,
}

impl PageController {
    pub fn new(repository: Repository, page_url: &str) -> AppResult<Self> {
        let project_id = project_id_from_url(page_url)
            .ok_or_else(|| AppError::NotFound(format!("no project id in url {page_url}")))?;
        Ok(Self {
            repository,
            project_id,
            button: RwLock::new(TrackButton::Untracked),
            toggle_busy: InFlight::default(),
            notice: RwLock::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    // Button state comes from the store, never from what this context last
    // drew: another surface may have toggled the flag since.
    pub async fn refresh(&self) -> AppResult<()> {
        let tracked = self.repository.is_tracked(&self.project_id).await?;
        *self.button.write().await = if tracked {
            TrackButton::Tracked
        } else {
            TrackButton::Untracked
        };
        Ok(())
    }

    pub async fn toggle(&self, details: ProjectDetails) -> AppResult<TrackButton> {
        let Some(_guard) = self.toggle_busy.try_begin() else {
            // A toggle is already pending; the control is disabled.
            return Ok(self.button().await);
        };

        let candidate = TrackedProject {
            id: self.project_id.clone(),
            title: details.title,
            url: details.url,
            status: details.status,
            communications: details.communications,
            first_seen: Utc::now(),
        };
        match self.repository.toggle_tracked(candidate).await {
            Ok(state) => {
                let button = match state {
                    TrackState::Tracked => TrackButton::Tracked,
                    TrackState::Untracked => TrackButton::Untracked,
                };
                *self.button.write().await = button;
                *self.notice.write().await = None;
                Ok(button)
            }
            Err(error) => {
                // The button keeps its prior state; only the notice changes.
                *self.notice.write().await = Some(failure_notice(&error));
                Err(error)
            }
        }
    }

    pub async fn button(&self) -> TrackButton {
        *self.button.read().await
    }

    pub async fn notice(&self) -> Option<String> {
        self.notice.read().await.clone()
    }

    pub fn watch_changes(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.repository.store().clone();
        spawn_refresh_on_change(&store, move || {
            let controller = self.clone();
            async move { controller.refresh().await }
        })
    }
}
