use super::{failure_notice, spawn_refresh_on_change, Confirmation, InFlight};
use crate::collaborator::{AckReply, CollaboratorClient, DebugFetchReply};
use crate::errors::AppResult;
use crate::models::{PopupSnapshot, QuickSettingsForm, Settings, Stats};
use crate::protocol::Repository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub enum CheckState {
    Idle,
    Checking,
    Found(u32),
    NoNew,
    // A delivered failure and an undeliverable request render differently:
    // the first blames the check, the second blames the connection.
    Failed(String),
    ConnectionError(String),
}

pub struct PopupController {
    repository: Repository,
    collaborator: CollaboratorClient,
    snapshot: RwLock<PopupSnapshot>,
    check: RwLock<CheckState>,
    check_busy: InFlight,
    notice: RwLock<Option<String>>,
}

impl PopupController {
    pub fn new(repository: Repository, collaborator: CollaboratorClient) -> Self {
        Self {
            repository,
            collaborator,
            snapshot: RwLock::new(PopupSnapshot::default()),
            check: RwLock::new(CheckState::Idle),
            check_busy: InFlight::default(),
            notice: RwLock::new(None),
        }
    }

    pub async fn refresh(&self) -> AppResult<()> {
        let stats = self.repository.stats().await?;
        let seen = self.repository.seen_jobs().await?;
        let settings = self.repository.settings().await?;
        let mut tracked: Vec<_> = self
            .repository
            .tracked_projects()
            .await?
            .into_values()
            .collect();
        tracked.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));

        *self.snapshot.write().await = PopupSnapshot {
            stats,
            total_seen: seen.len(),
            tracked,
            quick: Some(QuickSettingsForm::from(&settings)),
        };
        Ok(())
    }

    pub async fn snapshot(&self) -> PopupSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn check_state(&self) -> CheckState {
        self.check.read().await.clone()
    }

    pub async fn notice(&self) -> Option<String> {
        self.notice.read().await.clone()
    }

    // The popup edits five fields; everything the dashboard owns survives
    // the save because the patch is merged onto the stored record.
    pub async fn save_quick_settings(&self, form: QuickSettingsForm) -> AppResult<Settings> {
        let saved = match self
            .repository
            .save_settings(serde_json::to_value(&form)?)
            .await
        {
            Ok(saved) => saved,
            Err(error) => {
                *self.notice.write().await = Some(failure_notice(&error));
                return Err(error);
            }
        };
        self.refresh().await?;

        if let Err(error) = self.collaborator.update_alarm(saved.interval).await {
            tracing::warn!(error = %error, "alarm retune not delivered");
            *self.notice.write().await = Some(failure_notice(&error));
        }
        Ok(saved)
    }

    pub async fn untrack(
        &self,
        project_id: &str,
        confirmation: Confirmation,
    ) -> AppResult<bool> {
        if !confirmation.is_confirmed() {
            return Ok(false);
        }
        match self.repository.untrack(project_id).await {
            Ok(removed) => {
                self.refresh().await?;
                Ok(removed)
            }
            Err(error) => {
                *self.notice.write().await = Some(failure_notice(&error));
                Err(error)
            }
        }
    }

    // The trigger is disabled while a check is pending and re-enabled on
    // every exit path. An unreachable collaborator leaves stats untouched.
    pub async fn check_now(&self) -> CheckState {
        let Some(_guard) = self.check_busy.try_begin() else {
            return self.check_state().await;
        };
        *self.check.write().await = CheckState::Checking;

        let state = match self.collaborator.check_now().await {
            Ok(reply) if reply.success && reply.new_jobs > 0 => CheckState::Found(reply.new_jobs),
            Ok(reply) if reply.success => CheckState::NoNew,
            Ok(reply) => CheckState::Failed(
                reply
                    .error
                    .unwrap_or_else(|| "invalid response".to_string()),
            ),
            Err(error) => CheckState::ConnectionError(error.to_string()),
        };
        *self.check.write().await = state.clone();

        if let Err(error) = self.refresh().await {
            tracing::warn!(error = %error, "stats reload after check failed");
        }
        state
    }

    pub fn is_checking(&self) -> bool {
        self.check_busy.is_busy()
    }

    pub async fn clear_history(&self, confirmation: Confirmation) -> AppResult<Option<AckReply>> {
        if !confirmation.is_confirmed() {
            return Ok(None);
        }
        let reply = self.collaborator.clear_history().await?;
        if reply.success {
            self.refresh().await?;
        }
        Ok(Some(reply))
    }

    pub async fn test_notification(&self) -> AppResult<AckReply> {
        self.collaborator.test_notification().await
    }

    pub async fn test_sound(&self) -> AppResult<AckReply> {
        self.collaborator.test_sound().await
    }

    pub async fn debug_fetch(&self) -> AppResult<DebugFetchReply> {
        self.collaborator.debug_fetch().await
    }

    pub fn watch_changes(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.repository.store().clone();
        spawn_refresh_on_change(&store, move || {
            let controller = self.clone();
            async move { controller.refresh().await }
        })
    }
}

pub fn last_check_label(stats: &Stats, now: DateTime<Utc>) -> String {
    match stats.last_check {
        None => "not checked yet".to_string(),
        Some(at) => {
            let minutes = now.signed_duration_since(at).num_minutes();
            if minutes < 1 {
                "just now".to_string()
            } else if minutes < 60 {
                format!("{minutes} min ago")
            } else {
                at.format("%H:%M").to_string()
            }
        }
    }
}
