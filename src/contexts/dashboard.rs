use super::{failure_notice, spawn_refresh_on_change, Confirmation, InFlight};
use crate::collaborator::{AckReply, CheckNowReply, CollaboratorClient};
use crate::errors::AppResult;
use crate::models::{DashboardSnapshot, Prompt, PromptForm, Settings};
use crate::protocol::Repository;
use std::sync::Arc;
use tokio::sync::RwLock;

// The full-fidelity surface: every collection, the whole settings form,
// prompts CRUD, the proposal template.
pub struct DashboardController {
    repository: Repository,
    collaborator: CollaboratorClient,
    snapshot: RwLock<DashboardSnapshot>,
    check_busy: InFlight,
    notice: RwLock<Option<String>>,
}

impl DashboardController {
    pub fn new(repository: Repository, collaborator: CollaboratorClient) -> Self {
        Self {
            repository,
            collaborator,
            snapshot: RwLock::new(DashboardSnapshot::default()),
            check_busy: InFlight::default(),
            notice: RwLock::new(None),
        }
    }

    pub async fn refresh(&self) -> AppResult<()> {
        let stats = self.repository.stats().await?;
        let seen = self.repository.seen_jobs().await?;
        let prompts = self.repository.prompts().await?;
        let settings = self.repository.settings().await?;
        let proposal_template = self.repository.proposal_template().await?;
        let mut tracked: Vec<_> = self
            .repository
            .tracked_projects()
            .await?
            .into_values()
            .collect();
        tracked.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));

        *self.snapshot.write().await = DashboardSnapshot {
            stats,
            total_seen: seen.len(),
            tracked,
            prompts,
            settings: Some(settings),
            proposal_template,
        };
        Ok(())
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn notice(&self) -> Option<String> {
        self.notice.read().await.clone()
    }

    // The dashboard form carries the full canonical field set; it still goes
    // through the same merge-onto-fresh-read path as every other save.
    pub async fn save_settings(&self, form: Settings) -> AppResult<Settings> {
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

    // Add when the form has no id, edit in place when it does.
    pub async fn save_prompt(&self, form: PromptForm) -> AppResult<Prompt> {
        let result = match &form.id {
            Some(id) => {
                self.repository
                    .update_prompt(id, &form.title, &form.content)
                    .await
            }
            None => self.repository.add_prompt(&form.title, &form.content).await,
        };
        match result {
            Ok(prompt) => {
                self.refresh().await?;
                *self.notice.write().await = None;
                Ok(prompt)
            }
            Err(error) => {
                *self.notice.write().await = Some(failure_notice(&error));
                Err(error)
            }
        }
    }

    pub async fn delete_prompt(
        &self,
        prompt_id: &str,
        confirmation: Confirmation,
    ) -> AppResult<bool> {
        if !confirmation.is_confirmed() {
            return Ok(false);
        }
        match self.repository.delete_prompt(prompt_id).await {
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

    pub async fn save_proposal(&self, text: &str) -> AppResult<()> {
        match self.repository.save_proposal_template(text).await {
            Ok(()) => self.refresh().await,
            Err(error) => {
                *self.notice.write().await = Some(failure_notice(&error));
                Err(error)
            }
        }
    }

    pub async fn test_notification(&self) -> AppResult<AckReply> {
        self.collaborator.test_notification().await
    }

    pub async fn test_sound(&self) -> AppResult<AckReply> {
        self.collaborator.test_sound().await
    }

    // Credentials are persisted first so the poller reads what the form
    // shows, not what the last save happened to leave behind.
    pub async fn test_telegram(&self, form: Settings) -> AppResult<AckReply> {
        self.repository
            .save_settings(serde_json::to_value(&form)?)
            .await?;
        self.collaborator.test_telegram().await
    }

    // None means a check was already pending and nothing was sent.
    pub async fn check_now(&self) -> AppResult<Option<CheckNowReply>> {
        let Some(_guard) = self.check_busy.try_begin() else {
            return Ok(None);
        };
        let reply = self.collaborator.check_now().await?;
        if let Err(error) = self.refresh().await {
            tracing::warn!(error = %error, "reload after check failed");
        }
        Ok(Some(reply))
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

    // The reset wipes every collection; readers rebuild from defaults.
    pub async fn reset_settings(&self, confirmation: Confirmation) -> AppResult<bool> {
        if !confirmation.is_confirmed() {
            return Ok(false);
        }
        match self.repository.store().clear().await {
            Ok(()) => {
                self.refresh().await?;
                Ok(true)
            }
            Err(error) => {
                *self.notice.write().await = Some(failure_notice(&error));
                Err(error)
            }
        }
    }

    pub fn watch_changes(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.repository.store().clone();
        spawn_refresh_on_change(&store, move || {
            let controller = self.clone();
            async move { controller.refresh().await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::DashboardController;
    use crate::collaborator::CollaboratorClient;
    use crate::contexts::Confirmation;
    use crate::errors::AppError;
    use crate::models::{PromptForm, Settings, StoreKey};
    use crate::protocol::Repository;
    use crate::store::StoreHandle;
    use serde_json::json;
    use tokio::time::Duration;

    fn dashboard(
        dir: &tempfile::TempDir,
        collaborator: CollaboratorClient,
    ) -> DashboardController {
        let store = StoreHandle::open(&dir.path().join("state.sqlite")).expect("open store");
        DashboardController::new(Repository::new(store), collaborator)
    }

    fn acking_client() -> CollaboratorClient {
        let (client, mut endpoint) = CollaboratorClient::channel();
        tokio::spawn(async move {
            while let Some(envelope) = endpoint.recv().await {
                let _ = envelope.reply.send(json!({ "success": true }));
            }
        });
        client
    }

    #[tokio::test]
    async fn full_form_save_lands_and_retunes_the_alarm() {
        let dir = tempfile::tempdir().expect("tempdir");
        let controller = dashboard(&dir, acking_client());

        let form = Settings {
            interval: 10,
            keywords_include: "rust, scraping".to_string(),
            quiet_hours_enabled: true,
            ..Settings::default()
        };
        let saved = controller.save_settings(form).await.expect("save");
        assert_eq!(saved.interval, 10);

        let snapshot = controller.snapshot().await;
        let settings = snapshot.settings.expect("settings loaded");
        assert!(settings.quiet_hours_enabled);
        assert_eq!(settings.keywords_include, "rust, scraping");
        assert!(controller.notice().await.is_none());
    }

    #[tokio::test]
    async fn prompt_lifecycle_runs_through_identifiers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let controller = dashboard(&dir, acking_client());

        let added = controller
            .save_prompt(PromptForm {
                id: None,
                title: "intro".to_string(),
                content: "hello client".to_string(),
            })
            .await
            .expect("add");

        let edited = controller
            .save_prompt(PromptForm {
                id: Some(added.id.clone()),
                title: "intro".to_string(),
                content: "hello there".to_string(),
            })
            .await
            .expect("edit");
        assert_eq!(edited.id, added.id);
        assert_eq!(edited.content, "hello there");

        assert!(controller
            .delete_prompt(&added.id, Confirmation::Confirmed)
            .await
            .expect("delete"));
        assert!(controller.snapshot().await.prompts.is_empty());
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_inline_before_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let controller = dashboard(&dir, acking_client());

        let error = controller
            .save_prompt(PromptForm {
                id: None,
                title: String::new(),
                content: "body".to_string(),
            })
            .await
            .expect_err("blank title");
        assert!(matches!(error, AppError::Validation(_)));
        assert!(controller.notice().await.is_some());
        assert!(controller.snapshot().await.prompts.is_empty());
    }

    #[tokio::test]
    async fn dismissed_reset_leaves_the_store_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let controller = dashboard(&dir, acking_client());

        controller
            .repository
            .store()
            .set(StoreKey::ProposalTemplate, json!("my proposal"))
            .await
            .expect("seed");

        assert!(!controller
            .reset_settings(Confirmation::Dismissed)
            .await
            .expect("dismissed"));
        assert_eq!(
            controller
                .repository
                .proposal_template()
                .await
                .expect("template"),
            "my proposal"
        );

        assert!(controller
            .reset_settings(Confirmation::Confirmed)
            .await
            .expect("confirmed"));
        assert_eq!(
            controller
                .repository
                .proposal_template()
                .await
                .expect("template"),
            ""
        );
    }

    #[tokio::test]
    async fn unreachable_collaborator_does_not_fail_a_settings_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (client, endpoint) = CollaboratorClient::channel_with_timeout(Duration::from_millis(20));
        drop(endpoint);
        let controller = dashboard(&dir, client);

        let saved = controller
            .save_settings(Settings {
                interval: 4,
                ..Settings::default()
            })
            .await
            .expect("save succeeds without the poller");
        assert_eq!(saved.interval, 4);
        // The undelivered retune is surfaced, not swallowed.
        assert!(controller.notice().await.is_some());
    }

    #[tokio::test]
    async fn check_now_is_single_flight() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (client, mut endpoint) = CollaboratorClient::channel();
        let controller = std::sync::Arc::new(dashboard(&dir, client));

        let slow = tokio::spawn(async move {
            let envelope = endpoint.recv().await.expect("envelope");
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = envelope.reply.send(json!({ "success": true, "newJobs": 1 }));
            endpoint
        });

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.check_now().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Second click while the first is pending: nothing is sent.
        let second = controller.check_now().await.expect("second call");
        assert!(second.is_none());

        let first = first.await.expect("join").expect("first call");
        assert_eq!(first.expect("reply").new_jobs, 1);
        drop(slow);
    }
}
