use crate::errors::{AppError, AppResult};
use crate::models::{
    JobSnapshot, Prompt, Settings, Stats, StoreKey, TrackedMap, TrackedProject, RECENT_JOBS_CAP,
};
use crate::store::StoreHandle;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tracked,
    Untracked,
}

// Every mutation in this layer follows the same sequence: fresh read of the
// collection, one local edit, wholesale write back. The store offers no
// read-modify-write atomicity, so the only defense against clobbering a
// concurrent edit is never holding a collection across anything but these
// two store calls. Two writers racing inside that window still lose one
// update; that window is the documented limit of this design.
#[derive(Clone)]
pub struct Repository {
    store: StoreHandle,
}

impl Repository {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    // ─── Settings ────────────────────────────────────────────────────────

    pub async fn settings(&self) -> AppResult<Settings> {
        Ok(settings_from_raw(self.store.get(StoreKey::Settings).await?))
    }

    // A surface hands in only the fields it edits. They are merged onto the
    // freshly-read record so fields owned by other surfaces survive the
    // save, then the whole record is replaced.
    pub async fn save_settings(&self, patch: Value) -> AppResult<Settings> {
        let current = settings_from_raw(self.store.get(StoreKey::Settings).await?);
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, patch);
        let settings: Settings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("settings patch rejected: {error}")))?;
        self.store
            .set(StoreKey::Settings, serde_json::to_value(&settings)?)
            .await?;
        Ok(settings)
    }

    // ─── Tracked projects ────────────────────────────────────────────────

    pub async fn tracked_projects(&self) -> AppResult<TrackedMap> {
        Ok(collection_from_raw(
            self.store.get(StoreKey::TrackedProjects).await?,
        ))
    }

    pub async fn is_tracked(&self, project_id: &str) -> AppResult<bool> {
        Ok(self.tracked_projects().await?.contains_key(project_id))
    }

    // Presence in the map is the watched flag. Toggling an id that another
    // context already flipped lands on the opposite state, which is the
    // correct outcome for a stale button.
    pub async fn toggle_tracked(&self, candidate: TrackedProject) -> AppResult<TrackState> {
        let mut tracked = self.tracked_projects().await?;
        let state = if tracked.remove(&candidate.id).is_some() {
            TrackState::Untracked
        } else {
            tracked.insert(candidate.id.clone(), candidate);
            TrackState::Tracked
        };
        self.store
            .set(StoreKey::TrackedProjects, serde_json::to_value(&tracked)?)
            .await?;
        Ok(state)
    }

    pub async fn untrack(&self, project_id: &str) -> AppResult<bool> {
        let mut tracked = self.tracked_projects().await?;
        if tracked.remove(project_id).is_none() {
            return Ok(false);
        }
        self.store
            .set(StoreKey::TrackedProjects, serde_json::to_value(&tracked)?)
            .await?;
        Ok(true)
    }

    // ─── Prompts ─────────────────────────────────────────────────────────

    pub async fn prompts(&self) -> AppResult<Vec<Prompt>> {
        Ok(collection_from_raw(self.store.get(StoreKey::Prompts).await?))
    }

    pub async fn add_prompt(&self, title: &str, content: &str) -> AppResult<Prompt> {
        let (title, content) = validated_prompt_fields(title, content)?;
        let mut prompts = self.prompts().await?;
        let prompt = Prompt {
            id: Uuid::new_v4().to_string(),
            title,
            content,
            created_at: Utc::now(),
        };
        prompts.push(prompt.clone());
        self.store
            .set(StoreKey::Prompts, serde_json::to_value(&prompts)?)
            .await?;
        Ok(prompt)
    }

    // Addressed by id, never by position: a concurrent delete from another
    // context shifts indices but cannot redirect this edit.
    pub async fn update_prompt(
        &self,
        prompt_id: &str,
        title: &str,
        content: &str,
    ) -> AppResult<Prompt> {
        let (title, content) = validated_prompt_fields(title, content)?;
        let mut prompts = self.prompts().await?;
        let Some(existing) = prompts.iter_mut().find(|prompt| prompt.id == prompt_id) else {
            return Err(AppError::NotFound(format!(
                "No prompt with id {prompt_id}"
            )));
        };
        existing.title = title;
        existing.content = content;
        let updated = existing.clone();
        self.store
            .set(StoreKey::Prompts, serde_json::to_value(&prompts)?)
            .await?;
        Ok(updated)
    }

    pub async fn delete_prompt(&self, prompt_id: &str) -> AppResult<bool> {
        let mut prompts = self.prompts().await?;
        let before = prompts.len();
        prompts.retain(|prompt| prompt.id != prompt_id);
        if prompts.len() == before {
            return Ok(false);
        }
        self.store
            .set(StoreKey::Prompts, serde_json::to_value(&prompts)?)
            .await?;
        Ok(true)
    }

    // ─── Discovery ledger (read-only to controllers) ─────────────────────

    pub async fn stats(&self) -> AppResult<Stats> {
        Ok(collection_from_raw(self.store.get(StoreKey::Stats).await?))
    }

    pub async fn seen_jobs(&self) -> AppResult<Vec<String>> {
        Ok(collection_from_raw(
            self.store.get(StoreKey::SeenJobs).await?,
        ))
    }

    pub async fn recent_jobs(&self) -> AppResult<Vec<JobSnapshot>> {
        Ok(collection_from_raw(
            self.store.get(StoreKey::RecentJobs).await?,
        ))
    }

    // Write path for the background collaborator: dedups against the seen
    // ledger, keeps recentJobs newest-first and capped, bumps the day
    // counter, stamps the check time.
    pub async fn record_discovery(&self, found: Vec<JobSnapshot>) -> AppResult<u32> {
        let loaded = self
            .store
            .get_many(&[StoreKey::SeenJobs, StoreKey::RecentJobs, StoreKey::Stats])
            .await?;
        let mut seen: Vec<String> =
            collection_from_raw(loaded.get(&StoreKey::SeenJobs).cloned());
        let mut recent: Vec<JobSnapshot> =
            collection_from_raw(loaded.get(&StoreKey::RecentJobs).cloned());
        let mut stats: Stats = collection_from_raw(loaded.get(&StoreKey::Stats).cloned());

        let mut known: HashSet<String> = seen.iter().cloned().collect();
        let mut fresh = 0u32;
        for job in found {
            if !known.insert(job.id.clone()) {
                continue;
            }
            seen.push(job.id.clone());
            recent.insert(0, job);
            fresh += 1;
        }
        recent.truncate(RECENT_JOBS_CAP);
        stats.today_count += fresh;
        stats.last_check = Some(Utc::now());

        self.store
            .set_many(vec![
                (StoreKey::SeenJobs, serde_json::to_value(&seen)?),
                (StoreKey::RecentJobs, serde_json::to_value(&recent)?),
                (StoreKey::Stats, serde_json::to_value(&stats)?),
            ])
            .await?;
        Ok(fresh)
    }

    pub async fn clear_discovery(&self) -> AppResult<()> {
        self.store
            .set_many(vec![
                (StoreKey::SeenJobs, json!([])),
                (StoreKey::RecentJobs, json!([])),
                (StoreKey::Stats, serde_json::to_value(Stats::default())?),
            ])
            .await
    }

    // ─── Proposal template ───────────────────────────────────────────────

    pub async fn proposal_template(&self) -> AppResult<String> {
        Ok(collection_from_raw(
            self.store.get(StoreKey::ProposalTemplate).await?,
        ))
    }

    pub async fn save_proposal_template(&self, text: &str) -> AppResult<()> {
        self.store
            .set(StoreKey::ProposalTemplate, json!(text))
            .await
    }
}

// The one place defaults are filled in. Every reader goes through here, so
// no surface observes a partially-defined settings record.
pub fn settings_from_raw(raw: Option<Value>) -> Settings {
    raw.and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

fn collection_from_raw<T: DeserializeOwned + Default>(raw: Option<Value>) -> T {
    raw.and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

fn merge_json(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(target_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

fn validated_prompt_fields(title: &str, content: &str) -> AppResult<(String, String)> {
    let title = title.trim();
    let content = content.trim();
    if title.is_empty() || content.is_empty() {
        return Err(AppError::Validation(
            "prompt title and body are both required".to_string(),
        ));
    }
    Ok((title.to_string(), content.to_string()))
}
