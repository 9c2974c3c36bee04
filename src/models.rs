use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RECENT_JOBS_CAP: usize = 10;
pub const DEFAULT_AI_CHAT_URL: &str = "https://chatgpt.com/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreKey {
    TrackedProjects,
    Prompts,
    Settings,
    Stats,
    SeenJobs,
    RecentJobs,
    ProposalTemplate,
}

impl StoreKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrackedProjects => "trackedProjects",
            Self::Prompts => "prompts",
            Self::Settings => "settings",
            Self::Stats => "stats",
            Self::SeenJobs => "seenJobs",
            Self::RecentJobs => "recentJobs",
            Self::ProposalTemplate => "proposalTemplate",
        }
    }
}

pub type TrackedMap = BTreeMap<String, TrackedProject>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedProject {
    pub id: String,
    pub title: String,
    pub url: String,
    pub status: String,
    pub communications: u32,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub title: String,
    pub url: String,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub keywords_include: String,
    pub keywords_exclude: String,
    pub min_budget: u32,
    pub max_duration: u32,
    pub min_hiring_rate: u32,
    pub min_client_age: u32,
    pub development: bool,
    pub ai: bool,
    pub all: bool,
    pub sound: bool,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub interval: u32,
    pub ai_chat_url: String,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: String,
    pub quiet_hours_end: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keywords_include: String::new(),
            keywords_exclude: String::new(),
            min_budget: 0,
            max_duration: 0,
            min_hiring_rate: 0,
            min_client_age: 0,
            development: true,
            ai: true,
            all: false,
            sound: true,
            telegram_token: String::new(),
            telegram_chat_id: String::new(),
            interval: 1,
            ai_chat_url: DEFAULT_AI_CHAT_URL.to_string(),
            quiet_hours_enabled: false,
            quiet_hours_start: "00:00".to_string(),
            quiet_hours_end: "07:00".to_string(),
        }
    }
}

impl Settings {
    pub fn telegram_configured(&self) -> bool {
        !self.telegram_token.trim().is_empty() && !self.telegram_chat_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Stats {
    pub today_count: u32,
    pub last_check: Option<DateTime<Utc>>,
}

// Surface forms. The popup edits only this subset; everything else the
// stored record carries must survive a popup save untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickSettingsForm {
    pub development: bool,
    pub ai: bool,
    pub all: bool,
    pub sound: bool,
    pub interval: u32,
}

impl From<&Settings> for QuickSettingsForm {
    fn from(settings: &Settings) -> Self {
        Self {
            development: settings.development,
            ai: settings.ai,
            all: settings.all,
            sound: settings.sound,
            interval: settings.interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptForm {
    pub id: Option<String>,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopupSnapshot {
    pub stats: Stats,
    pub total_seen: usize,
    pub tracked: Vec<TrackedProject>,
    pub quick: Option<QuickSettingsForm>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub stats: Stats,
    pub total_seen: usize,
    pub tracked: Vec<TrackedProject>,
    pub prompts: Vec<Prompt>,
    pub settings: Option<Settings>,
    pub proposal_template: String,
}
