pub mod collaborator;
pub mod contexts;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod store;

use crate::collaborator::CollaboratorClient;
use crate::contexts::dashboard::DashboardController;
use crate::contexts::page::PageController;
use crate::contexts::popup::PopupController;
use crate::errors::{AppError, AppResult};
use crate::protocol::Repository;
use crate::store::StoreHandle;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

// One store, one repository, one collaborator channel; each context gets its
// own controller over the same handles. Must be built inside a tokio
// runtime: opening the store spawns its actor task.
#[derive(Clone)]
pub struct AppCore {
    store: StoreHandle,
    repository: Repository,
    collaborator: CollaboratorClient,
}

impl AppCore {
    pub fn open(data_dir: &Path, collaborator: CollaboratorClient) -> AppResult<Self> {
        let store = StoreHandle::open(&data_dir.join("state.sqlite"))?;
        let repository = Repository::new(store.clone());
        Ok(Self {
            store,
            repository,
            collaborator,
        })
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn collaborator(&self) -> &CollaboratorClient {
        &self.collaborator
    }

    pub fn page(&self, page_url: &str) -> AppResult<PageController> {
        PageController::new(self.repository.clone(), page_url)
    }

    pub fn popup(&self) -> PopupController {
        PopupController::new(self.repository.clone(), self.collaborator.clone())
    }

    pub fn dashboard(&self) -> DashboardController {
        DashboardController::new(self.repository.clone(), self.collaborator.clone())
    }
}

pub fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| AppError::Io(error.to_string()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "gigwatch.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
