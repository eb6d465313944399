pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod models;
pub mod session;
pub mod store;
pub mod tasks;

use std::sync::Arc;

use api::{ApiClient, Navigator};
use config::Config;
use session::SessionManager;
use store::Store;
use tasks::TaskService;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Storage(#[from] error::StorageError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Everything a frontend needs, wired around one [`SessionManager`].
#[derive(Clone)]
pub struct Client {
    pub session: SessionManager,
    pub api: ApiClient,
    pub tasks: TaskService,
}

impl Client {
    /// Opens the store at `config.state_path` and restores any session.
    pub fn init(config: &Config) -> Result<Self, InitError> {
        let store = Store::open(&config.state_path)?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: &Config, store: Store) -> Result<Self, InitError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        let session = SessionManager::init(config, store, http.clone())?;
        let api = ApiClient::new(http, config.api_url.clone(), session.clone());
        let tasks = TaskService::new(api.clone());

        tracing::info!(api_url = %config.api_url, "Client initialized");
        Ok(Client {
            session,
            api,
            tasks,
        })
    }

    /// Attaches a navigator so authorization failures redirect to login.
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.api = self.api.with_navigator(navigator);
        self.tasks = TaskService::new(self.api.clone());
        self
    }

    pub fn teardown(&self) {
        self.session.teardown();
    }
}
