use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::info;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::ApiError;
use crate::models::{NewTask, Task, TaskUpdate};

/// Task operations over the API, with the last fetched list cached until the
/// next mutation.
#[derive(Clone)]
pub struct TaskService {
    api: ApiClient,
    cache: Arc<RwLock<Option<Vec<Task>>>>,
}

impl TaskService {
    pub fn new(api: ApiClient) -> Self {
        TaskService {
            api,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn list(&self) -> Result<Vec<Task>, ApiError> {
        if let Some(tasks) = self.cached() {
            return Ok(tasks);
        }
        self.refresh().await
    }

    pub async fn refresh(&self) -> Result<Vec<Task>, ApiError> {
        let tasks: Vec<Task> = self.api.get("/tasks").await?.unwrap_or_default();
        info!(count = tasks.len(), "Listed tasks");
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(tasks.clone());
        Ok(tasks)
    }

    pub fn cached(&self) -> Option<Vec<Task>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, ApiError> {
        self.api
            .get(&format!("/tasks/{id}"))
            .await?
            .ok_or_else(|| empty_body("GET /tasks/{id}"))
    }

    pub async fn create(&self, title: &str) -> Result<Task, ApiError> {
        self.create_task(&NewTask {
            title: title.to_string(),
            description: None,
        })
        .await
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let created: Task = self
            .api
            .post("/tasks", task)
            .await?
            .ok_or_else(|| empty_body("POST /tasks"))?;
        self.invalidate();
        info!(id = %created.id, title = %created.title, "Created task");
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, update: &TaskUpdate) -> Result<Task, ApiError> {
        let updated: Task = self
            .api
            .patch(&format!("/tasks/{id}"), update)
            .await?
            .ok_or_else(|| empty_body("PATCH /tasks/{id}"))?;
        self.invalidate();
        info!(id = %updated.id, completed = updated.is_completed, "Updated task");
        Ok(updated)
    }

    /// Flips completion relative to the given copy of the task.
    pub async fn toggle(&self, task: &Task) -> Result<Task, ApiError> {
        self.update(
            task.id,
            &TaskUpdate {
                is_completed: Some(!task.is_completed),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        self.api.delete(&format!("/tasks/{id}")).await?;
        self.invalidate();
        info!(%id, "Deleted task");
        Ok(())
    }

    fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

fn empty_body(what: &str) -> ApiError {
    ApiError::Decode {
        status: reqwest::StatusCode::OK,
        message: format!("{what} returned no task"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOp {
    Load,
    Create,
    Update,
    Toggle,
    Delete,
}

impl TaskOp {
    /// Notification text for a failed operation.
    pub fn failure_message(self, err: &ApiError) -> String {
        format!("{self}: {}", err.user_message())
    }
}

impl fmt::Display for TaskOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskOp::Load => "Failed to load tasks",
            TaskOp::Create => "Failed to create task",
            TaskOp::Update => "Failed to update task",
            TaskOp::Toggle => "Failed to update task status",
            TaskOp::Delete => "Failed to delete task",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn failure_messages_carry_operation() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, br#"{"detail":"Task not found"}"#);
        assert_eq!(
            TaskOp::Delete.failure_message(&err),
            "Failed to delete task: Task not found. It may have been deleted."
        );

        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, b"");
        assert_eq!(
            TaskOp::Toggle.failure_message(&err),
            "Failed to update task status: Server error. Please try again later."
        );
    }

    #[test]
    fn validation_failure_message() {
        let body = br#"{"detail":[{"loc":["body","title"],"msg":"String should have at least 1 character"}]}"#;
        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert_eq!(
            TaskOp::Create.failure_message(&err),
            "Failed to create task: Title is required and cannot be empty."
        );
    }
}
