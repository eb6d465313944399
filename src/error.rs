use reqwest::StatusCode;
use serde_json::Value;

/// Failure of a request issued through the API gateway. Built once, where the
/// response or transport error is first seen.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// 400 or 422 with field-level detail.
    #[error("{message}")]
    Validation {
        status: StatusCode,
        detail: String,
        message: String,
    },
    /// 401. The session has already been invalidated when this is returned.
    #[error("{message}")]
    Unauthorized { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    Conflict { message: String },
    #[error("{message}")]
    Server { status: StatusCode, message: String },
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    /// The request never produced a response.
    #[error("{message}")]
    Network { message: String },
    #[error("invalid response body ({status}): {message}")]
    Decode { status: StatusCode, message: String },
    #[error("failed to encode request body: {0}")]
    Encode(String),
    #[error("invalid endpoint {0:?}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Classifies a non-success response. `body` is the raw response body.
    pub fn from_status(status: StatusCode, body: &[u8]) -> Self {
        let detail = extract_detail(body);
        let message = detail.clone().unwrap_or_else(|| {
            format!(
                "API request failed: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string()
        });

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let detail = detail.unwrap_or_default();
                let message = match validation_message(&detail) {
                    Some(mapped) => mapped.to_string(),
                    None if detail.is_empty() && status == StatusCode::BAD_REQUEST => {
                        "Invalid request. Please try again.".to_string()
                    }
                    None if detail.is_empty() => message,
                    None => detail.clone(),
                };
                ApiError::Validation {
                    status,
                    detail,
                    message,
                }
            }
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized { message },
            StatusCode::NOT_FOUND => ApiError::NotFound { message },
            StatusCode::CONFLICT => ApiError::Conflict { message },
            s if s.is_server_error() => ApiError::Server { status, message },
            _ => ApiError::Http { status, message },
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Network error: the request timed out".to_string()
        } else if err.is_connect() {
            "Network error: unable to reach the server".to_string()
        } else {
            format!("Network error: {err}")
        };
        ApiError::Network { message }
    }

    /// HTTP status of the failed response, or 0 when no response arrived.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Validation { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::Http { status, .. }
            | ApiError::Decode { status, .. } => status.as_u16(),
            ApiError::Unauthorized { .. } => 401,
            ApiError::NotFound { .. } => 404,
            ApiError::Conflict { .. } => 409,
            ApiError::Network { .. } | ApiError::Encode(_) | ApiError::InvalidUrl(_) => 0,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    /// Friendly text for a transient notification.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::Unauthorized { .. } => "Your session expired. Please log in again.".into(),
            ApiError::NotFound { .. } => "Task not found. It may have been deleted.".into(),
            ApiError::Conflict { .. } => {
                "Conflict. The task may have been modified. Refresh and try again.".into()
            }
            ApiError::Server { .. } => "Server error. Please try again later.".into(),
            ApiError::Network { message } => message.clone(),
            ApiError::Http { message, .. } => detail_message(message)
                .unwrap_or("Failed to perform operation. Please try again.")
                .into(),
            ApiError::Decode { .. } | ApiError::Encode(_) | ApiError::InvalidUrl(_) => {
                "Failed to perform operation. Please try again.".into()
            }
        }
    }
}

/// Pulls `detail` out of an error payload. FastAPI sends either a string or
/// a list of `{loc, msg}` objects.
pub(crate) fn extract_detail(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("detail")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    let msg = item.get("msg")?.as_str()?;
                    let field = item
                        .get("loc")
                        .and_then(Value::as_array)
                        .and_then(|loc| loc.last())
                        .and_then(Value::as_str);
                    Some(match field {
                        Some(field) => format!("{field}: {msg}"),
                        None => msg.to_string(),
                    })
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

/// Maps a validation detail to a message keyed on the field it mentions.
fn validation_message(detail: &str) -> Option<&'static str> {
    let detail = detail.to_lowercase();
    if detail.contains("title") {
        Some("Title is required and cannot be empty.")
    } else if detail.contains("description") {
        Some("Description is invalid.")
    } else if detail.contains("completed") {
        Some("Invalid task status.")
    } else if detail.contains("required") {
        Some("Please fill in all required fields.")
    } else if detail.contains("length") {
        Some("Title is too long. Maximum 200 characters.")
    } else {
        None
    }
}

fn detail_message(detail: &str) -> Option<&'static str> {
    let detail = detail.to_lowercase();
    if detail.contains("not found") {
        Some("Task not found. It may have been deleted.")
    } else if detail.contains("already exists") {
        Some("A similar task already exists.")
    } else if detail.contains("invalid") {
        Some("Invalid task data. Please check and try again.")
    } else if detail.contains("unauthorized") {
        Some("You don't have permission to modify this task.")
    } else {
        None
    }
}

/// Failure of a signup, login or logout.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("{0}")]
    Network(String),
    #[error("unexpected response from server: {0}")]
    InvalidResponse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid API url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid value {value:?} for {key}")]
    InvalidNumber { key: &'static str, value: String },
}
