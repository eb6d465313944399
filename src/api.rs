//! Request execution with bearer injection and error classification.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::session::SessionManager;

/// Where the login view lives, with the notice shown after a forced logout.
pub const SESSION_EXPIRED_LOCATION: &str =
    "/login?message=Session%20expired.%20Please%20log%20in%20again.";

/// Navigation hook for browser-like hosts. Without one, a 401 only clears
/// the session.
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

pub enum Body {
    Empty,
    Json(Value),
    Multipart(Form),
}

pub struct RequestOptions {
    pub method: Method,
    pub body: Body,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        RequestOptions {
            method,
            body: Body::Empty,
            headers: HeaderMap::new(),
        }
    }

    pub fn json(mut self, body: &impl Serialize) -> Result<Self, ApiError> {
        let value =
            serde_json::to_value(body).map_err(|err| ApiError::Encode(err.to_string()))?;
        self.body = Body::Json(value);
        Ok(self)
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = Body::Multipart(form);
        self
    }

    pub fn header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions::new(Method::GET)
    }
}

/// Canonical form of an endpoint path: empty segments collapsed, one leading
/// and one trailing slash, query string kept.
pub fn canonical_path(endpoint: &str) -> String {
    let (path, query) = match endpoint.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (endpoint, None),
    };

    let mut out = String::from("/");
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push_str(segment);
        out.push('/');
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    out
}

pub fn resolve(base: &Url, endpoint: &str) -> Result<Url, ApiError> {
    let joined = format!(
        "{}{}",
        base.as_str().trim_end_matches('/'),
        canonical_path(endpoint)
    );
    Url::parse(&joined).map_err(|_| ApiError::InvalidUrl(endpoint.to_string()))
}

/// Joins `path` onto `base` as written, without the trailing-slash rule.
/// Used for the auth endpoints, which are addressed exactly.
pub fn exact_url(base: &Url, path: &str) -> Result<Url, ApiError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|_| ApiError::InvalidUrl(path.to_string()))
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: SessionManager,
    navigator: Option<Arc<dyn Navigator>>,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: Url, session: SessionManager) -> Self {
        ApiClient {
            http,
            base_url,
            session,
            navigator: None,
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Performs one request. Resolves to `None` for 204 and empty bodies.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Option<T>, ApiError> {
        let url = resolve(&self.base_url, endpoint)?;
        let token = self.session.token();

        let mut headers = options.headers;
        if let Some(token) = &token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::Encode("session token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        if !matches!(options.body, Body::Multipart(_)) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let method = options.method;
        let builder = self.http.request(method.clone(), url.clone()).headers(headers);
        let builder = match options.body {
            Body::Empty => builder,
            Body::Json(value) => builder.body(value.to_string()),
            Body::Multipart(form) => builder.multipart(form),
        };

        debug!(%method, %url, authenticated = token.is_some(), "API request");

        let response = builder
            .send()
            .await
            .map_err(|err| ApiError::from_transport(&err))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::from_transport(&err))?;

        if status == StatusCode::UNAUTHORIZED {
            warn!(%method, %url, "authorization failed, clearing session");
            if let Some(token) = &token {
                self.session.invalidate(token);
            }
            if let Some(navigator) = &self.navigator {
                navigator.navigate(SESSION_EXPIRED_LOCATION);
            }
            return Err(ApiError::from_status(status, &bytes));
        }

        if !status.is_success() {
            return Err(ApiError::from_status(status, &bytes));
        }

        if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| ApiError::Decode {
                status,
                message: err.to_string(),
            })
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>, ApiError> {
        self.request(endpoint, RequestOptions::new(Method::GET)).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> Result<Option<T>, ApiError> {
        self.request(endpoint, RequestOptions::new(Method::POST).json(body)?)
            .await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> Result<Option<T>, ApiError> {
        self.request(endpoint, RequestOptions::new(Method::PATCH).json(body)?)
            .await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<(), ApiError> {
        self.request::<Value>(endpoint, RequestOptions::new(Method::DELETE))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_endpoints_share_one_url() {
        let base = Url::parse("http://localhost:8000").unwrap();
        let expected = "http://localhost:8000/tasks/";
        for endpoint in ["tasks", "/tasks", "/tasks/", "//tasks//"] {
            assert_eq!(resolve(&base, endpoint).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn base_path_and_query_are_kept() {
        let base = Url::parse("https://api.example.com/v1/").unwrap();
        assert_eq!(
            resolve(&base, "/tasks?done=true").unwrap().as_str(),
            "https://api.example.com/v1/tasks/?done=true"
        );
        assert_eq!(canonical_path("/tasks/?"), "/tasks/");
        assert_eq!(canonical_path(""), "/");
    }

    #[test]
    fn exact_urls_keep_the_path_as_written() {
        let base = Url::parse("http://localhost:8000/").unwrap();
        assert_eq!(
            exact_url(&base, "/auth/login").unwrap().as_str(),
            "http://localhost:8000/auth/login"
        );
        let base = Url::parse("https://api.example.com/v1").unwrap();
        assert_eq!(
            exact_url(&base, "auth/signup").unwrap().as_str(),
            "https://api.example.com/v1/auth/signup"
        );
    }

    #[test]
    fn nested_ids() {
        assert_eq!(canonical_path("/tasks/42"), "/tasks/42/");
        assert_eq!(canonical_path("auth//login/"), "/auth/login/");
    }
}
