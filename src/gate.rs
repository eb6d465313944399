//! Route gating for the frontend host: protected pages need the session
//! cookie, and the login/signup pages bounce signed-in visitors.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;
use axum_extra::extract::CookieJar;
use tracing::debug;

use crate::session::SESSION_COOKIE;

#[derive(Debug, Clone)]
pub struct Gate {
    pub protected: Vec<String>,
    pub public_only: Vec<String>,
    pub login_path: String,
    pub home_path: String,
}

impl Default for Gate {
    fn default() -> Self {
        Gate {
            protected: vec!["/dashboard".into(), "/tasks".into()],
            public_only: vec!["/login".into(), "/signup".into()],
            login_path: "/login".into(),
            home_path: "/dashboard".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect(String),
}

impl Gate {
    pub fn decide(&self, path: &str, authenticated: bool) -> GateDecision {
        if !authenticated && self.protected.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return GateDecision::Redirect(self.login_path.clone());
        }
        if authenticated && self.public_only.iter().any(|p| p == path) {
            return GateDecision::Redirect(self.home_path.clone());
        }
        GateDecision::Allow
    }
}

/// Presence of a non-empty session cookie on the request.
pub struct MaybeSession(pub bool);

impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_request_parts(parts, state).await?;
        Ok(MaybeSession(
            jar.get(SESSION_COOKIE)
                .is_some_and(|cookie| !cookie.value().is_empty()),
        ))
    }
}

pub async fn enforce(
    State(gate): State<Arc<Gate>>,
    MaybeSession(authenticated): MaybeSession,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    match gate.decide(&path, authenticated) {
        GateDecision::Allow => next.run(request).await,
        GateDecision::Redirect(location) => {
            debug!(%path, %location, authenticated, "Gate redirect");
            Redirect::to(&location).into_response()
        }
    }
}

/// Wraps `router` so every route goes through the gate.
pub fn protect(router: Router, gate: Gate) -> Router {
    router.layer(
        tower::ServiceBuilder::new()
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(Arc::new(gate), enforce)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_visitors_are_sent_to_login() {
        let gate = Gate::default();
        assert_eq!(
            gate.decide("/dashboard", false),
            GateDecision::Redirect("/login".into())
        );
        assert_eq!(
            gate.decide("/tasks/42", false),
            GateDecision::Redirect("/login".into())
        );
        assert_eq!(gate.decide("/login", false), GateDecision::Allow);
        assert_eq!(gate.decide("/feed", false), GateDecision::Allow);
    }

    #[test]
    fn signed_in_visitors_skip_login() {
        let gate = Gate::default();
        assert_eq!(
            gate.decide("/login", true),
            GateDecision::Redirect("/dashboard".into())
        );
        assert_eq!(
            gate.decide("/signup", true),
            GateDecision::Redirect("/dashboard".into())
        );
        assert_eq!(gate.decide("/dashboard", true), GateDecision::Allow);
        assert_eq!(gate.decide("/", true), GateDecision::Allow);
    }
}
