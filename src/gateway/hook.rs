//! Per-request hook run before the gateway forwards a request.
//!
//! The gateway builds a [`RequestHead`] for every intercepted request and
//! asks its [`RequestInterceptor`] what to do. [`FreshnessHook`] is the
//! interceptor used for runs: it sends tarball fetches through the
//! freshness policy and turns a block into a 403 plus an `Error` signal.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::{HeaderMap, Method, StatusCode};
use tracing::{error, info, warn};
use url::Url;

use crate::config::LookupFailurePolicy;
use crate::orchestrator::{OrchestrationSignal, SignalDir, SignalKind};
use crate::policy::tarball::is_tarball_path;
use crate::policy::{FreshnessPolicy, PackageReference, PolicyError};
use crate::telemetry::{AuditEvent, LookupAction, audit};

/// The parts of a request the hook sees.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
}

/// What the gateway should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptAction {
    /// Send the request upstream unchanged.
    Forward,
    /// Answer the client directly.
    RespondWith {
        /// Response status.
        status: StatusCode,
        /// Response body.
        body: String,
        /// Extra response headers.
        headers: Vec<(String, String)>,
    },
}

impl InterceptAction {
    /// A `403 Forbidden` carrying `reason`.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        InterceptAction::RespondWith {
            status: StatusCode::FORBIDDEN,
            body: reason.into(),
            headers: vec![("Content-Type".into(), "text/plain".into())],
        }
    }
}

/// Decides, per request, whether the gateway forwards or answers.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Inspect a request before it is forwarded.
    async fn intercept(&self, head: &RequestHead) -> InterceptAction;
}

/// Interceptor enforcing the freshness policy.
pub struct FreshnessHook {
    policy: Arc<FreshnessPolicy>,
    signals: SignalDir,
    on_lookup_failure: LookupFailurePolicy,
}

impl FreshnessHook {
    /// Create the hook.
    pub fn new(
        policy: Arc<FreshnessPolicy>,
        signals: SignalDir,
        on_lookup_failure: LookupFailurePolicy,
    ) -> Self {
        Self {
            policy,
            signals,
            on_lookup_failure,
        }
    }

    /// Record a fatal outcome for the supervisor before the client hears of it.
    fn raise_error(&self, reason: &str, package: Option<PackageReference>) {
        let mut signal = OrchestrationSignal::new(SignalKind::Error, reason);
        if let Some(package) = package {
            signal = signal.with_package(package);
        }
        if let Err(e) = self.signals.write(&signal) {
            error!("Failed to write error signal: {}", e);
        }
    }

    fn on_lookup_error(&self, url: &Url, err: PolicyError) -> InterceptAction {
        let package = self.policy.reference_for(url);
        let package_name = package
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| url.path().to_string());
        let reason = err.to_string();

        match self.on_lookup_failure {
            LookupFailurePolicy::Block => {
                error!(package = %package_name, "metadata lookup failed, blocking: {}", reason);
                self.raise_error(&reason, package);
                audit().log(AuditEvent::LookupFailed {
                    package: package_name,
                    reason: reason.clone(),
                    action: LookupAction::Block,
                });
                InterceptAction::forbidden(reason)
            }
            LookupFailurePolicy::Allow => {
                warn!(package = %package_name, "metadata lookup failed, allowing: {}", reason);
                audit().log(AuditEvent::LookupFailed {
                    package: package_name,
                    reason,
                    action: LookupAction::Allow,
                });
                InterceptAction::Forward
            }
        }
    }
}

#[async_trait]
impl RequestInterceptor for FreshnessHook {
    async fn intercept(&self, head: &RequestHead) -> InterceptAction {
        let Ok(url) = Url::parse(&head.url) else {
            return InterceptAction::Forward;
        };
        if !is_tarball_path(url.path()) {
            return InterceptAction::Forward;
        }

        let verdict = match self.policy.evaluate(url.as_str()).await {
            Ok(verdict) => verdict,
            Err(e) => return self.on_lookup_error(&url, e),
        };

        let Some(reference) = verdict.reference.clone() else {
            return InterceptAction::Forward;
        };

        if verdict.is_allowed() {
            info!(package = %reference, "allowed: {}", verdict.reason);
            audit().log(AuditEvent::PackageAllow {
                package: reference.name,
                version: reference.version,
                age_days: verdict.age_days.unwrap_or_default(),
            });
            return InterceptAction::Forward;
        }

        warn!(package = %reference, "blocked: {}", verdict.reason);
        self.raise_error(&verdict.reason, Some(reference.clone()));
        audit().log(AuditEvent::PackageBlock {
            package: reference.name,
            version: reference.version,
            min_age_days: self.policy.min_age_days(),
            reason: verdict.reason.clone(),
        });

        InterceptAction::forbidden(verdict.reason)
    }
}
