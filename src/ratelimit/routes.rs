//! One limiter per route class, selected by request path.

use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::Clock;
use super::entry::Decision;
use super::identifier::{validate_namespace, Identifier};
use super::limiter::{FailurePolicy, RateLimiter};
use super::rules::RateLimitConfig;
use super::store::CounterStore;
use crate::error::{Result, WardenError};

/// A named route class and the limiter that enforces it.
#[derive(Debug)]
pub struct RouteClass {
    name: String,
    path_prefix: Option<String>,
    limiter: RateLimiter,
}

impl RouteClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

/// The decision for one request together with how it was keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub class: String,
    pub identifier: Identifier,
    pub decision: Decision,
}

/// The set of route class limiters consulted by the request interceptor.
///
/// All limiters share one store; identifiers are namespaced by class name so
/// their entries never collide. Callers checking a class by name may key a
/// bucket of their own under that class's limits.
#[derive(Debug)]
pub struct RouteLimiters {
    classes: Vec<RouteClass>,
    /// Index of the class without a path prefix
    fallback: usize,
}

impl RouteLimiters {
    /// Build limiters for every configured class.
    pub fn from_config(
        config: &RateLimitConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        failure_policy: FailurePolicy,
    ) -> Result<Self> {
        config.validate()?;

        let classes = config
            .classes
            .iter()
            .map(|c| -> Result<RouteClass> {
                let limiter = RateLimiter::with_store(
                    c.rate_limit.requests_per_unit,
                    c.rate_limit.window(),
                    store.clone(),
                    clock.clone(),
                )?
                .with_failure_policy(failure_policy);

                debug!(
                    class = %c.name,
                    path_prefix = ?c.path_prefix,
                    limit = c.rate_limit.requests_per_unit,
                    window = ?c.rate_limit.window(),
                    "Configured route class"
                );

                Ok(RouteClass {
                    name: c.name.clone(),
                    path_prefix: c.path_prefix.clone(),
                    limiter,
                })
            })
            .collect::<Result<Vec<RouteClass>>>()?;

        let fallback = classes
            .iter()
            .position(|c| c.path_prefix.is_none())
            .ok_or_else(|| WardenError::Config("no fallback route class".to_string()))?;

        Ok(Self { classes, fallback })
    }

    /// Resolve a request path to its route class.
    ///
    /// The longest matching prefix wins; paths matching no prefix fall back to
    /// the class without one.
    pub fn classify(&self, path: &str) -> &RouteClass {
        self.classes
            .iter()
            .filter(|c| c.path_prefix().is_some_and(|p| path.starts_with(p)))
            .max_by_key(|c| c.path_prefix().map_or(0, str::len))
            .unwrap_or(&self.classes[self.fallback])
    }

    /// Look up a route class by name.
    pub fn class(&self, name: &str) -> Option<&RouteClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Iterate over all configured classes.
    pub fn classes(&self) -> impl Iterator<Item = &RouteClass> {
        self.classes.iter()
    }

    /// Check a request by path and client address.
    pub async fn check_request(&self, path: &str, client_ip: &str) -> RouteDecision {
        let class = self.classify(path);
        Self::check_in(class, &class.name, client_ip).await
    }

    /// Check a request against an explicitly named class.
    ///
    /// The identifier is keyed by `namespace` when given (`analytics:<ip>`),
    /// otherwise by the class name, so an endpoint can hold its own bucket
    /// under the class's limits.
    pub async fn check_class(
        &self,
        name: &str,
        namespace: Option<&str>,
        client_ip: &str,
    ) -> Result<RouteDecision> {
        let class = self
            .class(name)
            .ok_or_else(|| WardenError::UnknownRouteClass(name.to_string()))?;

        let namespace = namespace.unwrap_or(class.name.as_str());
        validate_namespace(namespace)?;

        Ok(Self::check_in(class, namespace, client_ip).await)
    }

    async fn check_in(class: &RouteClass, namespace: &str, client_ip: &str) -> RouteDecision {
        let identifier = Identifier::new(namespace, client_ip);
        let decision = class.limiter.check(&identifier.to_string_key()).await;

        if !decision.success {
            warn!(
                class = %class.name,
                namespace,
                client = %identifier.client,
                reset = decision.reset,
                "Rate limit exceeded"
            );
        }

        RouteDecision {
            class: class.name.clone(),
            identifier,
            decision,
        }
    }
}
