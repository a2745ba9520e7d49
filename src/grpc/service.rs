//! Rate limit service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::ratewarden::v1::{
    rate_limit_service_server::RateLimitService, CheckRequest, CheckResponse, Decision,
    HeaderValue,
};

use crate::error::WardenError;
use crate::ratelimit::{self, RateLimitHeaders, RouteDecision, RouteLimiters};

/// Implementation of the RateLimitService gRPC interface.
pub struct RateLimitServiceImpl {
    /// The route class limiters
    limiters: Arc<RouteLimiters>,
}

impl RateLimitServiceImpl {
    /// Create a new RateLimitServiceImpl over the given limiters.
    pub fn new(limiters: Arc<RouteLimiters>) -> Self {
        Self { limiters }
    }
}

impl From<&ratelimit::Decision> for Decision {
    fn from(decision: &ratelimit::Decision) -> Self {
        Decision {
            success: decision.success,
            limit: decision.limit,
            remaining: decision.remaining,
            reset_ms: decision.reset,
            reset_iso: ratelimit::format_reset(decision.reset),
        }
    }
}

/// Render a route decision as the response the interceptor acts on.
fn to_response(result: &RouteDecision) -> CheckResponse {
    let headers = RateLimitHeaders::from_decision(&result.decision);

    CheckResponse {
        decision: Some(Decision::from(&result.decision)),
        identifier: result.identifier.to_string_key(),
        route_class: result.class.clone(),
        http_status: u32::from(ratelimit::status_code(&result.decision)),
        response_headers_to_add: headers
            .pairs()
            .iter()
            .map(|(key, value)| HeaderValue {
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect(),
        body: ratelimit::rejection_body(&result.decision).unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl RateLimitService for RateLimitServiceImpl {
    /// Decide whether one inbound HTTP request may proceed.
    ///
    /// The route class is taken from the request when given, otherwise it is
    /// derived from the path. An explicit class may carry its own identifier
    /// namespace.
    #[instrument(
        skip(self, request),
        fields(
            path = %request.get_ref().path,
            route_class = %request.get_ref().route_class,
            namespace = %request.get_ref().namespace
        )
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();

        debug!(
            path = %req.path,
            client_ip = %req.client_ip,
            route_class = %req.route_class,
            namespace = %req.namespace,
            "Processing rate limit request"
        );

        // Validate the request
        if req.path.is_empty() && req.route_class.is_empty() {
            warn!("Received rate limit request with neither path nor route class");
            return Err(Status::invalid_argument("path or route_class is required"));
        }

        let result = if req.route_class.is_empty() {
            self.limiters.check_request(&req.path, &req.client_ip).await
        } else {
            let namespace = (!req.namespace.is_empty()).then_some(req.namespace.as_str());
            self.limiters
                .check_class(&req.route_class, namespace, &req.client_ip)
                .await
                .map_err(|e| {
                    warn!(
                        route_class = %req.route_class,
                        namespace = %req.namespace,
                        error = %e,
                        "Rejected rate limit request"
                    );
                    match e {
                        WardenError::UnknownRouteClass(_) => Status::not_found(e.to_string()),
                        WardenError::InvalidIdentifier(_) => {
                            Status::invalid_argument(e.to_string())
                        }
                        _ => Status::internal(e.to_string()),
                    }
                })?
        };

        info!(
            identifier = %result.identifier,
            success = result.decision.success,
            remaining = result.decision.remaining,
            "Rate limit decision made"
        );

        Ok(Response::new(to_response(&result)))
    }
}
