//! Rate limiting middleware for HTTP requests.

use std::{
    collections::HashMap,
    fmt::Display,
    future::Future,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    body::Body,
    extract::ConnectInfo,
    response::{IntoResponse, Response},
};
use config::RateLimitConfig;
use http::{HeaderValue, Request, StatusCode, header::RETRY_AFTER};
use rate_limit::{AdmissionGuard, CallIdentity, GuardError, LimitPolicy, Storage};
use tower::Layer;

struct RoutePolicies {
    routes: HashMap<String, LimitPolicy>,
    default: Option<LimitPolicy>,
    trust_forwarded_headers: bool,
}

impl RoutePolicies {
    fn policy_for(&self, path: &str) -> Option<LimitPolicy> {
        self.routes.get(path).or(self.default.as_ref()).copied()
    }
}

#[derive(Clone)]
pub struct RateLimitLayer {
    guard: AdmissionGuard<Storage>,
    policies: Arc<RoutePolicies>,
}

impl RateLimitLayer {
    /// Validates every configured policy, failing on the first invalid one.
    pub fn new(guard: AdmissionGuard<Storage>, config: &RateLimitConfig) -> anyhow::Result<Self> {
        let mut routes = HashMap::with_capacity(config.routes.len());

        for (route, policy) in &config.routes {
            let policy = LimitPolicy::try_from(policy)
                .map_err(|e| anyhow!("Invalid rate limit policy for route '{route}': {e}"))?;

            routes.insert(route.clone(), policy);
        }

        let default = config
            .default
            .as_ref()
            .map(LimitPolicy::try_from)
            .transpose()
            .map_err(|e| anyhow!("Invalid default rate limit policy: {e}"))?;

        let policies = RoutePolicies {
            routes,
            default,
            trust_forwarded_headers: config.trust_forwarded_headers,
        };

        Ok(Self {
            guard,
            policies: Arc::new(policies),
        })
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            guard: self.guard.clone(),
            policies: self.policies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    guard: AdmissionGuard<Storage>,
    policies: Arc<RoutePolicies>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let guard = self.guard.clone();
        let policies = self.policies.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();

            let Some(policy) = policies.policy_for(&path) else {
                return next.call(req).await;
            };

            let caller = extract_client_ip(&req, policies.trust_forwarded_headers);
            let identity = caller.map(|ip| CallIdentity::new(path, ip.to_string()));

            let err = match guard.run(&policy, move || identity, move || next.call(req)).await {
                Ok(response) => return Ok(response),
                Err(GuardError::Inner(err)) => return Err(err),
                Err(err) => err,
            };

            Ok(error_response(&err))
        })
    }
}

/// The client-facing response for a call the guard did not let through.
///
/// Responses stay generic, the details only go to the log.
fn error_response<E: Display>(err: &GuardError<E>) -> Response<Body> {
    match err {
        GuardError::MissingContext => (StatusCode::BAD_REQUEST, "Missing client identity").into_response(),
        GuardError::RateLimited(rejection) => {
            let retry_after = HeaderValue::from(retry_after_seconds(rejection.retry_after));
            (StatusCode::TOO_MANY_REQUESTS, [(RETRY_AFTER, retry_after)], "Rate limit exceeded").into_response()
        }
        GuardError::Unavailable { .. } => {
            log::error!("Refusing request, {err}");
            (StatusCode::SERVICE_UNAVAILABLE, "Rate limiter unavailable").into_response()
        }
        GuardError::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn retry_after_seconds(retry_after: Duration) -> u64 {
    let millis = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000)
}

/// Extract client IP address from request.
///
/// Forwarding headers are only consulted when the deployment sits behind a trusted proxy,
/// otherwise any client could pick its own identity.
fn extract_client_ip<B>(req: &Request<B>, trust_forwarded_headers: bool) -> Option<IpAddr> {
    if trust_forwarded_headers && let Some(ip) = forwarded_ip(req) {
        return Some(ip);
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())
}

fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    // Take the first IP in the chain
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded_for.to_str()
        && let Some(ip) = value.split(',').next().and_then(|ip| ip.trim().parse().ok())
    {
        return Some(ip);
    }

    req.headers().get("x-real-ip")?.to_str().ok()?.trim().parse().ok()
}
