//! Rate limiting middleware.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER},
};
use notes_shared::ErrorResponse;
use std::future::{Future, Ready, ready};
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use notes_core::ports::RateLimitDecision;
use notes_infra::AdmissionController;

/// Rate limiting middleware factory.
pub struct RateLimitMiddleware {
    controller: Arc<AdmissionController>,
    trust_forwarded_headers: bool,
}

impl RateLimitMiddleware {
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self {
            controller,
            trust_forwarded_headers: false,
        }
    }

    /// Take the caller address from `X-Forwarded-For`/`Forwarded` instead of
    /// the socket peer. Only enable behind a proxy that sets these headers.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            controller: self.controller.clone(),
            trust_forwarded_headers: self.trust_forwarded_headers,
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    controller: Arc<AdmissionController>,
    trust_forwarded_headers: bool,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let controller = self.controller.clone();
        let caller = caller_address(&req, self.trust_forwarded_headers);

        Box::pin(async move {
            let decision = controller.check_and_admit(caller.as_deref()).await;

            if !decision.admitted {
                // Rejected - the inner service is never called
                let response = rejection_response(&decision, req.path());
                let (http_req, _payload) = req.into_parts();
                return Ok(ServiceResponse::new(http_req, response).map_into_right_body());
            }

            let mut res = service.call(req).await?;
            if !decision.fail_open {
                insert_limit_headers(res.headers_mut(), &decision);
            }
            Ok(res.map_into_left_body())
        })
    }
}

/// Caller address used to derive the rate limit identity.
fn caller_address(req: &ServiceRequest, trust_forwarded_headers: bool) -> Option<String> {
    if trust_forwarded_headers {
        req.connection_info().realip_remote_addr().map(strip_port)
    } else {
        req.peer_addr().map(|addr| addr.ip().to_string())
    }
}

/// Reduce a forwarded address to its IP so one client keeps one bucket
/// across source ports. Values that are not addresses are kept as given.
fn strip_port(addr: &str) -> String {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }
    let bare = addr.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => addr.to_string(),
    }
}

fn insert_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
}

fn rejection_response(decision: &RateLimitDecision, path: &str) -> HttpResponse {
    let error = ErrorResponse::too_many_requests().with_instance(path);

    let mut response = HttpResponse::TooManyRequests().json(error);
    let headers = response.headers_mut();
    insert_limit_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use actix_web::{App, http::StatusCode, test, web};
    use async_trait::async_trait;

    use notes_core::domain::IdentityKeyStrategy;
    use notes_core::ports::{ManualClock, RateLimitError, RateLimiter};
    use notes_infra::{InMemoryRateLimiter, RateLimitConfig};

    struct FailingLimiter;

    #[async_trait]
    impl RateLimiter for FailingLimiter {
        async fn check(&self, _key: &str) -> Result<RateLimitDecision, RateLimitError> {
            Err(RateLimitError::Backend("connection refused".to_string()))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    fn controller(
        max_requests: u32,
        identity: IdentityKeyStrategy,
    ) -> (Arc<AdmissionController>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig::new(max_requests, Duration::from_millis(1000)).unwrap();
        let limiter = Arc::new(InMemoryRateLimiter::with_clock(config, clock.clone()));
        let controller = AdmissionController::new(limiter, identity, max_requests);
        (Arc::new(controller), clock)
    }

    fn peer(addr: &str) -> SocketAddr {
        format!("{}:40000", addr).parse().unwrap()
    }

    fn get(addr: &str) -> test::TestRequest {
        test::TestRequest::get().uri("/api/notes").peer_addr(peer(addr))
    }

    macro_rules! app_with {
        ($middleware:expr, $hits:expr) => {{
            let hits = $hits.clone();
            test::init_service(App::new().wrap($middleware).route(
                "/api/notes",
                web::get().to(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        actix_web::HttpResponse::Ok().body("notes")
                    }
                }),
            ))
            .await
        }};
    }

    #[actix_web::test]
    async fn test_rejects_once_limit_is_reached() {
        let (controller, clock) = controller(3, IdentityKeyStrategy::PerCaller);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(RateLimitMiddleware::new(controller), hits);

        for expected_remaining in ["2", "1", "0"] {
            let res = test::call_service(&app, get("10.0.0.1").to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(res.headers().get("x-ratelimit-limit").unwrap(), "3");
            assert_eq!(
                res.headers().get("x-ratelimit-remaining").unwrap(),
                expected_remaining
            );
        }

        clock.set_elapsed(Duration::from_millis(500));
        let res = test::call_service(&app, get("10.0.0.1").to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("retry-after").unwrap(), "1");
        assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "0");

        let body: ErrorResponse = test::read_body_json(res).await;
        assert_eq!(body.status, 429);
        assert_eq!(body.title, "Too Many Requests");
        assert_eq!(
            body.detail.as_deref(),
            Some("Too many requests, please try again later")
        );
        assert_eq!(body.instance.as_deref(), Some("/api/notes"));

        // The rejected request never reached the handler
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        clock.set_elapsed(Duration::from_millis(1100));
        let res = test::call_service(&app, get("10.0.0.1").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[actix_web::test]
    async fn test_callers_have_independent_buckets() {
        let (controller, _clock) = controller(1, IdentityKeyStrategy::PerCaller);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(RateLimitMiddleware::new(controller), hits);

        let res = test::call_service(&app, get("10.0.0.1").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = test::call_service(&app, get("10.0.0.1").to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let res = test::call_service(&app, get("10.0.0.2").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_constant_key_shares_one_bucket() {
        let (controller, _clock) = controller(
            1,
            IdentityKeyStrategy::Constant("my-rate-limit".to_string()),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(RateLimitMiddleware::new(controller), hits);

        let res = test::call_service(&app, get("10.0.0.1").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = test::call_service(&app, get("10.0.0.2").to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn test_request_without_peer_is_still_counted() {
        let (controller, _clock) = controller(1, IdentityKeyStrategy::PerCaller);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(RateLimitMiddleware::new(controller), hits);

        let req = || test::TestRequest::get().uri("/api/notes").to_request();
        assert_eq!(test::call_service(&app, req()).await.status(), StatusCode::OK);
        assert_eq!(
            test::call_service(&app, req()).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[actix_web::test]
    async fn test_forwarded_header_ignored_unless_trusted() {
        let (controller, _clock) = controller(1, IdentityKeyStrategy::PerCaller);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(RateLimitMiddleware::new(controller), hits);

        let res = test::call_service(
            &app,
            get("10.0.0.1")
                .insert_header(("x-forwarded-for", "203.0.113.1"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        // Same socket peer, different spoofed header: same bucket
        let res = test::call_service(
            &app,
            get("10.0.0.1")
                .insert_header(("x-forwarded-for", "203.0.113.2"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn test_forwarded_header_used_when_trusted() {
        let (controller, _clock) = controller(1, IdentityKeyStrategy::PerCaller);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(
            RateLimitMiddleware::new(controller).trust_forwarded_headers(true),
            hits
        );

        for client in ["203.0.113.1", "203.0.113.2"] {
            let res = test::call_service(
                &app,
                get("10.0.0.1")
                    .insert_header(("x-forwarded-for", client))
                    .to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    #[::core::prelude::v1::test]
    fn test_strip_port() {
        assert_eq!(strip_port("203.0.113.1:5678"), "203.0.113.1");
        assert_eq!(strip_port("203.0.113.1"), "203.0.113.1");
        assert_eq!(strip_port("[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(strip_port("[2001:db8::1]"), "2001:db8::1");
        assert_eq!(strip_port("2001:db8::1"), "2001:db8::1");
        assert_eq!(strip_port("_hidden"), "_hidden");
    }

    #[actix_web::test]
    async fn test_forwarded_source_port_does_not_split_bucket() {
        let (controller, _clock) = controller(1, IdentityKeyStrategy::PerCaller);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(
            RateLimitMiddleware::new(controller).trust_forwarded_headers(true),
            hits
        );

        let res = test::call_service(
            &app,
            get("10.0.0.1")
                .insert_header(("x-forwarded-for", "203.0.113.1:5678"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = test::call_service(
            &app,
            get("10.0.0.1")
                .insert_header(("forwarded", "for=\"203.0.113.1:5679\""))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn test_backend_failure_passes_request_through() {
        let controller = Arc::new(AdmissionController::new(
            Arc::new(FailingLimiter),
            IdentityKeyStrategy::PerCaller,
            3,
        ));
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app_with!(RateLimitMiddleware::new(controller.clone()), hits);

        for _ in 0..5 {
            let res = test::call_service(&app, get("10.0.0.1").to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
            // No quota was counted, so none is advertised
            assert!(res.headers().get("x-ratelimit-limit").is_none());
            assert!(res.headers().get("x-ratelimit-remaining").is_none());
        }

        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(controller.fail_open_total(), 5);
    }
}
