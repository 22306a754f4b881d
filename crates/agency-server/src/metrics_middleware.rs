use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Request, Response, StatusCode};
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::{global, KeyValue};
use tower::{Layer, Service};

struct Instruments {
    request_count: Counter<u64>,
    request_duration: Histogram<f64>,
    active_requests: UpDownCounter<i64>,
    throttled: Counter<u64>,
}

/// Tower [`Layer`] recording per-route HTTP metrics through OpenTelemetry:
///
/// - `http.server.request.count`: counter by method, route, status
/// - `http.server.request.duration`: histogram in seconds by method, route, status
/// - `http.server.active_requests`: up-down counter by method, route
/// - `http.server.throttled`: counter of 429 responses by method, route
#[derive(Clone)]
pub struct HttpMetricsLayer {
    instruments: Arc<Instruments>,
}

impl HttpMetricsLayer {
    pub fn new() -> Self {
        let meter = global::meter("agency-server");

        let instruments = Instruments {
            request_count: meter
                .u64_counter("http.server.request.count")
                .with_description("Total HTTP requests")
                .build(),
            request_duration: meter
                .f64_histogram("http.server.request.duration")
                .with_description("HTTP request duration in seconds")
                .with_unit("s")
                .build(),
            active_requests: meter
                .i64_up_down_counter("http.server.active_requests")
                .with_description("Number of in-flight HTTP requests")
                .build(),
            throttled: meter
                .u64_counter("http.server.throttled")
                .with_description("Requests rejected by a rate limiter")
                .build(),
        };

        Self {
            instruments: Arc::new(instruments),
        }
    }
}

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            inner,
            instruments: self.instruments.clone(),
        }
    }
}

#[derive(Clone)]
pub struct HttpMetricsService<S> {
    inner: S,
    instruments: Arc<Instruments>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HttpMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let route_attrs = vec![
            KeyValue::new("http.request.method", req.method().to_string()),
            KeyValue::new("http.route", normalize_path(req.uri().path())),
        ];
        let instruments = self.instruments.clone();
        instruments.active_requests.add(1, &route_attrs);

        // Take the service that was polled ready and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let start = Instant::now();

        Box::pin(async move {
            let result = inner.call(req).await;
            let elapsed = start.elapsed().as_secs_f64();
            instruments.active_requests.add(-1, &route_attrs);

            let status = match &result {
                Ok(resp) => resp.status(),
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status == StatusCode::TOO_MANY_REQUESTS {
                instruments.throttled.add(1, &route_attrs);
            }

            let mut attrs = route_attrs;
            attrs.push(KeyValue::new(
                "http.response.status_code",
                i64::from(status.as_u16()),
            ));
            instruments.request_count.add(1, &attrs);
            instruments.request_duration.record(elapsed, &attrs);

            result
        })
    }
}

/// Normalize the request path for use as a metric attribute.
///
/// Client identifiers in the admin reset route are collapsed so the
/// attribute set stays bounded.
fn normalize_path(path: &str) -> String {
    const RESET_PREFIX: &str = "/api/v1/admin/rate-limits/";

    match path.strip_prefix(RESET_PREFIX) {
        Some(rest) if !rest.is_empty() => format!("{RESET_PREFIX}:policy/:identifier"),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_static_paths() {
        assert_eq!(normalize_path("/api/v1/contact"), "/api/v1/contact");
        assert_eq!(normalize_path("/api/v1/admin/rate-limits"), "/api/v1/admin/rate-limits");
    }

    #[test]
    fn test_normalize_collapses_identifiers() {
        assert_eq!(
            normalize_path("/api/v1/admin/rate-limits/contact/203.0.113.7"),
            "/api/v1/admin/rate-limits/:policy/:identifier"
        );
    }
}
