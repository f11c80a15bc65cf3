use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
};
use dashmap::DashMap;
use std::{
    future::Future,
    net::IpAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

/// Per-client token bucket applied to the public webhook surface.
/// Keyed by client IP taken from proxy headers.
#[derive(Clone)]
pub struct RateLimitLayer {
    shared: Arc<Shared>,
}

struct Shared {
    buckets: DashMap<IpAddr, Bucket>,
    refill_per_sec: f64,
    capacity: f64,
}

struct Bucket {
    tokens: f64,
    touched: Instant,
}

impl RateLimitLayer {
    pub fn new(requests_per_second: u64, burst: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                buckets: DashMap::new(),
                refill_per_sec: requests_per_second as f64,
                capacity: burst as f64,
            }),
        }
    }

    fn admit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut bucket = self.shared.buckets.entry(ip).or_insert_with(|| Bucket {
            tokens: self.shared.capacity,
            touched: now,
        });
        let refilled = now.duration_since(bucket.touched).as_secs_f64() * self.shared.refill_per_sec;
        bucket.tokens = (bucket.tokens + refilled).min(self.shared.capacity);
        bucket.touched = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Sweep buckets that have been idle long enough to refill completely.
    /// Runs until the token is cancelled.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        shared.buckets.retain(|_, b| now.duration_since(b.touched) < Duration::from_secs(600));
                        tracing::debug!(buckets = shared.buckets.len(), "rate limit sweep complete");
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimited<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimited {
            inner,
            limiter: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimited<S> {
    inner: S,
    limiter: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimited<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let admitted = match client_ip(&req) {
            Some(ip) => self.limiter.admit(ip),
            None => {
                // No identifiable client; let the request through rather than
                // collapsing all unknown traffic into one bucket.
                tracing::warn!("could not determine client IP for rate limiting");
                true
            }
        };

        if !admitted {
            let response = Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .header("Retry-After", "1")
                .body(Body::from("Rate limit exceeded"))
                .expect("static response");
            return Box::pin(async move { Ok(response) });
        }

        let future = self.inner.call(req);
        Box::pin(future)
    }
}

fn client_ip(req: &Request<Body>) -> Option<IpAddr> {
    // First hop of X-Forwarded-For is the original client behind a proxy
    if let Some(value) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first) = value.split(',').next()
        && let Ok(ip) = first.trim().parse()
    {
        return Some(ip);
    }
    req.headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
