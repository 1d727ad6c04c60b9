use crate::url::template_path;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::FutureExt;
use http::Request;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{counter::Counter, family::Family, histogram::Histogram};
use prometheus_client::registry::Registry;
use tokio::time::Instant;

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct RequestLabels {
    pub endpoint: String,
    pub method: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ResponseLabels {
    pub endpoint: String,
    pub method: String,
    pub status_code: String,
}

/// Tower layer measuring every Kubernetes client request. Paths are templated
/// (`{namespace}`, `{name}`) before they become labels so object names do not
/// explode the cardinality.
pub struct MetricsLayer {
    request_duration: Family<RequestLabels, Histogram>,
    requests_total: Family<ResponseLabels, Counter>,
}

impl MetricsLayer {
    pub fn new(registry: &mut Registry) -> Self {
        let request_duration = Family::<RequestLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0].into_iter())
        });
        let requests_total = Family::<ResponseLabels, Counter>::default();

        registry.register(
            "kubernetes_client_http_request_duration_seconds",
            "Latency of Kubernetes client requests by endpoint template and method.",
            request_duration.clone(),
        );
        registry.register(
            "kubernetes_client_http_requests_total",
            "Kubernetes client requests by endpoint template, method and status code.",
            requests_total.clone(),
        );

        Self {
            request_duration,
            requests_total,
        }
    }
}

impl<S> tower::Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            request_duration: self.request_duration.clone(),
            requests_total: self.requests_total.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    request_duration: Family<RequestLabels, Histogram>,
    requests_total: Family<ResponseLabels, Counter>,
}

impl<S, ReqBody, ResBody> tower::Service<Request<ReqBody>> for MetricsService<S>
where
    S: tower::Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let endpoint =
            url_escape::encode_path(&template_path(req.uri().path(), None)).to_string();
        let method = req.method().to_string();

        let start_time = Instant::now();
        let fut = self.inner.call(req);
        let request_duration = self.request_duration.clone();
        let requests_total = self.requests_total.clone();
        async move {
            let result = fut.await;
            let duration = start_time.elapsed().as_secs_f64();
            request_duration
                .get_or_create(&RequestLabels {
                    endpoint: endpoint.clone(),
                    method: method.clone(),
                })
                .observe(duration);
            if let Ok(ref response) = result {
                requests_total
                    .get_or_create(&ResponseLabels {
                        endpoint,
                        method,
                        status_code: response.status().as_u16().to_string(),
                    })
                    .inc();
            }
            result
        }
        .boxed()
    }
}
