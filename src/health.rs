use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tracing::info;

use crate::runtime::PipelineRuntime;

/// §4.10 health surface: liveness is "process responsive" (this server
/// answering at all), readiness delegates to [`PipelineRuntime::is_ready`],
/// and `/metrics` renders the self-metrics counters in Prometheus text
/// format.
pub struct HealthServer {
    runtime: Arc<PipelineRuntime>,
}

impl HealthServer {
    pub fn new(runtime: Arc<PipelineRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn start(self, addr: SocketAddr) -> Result<(), hyper::Error> {
        let runtime = self.runtime.clone();

        let make_svc = make_service_fn(move |_conn| {
            let runtime = runtime.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(req, runtime.clone()))) }
        });

        let server = Server::bind(&addr).serve(make_svc);
        info!("health server listening on {}", addr);
        server.await
    }
}

async fn handle_request(req: Request<Body>, runtime: Arc<PipelineRuntime>) -> Result<Response<Body>, Infallible> {
    let response = match req.uri().path() {
        "/health" => liveness(),
        "/ready" => readiness(&runtime).await,
        "/metrics" => self_metrics(&runtime).await,
        _ => not_found(),
    };
    Ok(response)
}

fn liveness() -> Response<Body> {
    Response::builder().status(StatusCode::OK).body(Body::from("ok")).unwrap()
}

async fn readiness(runtime: &PipelineRuntime) -> Response<Body> {
    if runtime.is_ready().await {
        Response::builder().status(StatusCode::OK).body(Body::from("ready")).unwrap()
    } else {
        Response::builder().status(StatusCode::SERVICE_UNAVAILABLE).body(Body::from("not ready")).unwrap()
    }
}

async fn self_metrics(runtime: &PipelineRuntime) -> Response<Body> {
    use std::fmt::Write;
    use std::sync::atomic::Ordering;

    let mut out = String::new();

    writeln!(out, "# HELP collection_tick_overrun_total Ticks skipped because the previous one was still running").ok();
    writeln!(out, "# TYPE collection_tick_overrun_total counter").ok();
    writeln!(out, "# HELP collection_admission_denied_total Ticks skipped because the circuit denied admission").ok();
    writeln!(out, "# TYPE collection_admission_denied_total counter").ok();
    writeln!(out, "# HELP collection_decode_error_total Rows that failed to decode against their declared schema").ok();
    writeln!(out, "# TYPE collection_decode_error_total counter").ok();
    writeln!(out, "# HELP pipeline_queue_dropped_total Points dropped at the enrichment queue under backpressure").ok();
    writeln!(out, "# TYPE pipeline_queue_dropped_total counter").ok();

    for ((db, query), metrics) in runtime.scraper_metrics() {
        writeln!(
            out,
            "collection_tick_overrun_total{{db=\"{db}\",query=\"{query}\"}} {}",
            metrics.tick_overruns.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            out,
            "collection_admission_denied_total{{db=\"{db}\",query=\"{query}\"}} {}",
            metrics.admission_denied.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            out,
            "collection_decode_error_total{{db=\"{db}\",query=\"{query}\"}} {}",
            metrics.decode_errors.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            out,
            "pipeline_queue_dropped_total{{db=\"{db}\",query=\"{query}\"}} {}",
            metrics.queue_dropped.load(Ordering::Relaxed)
        )
        .ok();
    }

    writeln!(out, "# HELP circuit_state Current circuit breaker phase per database (0=closed,1=half-open,2=open)").ok();
    writeln!(out, "# TYPE circuit_state gauge").ok();
    for (db, phase) in runtime.circuit_snapshot().await {
        let value = match phase {
            telemetry_circuit::CircuitPhase::Closed => 0,
            telemetry_circuit::CircuitPhase::HalfOpen => 1,
            telemetry_circuit::CircuitPhase::Open => 2,
        };
        writeln!(out, "circuit_state{{db=\"{db}\"}} {value}").ok();
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Body::from(out))
        .unwrap()
}

fn not_found() -> Response<Body> {
    Response::builder().status(StatusCode::NOT_FOUND).body(Body::from("404 - Not Found")).unwrap()
}
