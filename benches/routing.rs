//! Benchmarks for routing latency with varying fleet sizes.
//!
//! The routing decision sits on every request path and must stay well
//! under a millisecond even for oversized capability matrices.

use conductor::bandit::ThompsonSampler;
use conductor::capability::{CapabilityMatrix, ModelCapability};
use conductor::clock::SystemClock;
use conductor::config::RoutingConfig;
use conductor::fallback::CircuitBreakerRegistry;
use conductor::flags::FeatureFlags;
use conductor::routing::Router;
use conductor::types::{Provider, Request, RequestContext};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn fleet(model_count: usize) -> Vec<ModelCapability> {
    (0..model_count)
        .map(|m| ModelCapability {
            provider: Provider::ALL[m % Provider::ALL.len()],
            model_id: format!("model-{}", m),
            context_tokens: 4_096 + (m as u32) * 1_024,
            supports_tools: m % 2 == 0,
            supports_json: m % 4 == 0,
            supports_vision: m % 3 == 0,
            default_latency_ms: 200 + (m as u64) * 15,
            cost_per_1k_input: 0.0001 * (m as f64 + 1.0),
            cost_per_1k_output: 0.0003 * (m as f64 + 1.0),
        })
        .collect()
}

fn build_router(model_count: usize) -> Router {
    let clock = Arc::new(SystemClock);
    Router::new(
        Arc::new(CapabilityMatrix::new(fleet(model_count))),
        Arc::new(CircuitBreakerRegistry::new(5, 300_000, clock)),
        Arc::new(ThompsonSampler::new()),
        Arc::new(FeatureFlags::new()),
        RoutingConfig::default(),
    )
}

fn bench_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("route");
    for model_count in [3usize, 12, 48, 192] {
        let router = build_router(model_count);
        let request = Request::new(
            "What is the capital of France?",
            RequestContext::default(),
        );
        group.bench_with_input(
            BenchmarkId::from_parameter(model_count),
            &model_count,
            |b, _| {
                b.iter(|| {
                    let plan = router.route(black_box(&request)).unwrap();
                    black_box(plan.decision.model_id.len())
                });
            },
        );
    }
    group.finish();
}

fn bench_available_models(c: &mut Criterion) {
    let router = build_router(48);
    let context = RequestContext {
        require_tools: true,
        ..Default::default()
    };
    c.bench_function("available_models", |b| {
        b.iter(|| black_box(router.available_models(black_box(&context))).len());
    });
}

criterion_group!(benches, bench_route, bench_available_models);
criterion_main!(benches);
