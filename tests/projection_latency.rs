use forecast_consensus_engine::coherence::{CoherenceProjector, GameContext, ProjectionMetrics};
use forecast_consensus_engine::consensus::{ids, CategoryAggregate, StaticRegistry};
use forecast_consensus_engine::core::CoherenceConfig;
use std::sync::Arc;
use std::time::Instant;

/// A typical game: every standard numeric category plus filler props,
/// 30 categories in all, with all five constraint types firing.
fn typical_game(seed: usize) -> (Vec<CategoryAggregate>, GameContext) {
    let jitter = (seed % 7) as f64 * 0.5;
    let mut aggregates = vec![
        CategoryAggregate::numeric(ids::HOME_SCORE, 36.0 + jitter),
        CategoryAggregate::numeric(ids::AWAY_SCORE, 6.0),
        CategoryAggregate::numeric(ids::TOTAL_SCORE, 47.0 - jitter),
        CategoryAggregate::numeric(ids::Q1_TOTAL, 10.0),
        CategoryAggregate::numeric(ids::Q2_TOTAL, 14.0 + jitter),
        CategoryAggregate::numeric(ids::Q3_TOTAL, 9.0),
        CategoryAggregate::numeric(ids::Q4_TOTAL, 11.0),
        CategoryAggregate::numeric(ids::FIRST_HALF_TOTAL, 22.0),
        CategoryAggregate::numeric(ids::SECOND_HALF_TOTAL, 21.0 + jitter),
        CategoryAggregate::numeric(ids::HOME_WIN_PROBABILITY, 0.2),
        CategoryAggregate::numeric(ids::AWAY_WIN_PROBABILITY, 0.8),
    ];
    for i in aggregates.len()..30 {
        aggregates.push(CategoryAggregate::numeric(
            format!("prop_{}", i),
            i as f64 + jitter,
        ));
    }
    let context = GameContext::new(format!("bench-{}", seed)).with_spread(-6.5);
    (aggregates, context)
}

#[test]
#[ignore] // Run with: cargo test --release -- --ignored --nocapture
fn projection_p95_under_target() {
    let config = CoherenceConfig::default();
    let target_ms = config.latency_target_ms;
    let metrics = Arc::new(ProjectionMetrics::new(1000).unwrap());
    let projector = CoherenceProjector::new(
        config,
        Arc::new(StaticRegistry::standard()),
        metrics.clone(),
    );

    println!("\n📊 Projection latency benchmark: 1,000 games, 30 categories each\n");

    let started = Instant::now();
    let mut coherent = 0;
    for seed in 0..1000 {
        let (aggregates, context) = typical_game(seed);
        let result = projector.project(&aggregates, &context);
        if result.success {
            coherent += 1;
        }
    }
    let elapsed = started.elapsed();

    let snapshot = metrics.snapshot();
    println!("  Total time:      {:?}", elapsed);
    println!("  Coherent games:  {}/1000", coherent);
    println!("  Average:         {:.3}ms", snapshot.average_ms);
    println!("  P50:             {:.3}ms", snapshot.p50_ms);
    println!("  P95:             {:.3}ms", snapshot.p95_ms);
    println!("  P99:             {:.3}ms", snapshot.p99_ms);
    println!("  Max:             {:.3}ms", snapshot.max_ms);

    assert_eq!(snapshot.samples, 1000);
    assert_eq!(coherent, 1000);
    assert!(
        snapshot.p95_ms < target_ms,
        "p95 {:.3}ms exceeds {:.0}ms target",
        snapshot.p95_ms,
        target_ms
    );

    println!("\n✅ Projection latency within target");
}
