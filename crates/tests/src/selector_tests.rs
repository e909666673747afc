//! Integration tests for endpoint selection through the registry.

use crate::mock_infrastructure::endpoint_config;
use ember_core::{
    types::TransportKind,
    upstream::{EndpointConfig, EndpointRegistry, HealthPolicy, SelectOptions},
};
use std::collections::HashMap;

const SAMPLES: usize = 10_000;

fn sample(registry: &EndpointRegistry, kind: TransportKind, options: &SelectOptions) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for _ in 0..SAMPLES {
        let endpoint = registry.select_endpoint(kind, options).expect("an endpoint is eligible");
        *counts.entry(endpoint.id.clone()).or_insert(0) += 1;
    }
    counts
}

#[test]
fn test_weighted_selection_follows_weights() {
    let registry = EndpointRegistry::new(HealthPolicy::default());
    registry.register_endpoint("heavy", endpoint_config("https://heavy.example.com", 5, 3)).unwrap();
    registry.register_endpoint("light", endpoint_config("https://light.example.com", 5, 1)).unwrap();

    let counts = sample(&registry, TransportKind::Standard, &SelectOptions::default());

    #[allow(clippy::cast_precision_loss)]
    let heavy_share = counts.get("heavy").copied().unwrap_or(0) as f64 / SAMPLES as f64;
    assert!((0.70..=0.80).contains(&heavy_share), "heavy share was {heavy_share}");
}

#[test]
fn test_only_top_ranked_candidates_are_drawn() {
    let registry = EndpointRegistry::new(HealthPolicy::default());
    for (id, priority) in [("p10", 10), ("p9", 9), ("p8", 8), ("p1", 1)] {
        registry
            .register_endpoint(id, endpoint_config(&format!("https://{id}.example.com"), priority, 1))
            .unwrap();
    }

    let counts = sample(&registry, TransportKind::Standard, &SelectOptions::default());
    assert_eq!(counts.get("p1"), None, "fourth-ranked endpoint is outside the draw pool");
    assert_eq!(counts.len(), 3);
}

#[test]
fn test_staked_preference_pulls_low_priority_endpoint_into_pool() {
    let registry = EndpointRegistry::new(HealthPolicy::default());
    for (id, priority) in [("p10", 10), ("p9", 9), ("p8", 8)] {
        registry
            .register_endpoint(id, endpoint_config(&format!("https://{id}.example.com"), priority, 1))
            .unwrap();
    }
    registry
        .register_endpoint(
            "staked",
            EndpointConfig::new("https://staked.example.com", TransportKind::Standard)
                .with_priority(1)
                .with_staked(true),
        )
        .unwrap();

    let plain = sample(&registry, TransportKind::Standard, &SelectOptions::default());
    assert_eq!(plain.get("staked"), None);

    let preferred = sample(&registry, TransportKind::Standard, &SelectOptions::default().prefer_staked(true));
    assert!(preferred.contains_key("staked"));
    assert_eq!(preferred.get("p8"), None);

    let excluded = SelectOptions::default().prefer_staked(true).exclude("p10").exclude("p9");
    let counts = sample(&registry, TransportKind::Standard, &excluded);
    assert_eq!(counts.len(), 2);
    assert!(counts.contains_key("staked") && counts.contains_key("p8"));
}

#[test]
fn test_unhealthy_kind_falls_back_to_other_kinds() {
    let registry = EndpointRegistry::new(HealthPolicy::default());
    registry
        .register_endpoint("das", EndpointConfig::new("https://das.example.com", TransportKind::Das))
        .unwrap();
    registry.register_endpoint("rpc", endpoint_config("https://rpc.example.com", 1, 1)).unwrap();

    for _ in 0..3 {
        registry.apply_probe_failure("das", "timeout");
    }

    let fallback = registry.select_endpoint(TransportKind::Das, &SelectOptions::default()).unwrap();
    assert_eq!(fallback.id, "rpc");

    let strict = SelectOptions::default().without_cross_kind_fallback();
    assert!(registry.select_endpoint(TransportKind::Das, &strict).is_none());

    let any_health = SelectOptions::default().require_healthy(false).without_cross_kind_fallback();
    assert_eq!(registry.select_endpoint(TransportKind::Das, &any_health).unwrap().id, "das");
}
