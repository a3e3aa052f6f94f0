// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-flight coalescing and pricing-pack rollover through the executor.

use chrono::NaiveDate;
use daws_agent_mock::{MockAgent, MockResponse};
use daws_core::{CapabilityContract, ExecutionContext, Provenance};
use daws_pattern::Pattern;
use daws_runtime::{ExecutorConfig, Runtime};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PACK: &str = "PP_2025-10-21";

fn asof() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 21).unwrap()
}

fn pattern() -> Pattern {
    serde_json::from_value(json!({
        "id": "twr_only",
        "version": "1.0",
        "last_updated": "2025-10-21",
        "steps": [{
            "name": "compute_twr",
            "action": "execute_through_registry",
            "capability": "metrics.compute_twr",
            "params": {"portfolio_id": "{portfolio_id}", "asof_date": "{as_of_date}"}
        }]
    }))
    .unwrap()
}

fn slow_analyst() -> Arc<MockAgent> {
    Arc::new(
        MockAgent::new("financial_analyst").capability(
            CapabilityContract::new("metrics.compute_twr"),
            MockResponse::payload(json!({"twr_ytd": 0.085}))
                .with_meta(Provenance::new(
                    format!("metrics_database:{PACK}"),
                    Some(asof()),
                    3600,
                    PACK,
                ))
                .delayed(Duration::from_millis(80)),
        ),
    )
}

fn runtime_with(agent: Arc<MockAgent>) -> Arc<Runtime> {
    Arc::new(
        Runtime::builder()
            .agent(agent)
            .executor_config(ExecutorConfig {
                staleness_days: 36500,
            })
            .build()
            .unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_identical_requests_hit_the_provider_once() {
    let agent = slow_analyst();
    let runtime = runtime_with(Arc::clone(&agent));

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let runtime = Arc::clone(&runtime);
        tasks.push(tokio::spawn(async move {
            let ctx = ExecutionContext::new(PACK).portfolio("P1").as_of(asof());
            runtime.execute_pattern(&pattern(), &ctx).await
        }));
    }

    let mut envelopes = Vec::new();
    for t in tasks {
        envelopes.push(t.await.unwrap().unwrap());
    }

    assert_eq!(
        agent.call_count("metrics.compute_twr"),
        1,
        "the provider call counter must read exactly 1 after both complete"
    );
    assert_eq!(envelopes[0].payload, envelopes[1].payload);
    assert_eq!(envelopes[0].meta.source, envelopes[1].meta.source);
    assert_eq!(envelopes[0].meta.as_of, envelopes[1].meta.as_of);
    assert_eq!(envelopes[0].meta.ttl_seconds, envelopes[1].meta.ttl_seconds);
}

#[tokio::test(flavor = "multi_thread")]
async fn different_portfolios_do_not_coalesce() {
    let agent = slow_analyst();
    let runtime = runtime_with(Arc::clone(&agent));

    let mut tasks = Vec::new();
    for portfolio in ["P1", "P2"] {
        let runtime = Arc::clone(&runtime);
        tasks.push(tokio::spawn(async move {
            let ctx = ExecutionContext::new(PACK).portfolio(portfolio).as_of(asof());
            runtime.execute_pattern(&pattern(), &ctx).await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    assert_eq!(agent.call_count("metrics.compute_twr"), 2);
}

#[tokio::test]
async fn pricing_pack_rollover_invalidates_prior_pack_entries() {
    let agent = slow_analyst();
    let runtime = runtime_with(Arc::clone(&agent));
    let ctx = ExecutionContext::new(PACK).portfolio("P1").as_of(asof());

    runtime.execute_pattern(&pattern(), &ctx).await.unwrap();
    assert_eq!(agent.call_count("metrics.compute_twr"), 1);

    // Same pack again: served from cache.
    runtime.execute_pattern(&pattern(), &ctx).await.unwrap();
    assert_eq!(agent.call_count("metrics.compute_twr"), 1);

    // Roll to a new active pack; entries keyed to the old one are dropped
    // within the next cache access.
    runtime.rollover_pricing_pack("PP_2025-10-22");
    assert!(runtime.cache().is_empty());
}
