// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end executor tests against mock agents.

use chrono::NaiveDate;
use daws_agent_mock::{MockAgent, MockResponse};
use daws_core::{
    CapabilityContract, ErrorKind, ExecutionContext, FieldType, ImplementationStatus, Provenance,
};
use daws_pattern::Pattern;
use daws_runtime::{ExecutorConfig, Runtime};
use serde_json::json;
use std::sync::Arc;

const PACK: &str = "PP_2025-10-21";

fn asof() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 21).unwrap()
}

fn pattern(v: serde_json::Value) -> Pattern {
    serde_json::from_value(v).expect("pattern literal")
}

fn ctx() -> ExecutionContext {
    ExecutionContext::new(PACK).portfolio("P1").as_of(asof())
}

/// Test fixtures carry 2025 as-of dates; disable the staleness flag except
/// where a test asserts it.
fn fresh_config() -> ExecutorConfig {
    ExecutorConfig {
        staleness_days: 36500,
    }
}

fn analyst() -> Arc<MockAgent> {
    Arc::new(
        MockAgent::new("financial_analyst").capability(
            CapabilityContract::new("metrics.compute_twr")
                .input("portfolio_id", FieldType::Identifier)
                .input("asof_date", FieldType::Date)
                .output("twr_ytd", FieldType::Decimal),
            MockResponse::payload(json!({"twr_ytd": 0.085})).with_meta(
                Provenance::new(
                    format!("metrics_database:{PACK}"),
                    Some(asof()),
                    3600,
                    PACK,
                ),
            ),
        ),
    )
}

fn twr_pattern() -> Pattern {
    pattern(json!({
        "id": "twr_only",
        "version": "1.0",
        "last_updated": "2025-10-21",
        "triggers": ["what is my twr"],
        "steps": [{
            "name": "compute_twr",
            "action": "execute_through_registry",
            "capability": "metrics.compute_twr",
            "params": {"portfolio_id": "{portfolio_id}", "asof_date": "{as_of_date}"},
            "outputs": ["twr"]
        }]
    }))
}

#[tokio::test]
async fn simple_metric_returns_payload_with_provenance() {
    let runtime = Runtime::builder()
        .agent(analyst())
        .executor_config(fresh_config())
        .build()
        .unwrap();

    let env = runtime.execute_pattern(&twr_pattern(), &ctx()).await.unwrap();
    assert_eq!(env.payload, json!({"twr_ytd": 0.085}));
    assert_eq!(env.meta.source, format!("metrics_database:{PACK}"));
    assert_eq!(env.meta.as_of, Some(asof()));
    assert_eq!(env.meta.ttl_seconds, 3600);
    assert_eq!(env.meta.pricing_pack_id, PACK);
    assert_eq!(env.meta.status, ImplementationStatus::Real);
    assert!(!env.meta.stale);
}

#[tokio::test]
async fn stub_step_poisons_the_merged_envelope() {
    let agent = Arc::new(
        MockAgent::new("financial_analyst")
            .capability(
                CapabilityContract::new("ledger.positions").fetches_positions(),
                MockResponse::payload(json!([{"symbol": "AAPL", "qty": 10}])).with_meta(
                    Provenance::new("ledger:abc123", Some(asof()), 3600, PACK),
                ),
            )
            .capability(
                CapabilityContract::new("risk.factor_exposure").stub(),
                // No producer meta: the adapter fills defaults from the
                // contract, including the stub status.
                MockResponse::payload(json!({"factors": {}})),
            ),
    );
    let runtime = Runtime::builder()
        .agent(agent)
        .executor_config(fresh_config())
        .build()
        .unwrap();

    let p = pattern(json!({
        "id": "exposure",
        "version": "1.0",
        "last_updated": "2025-10-21",
        "steps": [
            {"name": "positions_fetch", "action": "execute_through_registry",
             "capability": "ledger.positions", "outputs": ["positions"]},
            {"name": "factor_exposure", "action": "execute_through_registry",
             "capability": "risk.factor_exposure",
             "params": {"positions": "{positions}"}}
        ]
    }));

    let env = runtime.execute_pattern(&p, &ctx()).await.unwrap();
    // The rejection must fire on the merged envelope, not on step 1 alone.
    assert!(env.is_stub());
    assert_eq!(env.meta.status, ImplementationStatus::Stub);
    assert!(env.meta.source.contains("ledger:abc123"));
}

#[tokio::test]
async fn empty_step_list_yields_a_well_formed_real_envelope() {
    let runtime = Runtime::builder()
        .executor_config(fresh_config())
        .build()
        .unwrap();
    let p = pattern(json!({
        "id": "empty", "version": "1.0", "last_updated": "2025-10-21", "steps": []
    }));

    let env = runtime.execute_pattern(&p, &ctx()).await.unwrap();
    assert_eq!(env.payload, serde_json::Value::Null);
    assert_eq!(env.meta.status, ImplementationStatus::Real);
    assert_eq!(env.meta.pricing_pack_id, PACK);
}

#[tokio::test]
async fn unresolved_reference_aborts_with_the_reference_named() {
    let runtime = Runtime::builder()
        .agent(analyst())
        .executor_config(fresh_config())
        .build()
        .unwrap();
    let p = pattern(json!({
        "id": "bad_ref",
        "version": "1.0",
        "last_updated": "2025-10-21",
        "steps": [{
            "name": "compute_twr",
            "action": "execute_through_registry",
            "capability": "metrics.compute_twr",
            "params": {"portfolio_id": "{no_such_var}"}
        }]
    }));

    let err = runtime.execute_pattern(&p, &ctx()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnresolvedReference);
    assert!(err.reason.contains("no_such_var"));
    assert_eq!(err.step.as_deref(), Some("compute_twr"));
    assert_eq!(err.pattern_id.as_deref(), Some("bad_ref"));
}

#[tokio::test]
async fn template_missing_outputs_is_an_unresolved_reference() {
    let runtime = Runtime::builder()
        .executor_config(fresh_config())
        .build()
        .unwrap();
    let p = pattern(json!({
        "id": "templated", "version": "1.0", "last_updated": "2025-10-21",
        "steps": [],
        "template": "YTD: {compute_twr.twr_ytd}"
    }));

    let err = runtime.execute_pattern(&p, &ctx()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnresolvedReference);
}

#[tokio::test]
async fn template_renders_against_step_outputs() {
    let runtime = Runtime::builder()
        .agent(analyst())
        .executor_config(fresh_config())
        .build()
        .unwrap();
    let mut p = twr_pattern();
    p.template = Some("YTD TWR for {portfolio_id}: {compute_twr.twr_ytd}".into());

    let env = runtime.execute_pattern(&p, &ctx()).await.unwrap();
    assert_eq!(env.payload, json!("YTD TWR for P1: 0.085"));
}

#[tokio::test]
async fn optional_step_failure_leaves_a_stub_and_continues() {
    let agent = Arc::new(
        MockAgent::new("financial_analyst")
            .capability(
                CapabilityContract::new("news.fetch"),
                MockResponse::failing("newsapi unreachable"),
            )
            .capability(
                CapabilityContract::new("metrics.compute_twr"),
                MockResponse::payload(json!({"twr_ytd": 0.085})).with_meta(
                    Provenance::new(format!("metrics_database:{PACK}"), Some(asof()), 3600, PACK),
                ),
            ),
    );
    let runtime = Runtime::builder()
        .agent(agent)
        .executor_config(fresh_config())
        .build()
        .unwrap();

    let p = pattern(json!({
        "id": "resilient",
        "version": "1.0",
        "last_updated": "2025-10-21",
        "steps": [
            {"name": "headlines", "action": "execute_through_registry",
             "capability": "news.fetch", "required": false},
            {"name": "compute_twr", "action": "execute_through_registry",
             "capability": "metrics.compute_twr"}
        ]
    }));

    let env = runtime.execute_pattern(&p, &ctx()).await.unwrap();
    // Pattern completed off the second step, but the stub marker from the
    // failed optional step poisons the merged status.
    assert_eq!(env.payload, json!({"twr_ytd": 0.085}));
    assert_eq!(env.meta.status, ImplementationStatus::Stub);
}

#[tokio::test]
async fn required_step_timeout_aborts_the_pattern() {
    let agent = Arc::new(MockAgent::new("slow").capability(
        CapabilityContract::new("slow.cap"),
        MockResponse::payload(json!({"ok": true}))
            .delayed(std::time::Duration::from_secs(30)),
    ));
    let runtime = Runtime::builder()
        .agent(agent)
        .executor_config(fresh_config())
        .build()
        .unwrap();

    let p = pattern(json!({
        "id": "slowpoke",
        "version": "1.0",
        "last_updated": "2025-10-21",
        "steps": [{
            "name": "s", "action": "execute_through_registry",
            "capability": "slow.cap", "timeout_secs": 0
        }]
    }));

    let err = runtime.execute_pattern(&p, &ctx()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.step.as_deref(), Some("s"));
}

#[tokio::test]
async fn old_as_of_sets_the_stale_flag() {
    let runtime = Runtime::builder()
        .agent(analyst())
        .executor_config(ExecutorConfig { staleness_days: 5 })
        .build()
        .unwrap();

    // The fixture as-of (2025-10-21) is far older than five days.
    let env = runtime.execute_pattern(&twr_pattern(), &ctx()).await.unwrap();
    assert!(env.meta.stale);
}

#[tokio::test]
async fn cross_pack_outputs_fail_validation() {
    let agent = Arc::new(
        MockAgent::new("financial_analyst")
            .capability(
                CapabilityContract::new("pricing.yesterday"),
                MockResponse::payload(json!({"px": 1.0})).with_meta(Provenance::new(
                    "pricing_pack:PP_2025-10-20",
                    Some(asof()),
                    3600,
                    "PP_2025-10-20",
                )),
            )
            .capability(
                CapabilityContract::new("pricing.today"),
                MockResponse::payload(json!({"px": 2.0})).with_meta(Provenance::new(
                    format!("pricing_pack:{PACK}"),
                    Some(asof()),
                    3600,
                    PACK,
                )),
            ),
    );
    let runtime = Runtime::builder()
        .agent(agent)
        .executor_config(fresh_config())
        .build()
        .unwrap();

    let p = pattern(json!({
        "id": "mixed_packs",
        "version": "1.0",
        "last_updated": "2025-10-21",
        "steps": [
            {"name": "old", "action": "execute_through_registry", "capability": "pricing.yesterday"},
            {"name": "new", "action": "execute_through_registry", "capability": "pricing.today"}
        ]
    }));

    let err = runtime.execute_pattern(&p, &ctx()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationFailed);
    assert!(err.reason.contains("inconsistent pricing_pack_id"));
}

#[tokio::test]
async fn cancelled_token_stops_before_the_next_step() {
    let runtime = Runtime::builder()
        .agent(analyst())
        .executor_config(fresh_config())
        .build()
        .unwrap();
    let cancel = daws_runtime::CancellationToken::new();
    cancel.cancel();

    let err = runtime
        .executor()
        .execute_cancellable(&twr_pattern(), &ctx(), &cancel)
        .await
        .unwrap_err();
    assert!(err.reason.contains("cancelled"));
}

#[tokio::test]
async fn capability_results_come_from_the_cache_on_repeat_execution() {
    let agent = analyst();
    let runtime = Runtime::builder()
        .agent(Arc::clone(&agent) as Arc<dyn daws_agent::Agent>)
        .executor_config(fresh_config())
        .build()
        .unwrap();

    let p = twr_pattern();
    for _ in 0..3 {
        runtime.execute_pattern(&p, &ctx()).await.unwrap();
    }
    assert_eq!(
        agent.call_count("metrics.compute_twr"),
        1,
        "identical fingerprints must be served from cache"
    );
}
