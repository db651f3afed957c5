use chrono::{FixedOffset, TimeZone};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use llm_governance_core::audit::{AuditEvent, AuditStore, TimeRange};
use llm_governance_core::{
    AllowlistDevice, EnforcementConfig, EnforcementEngine, EnforcementMode, PolicyAction, PolicyOverride,
    PolicyResult, RequestContext,
};

fn enforcing_config() -> EnforcementConfig {
    let mut config = EnforcementConfig {
        mode: EnforcementMode::Enforce,
        enabled: true,
        consent_accepted: true,
        ..Default::default()
    };
    for i in 0..20 {
        config
            .policies
            .insert(format!("policy_{}", i), PolicyOverride::new(PolicyAction::Block));
    }
    for i in 0..50 {
        config
            .allowlist
            .devices
            .push(AllowlistDevice::new(format!("10.0.0.{}", i), format!("device_{}", i)));
    }
    config
}

fn request() -> RequestContext {
    let at = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 4, 22, 0, 0)
        .unwrap();
    RequestContext::new("192.168.1.20", "api.openai.com", at)
}

fn bench_decide(c: &mut Criterion) {
    let config = enforcing_config();
    let context = request();
    let results: Vec<PolicyResult> = (0..20)
        .map(|i| PolicyResult::matched(format!("policy_{}", i), PolicyAction::Block, "matched"))
        .collect();

    c.bench_function("decide_20_policies", |b| {
        b.iter(|| EnforcementEngine::decide(black_box(&context), black_box(&results), black_box(&config)))
    });
}

fn bench_summary(c: &mut Criterion) {
    let store = AuditStore::open_in_memory().unwrap();
    let config = enforcing_config();
    let context = request();
    let results = vec![PolicyResult::matched("policy_1", PolicyAction::Block, "matched")];
    let decision = EnforcementEngine::decide(&context, &results, &config);
    let event = AuditEvent::from_decision(&context, &decision, &results);
    let batch: Vec<AuditEvent> = std::iter::repeat(event).take(1_000).collect();
    for _ in 0..100 {
        store.insert_batch(&batch).unwrap();
    }

    c.bench_function("summary_100k_rows", |b| {
        b.iter(|| store.summary(black_box(&TimeRange::all())).unwrap())
    });
}

criterion_group!(benches, bench_decide, bench_summary);
criterion_main!(benches);
