//! Stored query management against the simulated service.
#![expect(clippy::expect_used, reason = "test assertions")]

mod harness;

use harness::rig;
use rstest::rstest;
use test_util::{
    Faults,
    fixtures::{BUILDING_COUNT, building},
};
use wfs_verify::{
    protocol::{ExceptionCode, QRY_GET_FEATURE_BY_ID},
    stored_query::{StoredQueryRegistry, StoredQueryState, type_query_definition},
    suite::Verdict,
    validate::feature_members,
};

#[rstest]
#[case("create_invoke_drop")]
#[case("list_stored_queries")]
#[case("duplicate_stored_query")]
#[case("invoke_after_drop")]
#[case("unsupported_language")]
#[case("drop_unknown")]
#[tokio::test]
async fn conforming_service_passes(#[case] name: &str) {
    let rig = rig(Faults::default()).await;
    let report = rig.run(name).await;
    assert_eq!(report.verdict, Verdict::Passed, "{name}: {:?}", report.verdict);
    assert!(report.leaks.is_empty(), "{name} leaked {:?}", report.leaks);
    assert!(rig.service.stored_query_ids().is_empty(), "{name} left stored queries behind");
}

#[rstest]
#[tokio::test]
async fn dropped_queries_that_still_answer_fail() {
    let rig = rig(Faults {
        keep_dropped_queries: true,
        ..Faults::default()
    })
    .await;
    let report = rig.run("invoke_after_drop").await;
    let Verdict::Failed { kind, .. } = &report.verdict else {
        panic!("expected a failure, got {:?}", report.verdict);
    };
    assert_eq!(kind, "ProtocolExceptionMismatch");
}

#[rstest]
#[tokio::test]
async fn accepted_foreign_languages_are_dropped_at_teardown() {
    let rig = rig(Faults {
        accept_any_language: true,
        ..Faults::default()
    })
    .await;
    let report = rig.run("unsupported_language").await;
    let Verdict::Failed { kind, .. } = &report.verdict else {
        panic!("expected a failure, got {:?}", report.verdict);
    };
    assert_eq!(kind, "ProtocolExceptionMismatch");
    assert_eq!(rig.service.count("DropStoredQuery"), 1);
    assert!(report.leaks.is_empty(), "leaked {:?}", report.leaks);
    assert!(rig.service.stored_query_ids().is_empty());
}

#[rstest]
#[tokio::test]
async fn invocation_returns_the_defined_type() {
    let rig = rig(Faults::default()).await;
    let mut ctx = rig.context("invocation_returns_the_defined_type");
    let mut registry = StoredQueryRegistry::new(&mut ctx).expect("managed stored queries");
    let id = registry.id_for("buildings");
    registry
        .create(&type_query_definition(id.as_str(), &building()))
        .await
        .expect("create")
        .accepted()
        .expect("created");
    let record = registry
        .invoke(&id, &[])
        .await
        .expect("invoke")
        .accepted()
        .expect("invoked");
    let members = record.root().map(feature_members).unwrap_or_default();
    assert_eq!(members.len(), BUILDING_COUNT);
    let listed = registry.list().await.expect("list");
    assert!(listed.contains(&id));
    assert!(listed.iter().any(|q| q == QRY_GET_FEATURE_BY_ID));
    registry.drop(&id).await.expect("drop").accepted().expect("dropped");
    assert_eq!(ctx.stored_queries.state(&id), Some(StoredQueryState::Dropped));
    assert!(rig.service.stored_query_ids().is_empty());
}

#[rstest]
#[tokio::test]
async fn dropped_ids_can_be_defined_again() {
    let rig = rig(Faults::default()).await;
    let mut ctx = rig.context("dropped_ids_can_be_defined_again");
    let mut registry = StoredQueryRegistry::new(&mut ctx).expect("managed stored queries");
    let definition = type_query_definition(registry.id_for("again"), &building());
    for _ in 0..2 {
        registry
            .create(&definition)
            .await
            .expect("create")
            .accepted()
            .expect("created");
        registry
            .drop(&definition.id)
            .await
            .expect("drop")
            .accepted()
            .expect("dropped");
    }
    registry
        .drop(&definition.id)
        .await
        .expect("drop")
        .rejected(ExceptionCode::InvalidParameterValue)
        .expect("unknown id refused");
}

#[rstest]
#[tokio::test]
async fn leftover_queries_are_dropped_before_a_run() {
    let rig = rig(Faults::default()).await;
    {
        let mut ctx = rig.context("leftover");
        let mut registry = StoredQueryRegistry::new(&mut ctx).expect("managed stored queries");
        let definition = type_query_definition(registry.id_for("leftover"), &building());
        registry
            .create(&definition)
            .await
            .expect("create")
            .accepted()
            .expect("created");
    }
    assert_eq!(rig.service.stored_query_ids().len(), 1);
    let mut ctx = rig.context("preclean");
    let dropped = StoredQueryRegistry::new(&mut ctx)
        .expect("managed stored queries")
        .preclean()
        .await
        .expect("preclean");
    assert_eq!(dropped, 1);
    assert!(rig.service.stored_query_ids().is_empty());
}
