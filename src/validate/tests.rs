#![expect(clippy::expect_used, reason = "test assertions")]

use rstest::{fixture, rstest};

use super::*;
use crate::dispatch::HttpReply;

const COLLECTION: &str = r#"<wfs:FeatureCollection numberReturned="2" numberMatched="5"
    timeStamp="2024-01-01T00:00:00Z" next="http://iut.test/wfs?page=2"
    xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:tns="http://example.org/ns1">
  <wfs:member><tns:Road gml:id="road.1">
    <tns:geom><gml:Point><gml:pos>1 1</gml:pos></gml:Point></tns:geom>
  </tns:Road></wfs:member>
  <wfs:member><tns:Road gml:id="road.2">
    <tns:geom><gml:Point><gml:pos>2 3</gml:pos></gml:Point></tns:geom>
  </tns:Road></wfs:member>
</wfs:FeatureCollection>"#;

const LOCKED: &str = r#"<wfs:LockFeatureResponse lockId="lock-7"
    xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:fes="http://www.opengis.net/fes/2.0">
  <wfs:FeaturesLocked>
    <fes:ResourceId rid="road.3"/><fes:ResourceId rid="road.4"/>
  </wfs:FeaturesLocked>
  <wfs:FeaturesNotLocked><fes:ResourceId rid="road.1"/></wfs:FeaturesNotLocked>
</wfs:LockFeatureResponse>"#;

fn record(status: u16, body: &str) -> ResponseRecord {
    ResponseRecord::from_reply(HttpReply {
        status,
        headers: Vec::new(),
        body: body.to_owned(),
    })
}

fn exception(status: u16, code: &str, locator: &str) -> ResponseRecord {
    record(
        status,
        &format!(
            r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1">
                 <ows:Exception exceptionCode="{code}" locator="{locator}"/>
               </ows:ExceptionReport>"#
        ),
    )
}

fn ids(values: &[&str]) -> BTreeSet<String> { values.iter().map(|v| (*v).to_owned()).collect() }

#[fixture]
fn validator() -> ResponseValidator { ResponseValidator::new() }

#[rstest]
fn structure_accepts_expected_root(validator: ResponseValidator) {
    let rec = record(200, COLLECTION);
    let root = validator
        .assert_response(&rec, Operation::GetFeature, &["numberReturned", "timeStamp"])
        .expect("collection");
    assert_eq!(root.local_name, "FeatureCollection");
}

#[rstest]
fn structure_reports_missing_attribute(validator: ResponseValidator) {
    let rec = record(200, COLLECTION);
    let err = validator
        .assert_response(&rec, Operation::GetFeature, &["previous"])
        .expect_err("no previous");
    assert_eq!(err.kind(), "StructuralValidationFailure");
    assert!(err.to_string().contains("previous"));
}

#[rstest]
fn structure_rejects_exception_reports(validator: ResponseValidator) {
    let rec = exception(400, "InvalidParameterValue", "typeNames");
    let err = validator
        .assert_response(&rec, Operation::GetFeature, &[])
        .expect_err("exception");
    assert_eq!(
        err,
        VerifyError::ProtocolExceptionMismatch {
            expected_code: "none".into(),
            expected_status: 200,
            actual_code: "InvalidParameterValue".into(),
            actual_status: 400,
        }
    );
}

#[rstest]
fn structure_rejects_wrong_root(validator: ResponseValidator) {
    let rec = record(200, LOCKED);
    let err = validator
        .assert_response(&rec, Operation::GetFeature, &[])
        .expect_err("wrong root");
    assert_eq!(err.kind(), "StructuralValidationFailure");
}

struct RejectAll;

impl SchemaValidator for RejectAll {
    fn validate(&self, _document: &XmlElement) -> Result<(), OracleError> {
        Err(OracleError::SchemaViolations(vec![
            "cvc-complex-type.2.4.a".to_owned(),
        ]))
    }
}

#[rstest]
fn schema_violations_fail_structure() {
    let strict = ResponseValidator::new().with_schema(Arc::new(RejectAll));
    let err = strict
        .assert_response(&record(200, COLLECTION), Operation::GetFeature, &[])
        .expect_err("schema");
    assert!(err.to_string().contains("cvc-complex-type"));
}

#[rstest]
#[case(Predicate::NumberReturned(2), true)]
#[case(Predicate::NumberReturned(1), false)]
#[case(Predicate::MemberCount(Cardinality::Exactly(2)), true)]
#[case(Predicate::MemberCount(Cardinality::AtMost(1)), false)]
#[case(Predicate::ExcludesIds(ids(&["road.9"])), true)]
#[case(Predicate::ExcludesIds(ids(&["road.2"])), false)]
#[case(Predicate::IncludesIds(ids(&["road.1"])), true)]
#[case(Predicate::AttributePresent("next".into()), true)]
#[case(Predicate::AttributeAbsent("previous".into()), true)]
#[case(Predicate::AttributeEquals("numberMatched".into(), "5".into()), true)]
#[case(Predicate::ElementPresent(GML_NS.into(), "Point".into()), true)]
#[case(Predicate::ElementAbsent(GML_NS.into(), "Point".into()), false)]
#[case(Predicate::Path("/wfs:FeatureCollection/wfs:member".into()), true)]
#[case(Predicate::Spatial(SpatialRelation::Within, Envelope::new(0.0, 0.0, 5.0, 5.0)), true)]
#[case(Predicate::Spatial(SpatialRelation::Within, Envelope::new(0.0, 0.0, 1.5, 1.5)), false)]
fn semantic_predicates(
    validator: ResponseValidator,
    #[case] predicate: Predicate,
    #[case] holds: bool,
) {
    let outcome = validator.assert_semantic(&record(200, COLLECTION), &predicate);
    assert_eq!(outcome.is_ok(), holds, "{predicate:?}: {outcome:?}");
    if let Err(err) = outcome {
        assert_eq!(err.kind(), "SemanticAssertionFailure");
    }
}

#[rstest]
fn lock_response_set_is_the_locked_ids(validator: ResponseValidator) {
    let rec = record(200, LOCKED);
    let root = rec.root().expect("root");
    assert_eq!(locked_ids(root), ids(&["road.3", "road.4"]));
    assert_eq!(not_locked_ids(root), ids(&["road.1"]));
    validator
        .assert_semantic(&rec, &Predicate::ExcludesIds(ids(&["road.1"])))
        .expect("road.1 not locked");
}

#[rstest]
fn exception_matches_code_status_and_locator(validator: ResponseValidator) {
    let rec = exception(400, "DuplicateStoredQueryIdValue", "urn:example:Q1");
    let expected = ExpectedException::new(ExceptionCode::DuplicateStoredQueryIdValue)
        .with_locator("urn:example:q1");
    let entry = validator.assert_exception(&rec, &expected).expect("match");
    assert_eq!(entry.code, "DuplicateStoredQueryIdValue");
}

#[rstest]
fn exception_status_is_checked(validator: ResponseValidator) {
    let rec = exception(400, "LockHasExpired", "lockId");
    let err = validator
        .assert_exception(&rec, &ExpectedException::new(ExceptionCode::LockHasExpired))
        .expect_err("403 expected");
    assert_eq!(
        err,
        VerifyError::ProtocolExceptionMismatch {
            expected_code: "LockHasExpired".into(),
            expected_status: 403,
            actual_code: "LockHasExpired".into(),
            actual_status: 400,
        }
    );
}

#[rstest]
fn success_is_not_an_exception(validator: ResponseValidator) {
    let err = validator
        .assert_exception(
            &record(200, COLLECTION),
            &ExpectedException::new(ExceptionCode::CannotLockAllFeatures),
        )
        .expect_err("no exception");
    assert!(err.to_string().contains("none"));
}

#[rstest]
fn wrong_locator_is_a_semantic_failure(validator: ResponseValidator) {
    let rec = exception(400, "InvalidParameterValue", "typeNames");
    let err = validator
        .assert_exception(
            &rec,
            &ExpectedException::new(ExceptionCode::InvalidParameterValue).with_locator("language"),
        )
        .expect_err("locator");
    assert_eq!(err.kind(), "SemanticAssertionFailure");
}
