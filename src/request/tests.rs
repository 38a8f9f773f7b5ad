#![expect(clippy::expect_used, reason = "test assertions")]

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::{
    protocol::{FES_NS, LockAction, QUERY_LANGUAGE_WFS, ResultType, TypeName, WFS_NS},
    test_fixtures::{NS1, building, capabilities, road},
};

#[fixture]
fn builder() -> RequestBuilder { RequestBuilder::new(capabilities()) }

fn kvp_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[rstest]
fn lock_feature_requires_expiry(builder: RequestBuilder) {
    let params = RequestParams::default().with_query(QueryExpression::by_type(road()));
    let err = builder
        .build(Operation::LockFeature, params)
        .expect_err("missing expiry");
    assert_eq!(err.kind(), "MalformedRequest");
}

#[rstest]
fn lock_feature_requires_query_or_lock_id(builder: RequestBuilder) {
    let bare = RequestParams::default().with_expiry(Duration::from_secs(60));
    assert!(builder.build(Operation::LockFeature, bare.clone()).is_err());
    let renewal = bare.with_lock_id("lock-1");
    assert!(builder.build(Operation::LockFeature, renewal).is_ok());
}

#[rstest]
fn paging_requires_count(builder: RequestBuilder) {
    let params = RequestParams::default()
        .with_query(QueryExpression::by_type(road()))
        .with_start_index(2);
    assert!(builder.build(Operation::GetFeature, params).is_err());
}

#[rstest]
fn create_stored_query_requires_language_and_body(builder: RequestBuilder) {
    let def = StoredQueryDefinition {
        id: "urn:example:q".into(),
        title: None,
        language: String::new(),
        parameters: vec![],
        return_types: vec![road()],
        body: QueryBody::Text(String::new()),
    };
    let params = RequestParams::default().with_definition(def);
    let err = builder
        .build(Operation::CreateStoredQuery, params)
        .expect_err("empty language");
    assert!(err.to_string().contains("language"));
}

#[rstest]
fn unknown_feature_type_is_rejected(builder: RequestBuilder) {
    let ghost = TypeName::new(NS1, "Ghost");
    let params = RequestParams::default().with_query(QueryExpression::by_type(ghost));
    let err = builder
        .build(Operation::GetFeature, params)
        .expect_err("unknown type");
    assert!(err.to_string().contains("Ghost"));
}

#[rstest]
fn transaction_has_no_kvp_encoding(builder: RequestBuilder) {
    let payload = builder
        .build(
            Operation::Transaction,
            RequestParams::default()
                .with_lock_id("lock-1")
                .with_release_action(crate::protocol::ReleaseAction::All),
        )
        .expect("release request");
    assert!(payload.to_kvp().is_err());
    let root = payload.to_element();
    assert_eq!(root.attr("lockId"), Some("lock-1"));
    assert_eq!(root.attr("releaseAction"), Some("ALL"));
}

#[rstest]
fn lock_feature_kvp_carries_lock_attributes(builder: RequestBuilder) {
    let payload = builder
        .build(
            Operation::LockFeature,
            RequestParams::default()
                .with_query(QueryExpression::by_ids(road(), ["road.1", "road.2"]))
                .with_expiry(Duration::from_secs(60))
                .with_lock_action(LockAction::Some),
        )
        .expect("lock request");
    let pairs = payload.to_kvp().expect("kvp");
    assert_eq!(kvp_value(&pairs, "REQUEST"), Some("LockFeature"));
    assert_eq!(kvp_value(&pairs, "RESOURCEID"), Some("road.1,road.2"));
    assert_eq!(kvp_value(&pairs, "EXPIRY"), Some("60"));
    assert_eq!(kvp_value(&pairs, "LOCKACTION"), Some("SOME"));
}

#[rstest]
fn multiple_type_queries_use_parenthesised_lists(builder: RequestBuilder) {
    let filter = Filter::PropertyIsEqualTo {
        property: "gml:name".into(),
        literal: "x".into(),
    };
    let payload = builder
        .build(
            Operation::GetFeature,
            RequestParams::default()
                .with_query(QueryExpression::filtered(road(), filter))
                .with_query(QueryExpression::by_type(building()))
                .with_count(1)
                .with_result_type(ResultType::Hits),
        )
        .expect("get feature");
    let pairs = payload.to_kvp().expect("kvp");
    assert_eq!(kvp_value(&pairs, "TYPENAMES"), Some("(tns:Road)(tns:Building)"));
    assert_eq!(kvp_value(&pairs, "RESULTTYPE"), Some("hits"));
    let encoded = kvp_value(&pairs, "FILTER").expect("filter");
    assert!(encoded.starts_with("(<fes:Filter"));
    assert!(encoded.ends_with(")()"));
}

#[rstest]
fn xml_encoding_binds_type_prefixes(builder: RequestBuilder) {
    let payload = builder
        .build(
            Operation::GetFeature,
            RequestParams::default()
                .with_query(QueryExpression::by_ids(road(), ["road.1"]))
                .with_count(1),
        )
        .expect("get feature");
    let doc = crate::xml::parse(&payload.to_xml()).expect("well-formed");
    assert!(doc.is(WFS_NS, "GetFeature"));
    assert_eq!(doc.attr("count"), Some("1"));
    let query = doc.child(WFS_NS, "Query").expect("query");
    let (ns, local) = query
        .resolve_qname(query.attr("typeNames").expect("typeNames"))
        .expect("resolvable");
    assert_eq!((ns.as_str(), local.as_str()), (NS1, "Road"));
    assert!(query.find(FES_NS, "ResourceId").is_some());
}

#[rstest]
fn stored_query_definition_declares_xsd_prefix(builder: RequestBuilder) {
    let def = StoredQueryDefinition {
        id: "urn:example:byName".into(),
        title: Some("By name".into()),
        language: QUERY_LANGUAGE_WFS.into(),
        parameters: vec![ParameterSpec {
            name: "name".into(),
            xsd_type: "string".into(),
        }],
        return_types: vec![road()],
        body: QueryBody::Expression(QueryExpression::by_type(road())),
    };
    let payload = builder
        .build(Operation::CreateStoredQuery, RequestParams::default().with_definition(def))
        .expect("create");
    let xml = payload.to_xml();
    assert!(xml.contains("xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\""));
    assert!(xml.contains("type=\"xsd:string\""));
    assert!(xml.contains("returnFeatureTypes=\"tns:Road\""));
}
