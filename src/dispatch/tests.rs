#![expect(clippy::expect_used, reason = "test assertions")]

use std::sync::Mutex;

use async_trait::async_trait;
use rstest::{fixture, rstest};

use super::*;
use crate::{
    protocol::{SOAP12_NS, WFS_NS},
    request::{QueryExpression, RequestBuilder, RequestParams},
    test_fixtures::{capabilities, road},
};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<HttpRequest>>,
    reply: HttpReply,
    fail: bool,
}

#[async_trait]
impl Transport for Recorder {
    async fn send(
        &self,
        request: HttpRequest,
        _timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        let url = request.url.clone();
        self.sent.lock().expect("recorder lock").push(request);
        if self.fail {
            return Err(TransportError::other(&url, "connection refused"));
        }
        Ok(self.reply.clone())
    }
}

fn reply(status: u16, body: &str) -> HttpReply {
    HttpReply {
        status,
        headers: vec![("Content-Type".into(), "application/xml".into())],
        body: body.to_owned(),
    }
}

fn dispatcher(recorder: &Arc<Recorder>) -> BindingDispatcher {
    let transport: Arc<dyn Transport> = Arc::clone(recorder) as Arc<dyn Transport>;
    BindingDispatcher::new(transport, capabilities(), Duration::from_secs(5))
}

#[fixture]
fn payload() -> Payload {
    RequestBuilder::new(capabilities())
        .build(
            Operation::GetFeature,
            RequestParams::default()
                .with_query(QueryExpression::by_type(road()))
                .with_count(1),
        )
        .expect("payload")
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(fut)
}

#[rstest]
fn get_binding_sends_key_value_pairs(payload: Payload) {
    let recorder = Arc::new(Recorder {
        reply: reply(200, "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs/2.0\"/>"),
        ..Recorder::default()
    });
    let record =
        block_on(dispatcher(&recorder).dispatch(&payload, Binding::Get, None)).expect("record");
    assert!(record.root().is_some_and(|r| r.is(WFS_NS, "FeatureCollection")));
    let sent = recorder.sent.lock().expect("recorder lock");
    let request = sent.first().expect("one request");
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.url.path(), "/wfs");
    let query = request.url.query().expect("query string");
    assert!(query.contains("REQUEST=GetFeature"));
    assert!(query.contains("COUNT=1"));
}

#[rstest]
fn any_binding_prefers_post(payload: Payload) {
    let recorder = Arc::new(Recorder {
        reply: reply(200, "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs/2.0\"/>"),
        ..Recorder::default()
    });
    let ctx = dispatcher(&recorder)
        .prepare(&payload, Binding::Any, None)
        .expect("context");
    assert_eq!(ctx.binding, Binding::Post);
    block_on(dispatcher(&recorder).send(&ctx)).expect("record");
    let sent = recorder.sent.lock().expect("recorder lock");
    let request = sent.first().expect("one request");
    assert_eq!(request.method, HttpMethod::Post);
    assert!(request.body.as_deref().is_some_and(|b| b.contains("wfs:GetFeature")));
}

#[rstest]
fn soap_binding_wraps_an_envelope(payload: Payload) {
    let recorder = Arc::new(Recorder::default());
    let ctx = dispatcher(&recorder)
        .prepare(&payload, Binding::Soap, None)
        .expect("POST endpoint");
    assert_eq!(ctx.binding, Binding::Soap);
    let outcome = block_on(dispatcher(&recorder).send(&ctx));
    assert!(outcome.is_ok());
    let sent = recorder.sent.lock().expect("recorder lock");
    let request = sent.first().expect("one request");
    assert_eq!(
        request.header("content-type"),
        Some("application/soap+xml; charset=utf-8")
    );
    assert!(request.body.as_deref().is_some_and(|b| b.contains(SOAP12_NS)));
}

#[rstest]
fn transaction_over_get_is_malformed() {
    let payload = RequestBuilder::new(capabilities())
        .build(
            Operation::Transaction,
            RequestParams::default()
                .with_lock_id("lock-1")
                .with_release_action(crate::protocol::ReleaseAction::All),
        )
        .expect("payload");
    let recorder = Arc::new(Recorder::default());
    let endpoint = Url::parse("http://iut.test/wfs").expect("url");
    let err = block_on(dispatcher(&recorder).dispatch(&payload, Binding::Get, Some(&endpoint)))
        .expect_err("no KVP encoding");
    assert_eq!(err.kind(), "MalformedRequest");
}

#[rstest]
fn missing_endpoint_is_a_skip() {
    let payload = RequestBuilder::new(capabilities())
        .build(
            Operation::Transaction,
            RequestParams::default()
                .with_lock_id("lock-1")
                .with_release_action(crate::protocol::ReleaseAction::All),
        )
        .expect("payload");
    let recorder = Arc::new(Recorder::default());
    let err = dispatcher(&recorder)
        .prepare(&payload, Binding::Get, None)
        .expect_err("no GET endpoint");
    assert!(err.is_skip());
}

#[rstest]
fn transport_errors_are_not_retried(payload: Payload) {
    let recorder = Arc::new(Recorder {
        fail: true,
        ..Recorder::default()
    });
    let err = block_on(dispatcher(&recorder).dispatch(&payload, Binding::Post, None))
        .expect_err("transport failure");
    assert_eq!(err.kind(), "TransportFailure");
    assert_eq!(recorder.sent.lock().expect("recorder lock").len(), 1);
}

#[rstest]
fn exception_reports_are_decoded() {
    let record = ResponseRecord::from_reply(reply(
        403,
        r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1" version="2.0.0">
             <ows:Exception exceptionCode="LockHasExpired" locator="lock-1">
               <ows:ExceptionText>expired</ows:ExceptionText>
             </ows:Exception>
           </ows:ExceptionReport>"#,
    ));
    assert!(record.is_exception());
    assert_eq!(record.exception_code(), Some("LockHasExpired"));
    let entry = record.exceptions().first().expect("entry");
    assert_eq!(entry.locator.as_deref(), Some("lock-1"));
    assert_eq!(entry.texts, vec!["expired".to_owned()]);
}

#[rstest]
fn malformed_bodies_keep_the_parse_error() {
    let record = ResponseRecord::from_reply(reply(200, "<wfs:FeatureCollection>"));
    assert!(record.document.is_none());
    assert!(record.parse_error.is_some());
}
