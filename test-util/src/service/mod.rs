//! An in-process WFS the harness can be pointed at.
//!
//! [`SimulatedWfs`] implements [`Transport`] directly, so no socket is
//! involved. It answers the KVP, XML and SOAP bindings, keeps features,
//! locks, paging cursors and stored queries in memory, and reads time from
//! the same [`Clock`] as the harness. [`Faults`] switch on specific
//! conformance bugs so tests can check that the harness notices them.

mod reply;
mod request;
mod state;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tracing::debug;
use wfs_verify::{
    clock::Clock,
    dispatch::{HttpReply, HttpRequest, Transport, TransportError},
    protocol::ExceptionCode,
};

use self::{reply::Fault, state::ServiceState};
use crate::fixtures::{Advertised, SimFeature, capabilities_document, features};

/// Conformance bugs the simulated service can exhibit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Grant `ALL` locks over features another lock holds, and lock every
    /// selected feature for `SOME`.
    pub ignore_lock_conflicts: bool,
    /// Treat locks as active until they are released.
    pub never_expire: bool,
    /// Keep answering invocations of dropped stored queries.
    pub keep_dropped_queries: bool,
    /// Point `previous` continuations one window forward instead of back.
    pub broken_previous_links: bool,
    /// Store stored query definitions in any query language.
    pub accept_any_language: bool,
    /// Refuse transactions presenting a released or expired lock id with
    /// `InvalidParameterValue` instead of `LockHasExpired`.
    pub stale_locks_as_invalid: bool,
}

/// A WFS 2.0 service held in memory.
#[derive(Debug, Clone)]
pub struct SimulatedWfs {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<ServiceState>>,
}

impl SimulatedWfs {
    /// A conforming service holding the default features and advertising
    /// every class it implements.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(ServiceState::new(
                features(),
                capabilities_document(Advertised::default()),
            ))),
        }
    }

    /// Exhibit `faults`.
    #[must_use]
    pub fn with_faults(self, faults: Faults) -> Self {
        self.lock().faults = faults;
        self
    }

    /// Replace the stored features.
    #[must_use]
    pub fn with_features(self, features: Vec<SimFeature>) -> Self {
        self.lock().features = features;
        self
    }

    /// Serve `document` for `GetCapabilities`.
    #[must_use]
    pub fn with_capabilities(self, document: impl Into<String>) -> Self {
        self.lock().capabilities = document.into();
        self
    }

    /// Names of the operations received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> { self.lock().log.clone() }

    /// Number of requests received for `operation`.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.lock().log.iter().filter(|name| *name == operation).count()
    }

    /// Ids of the locks active now.
    #[must_use]
    pub fn active_locks(&self) -> Vec<String> {
        let now = self.clock.now();
        self.lock().active_locks(now)
    }

    /// Ids of the stored queries defined and not dropped.
    #[must_use]
    pub fn stored_query_ids(&self) -> Vec<String> { self.lock().stored_query_ids() }

    /// Ids of the features currently stored.
    #[must_use]
    pub fn feature_ids(&self) -> Vec<String> {
        self.lock().features.iter().map(|f| f.id.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `request` synchronously.
    #[must_use]
    pub fn answer(&self, request: &HttpRequest) -> HttpReply {
        let now = self.clock.now();
        match request::decode(request) {
            Ok((encoding, call)) => {
                debug!(
                    operation = call.name(),
                    method = request.method.as_str(),
                    "simulated request"
                );
                let answer = self.lock().handle(call, now);
                reply::encode(answer, &encoding, &request.url)
            }
            Err(undecodable) => {
                debug!(reason = %undecodable.reason, "undecodable request");
                let fault = Fault::new(
                    ExceptionCode::OperationParsingFailed,
                    "request",
                    undecodable.reason,
                );
                reply::encode(Err(fault), &undecodable.encoding, &request.url)
            }
        }
    }
}

#[async_trait]
impl Transport for SimulatedWfs {
    async fn send(
        &self,
        request: HttpRequest,
        _timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        Ok(self.answer(&request))
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::{fixture, rstest};
    use url::Url;
    use wfs_verify::{
        clock::SimulatedClock,
        dispatch::{HttpMethod, ResponseRecord},
        protocol::{OWS_NS, WFS_NS},
        xml,
    };

    use super::*;
    use crate::fixtures::ENDPOINT;

    #[fixture]
    fn service() -> SimulatedWfs { SimulatedWfs::new(Arc::new(SimulatedClock::new())) }

    fn get(query: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: Url::parse(&format!("{ENDPOINT}?{query}")).expect("url"),
            headers: Vec::new(),
            body: None,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn capabilities_are_served_verbatim(service: SimulatedWfs) {
        let reply = service
            .send(get("SERVICE=WFS&REQUEST=GetCapabilities"), Duration::from_secs(1))
            .await
            .expect("reply");
        assert_eq!(reply.status, 200);
        assert!(reply.body.contains("WFS_Capabilities"));
        assert_eq!(service.requests(), vec!["GetCapabilities".to_owned()]);
    }

    #[rstest]
    fn features_are_paged_over_kvp(service: SimulatedWfs) {
        let reply =
            service.answer(&get("SERVICE=WFS&REQUEST=GetFeature&TYPENAMES=tns:Building&COUNT=2"));
        let root = xml::parse(&reply.body).expect("collection");
        assert!(root.is(WFS_NS, "FeatureCollection"));
        assert_eq!(root.attr("numberMatched"), Some("3"));
        assert_eq!(root.children_named(WFS_NS, "member").count(), 2);
        let next = Url::parse(root.attr("next").expect("next")).expect("absolute");
        let follow = service.answer(&HttpRequest {
            url: next,
            ..get("")
        });
        let last = xml::parse(&follow.body).expect("collection");
        assert_eq!(last.attr("numberReturned"), Some("1"));
        assert!(last.attr("next").is_none());
    }

    #[rstest]
    fn unknown_operations_are_reported(service: SimulatedWfs) {
        let reply = service.answer(&get("SERVICE=WFS&REQUEST=DescribeStoredQueries"));
        assert_eq!(reply.status, 400);
        let record = ResponseRecord::from_reply(reply);
        assert_eq!(record.exception_code(), Some("OperationNotSupported"));
    }

    #[rstest]
    fn malformed_bodies_fail_to_parse(service: SimulatedWfs) {
        let reply = service.answer(&HttpRequest {
            method: HttpMethod::Post,
            body: Some("<wfs:GetFeature".to_owned()),
            ..get("")
        });
        let root = xml::parse(&reply.body).expect("report");
        assert!(root.is(OWS_NS, "ExceptionReport"));
        assert!(reply.body.contains("OperationParsingFailed"));
    }

    #[rstest]
    fn faults_are_configurable(service: SimulatedWfs) {
        let faulty = service.with_faults(Faults {
            never_expire: true,
            ..Faults::default()
        });
        assert!(faulty.lock().faults.never_expire);
        assert!(faulty.active_locks().is_empty());
    }
}
