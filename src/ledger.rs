//! Tracking and teardown of server-side resources.
//!
//! Every lock id and stored query id created during a test case is recorded
//! once. [`ResourceLedger::release_all`] then releases whatever the case did
//! not settle itself, carrying on past individual failures and reporting them
//! as [`ResourceLeakWarning`] values.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    dispatch::{Binding, BindingDispatcher},
    error::{VerifyError, VerifyResult},
    protocol::{ExceptionCode, Operation, ReleaseAction},
    request::{RequestBuilder, RequestParams},
};

/// Kinds of tracked resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    /// A lock id.
    Lock,
    /// A stored query id.
    StoredQuery,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lock => "lock",
            Self::StoredQuery => "stored query",
        })
    }
}

/// A tracked resource that could not be released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceLeakWarning {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource id.
    pub id: String,
    /// Why the release failed.
    pub reason: String,
}

impl fmt::Display for ResourceLeakWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} was not released: {}", self.kind, self.id, self.reason)
    }
}

/// One recorded resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource id.
    pub id: String,
    /// Released, either by the test case or by teardown.
    pub settled: bool,
}

/// Resources created by one test case.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    entries: Vec<LedgerEntry>,
}

impl ResourceLedger {
    /// Create an empty ledger.
    #[must_use]
    pub const fn new() -> Self { Self { entries: Vec::new() } }

    /// Record a resource. Returns `false` when it was already recorded.
    pub fn record(&mut self, kind: ResourceKind, id: impl Into<String>) -> bool {
        let owned = id.into();
        if self.contains(kind, &owned) {
            return false;
        }
        debug!(%kind, id = %owned, "resource recorded");
        self.entries.push(LedgerEntry {
            kind,
            id: owned,
            settled: false,
        });
        true
    }

    /// Mark a resource as released by the test case itself.
    pub fn settle(&mut self, kind: ResourceKind, id: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.kind == kind && e.id == id) {
            entry.settled = true;
        }
    }

    /// Return `true` when the resource has been recorded.
    #[must_use]
    pub fn contains(&self, kind: ResourceKind, id: &str) -> bool {
        self.entries.iter().any(|e| e.kind == kind && e.id == id)
    }

    /// Every recorded resource in creation order.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] { &self.entries }

    /// Return `true` when nothing was recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Resources still awaiting release.
    pub fn outstanding(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(|e| !e.settled)
    }

    /// Release every outstanding resource.
    ///
    /// Locks are released with an empty `Transaction` carrying the lock id
    /// and `releaseAction=ALL`; stored queries are dropped. A lock that has
    /// already expired and a stored query that is already unknown count as
    /// released. Failures never stop the remaining releases.
    pub async fn release_all(
        &mut self,
        dispatcher: &BindingDispatcher,
        builder: &RequestBuilder,
    ) -> Vec<ResourceLeakWarning> {
        let mut warnings = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| !e.settled) {
            match release_one(dispatcher, builder, entry.kind, &entry.id).await {
                Ok(()) => {
                    debug!(kind = %entry.kind, id = %entry.id, "resource released");
                    entry.settled = true;
                }
                Err(err) => {
                    warn!(kind = %entry.kind, id = %entry.id, error = %err, "resource leak");
                    warnings.push(ResourceLeakWarning {
                        kind: entry.kind,
                        id: entry.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        warnings
    }
}

async fn release_one(
    dispatcher: &BindingDispatcher,
    builder: &RequestBuilder,
    kind: ResourceKind,
    id: &str,
) -> VerifyResult<()> {
    let (operation, params, tolerated) = match kind {
        ResourceKind::Lock => (
            Operation::Transaction,
            RequestParams::default()
                .with_lock_id(id)
                .with_release_action(ReleaseAction::All),
            ExceptionCode::LockHasExpired,
        ),
        ResourceKind::StoredQuery => (
            Operation::DropStoredQuery,
            RequestParams::default().with_stored_query_id(id),
            ExceptionCode::InvalidParameterValue,
        ),
    };
    let payload = builder.build(operation, params)?;
    let record = dispatcher.dispatch(&payload, Binding::Any, None).await?;
    if record.exception_code() == Some(tolerated.as_str()) {
        return Ok(());
    }
    if record.status == 200 && !record.is_exception() {
        return Ok(());
    }
    Err(VerifyError::ProtocolExceptionMismatch {
        expected_code: format!("none or {tolerated}"),
        expected_status: 200,
        actual_code: record.exception_code().unwrap_or("none").to_owned(),
        actual_status: record.status,
    })
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::{
        dispatch::{HttpReply, HttpRequest, Transport, TransportError},
        test_fixtures::capabilities,
    };

    const RELEASED: &str = r#"<wfs:TransactionResponse version="2.0.2"
    xmlns:wfs="http://www.opengis.net/wfs/2.0">
  <wfs:TransactionSummary/>
</wfs:TransactionResponse>"#;

    /// Answers each request with the next scripted reply; `None` fails the
    /// connection.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Option<HttpReply>>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = Option<HttpReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                sent: Mutex::default(),
            })
        }

        fn sent(&self) -> usize { self.sent.lock().expect("sent lock").len() }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(
            &self,
            request: HttpRequest,
            _timeout: Duration,
        ) -> Result<HttpReply, TransportError> {
            let url = request.url.clone();
            self.sent.lock().expect("sent lock").push(request);
            let next = self.replies.lock().expect("replies lock").pop_front().flatten();
            next.ok_or_else(|| TransportError::other(&url, "connection refused"))
        }
    }

    fn reply(status: u16, body: &str) -> Option<HttpReply> {
        Some(HttpReply {
            status,
            headers: vec![("Content-Type".into(), "application/xml".into())],
            body: body.to_owned(),
        })
    }

    fn exception(status: u16, code: &str) -> Option<HttpReply> {
        reply(
            status,
            &format!(
                r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1">
                     <ows:Exception exceptionCode="{code}" locator="lockId"/>
                   </ows:ExceptionReport>"#
            ),
        )
    }

    async fn release(
        script: &Arc<Scripted>,
        ledger: &mut ResourceLedger,
    ) -> Vec<ResourceLeakWarning> {
        let transport: Arc<dyn Transport> = Arc::clone(script) as Arc<dyn Transport>;
        let dispatcher = BindingDispatcher::new(transport, capabilities(), Duration::from_secs(5));
        let builder = RequestBuilder::new(capabilities());
        ledger.release_all(&dispatcher, &builder).await
    }

    #[rstest]
    fn records_each_id_once() {
        let mut ledger = ResourceLedger::new();
        assert!(ledger.record(ResourceKind::Lock, "lock-1"));
        assert!(!ledger.record(ResourceKind::Lock, "lock-1"));
        assert!(ledger.record(ResourceKind::StoredQuery, "lock-1"));
        assert_eq!(ledger.entries().len(), 2);
    }

    #[rstest]
    fn settled_entries_are_not_outstanding() {
        let mut ledger = ResourceLedger::new();
        ledger.record(ResourceKind::StoredQuery, "q1");
        ledger.record(ResourceKind::Lock, "lock-1");
        ledger.settle(ResourceKind::StoredQuery, "q1");
        let outstanding: Vec<_> = ledger.outstanding().map(|e| e.id.as_str()).collect();
        assert_eq!(outstanding, vec!["lock-1"]);
    }

    #[rstest]
    #[case::connection_refused(None, "transport failure")]
    #[case::refused_release(
        exception(400, "OperationProcessingFailed"),
        "OperationProcessingFailed"
    )]
    #[tokio::test]
    async fn failed_release_does_not_stop_the_next(
        #[case] first: Option<HttpReply>,
        #[case] reason: &str,
    ) {
        let script = Scripted::new([first, reply(200, RELEASED)]);
        let mut ledger = ResourceLedger::new();
        ledger.record(ResourceKind::Lock, "lock-1");
        ledger.record(ResourceKind::Lock, "lock-2");

        let warnings = release(&script, &mut ledger).await;

        assert_eq!(script.sent(), 2);
        assert_eq!(warnings.len(), 1);
        let warning = warnings.first().expect("one warning");
        assert_eq!(warning.id, "lock-1");
        assert!(warning.reason.contains(reason), "{}", warning.reason);
        let outstanding: Vec<_> = ledger.outstanding().map(|e| e.id.as_str()).collect();
        assert_eq!(outstanding, vec!["lock-1"]);
    }

    #[rstest]
    #[tokio::test]
    async fn expired_locks_and_unknown_queries_count_as_released() {
        let script = Scripted::new([
            exception(400, "LockHasExpired"),
            exception(400, "InvalidParameterValue"),
        ]);
        let mut ledger = ResourceLedger::new();
        ledger.record(ResourceKind::Lock, "lock-1");
        ledger.record(ResourceKind::StoredQuery, "q1");

        let warnings = release(&script, &mut ledger).await;

        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(script.sent(), 2);
        assert_eq!(ledger.outstanding().count(), 0);
    }
}
