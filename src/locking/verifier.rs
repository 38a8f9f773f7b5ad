//! Lock round-trips against the service under test.

use std::{collections::BTreeSet, time::Duration};

use tracing::{debug, info};

use super::model::{AcquisitionPlan, LockRequest, LockState};
use crate::{
    context::VerificationContext,
    dispatch::{Binding, ExceptionEntry, ResponseRecord},
    error::{VerifyError, VerifyResult},
    ledger::ResourceKind,
    protocol::{
        ConformanceClass,
        ExceptionCode,
        LockAction,
        Operation,
        ReleaseAction,
        ResultType,
        TypeName,
        WFS_NS,
    },
    request::{Filter, QueryExpression, RequestParams, TransactionAction},
    validate::{ExpectedException, Outcome, Predicate, not_locked_ids, response_ids},
    xml::XmlElement,
};

/// Features selected for locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTarget {
    /// Feature type of the selected features.
    pub type_name: TypeName,
    /// Selected feature ids.
    pub ids: BTreeSet<String>,
    whole_type: bool,
}

impl LockTarget {
    /// Features of `type_name` selected by id.
    pub fn by_ids<I, S>(type_name: TypeName, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            type_name,
            ids: ids.into_iter().map(Into::into).collect(),
            whole_type: false,
        }
    }

    /// Every feature of `type_name`. `known` are the ids sampled for it.
    pub fn whole_type<I, S>(type_name: TypeName, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whole_type: true,
            ..Self::by_ids(type_name, known)
        }
    }

    fn query(&self) -> QueryExpression {
        if self.whole_type {
            QueryExpression::by_type(self.type_name.clone())
        } else {
            QueryExpression::by_ids(self.type_name.clone(), self.ids.iter().cloned())
        }
    }
}

/// A lock granted by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// Server-assigned lock id.
    pub lock_id: String,
    /// Features the service reported as locked.
    pub locked: BTreeSet<String>,
    /// Features the service reported as not locked.
    pub not_locked: BTreeSet<String>,
    /// Whether the answer carried a `wfs:FeaturesLocked` element.
    pub locked_listed: bool,
    /// Whether the answer carried a `wfs:FeaturesNotLocked` element, even an
    /// empty one.
    pub not_locked_listed: bool,
}

impl LockGrant {
    /// Read a grant from a `LockFeatureResponse` or a locked feature
    /// collection. Collections list their features as members, so
    /// `locked_listed` always holds for them.
    #[must_use]
    pub fn from_response(lock_id: impl Into<String>, root: &XmlElement) -> Self {
        let lock_response = root.is(WFS_NS, "LockFeatureResponse");
        Self {
            lock_id: lock_id.into(),
            locked: response_ids(root),
            not_locked: not_locked_ids(root),
            locked_listed: !lock_response || root.child(WFS_NS, "FeaturesLocked").is_some(),
            not_locked_listed: root.child(WFS_NS, "FeaturesNotLocked").is_some(),
        }
    }

    /// Check the shape of a fully successful `ALL` lock: features were
    /// locked and no `FeaturesNotLocked` element was sent.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::SemanticAssertionFailure`] when either element
    /// is wrong.
    pub fn assert_fully_locked(&self) -> VerifyResult<()> {
        if !self.locked_listed {
            return Err(VerifyError::assertion("FeaturesLocked", "present", "absent"));
        }
        if self.locked.is_empty() {
            return Err(VerifyError::assertion("FeaturesLocked", "non-empty", "empty"));
        }
        if self.not_locked_listed {
            return Err(VerifyError::assertion(
                "FeaturesNotLocked",
                "absent",
                format!("present with {} features", self.not_locked.len()),
            ));
        }
        Ok(())
    }
}

/// Drives lock requests for one test case.
#[derive(Debug)]
pub struct LockingVerifier<'a> {
    ctx: &'a mut VerificationContext,
    binding: Binding,
}

impl<'a> LockingVerifier<'a> {
    /// Create a verifier for a service implementing the locking class.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when locking is not advertised.
    pub fn new(ctx: &'a mut VerificationContext) -> VerifyResult<Self> {
        let caps = ctx.capabilities();
        if !caps.implements(ConformanceClass::LockingWfs)
            || !caps.supports(Operation::LockFeature)
        {
            return Err(VerifyError::unsupported("LockFeature"));
        }
        Ok(Self {
            ctx,
            binding: Binding::Any,
        })
    }

    /// Send `LockFeature` and `GetFeatureWithLock` over `binding`. Releases
    /// and deletions still use any advertised binding.
    #[must_use]
    pub const fn with_binding(mut self, binding: Binding) -> Self {
        self.binding = binding;
        self
    }

    /// Lock `target` with `LockFeature`.
    ///
    /// # Errors
    ///
    /// Fails when the service's answer contradicts the lock model.
    pub async fn lock(
        &mut self,
        target: &LockTarget,
        action: LockAction,
        expiry: Duration,
    ) -> VerifyResult<Outcome<LockGrant>> {
        let request = LockRequest::acquire(target.ids.iter().cloned(), action, expiry);
        let params = RequestParams::default()
            .with_query(target.query())
            .with_lock_action(action)
            .with_expiry(expiry);
        self.acquire(Operation::LockFeature, params, &request, None).await
    }

    /// Lock `target` and fetch it in one `GetFeatureWithLock` request. A
    /// `hits` request is expected to be refused.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when the operation is not
    /// advertised and fails when the answer contradicts the lock model.
    pub async fn lock_with_features(
        &mut self,
        target: &LockTarget,
        action: LockAction,
        expiry: Duration,
        result_type: ResultType,
    ) -> VerifyResult<Outcome<LockGrant>> {
        if !self.ctx.capabilities().supports(Operation::GetFeatureWithLock) {
            return Err(VerifyError::unsupported("GetFeatureWithLock"));
        }
        let request = LockRequest::acquire(target.ids.iter().cloned(), action, expiry);
        let params = RequestParams::default()
            .with_query(target.query())
            .with_lock_action(action)
            .with_expiry(expiry)
            .with_result_type(result_type);
        let forced =
            (result_type == ResultType::Hits).then_some(ExceptionCode::InvalidParameterValue);
        self.acquire(Operation::GetFeatureWithLock, params, &request, forced).await
    }

    /// Send a `LockFeature` request carrying both a query and `lock_id`.
    ///
    /// # Errors
    ///
    /// Fails unless the service answers `OperationParsingFailed`.
    pub async fn lock_with_existing_id(
        &mut self,
        target: &LockTarget,
        lock_id: &str,
        expiry: Duration,
    ) -> VerifyResult<Outcome<LockGrant>> {
        let request = LockRequest::acquire(target.ids.iter().cloned(), LockAction::All, expiry)
            .with_lock_id(lock_id);
        let params = RequestParams::default()
            .with_query(target.query())
            .with_lock_id(lock_id)
            .with_expiry(expiry);
        self.acquire(Operation::LockFeature, params, &request, None).await
    }

    /// Reset the expiry of `lock_id`.
    ///
    /// # Errors
    ///
    /// Fails when the service's answer contradicts the lock model; renewing a
    /// lock the model holds as expired must be refused with `LockHasExpired`.
    pub async fn renew(
        &mut self,
        lock_id: &str,
        expiry: Duration,
    ) -> VerifyResult<Outcome<LockGrant>> {
        let request = LockRequest::renew(lock_id, expiry);
        let params = RequestParams::default().with_lock_id(lock_id).with_expiry(expiry);
        self.acquire(Operation::LockFeature, params, &request, None).await
    }

    /// Release `lock_id` with an empty transaction. Releasing a lock that has
    /// already expired or been released is not an error, whatever the
    /// service answers.
    ///
    /// # Errors
    ///
    /// Fails when an active lock could not be released.
    pub async fn release(&mut self, lock_id: &str) -> VerifyResult<()> {
        let now = self.ctx.now();
        let params = RequestParams::default()
            .with_lock_id(lock_id)
            .with_release_action(ReleaseAction::All);
        let record = self.send(Operation::Transaction, params, Binding::Any).await?;
        if self.ctx.locks.predict_use(lock_id, now).is_none() {
            self.ctx.validator.assert_response(&record, Operation::Transaction, &[])?;
        } else if let Some(entry) = record.exceptions().first() {
            debug!(
                lock_id,
                code = %entry.code,
                status = record.status,
                "settled lock refused on release"
            );
        }
        self.ctx.locks.on_released(lock_id, now);
        self.ctx.ledger.settle(ResourceKind::Lock, lock_id);
        debug!(lock_id, "lock released");
        Ok(())
    }

    /// Wait on the context clock until `lock_id` has expired, plus the
    /// configured buffer.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::SemanticAssertionFailure`] when the lock is
    /// unknown or was released instead of expiring.
    pub async fn await_expiry(&mut self, lock_id: &str) -> VerifyResult<()> {
        let deadline = self
            .ctx
            .locks
            .get(lock_id)
            .map(|lock| lock.expires_at().saturating_add(self.ctx.settings.expiry_buffer))
            .ok_or_else(|| {
                VerifyError::assertion(format!("lock {lock_id}"), "granted", "unknown")
            })?;
        let wait = deadline.saturating_sub(self.ctx.now());
        info!(lock_id, wait_secs = wait.as_secs(), "waiting for lock expiry");
        self.ctx.clock.sleep(wait).await;
        self.ctx.locks.refresh(self.ctx.clock.now());
        match self.ctx.locks.get(lock_id).map(|l| l.state) {
            Some(LockState::Expired) => Ok(()),
            other => Err(VerifyError::assertion(
                format!("state of lock {lock_id}"),
                "Expired",
                format!("{other:?}"),
            )),
        }
    }

    /// Try to delete locked features without presenting the lock id.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::SemanticAssertionFailure`] when the features
    /// are not locked by this case, and fails unless the service answers
    /// `MissingParameterValue`.
    pub async fn delete_without_lock_id(
        &mut self,
        target: &LockTarget,
    ) -> VerifyResult<ExceptionEntry> {
        let now = self.ctx.now();
        let unlocked = target
            .ids
            .iter()
            .find(|id| self.ctx.locks.holder_of(id, now).is_none());
        if let Some(unlocked) = unlocked {
            return Err(VerifyError::assertion(format!("lock on {unlocked}"), "active", "none"));
        }
        if !self.ctx.capabilities().supports(Operation::Transaction) {
            return Err(VerifyError::unsupported("Transaction"));
        }
        let params = RequestParams::default().with_action(TransactionAction::Delete {
            type_name: target.type_name.clone(),
            filter: Filter::resource_ids(target.ids.iter().cloned()),
        });
        let record = self.send(Operation::Transaction, params, Binding::Any).await?;
        self.ctx
            .validator
            .assert_exception(
                &record,
                &ExpectedException::new(ExceptionCode::MissingParameterValue),
            )
            .cloned()
    }

    async fn send(
        &self,
        operation: Operation,
        params: RequestParams,
        binding: Binding,
    ) -> VerifyResult<ResponseRecord> {
        let payload = self.ctx.builder.build(operation, params)?;
        self.ctx.dispatcher.dispatch(&payload, binding, None).await
    }

    async fn acquire(
        &mut self,
        operation: Operation,
        params: RequestParams,
        request: &LockRequest,
        forced: Option<ExceptionCode>,
    ) -> VerifyResult<Outcome<LockGrant>> {
        let now = self.ctx.now();
        let plan = match forced {
            Some(code) => AcquisitionPlan::Reject(code),
            None => self.ctx.locks.plan(request, now),
        };
        debug!(%operation, ?plan, "lock request planned");
        let record = self.send(operation, params, self.binding).await?;
        if let Some(lock_id) = record.root_attr("lockId").filter(|id| !id.trim().is_empty()) {
            self.ctx.ledger.record(ResourceKind::Lock, lock_id);
        }
        match plan {
            AcquisitionPlan::Reject(code) => {
                let entry = self
                    .ctx
                    .validator
                    .assert_exception(&record, &ExpectedException::new(code))?;
                Ok(Outcome::Rejected {
                    entry: entry.clone(),
                    status: record.status,
                })
            }
            AcquisitionPlan::Renew { lock_id } => {
                self.confirm_renewal(&record, &lock_id, request.expiry, now)
            }
            AcquisitionPlan::Grant { covered, excluded } => {
                let grant = self.confirm_grant(&record, operation, &excluded)?;
                if request.action == LockAction::All {
                    self.ctx
                        .validator
                        .assert_semantic(&record, &Predicate::IncludesIds(covered))?;
                }
                self.adopt(grant, request, now)
            }
            AcquisitionPlan::Indeterminate { excluded } => {
                if let Some(entry) = record.exceptions().first() {
                    return Ok(Outcome::Rejected {
                        entry: entry.clone(),
                        status: record.status,
                    });
                }
                let grant = self.confirm_grant(&record, operation, &excluded)?;
                self.adopt(grant, request, now)
            }
        }
    }

    fn confirm_grant(
        &self,
        record: &ResponseRecord,
        operation: Operation,
        excluded: &BTreeSet<String>,
    ) -> VerifyResult<LockGrant> {
        let root = self.ctx.validator.assert_response(record, operation, &["lockId"])?;
        self.ctx
            .validator
            .assert_semantic(record, &Predicate::ExcludesIds(excluded.clone()))?;
        let lock_id = root.attr("lockId").unwrap_or_default().trim().to_owned();
        if lock_id.is_empty() {
            return Err(VerifyError::structure(
                format!("non-empty lockId on {}", operation.response_root()),
                "empty",
            ));
        }
        Ok(LockGrant::from_response(lock_id, root))
    }

    fn adopt(
        &mut self,
        grant: LockGrant,
        request: &LockRequest,
        now: Duration,
    ) -> VerifyResult<Outcome<LockGrant>> {
        self.ctx
            .locks
            .on_acquired(&grant.lock_id, grant.locked.clone(), request.action, request.expiry, now)
            .map_err(|err| {
                VerifyError::assertion(
                    "lock mutual exclusion",
                    "disjoint active locks",
                    err.to_string(),
                )
            })?;
        info!(lock_id = %grant.lock_id, locked = grant.locked.len(), "lock granted");
        Ok(Outcome::Accepted(grant))
    }

    fn confirm_renewal(
        &mut self,
        record: &ResponseRecord,
        lock_id: &str,
        expiry: Duration,
        now: Duration,
    ) -> VerifyResult<Outcome<LockGrant>> {
        self.ctx
            .validator
            .assert_response(record, Operation::LockFeature, &["lockId"])?;
        self.ctx.validator.assert_semantic(
            record,
            &Predicate::AttributeEquals("lockId".to_owned(), lock_id.to_owned()),
        )?;
        self.ctx
            .locks
            .on_renewed(lock_id, expiry, now)
            .map_err(|err| {
                VerifyError::assertion(
                    format!("renewal of {lock_id}"),
                    "active lock",
                    err.to_string(),
                )
            })?;
        let locked = self
            .ctx
            .locks
            .get(lock_id)
            .map(|l| l.resources.clone())
            .unwrap_or_default();
        Ok(Outcome::Accepted(LockGrant {
            lock_id: lock_id.to_owned(),
            locked,
            not_locked: BTreeSet::new(),
            locked_listed: true,
            not_locked_listed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;

    use super::*;
    use crate::xml::parse;

    const ALL_LOCKED: &str = r#"<wfs:LockFeatureResponse lockId="L1"
    xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:fes="http://www.opengis.net/fes/2.0">
  <wfs:FeaturesLocked><fes:ResourceId rid="road.1"/></wfs:FeaturesLocked>
</wfs:LockFeatureResponse>"#;

    const EMPTY_NOT_LOCKED: &str = r#"<wfs:LockFeatureResponse lockId="L1"
    xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:fes="http://www.opengis.net/fes/2.0">
  <wfs:FeaturesLocked><fes:ResourceId rid="road.1"/></wfs:FeaturesLocked>
  <wfs:FeaturesNotLocked/>
</wfs:LockFeatureResponse>"#;

    const NOTHING_LISTED: &str = r#"<wfs:LockFeatureResponse lockId="L1"
    xmlns:wfs="http://www.opengis.net/wfs/2.0"/>"#;

    const EMPTY_LOCKED: &str = r#"<wfs:LockFeatureResponse lockId="L1"
    xmlns:wfs="http://www.opengis.net/wfs/2.0">
  <wfs:FeaturesLocked/>
</wfs:LockFeatureResponse>"#;

    const LOCKED_COLLECTION: &str = r#"<wfs:FeatureCollection lockId="L1"
    xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:tns="http://example.org/ns1">
  <wfs:member><tns:Road gml:id="road.1"/></wfs:member>
</wfs:FeatureCollection>"#;

    fn grant(body: &str) -> LockGrant {
        let root = parse(body).expect("lock response");
        LockGrant::from_response("L1", &root)
    }

    #[rstest]
    #[case::all_locked(ALL_LOCKED, true)]
    #[case::empty_not_locked_element(EMPTY_NOT_LOCKED, false)]
    #[case::nothing_listed(NOTHING_LISTED, false)]
    #[case::empty_locked_element(EMPTY_LOCKED, false)]
    #[case::locked_collection(LOCKED_COLLECTION, true)]
    fn full_locks_list_only_locked_features(#[case] body: &str, #[case] full: bool) {
        let result = grant(body).assert_fully_locked();
        assert_eq!(result.is_ok(), full, "{result:?}");
        if let Err(err) = result {
            assert!(
                matches!(err, VerifyError::SemanticAssertionFailure { .. }),
                "{err:?}"
            );
        }
    }

    #[test]
    fn empty_not_locked_element_is_reported() {
        let grant = grant(EMPTY_NOT_LOCKED);
        assert!(grant.not_locked.is_empty());
        assert!(grant.not_locked_listed);
        let err = grant
            .assert_fully_locked()
            .expect_err("empty element must fail");
        assert!(err.to_string().contains("FeaturesNotLocked"), "{err}");
    }

    #[test]
    fn locked_collections_count_as_listed() {
        let grant = grant(LOCKED_COLLECTION);
        assert!(grant.locked_listed);
        assert!(!grant.not_locked_listed);
        assert!(grant.locked.contains("road.1"));
    }
}
