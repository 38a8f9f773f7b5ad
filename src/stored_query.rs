//! Stored query management.
//!
//! [`StoredQueryCatalog`] remembers which stored queries a test case defined
//! and dropped and predicts the service's answer to the next create, drop or
//! invocation. [`StoredQueryRegistry`] sends those requests and checks the
//! answers against the prediction.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    capabilities::CapabilitySet,
    context::VerificationContext,
    dispatch::{Binding, ResponseRecord},
    error::{VerifyError, VerifyResult},
    ledger::ResourceKind,
    protocol::{ConformanceClass, ExceptionCode, Operation, QUERY_LANGUAGE_WFS, TypeName, WFS_NS},
    request::{QueryBody, QueryExpression, RequestParams, StoredQueryDefinition},
    validate::{ExpectedException, Outcome},
};

/// Lifecycle state of a stored query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoredQueryState {
    /// Created and invocable.
    Defined,
    /// Dropped. Invocations must fail.
    Dropped,
}

/// A stored query known to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredQuery {
    /// Definition as submitted.
    pub definition: StoredQueryDefinition,
    /// Current state.
    pub state: StoredQueryState,
}

/// Stored queries created by one test case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredQueryCatalog {
    queries: BTreeMap<String, StoredQuery>,
}

impl StoredQueryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queries: BTreeMap::new(),
        }
    }

    /// Stored query by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StoredQuery> { self.queries.get(id) }

    /// State of a stored query, if known.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<StoredQueryState> {
        self.queries.get(id).map(|q| q.state)
    }

    /// Exception expected from `CreateStoredQuery`, if any.
    ///
    /// An unsupported language is refused with `InvalidParameterValue` at
    /// `language`. Any definition under an id that is currently defined is
    /// refused with `DuplicateStoredQueryIdValue` naming the id. A dropped id
    /// may be defined again.
    #[must_use]
    pub fn predict_create(
        &self,
        definition: &StoredQueryDefinition,
        capabilities: &CapabilitySet,
    ) -> Option<ExpectedException> {
        if !capabilities.supports_language(&definition.language) {
            return Some(
                ExpectedException::new(ExceptionCode::InvalidParameterValue)
                    .with_locator("language"),
            );
        }
        (self.state(&definition.id) == Some(StoredQueryState::Defined)).then(|| {
            ExpectedException::new(ExceptionCode::DuplicateStoredQueryIdValue)
                .with_locator(definition.id.as_str())
        })
    }

    /// Exception expected from `DropStoredQuery`, if any.
    #[must_use]
    pub fn predict_drop(&self, id: &str) -> Option<ExpectedException> {
        (self.state(id) != Some(StoredQueryState::Defined)).then(|| unknown_id(id))
    }

    /// Exception expected from invoking `id`, if any. Ids the catalog never
    /// saw may be predefined by the service and are not predicted to fail.
    #[must_use]
    pub fn predict_invoke(&self, id: &str) -> Option<ExpectedException> {
        (self.state(id) == Some(StoredQueryState::Dropped)).then(|| unknown_id(id))
    }

    /// Record a successful create.
    pub fn on_created(&mut self, definition: StoredQueryDefinition) {
        self.queries.insert(
            definition.id.clone(),
            StoredQuery {
                definition,
                state: StoredQueryState::Defined,
            },
        );
    }

    /// Record a successful drop. Returns `false` when the id was not defined.
    pub fn on_dropped(&mut self, id: &str) -> bool {
        match self.queries.get_mut(id) {
            Some(query) if query.state == StoredQueryState::Defined => {
                query.state = StoredQueryState::Dropped;
                true
            }
            _ => false,
        }
    }
}

fn unknown_id(id: &str) -> ExpectedException {
    ExpectedException::new(ExceptionCode::InvalidParameterValue)
        .with_locator("id")
        .with_locator(id)
}

/// Parameterless stored query returning every feature of `type_name`.
#[must_use]
pub fn type_query_definition(id: impl Into<String>, type_name: &TypeName) -> StoredQueryDefinition {
    StoredQueryDefinition {
        id: id.into(),
        title: Some(format!("All {} features", type_name.local_name())),
        language: QUERY_LANGUAGE_WFS.to_owned(),
        parameters: Vec::new(),
        return_types: vec![type_name.clone()],
        body: QueryBody::Expression(QueryExpression::by_type(type_name.clone())),
    }
}

/// Drives stored query requests for one test case.
#[derive(Debug)]
pub struct StoredQueryRegistry<'a> {
    ctx: &'a mut VerificationContext,
}

impl<'a> StoredQueryRegistry<'a> {
    /// Create a registry for a service that manages stored queries.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when stored query management is
    /// not advertised.
    pub fn new(ctx: &'a mut VerificationContext) -> VerifyResult<Self> {
        let caps = ctx.capabilities();
        let manages = caps.implements(ConformanceClass::ManageStoredQueries)
            && caps.supports(Operation::CreateStoredQuery)
            && caps.supports(Operation::DropStoredQuery);
        if !manages {
            return Err(VerifyError::unsupported("ManageStoredQueries"));
        }
        Ok(Self { ctx })
    }

    /// Id for a harness-owned stored query.
    #[must_use]
    pub fn id_for(&self, name: &str) -> String {
        format!("{}{name}", self.ctx.settings.stored_query_prefix)
    }

    /// Submit `definition`.
    ///
    /// # Errors
    ///
    /// Fails when the answer contradicts the catalog's prediction.
    pub async fn create(
        &mut self,
        definition: &StoredQueryDefinition,
    ) -> VerifyResult<Outcome<String>> {
        let expected = self
            .ctx
            .stored_queries
            .predict_create(definition, self.ctx.capabilities());
        let params = RequestParams::default().with_definition(definition.clone());
        let record = self.send(Operation::CreateStoredQuery, params).await?;
        let created = record.status == 200
            && !record.is_exception()
            && record
                .root()
                .is_some_and(|root| root.is(WFS_NS, "CreateStoredQueryResponse"));
        if created {
            self.ctx.ledger.record(ResourceKind::StoredQuery, definition.id.as_str());
        }
        let outcome = self.ctx.validator.assert_predicted(
            &record,
            expected.as_ref(),
            Operation::CreateStoredQuery,
            &[],
        )?;
        match outcome {
            Outcome::Accepted(root) => {
                let refused = root
                    .attr("status")
                    .filter(|s| !s.trim().eq_ignore_ascii_case("OK"));
                if let Some(status) = refused {
                    return Err(VerifyError::assertion(
                        "CreateStoredQueryResponse status",
                        "OK",
                        status,
                    ));
                }
                self.ctx.stored_queries.on_created(definition.clone());
                info!(id = %definition.id, "stored query created");
                Ok(Outcome::Accepted(definition.id.clone()))
            }
            Outcome::Rejected { entry, status } => Ok(Outcome::Rejected { entry, status }),
        }
    }

    /// Drop stored query `id`.
    ///
    /// # Errors
    ///
    /// Fails when the answer contradicts the catalog's prediction.
    pub async fn drop(&mut self, id: &str) -> VerifyResult<Outcome<()>> {
        let expected = self.ctx.stored_queries.predict_drop(id);
        let params = RequestParams::default().with_stored_query_id(id);
        let record = self.send(Operation::DropStoredQuery, params).await?;
        let outcome =
            self.ctx
                .validator
                .assert_predicted(&record, expected.as_ref(), Operation::DropStoredQuery, &[])?;
        match outcome {
            Outcome::Accepted(_) => {
                self.ctx.stored_queries.on_dropped(id);
                self.ctx.ledger.settle(ResourceKind::StoredQuery, id);
                info!(id, "stored query dropped");
                Ok(Outcome::Accepted(()))
            }
            Outcome::Rejected { entry, status } => Ok(Outcome::Rejected { entry, status }),
        }
    }

    /// Invoke stored query `id` through `GetFeature`.
    ///
    /// # Errors
    ///
    /// Fails when the answer contradicts the catalog's prediction.
    pub async fn invoke(
        &mut self,
        id: &str,
        parameters: &[(String, String)],
    ) -> VerifyResult<Outcome<ResponseRecord>> {
        let expected = self.ctx.stored_queries.predict_invoke(id);
        let params = RequestParams::default()
            .with_query(QueryExpression::stored(id, parameters.iter().cloned()));
        let record = self.send(Operation::GetFeature, params).await?;
        let outcome = self
            .ctx
            .validator
            .assert_predicted(&record, expected.as_ref(), Operation::GetFeature, &[])?;
        if let Outcome::Rejected { entry, status } = outcome {
            debug!(id, code = %entry.code, "stored query invocation refused");
            return Ok(Outcome::Rejected { entry, status });
        }
        Ok(Outcome::Accepted(record))
    }

    /// Ids of the stored queries the service offers.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when `ListStoredQueries` is not
    /// advertised and fails when the response is malformed.
    pub async fn list(&self) -> VerifyResult<Vec<String>> {
        if !self.ctx.capabilities().supports(Operation::ListStoredQueries) {
            return Err(VerifyError::unsupported("ListStoredQueries"));
        }
        let record = self.send(Operation::ListStoredQueries, RequestParams::default()).await?;
        let root = self
            .ctx
            .validator
            .assert_response(&record, Operation::ListStoredQueries, &[])?;
        Ok(root
            .children_named(WFS_NS, "StoredQuery")
            .filter_map(|q| q.attr("id"))
            .map(str::to_owned)
            .collect())
    }

    /// Drop harness-owned stored queries left behind by earlier runs.
    /// Returns the number dropped.
    ///
    /// # Errors
    ///
    /// Fails only when the stored queries cannot be listed; individual drop
    /// failures are logged.
    pub async fn preclean(&mut self) -> VerifyResult<usize> {
        let prefix = self.ctx.settings.stored_query_prefix.clone();
        let stale: Vec<String> = self
            .list()
            .await?
            .into_iter()
            .filter(|id| id.starts_with(&prefix))
            .collect();
        let mut dropped = 0_usize;
        for id in &stale {
            let params = RequestParams::default().with_stored_query_id(id.as_str());
            match self.send(Operation::DropStoredQuery, params).await {
                Ok(record) if record.status == 200 && !record.is_exception() => {
                    dropped = dropped.saturating_add(1);
                }
                Ok(record) => {
                    warn!(id = %id, status = record.status, "stale stored query not dropped");
                }
                Err(err) => warn!(id = %id, error = %err, "stale stored query not dropped"),
            }
        }
        Ok(dropped)
    }

    async fn send(
        &self,
        operation: Operation,
        params: RequestParams,
    ) -> VerifyResult<ResponseRecord> {
        let payload = self.ctx.builder.build(operation, params)?;
        self.ctx.dispatcher.dispatch(&payload, Binding::Any, None).await
    }
}
