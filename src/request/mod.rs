//! Request assembly.
//!
//! [`RequestBuilder::build`] validates typed [`RequestParams`] for one
//! [`Operation`] and produces an encoding-independent [`Payload`]. Building
//! never touches the network or any run state.

mod encode;
pub mod query;

use std::{sync::Arc, time::Duration};

pub use self::query::{
    AdhocQuery,
    Filter,
    ParameterSpec,
    Prefixes,
    QueryBody,
    QueryExpression,
    SortBy,
    StoredQueryCall,
    StoredQueryDefinition,
    TransactionAction,
};
use crate::{
    capabilities::CapabilitySet,
    error::{VerifyError, VerifyResult},
    protocol::{GML_NS, LockAction, Operation, ReleaseAction, ResultType, TypeName, XSD_NS},
    xml::XmlElement,
};

/// Typed request parameters. Unused fields are ignored by operations that do
/// not take them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    /// Query expressions.
    pub queries: Vec<QueryExpression>,
    /// Feature types for `DescribeFeatureType`.
    pub type_names: Vec<TypeName>,
    /// Page size.
    pub count: Option<u32>,
    /// Zero-based index of the first result.
    pub start_index: Option<u32>,
    /// `results` or `hits`.
    pub result_type: Option<ResultType>,
    /// Lock duration.
    pub expiry: Option<Duration>,
    /// `ALL` or `SOME`.
    pub lock_action: Option<LockAction>,
    /// Existing lock id.
    pub lock_id: Option<String>,
    /// Lock release behaviour of a transaction.
    pub release_action: Option<ReleaseAction>,
    /// Stored query ids for drop/describe.
    pub stored_query_ids: Vec<String>,
    /// Definition for `CreateStoredQuery`.
    pub definition: Option<StoredQueryDefinition>,
    /// Transaction actions.
    pub actions: Vec<TransactionAction>,
    /// Property path for `GetPropertyValue`.
    pub value_reference: Option<String>,
}

impl RequestParams {
    /// Add a query expression.
    #[must_use]
    pub fn with_query(mut self, query: QueryExpression) -> Self {
        self.queries.push(query);
        self
    }

    /// Add several query expressions.
    #[must_use]
    pub fn with_queries(mut self, queries: impl IntoIterator<Item = QueryExpression>) -> Self {
        self.queries.extend(queries);
        self
    }

    /// Add a feature type for `DescribeFeatureType`.
    #[must_use]
    pub fn with_type_name(mut self, type_name: TypeName) -> Self {
        self.type_names.push(type_name);
        self
    }

    /// Set the page size.
    #[must_use]
    pub const fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the start index.
    #[must_use]
    pub const fn with_start_index(mut self, index: u32) -> Self {
        self.start_index = Some(index);
        self
    }

    /// Set the result type.
    #[must_use]
    pub const fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = Some(result_type);
        self
    }

    /// Set the lock expiry.
    #[must_use]
    pub const fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Set the lock action.
    #[must_use]
    pub const fn with_lock_action(mut self, action: LockAction) -> Self {
        self.lock_action = Some(action);
        self
    }

    /// Reference an existing lock.
    #[must_use]
    pub fn with_lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = Some(lock_id.into());
        self
    }

    /// Set the release action.
    #[must_use]
    pub const fn with_release_action(mut self, action: ReleaseAction) -> Self {
        self.release_action = Some(action);
        self
    }

    /// Reference a stored query by id.
    #[must_use]
    pub fn with_stored_query_id(mut self, id: impl Into<String>) -> Self {
        self.stored_query_ids.push(id.into());
        self
    }

    /// Attach a stored query definition.
    #[must_use]
    pub fn with_definition(mut self, definition: StoredQueryDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Add a transaction action.
    #[must_use]
    pub fn with_action(mut self, action: TransactionAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Set the value reference of `GetPropertyValue`.
    #[must_use]
    pub fn with_value_reference(mut self, path: impl Into<String>) -> Self {
        self.value_reference = Some(path.into());
        self
    }
}

/// A validated, encoding-independent request.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    operation: Operation,
    version: String,
    params: RequestParams,
    prefixes: Prefixes,
}

impl Payload {
    /// Operation carried by the payload.
    #[must_use]
    pub const fn operation(&self) -> Operation { self.operation }

    /// Protocol version.
    #[must_use]
    pub fn version(&self) -> &str { &self.version }

    /// Validated parameters.
    #[must_use]
    pub const fn params(&self) -> &RequestParams { &self.params }

    /// Namespace prefixes chosen for qualified names.
    #[must_use]
    pub const fn prefixes(&self) -> &Prefixes { &self.prefixes }

    /// Key-value pairs for the GET binding.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::MalformedRequest`] for operations without a KVP
    /// encoding (`Transaction`, `CreateStoredQuery`).
    pub fn to_kvp(&self) -> VerifyResult<Vec<(String, String)>> { encode::kvp(self) }

    /// Request element for the POST and SOAP bindings.
    #[must_use]
    pub fn to_element(&self) -> XmlElement { encode::element(self) }

    /// Serialised XML request body.
    #[must_use]
    pub fn to_xml(&self) -> String { self.to_element().to_xml_with(&self.prefixes) }
}

/// Builds payloads checked against the service's advertised feature types.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    capabilities: Arc<CapabilitySet>,
}

impl RequestBuilder {
    /// Create a builder for the given service.
    #[must_use]
    pub const fn new(capabilities: Arc<CapabilitySet>) -> Self { Self { capabilities } }

    /// Validate `params` for `operation` and assemble a payload.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::MalformedRequest`] when a required parameter is
    /// absent or a referenced feature type or property is unknown.
    pub fn build(&self, operation: Operation, params: RequestParams) -> VerifyResult<Payload> {
        check_required(operation, &params)?;
        self.check_schema_references(operation, &params)?;
        let prefixes = assign_prefixes(&params);
        Ok(Payload {
            operation,
            version: self.capabilities.version().to_owned(),
            params,
            prefixes,
        })
    }

    fn check_schema_references(
        &self,
        operation: Operation,
        params: &RequestParams,
    ) -> VerifyResult<()> {
        if self.capabilities.feature_types().is_empty() {
            return Ok(());
        }
        let adhoc = params.queries.iter().filter_map(|q| match q {
            QueryExpression::Adhoc(adhoc) => Some(adhoc),
            QueryExpression::Stored(_) => None,
        });
        for query in adhoc {
            for type_name in &query.type_names {
                let Some(descriptor) = self.capabilities.feature_type(type_name) else {
                    return Err(VerifyError::malformed(
                        operation.name(),
                        format!("unknown feature type {type_name}"),
                    ));
                };
                let mut referenced = query
                    .filter
                    .as_ref()
                    .map(Filter::property_names)
                    .unwrap_or_default();
                referenced.extend(query.sort_by.iter().map(|s| s.property.as_str()));
                if operation == Operation::GetPropertyValue {
                    referenced.extend(params.value_reference.as_deref());
                }
                if let Some(unknown) = referenced
                    .into_iter()
                    .filter(|p| !p.starts_with("gml:"))
                    .find(|p| !descriptor.accepts_property(p))
                {
                    return Err(VerifyError::malformed(
                        operation.name(),
                        format!("property {unknown} is not declared by {type_name}"),
                    ));
                }
            }
        }
        let unknown_described = params
            .type_names
            .iter()
            .find(|t| self.capabilities.feature_type(t).is_none());
        if let Some(type_name) = unknown_described {
            return Err(VerifyError::malformed(
                operation.name(),
                format!("unknown feature type {type_name}"),
            ));
        }
        Ok(())
    }
}

fn missing(operation: Operation, what: &str) -> VerifyError {
    VerifyError::malformed(operation.name(), format!("missing {what}"))
}

fn check_required(operation: Operation, params: &RequestParams) -> VerifyResult<()> {
    match operation {
        Operation::GetFeature | Operation::GetFeatureWithLock => {
            if params.queries.is_empty() {
                return Err(missing(operation, "query expression"));
            }
            if params.start_index.is_some() && params.count.is_none() {
                return Err(missing(operation, "count for a paged request"));
            }
        }
        Operation::GetPropertyValue => {
            if params.queries.is_empty() {
                return Err(missing(operation, "query expression"));
            }
            if params.value_reference.is_none() {
                return Err(missing(operation, "valueReference"));
            }
        }
        Operation::LockFeature => {
            if params.expiry.is_none() {
                return Err(missing(operation, "expiry"));
            }
            if params.queries.is_empty() && params.lock_id.is_none() {
                return Err(missing(operation, "query expression or lockId"));
            }
        }
        Operation::Transaction => {
            let releases = params.lock_id.is_some() && params.release_action.is_some();
            if params.actions.is_empty() && !releases {
                return Err(missing(operation, "transaction action or lock release"));
            }
        }
        Operation::CreateStoredQuery => {
            let Some(def) = &params.definition else {
                return Err(missing(operation, "stored query definition"));
            };
            if def.id.trim().is_empty() {
                return Err(missing(operation, "stored query id"));
            }
            if def.language.trim().is_empty() {
                return Err(missing(operation, "query language"));
            }
            if def.body_is_empty() {
                return Err(missing(operation, "definition body"));
            }
        }
        Operation::DropStoredQuery => {
            if params.stored_query_ids.len() != 1 {
                return Err(missing(operation, "exactly one stored query id"));
            }
        }
        Operation::GetCapabilities
        | Operation::DescribeFeatureType
        | Operation::ListStoredQueries
        | Operation::DescribeStoredQueries => {}
    }
    Ok(())
}

/// Bind `tns`, `tns2`, ... to feature type namespaces in order of first use.
fn assign_prefixes(params: &RequestParams) -> Prefixes {
    let mut namespaces: Vec<&str> = Vec::new();
    let query_types = params.queries.iter().flat_map(QueryExpression::type_names);
    let action_types = params.actions.iter().filter_map(TransactionAction::type_name);
    let definition_types = params.definition.iter().flat_map(|d| {
        let body_types = match &d.body {
            QueryBody::Expression(expr) => expr.type_names(),
            QueryBody::Text(_) => &[],
        };
        d.return_types.iter().chain(body_types)
    });
    for type_name in query_types
        .chain(&params.type_names)
        .chain(action_types)
        .chain(definition_types)
    {
        if !type_name.namespace().is_empty() && !namespaces.contains(&type_name.namespace()) {
            namespaces.push(type_name.namespace());
        }
    }
    let mut prefixes: Prefixes = namespaces
        .into_iter()
        .enumerate()
        .map(|(idx, ns)| {
            let prefix = if idx == 0 { "tns".to_owned() } else { format!("tns{}", idx + 1) };
            (ns.to_owned(), prefix)
        })
        .collect();
    prefixes.entry(GML_NS.to_owned()).or_insert_with(|| "gml".to_owned());
    if params.definition.is_some() {
        prefixes.entry(XSD_NS.to_owned()).or_insert_with(|| "xsd".to_owned());
    }
    prefixes
}

#[cfg(test)]
mod tests;
