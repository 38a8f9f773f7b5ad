//! Response validation.
//!
//! [`ResponseValidator`] checks a [`ResponseRecord`] three ways: structure
//! (status, document root, required attributes, optional schema oracle),
//! semantics (a [`Predicate`] over the content) and exceptions (code, status
//! and locator). Every mismatch is reported with the expected and observed
//! values.

pub mod oracle;

use std::{collections::BTreeSet, fmt, sync::Arc};

pub use self::oracle::{
    EnvelopeOracle,
    OracleError,
    PathEvaluator,
    SchemaValidator,
    SpatialRelation,
    TopologyOracle,
    XPathEvaluator,
    envelope_of,
};
use crate::{
    capabilities::Envelope,
    dispatch::{ExceptionEntry, ResponseRecord},
    error::{VerifyError, VerifyResult},
    protocol::{ExceptionCode, FES_NS, GML_NS, Operation, WFS_NS},
    xml::XmlElement,
};

/// Expected number of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly `n`.
    Exactly(usize),
    /// At least `n`.
    AtLeast(usize),
    /// At most `n`.
    AtMost(usize),
}

impl Cardinality {
    /// Return `true` when `n` satisfies the bound.
    #[must_use]
    pub const fn holds(self, n: usize) -> bool {
        match self {
            Self::Exactly(want) => n == want,
            Self::AtLeast(min) => n >= min,
            Self::AtMost(max) => n <= max,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "{n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
            Self::AtMost(n) => write!(f, "at most {n}"),
        }
    }
}

/// Content predicates understood by [`ResponseValidator::assert_semantic`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `numberReturned` on the root equals the value.
    NumberReturned(u64),
    /// Number of feature members.
    MemberCount(Cardinality),
    /// None of the ids appear in the response set.
    ExcludesIds(BTreeSet<String>),
    /// Every id appears in the response set.
    IncludesIds(BTreeSet<String>),
    /// Root attribute is present and not blank.
    AttributePresent(String),
    /// Root attribute is absent.
    AttributeAbsent(String),
    /// Root attribute has the value.
    AttributeEquals(String, String),
    /// An element with the expanded name occurs in the document.
    ElementPresent(String, String),
    /// No element with the expanded name occurs in the document.
    ElementAbsent(String, String),
    /// Path expression evaluates to true.
    Path(String),
    /// Every member's geometry stands in the relation to the envelope.
    Spatial(SpatialRelation, Envelope),
}

/// Expected exception report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedException {
    /// Exception code.
    pub code: ExceptionCode,
    /// HTTP status; defaults to the code's mapping.
    pub status: u16,
    /// Acceptable locators, matched case-insensitively by containment. Empty
    /// accepts any locator.
    pub locators: Vec<String>,
}

impl ExpectedException {
    /// Expect `code` with its usual status.
    #[must_use]
    pub const fn new(code: ExceptionCode) -> Self {
        Self {
            code,
            status: code.http_status(),
            locators: Vec::new(),
        }
    }

    /// Expect a specific status.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Accept an additional locator.
    #[must_use]
    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locators.push(locator.into());
        self
    }
}

/// Feature members of a collection, flattening nested collections.
#[must_use]
pub fn feature_members(root: &XmlElement) -> Vec<&XmlElement> {
    let mut out = Vec::new();
    for member in root.children_named(WFS_NS, "member") {
        for feature in &member.children {
            if feature.is(WFS_NS, "FeatureCollection") || feature.is(WFS_NS, "AdditionalObjects") {
                out.extend(feature_members(feature));
            } else {
                out.push(feature);
            }
        }
    }
    out
}

/// `gml:id` values of the feature members.
#[must_use]
pub fn feature_ids(root: &XmlElement) -> BTreeSet<String> {
    feature_members(root)
        .into_iter()
        .filter_map(|f| f.attr_ns(GML_NS, "id"))
        .map(str::to_owned)
        .collect()
}

fn resource_ids_under(root: &XmlElement, local: &str) -> BTreeSet<String> {
    root.child(WFS_NS, local)
        .map(|section| {
            section
                .find_all(FES_NS, "ResourceId")
                .into_iter()
                .filter_map(|r| r.attr("rid"))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Ids listed under `wfs:FeaturesLocked`.
#[must_use]
pub fn locked_ids(root: &XmlElement) -> BTreeSet<String> {
    resource_ids_under(root, "FeaturesLocked")
}

/// Ids listed under `wfs:FeaturesNotLocked`.
#[must_use]
pub fn not_locked_ids(root: &XmlElement) -> BTreeSet<String> {
    resource_ids_under(root, "FeaturesNotLocked")
}

/// The response set: locked ids for a lock response, member ids otherwise.
#[must_use]
pub fn response_ids(root: &XmlElement) -> BTreeSet<String> {
    if root.is(WFS_NS, "LockFeatureResponse") {
        locked_ids(root)
    } else {
        feature_ids(root)
    }
}

fn join(ids: &BTreeSet<String>) -> String {
    if ids.is_empty() {
        return "{}".to_owned();
    }
    format!("{{{}}}", ids.iter().cloned().collect::<Vec<_>>().join(", "))
}

/// Observed answer to a request whose result was predicted beforehand.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The service accepted the request as predicted.
    Accepted(T),
    /// The service rejected the request with the predicted exception.
    Rejected {
        /// Matching exception entry.
        entry: ExceptionEntry,
        /// HTTP status of the exception report.
        status: u16,
    },
}

impl<T> Outcome<T> {
    /// Return `true` when the request was rejected with `code`.
    #[must_use]
    pub fn is_rejected_with(&self, code: ExceptionCode) -> bool {
        matches!(self, Self::Rejected { entry, .. } if entry.code == code.as_str())
    }

    /// Value of an accepted request.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ProtocolExceptionMismatch`] when the request was
    /// rejected.
    pub fn accepted(self) -> VerifyResult<T> {
        match self {
            Self::Accepted(value) => Ok(value),
            Self::Rejected { entry, status } => Err(VerifyError::ProtocolExceptionMismatch {
                expected_code: "none".to_owned(),
                expected_status: 200,
                actual_code: entry.code,
                actual_status: status,
            }),
        }
    }

    /// Exception entry of a request rejected with `code`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ProtocolExceptionMismatch`] when the request was
    /// accepted or rejected with another code.
    pub fn rejected(self, code: ExceptionCode) -> VerifyResult<ExceptionEntry> {
        match self {
            Self::Rejected { entry, .. } if entry.code == code.as_str() => Ok(entry),
            Self::Rejected { entry, status } => Err(VerifyError::ProtocolExceptionMismatch {
                expected_code: code.as_str().to_owned(),
                expected_status: code.http_status(),
                actual_code: entry.code,
                actual_status: status,
            }),
            Self::Accepted(_) => Err(VerifyError::ProtocolExceptionMismatch {
                expected_code: code.as_str().to_owned(),
                expected_status: code.http_status(),
                actual_code: "none".to_owned(),
                actual_status: 200,
            }),
        }
    }
}

/// Checks response records, delegating to optional oracles.
#[derive(Clone)]
pub struct ResponseValidator {
    schema: Option<Arc<dyn SchemaValidator>>,
    xpath: Option<Arc<dyn XPathEvaluator>>,
    topology: Arc<dyn TopologyOracle>,
}

impl fmt::Debug for ResponseValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseValidator")
            .field("schema", &self.schema.is_some())
            .field("xpath", &self.xpath.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self {
            schema: None,
            xpath: Some(Arc::new(PathEvaluator::default())),
            topology: Arc::new(EnvelopeOracle),
        }
    }
}

impl ResponseValidator {
    /// Validator with the built-in path and envelope oracles and no schema.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Use a schema oracle for structural checks.
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Replace the path evaluator.
    #[must_use]
    pub fn with_xpath(mut self, xpath: Arc<dyn XPathEvaluator>) -> Self {
        self.xpath = Some(xpath);
        self
    }

    /// Replace the topology oracle.
    #[must_use]
    pub fn with_topology(mut self, topology: Arc<dyn TopologyOracle>) -> Self {
        self.topology = topology;
        self
    }

    /// Check that the record is a successful response rooted at
    /// `{namespace}local` carrying every attribute in `required`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ProtocolExceptionMismatch`] when the service
    /// reported an exception or a non-200 status, and
    /// [`VerifyError::StructuralValidationFailure`] when the document, its
    /// root or an attribute does not match.
    pub fn assert_structure<'r>(
        &self,
        record: &'r ResponseRecord,
        namespace: &str,
        local: &str,
        required: &[&str],
    ) -> VerifyResult<&'r XmlElement> {
        if record.status != 200 || record.is_exception() {
            return Err(VerifyError::ProtocolExceptionMismatch {
                expected_code: "none".to_owned(),
                expected_status: 200,
                actual_code: record.exception_code().unwrap_or("none").to_owned(),
                actual_status: record.status,
            });
        }
        let expected = format!("{{{namespace}}}{local}");
        let Some(root) = record.root() else {
            let actual = record
                .parse_error
                .clone()
                .unwrap_or_else(|| "non-XML body".to_owned());
            return Err(VerifyError::structure(expected, actual));
        };
        if !root.is(namespace, local) {
            return Err(VerifyError::structure(expected, root.expanded_name()));
        }
        if let Some(schema) = &self.schema {
            schema
                .validate(root)
                .map_err(|err| VerifyError::structure("schema-valid document", err.to_string()))?;
        }
        if let Some(missing) = required.iter().find(|name| root.attr(name).is_none()) {
            return Err(VerifyError::structure(
                format!("attribute {missing} on {local}"),
                "absent",
            ));
        }
        Ok(root)
    }

    /// [`Self::assert_structure`] with the response root of `operation`.
    ///
    /// # Errors
    ///
    /// See [`Self::assert_structure`].
    pub fn assert_response<'r>(
        &self,
        record: &'r ResponseRecord,
        operation: Operation,
        required: &[&str],
    ) -> VerifyResult<&'r XmlElement> {
        self.assert_structure(
            record,
            operation.response_namespace(),
            operation.response_root(),
            required,
        )
    }

    /// Check a content predicate.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::SemanticAssertionFailure`] when the predicate
    /// does not hold, [`VerifyError::StructuralValidationFailure`] when there
    /// is no document, and [`VerifyError::Unsupported`] when the predicate
    /// needs an oracle that is not configured.
    pub fn assert_semantic(
        &self,
        record: &ResponseRecord,
        predicate: &Predicate,
    ) -> VerifyResult<()> {
        let root = record
            .root()
            .ok_or_else(|| VerifyError::structure("XML document", "non-XML body"))?;
        match predicate {
            Predicate::NumberReturned(want) => {
                let actual = root.attr("numberReturned").unwrap_or("absent");
                if actual.trim().parse::<u64>().ok() == Some(*want) {
                    Ok(())
                } else {
                    Err(VerifyError::assertion("numberReturned", want.to_string(), actual))
                }
            }
            Predicate::MemberCount(bound) => {
                let n = feature_members(root).len();
                if bound.holds(n) {
                    Ok(())
                } else {
                    Err(VerifyError::assertion("member count", bound.to_string(), n.to_string()))
                }
            }
            Predicate::ExcludesIds(ids) => {
                let overlap: BTreeSet<String> =
                    response_ids(root).intersection(ids).cloned().collect();
                if overlap.is_empty() {
                    Ok(())
                } else {
                    Err(VerifyError::assertion(
                        "response set",
                        format!("none of {}", join(ids)),
                        format!("contains {}", join(&overlap)),
                    ))
                }
            }
            Predicate::IncludesIds(ids) => {
                let actual = response_ids(root);
                if actual.is_superset(ids) {
                    Ok(())
                } else {
                    Err(VerifyError::assertion(
                        "response set",
                        format!("superset of {}", join(ids)),
                        join(&actual),
                    ))
                }
            }
            Predicate::AttributePresent(name) => match root.attr(name) {
                Some(value) if !value.trim().is_empty() => Ok(()),
                Some(_) => Err(VerifyError::assertion(
                    format!("attribute {name}"),
                    "non-empty",
                    "empty",
                )),
                None => Err(VerifyError::assertion(
                    format!("attribute {name}"),
                    "present",
                    "absent",
                )),
            },
            Predicate::AttributeAbsent(name) => match root.attr(name) {
                None => Ok(()),
                Some(value) => {
                    Err(VerifyError::assertion(format!("attribute {name}"), "absent", value))
                }
            },
            Predicate::AttributeEquals(name, want) => match root.attr(name) {
                Some(value) if value.trim() == want => Ok(()),
                other => Err(VerifyError::assertion(
                    format!("attribute {name}"),
                    want.as_str(),
                    other.unwrap_or("absent"),
                )),
            },
            Predicate::ElementPresent(ns, local) => {
                if root.find(ns, local).is_some() {
                    Ok(())
                } else {
                    Err(VerifyError::assertion(
                        format!("element {{{ns}}}{local}"),
                        "present",
                        "absent",
                    ))
                }
            }
            Predicate::ElementAbsent(ns, local) => {
                if root.find(ns, local).is_none() {
                    Ok(())
                } else {
                    Err(VerifyError::assertion(
                        format!("element {{{ns}}}{local}"),
                        "absent",
                        "present",
                    ))
                }
            }
            Predicate::Path(expression) => {
                let xpath = self
                    .xpath
                    .as_ref()
                    .ok_or_else(|| VerifyError::unsupported("no path evaluator configured"))?;
                match xpath.evaluate(root, expression) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(VerifyError::assertion(expression.as_str(), "true", "false")),
                    Err(err) => Err(VerifyError::assertion(
                        expression.as_str(),
                        "evaluable expression",
                        err.to_string(),
                    )),
                }
            }
            Predicate::Spatial(relation, reference) => {
                self.check_spatial(root, *relation, reference)
            }
        }
    }

    fn check_spatial(
        &self,
        root: &XmlElement,
        relation: SpatialRelation,
        reference: &Envelope,
    ) -> VerifyResult<()> {
        for member in feature_members(root) {
            let id = member.attr_ns(GML_NS, "id").unwrap_or("(no gml:id)");
            let Some(geometry) = envelope_of(member) else {
                return Err(VerifyError::assertion(
                    format!("geometry of {id}"),
                    "present",
                    "absent",
                ));
            };
            if !self.topology.relates(&geometry, reference, relation) {
                return Err(VerifyError::assertion(
                    format!("{} relation of {id}", relation.as_str()),
                    format!("{} {}", reference.lower_corner(), reference.upper_corner()),
                    format!("{} {}", geometry.lower_corner(), geometry.upper_corner()),
                ));
            }
        }
        Ok(())
    }

    /// Check a record against a predicted answer: the expected exception when
    /// one is given, otherwise a successful `operation` response carrying the
    /// `required` attributes.
    ///
    /// # Errors
    ///
    /// See [`Self::assert_response`] and [`Self::assert_exception`].
    pub fn assert_predicted<'r>(
        &self,
        record: &'r ResponseRecord,
        expected: Option<&ExpectedException>,
        operation: Operation,
        required: &[&str],
    ) -> VerifyResult<Outcome<&'r XmlElement>> {
        match expected {
            Some(exception) => {
                let entry = self.assert_exception(record, exception)?;
                Ok(Outcome::Rejected {
                    entry: entry.clone(),
                    status: record.status,
                })
            }
            None => self
                .assert_response(record, operation, required)
                .map(Outcome::Accepted),
        }
    }

    /// Check that the record is the expected exception report.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ProtocolExceptionMismatch`] when the code or
    /// status differ and [`VerifyError::SemanticAssertionFailure`] when no
    /// entry carries an acceptable locator.
    pub fn assert_exception<'r>(
        &self,
        record: &'r ResponseRecord,
        expected: &ExpectedException,
    ) -> VerifyResult<&'r ExceptionEntry> {
        let code = expected.code.as_str();
        let entry = record.exceptions().iter().find(|e| e.code == code);
        let Some(matched) = entry.filter(|_| record.status == expected.status) else {
            return Err(VerifyError::ProtocolExceptionMismatch {
                expected_code: code.to_owned(),
                expected_status: expected.status,
                actual_code: record.exception_code().unwrap_or("none").to_owned(),
                actual_status: record.status,
            });
        };
        if expected.locators.is_empty() {
            return Ok(matched);
        }
        let wanted: Vec<String> = expected.locators.iter().map(|l| l.to_lowercase()).collect();
        let located = record
            .exceptions()
            .iter()
            .filter(|e| e.code == code)
            .find(|e| {
                e.locator
                    .as_deref()
                    .map(str::to_lowercase)
                    .is_some_and(|loc| wanted.iter().any(|w| loc.contains(w.as_str())))
            });
        located.ok_or_else(|| {
            VerifyError::assertion(
                format!("{code} locator"),
                format!("one of [{}]", expected.locators.join(", ")),
                matched.locator.clone().unwrap_or_else(|| "absent".to_owned()),
            )
        })
    }
}

#[cfg(test)]
mod tests;
