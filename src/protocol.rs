//! Protocol vocabulary: namespaces, operations, exception codes and the
//! enumerated request attributes of WFS 2.0.

use std::{fmt, str::FromStr, time::Duration};

use serde::Serialize;

/// WFS 2.0 namespace.
pub const WFS_NS: &str = "http://www.opengis.net/wfs/2.0";
/// Filter Encoding 2.0 namespace.
pub const FES_NS: &str = "http://www.opengis.net/fes/2.0";
/// OWS 1.1 namespace (capabilities and exception reports).
pub const OWS_NS: &str = "http://www.opengis.net/ows/1.1";
/// GML 3.2 namespace.
pub const GML_NS: &str = "http://www.opengis.net/gml/3.2";
/// XLink namespace.
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
/// XML Schema namespace.
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
/// SOAP 1.1 envelope namespace.
pub const SOAP11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Service type code sent with every request.
pub const SERVICE: &str = "WFS";
/// Protocol version used when the capabilities do not state one.
pub const DEFAULT_VERSION: &str = "2.0.2";
/// Identifier of the mandatory `GetFeatureById` stored query.
pub const QRY_GET_FEATURE_BY_ID: &str = "http://www.opengis.net/def/query/OGC-WFS/0/GetFeatureById";
/// URN form of `GetFeatureById` used by 2.0.0 services.
pub const QRY_GET_FEATURE_BY_ID_URN: &str = "urn:ogc:def:query:OGC-WFS::GetFeatureById";
/// Query language of stored queries expressed as WFS query expressions.
pub const QUERY_LANGUAGE_WFS: &str = "urn:ogc:def:queryLanguage:OGC-WFS::WFSQueryExpression";
/// Lock expiry applied by services when a request omits `expiry`.
pub const DEFAULT_LOCK_EXPIRY: Duration = Duration::from_secs(300);

/// Error returned when a protocol keyword is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised {kind} '{value}'")]
pub struct UnknownKeyword {
    kind: &'static str,
    value: String,
}

impl UnknownKeyword {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Request operations exercised by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Operation {
    /// Capability discovery.
    GetCapabilities,
    /// Feature type description.
    DescribeFeatureType,
    /// Ad hoc or stored query.
    GetFeature,
    /// Property value query.
    GetPropertyValue,
    /// Lock acquisition or renewal.
    LockFeature,
    /// Query that locks the returned features.
    GetFeatureWithLock,
    /// Transactional mutation and lock release.
    Transaction,
    /// Stored query listing.
    ListStoredQueries,
    /// Stored query description.
    DescribeStoredQueries,
    /// Stored query creation.
    CreateStoredQuery,
    /// Stored query removal.
    DropStoredQuery,
}

impl Operation {
    /// Every operation, in capabilities order.
    pub const ALL: [Self; 11] = [
        Self::GetCapabilities,
        Self::DescribeFeatureType,
        Self::GetFeature,
        Self::GetPropertyValue,
        Self::LockFeature,
        Self::GetFeatureWithLock,
        Self::Transaction,
        Self::ListStoredQueries,
        Self::DescribeStoredQueries,
        Self::CreateStoredQuery,
        Self::DropStoredQuery,
    ];

    /// Wire name of the operation.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetCapabilities => "GetCapabilities",
            Self::DescribeFeatureType => "DescribeFeatureType",
            Self::GetFeature => "GetFeature",
            Self::GetPropertyValue => "GetPropertyValue",
            Self::LockFeature => "LockFeature",
            Self::GetFeatureWithLock => "GetFeatureWithLock",
            Self::Transaction => "Transaction",
            Self::ListStoredQueries => "ListStoredQueries",
            Self::DescribeStoredQueries => "DescribeStoredQueries",
            Self::CreateStoredQuery => "CreateStoredQuery",
            Self::DropStoredQuery => "DropStoredQuery",
        }
    }

    /// Local name of the document root of a successful response.
    #[must_use]
    pub const fn response_root(self) -> &'static str {
        match self {
            Self::GetCapabilities => "WFS_Capabilities",
            Self::DescribeFeatureType => "schema",
            Self::GetFeature | Self::GetFeatureWithLock => "FeatureCollection",
            Self::GetPropertyValue => "ValueCollection",
            Self::LockFeature => "LockFeatureResponse",
            Self::Transaction => "TransactionResponse",
            Self::ListStoredQueries => "ListStoredQueriesResponse",
            Self::DescribeStoredQueries => "DescribeStoredQueriesResponse",
            Self::CreateStoredQuery => "CreateStoredQueryResponse",
            Self::DropStoredQuery => "DropStoredQueryResponse",
        }
    }

    /// Namespace of the response root.
    #[must_use]
    pub const fn response_namespace(self) -> &'static str {
        match self {
            Self::DescribeFeatureType => XSD_NS,
            _ => WFS_NS,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for Operation {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| UnknownKeyword::new("operation", s))
    }
}

/// Exception codes the harness asserts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExceptionCode {
    /// A parameter value is invalid or refers to something unknown.
    InvalidParameterValue,
    /// A required parameter is absent.
    MissingParameterValue,
    /// An `ALL` lock overlaps features locked elsewhere.
    CannotLockAllFeatures,
    /// A lock id refers to an expired (or unknown) lock.
    LockHasExpired,
    /// The request could not be parsed as a valid operation.
    OperationParsingFailed,
    /// A stored query id is already defined.
    DuplicateStoredQueryIdValue,
}

impl ExceptionCode {
    const ALL: [Self; 6] = [
        Self::InvalidParameterValue,
        Self::MissingParameterValue,
        Self::CannotLockAllFeatures,
        Self::LockHasExpired,
        Self::OperationParsingFailed,
        Self::DuplicateStoredQueryIdValue,
    ];

    /// Code as it appears in `@exceptionCode`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::MissingParameterValue => "MissingParameterValue",
            Self::CannotLockAllFeatures => "CannotLockAllFeatures",
            Self::LockHasExpired => "LockHasExpired",
            Self::OperationParsingFailed => "OperationParsingFailed",
            Self::DuplicateStoredQueryIdValue => "DuplicateStoredQueryIdValue",
        }
    }

    /// HTTP status a conforming service reports alongside the code.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::LockHasExpired => 403,
            _ => 400,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ExceptionCode {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownKeyword::new("exception code", s))
    }
}

/// `lockAction` attribute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LockAction {
    /// Lock every selected feature or fail.
    #[default]
    All,
    /// Lock whatever is not already locked.
    Some,
}

impl LockAction {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Some => "SOME",
        }
    }
}

impl FromStr for LockAction {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" => Ok(Self::All),
            "SOME" => Ok(Self::Some),
            other => Err(UnknownKeyword::new("lock action", other)),
        }
    }
}

/// `releaseAction` attribute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReleaseAction {
    /// Release every lock held by the lock id.
    #[default]
    All,
    /// Release only the features touched by the transaction.
    Some,
}

impl ReleaseAction {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Some => "SOME",
        }
    }
}

/// `resultType` attribute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResultType {
    /// Return the matching features.
    #[default]
    Results,
    /// Return only counts.
    Hits,
}

impl ResultType {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Hits => "hits",
        }
    }
}

/// Conformance classes whose support gates test cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ConformanceClass {
    /// Simple WFS.
    SimpleWfs,
    /// Basic WFS.
    BasicWfs,
    /// Transactional WFS.
    TransactionalWfs,
    /// Locking WFS.
    LockingWfs,
    /// Response paging.
    ResultPaging,
    /// Stored query management.
    ManageStoredQueries,
    /// Key-value pair encoding (GET).
    KvpEncoding,
    /// XML encoding (POST).
    XmlEncoding,
    /// SOAP encoding.
    SoapEncoding,
}

impl ConformanceClass {
    /// Every class, in report order.
    pub const ALL: [Self; 9] = [
        Self::SimpleWfs,
        Self::BasicWfs,
        Self::TransactionalWfs,
        Self::LockingWfs,
        Self::ResultPaging,
        Self::ManageStoredQueries,
        Self::KvpEncoding,
        Self::XmlEncoding,
        Self::SoapEncoding,
    ];

    /// OWS constraint advertising the class.
    #[must_use]
    pub const fn constraint_name(self) -> &'static str {
        match self {
            Self::SimpleWfs => "ImplementsSimpleWFS",
            Self::BasicWfs => "ImplementsBasicWFS",
            Self::TransactionalWfs => "ImplementsTransactionalWFS",
            Self::LockingWfs => "ImplementsLockingWFS",
            Self::ResultPaging => "ImplementsResultPaging",
            Self::ManageStoredQueries => "ManageStoredQueries",
            Self::KvpEncoding => "KVPEncoding",
            Self::XmlEncoding => "XMLEncoding",
            Self::SoapEncoding => "SOAPEncoding",
        }
    }

    /// Short name accepted on the command line.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::SimpleWfs => "simple",
            Self::BasicWfs => "basic",
            Self::TransactionalWfs => "transactional",
            Self::LockingWfs => "locking",
            Self::ResultPaging => "paging",
            Self::ManageStoredQueries => "stored-queries",
            Self::KvpEncoding => "kvp",
            Self::XmlEncoding => "xml",
            Self::SoapEncoding => "soap",
        }
    }
}

impl fmt::Display for ConformanceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.short_name()) }
}

impl FromStr for ConformanceClass {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|class| {
                class.short_name().eq_ignore_ascii_case(wanted)
                    || class.constraint_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| UnknownKeyword::new("conformance class", s))
    }
}

/// Namespace-qualified feature type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeName {
    namespace: String,
    local_name: String,
}

impl TypeName {
    /// Create a type name from a namespace and local part.
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    /// Namespace URI.
    #[must_use]
    pub fn namespace(&self) -> &str { &self.namespace }

    /// Local part.
    #[must_use]
    pub fn local_name(&self) -> &str { &self.local_name }

    /// Render with the given prefix, e.g. `tns:Road`.
    #[must_use]
    pub fn prefixed(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.local_name.clone()
        } else {
            format!("{prefix}:{}", self.local_name)
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local_name)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ExceptionCode::LockHasExpired, 403)]
    #[case(ExceptionCode::CannotLockAllFeatures, 400)]
    #[case(ExceptionCode::OperationParsingFailed, 400)]
    #[case(ExceptionCode::DuplicateStoredQueryIdValue, 400)]
    fn exception_status_mapping(#[case] code: ExceptionCode, #[case] status: u16) {
        assert_eq!(code.http_status(), status);
    }

    #[rstest]
    fn operations_round_trip_through_names() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>(), Ok(op));
        }
        assert!("Frobnicate".parse::<Operation>().is_err());
    }

    #[rstest]
    #[case("locking", ConformanceClass::LockingWfs)]
    #[case("ImplementsResultPaging", ConformanceClass::ResultPaging)]
    #[case(" stored-queries ", ConformanceClass::ManageStoredQueries)]
    fn conformance_class_accepts_short_and_constraint_names(
        #[case] input: &str,
        #[case] class: ConformanceClass,
    ) {
        assert_eq!(input.parse::<ConformanceClass>(), Ok(class));
    }

    #[rstest]
    fn type_name_renders_prefixed_and_clark_forms() {
        let name = TypeName::new("http://example.org/ns1", "Road");
        assert_eq!(name.prefixed("tns"), "tns:Road");
        assert_eq!(name.to_string(), "{http://example.org/ns1}Road");
    }
}
