//! Typed view over a service capabilities document.
//!
//! The document is parsed once into a [`CapabilitySet`] which is then shared
//! immutably between test cases. All capability checks go through this type
//! instead of ad hoc document queries.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use url::Url;

use crate::{
    dispatch::{Binding, HttpMethod},
    error::{VerifyError, VerifyResult},
    protocol::{
        ConformanceClass,
        DEFAULT_VERSION,
        FES_NS,
        Operation,
        OWS_NS,
        QUERY_LANGUAGE_WFS,
        TypeName,
        WFS_NS,
        XLINK_NS,
    },
    sampler::DataSample,
    xml::{self, XmlElement},
};

/// Axis-aligned bounding box in longitude/latitude order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Minimum x (longitude).
    pub min_x: f64,
    /// Minimum y (latitude).
    pub min_y: f64,
    /// Maximum x (longitude).
    pub max_x: f64,
    /// Maximum y (latitude).
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope from its corners.
    #[must_use]
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse `"x y"` corner strings.
    #[must_use]
    pub fn from_corners(lower: &str, upper: &str) -> Option<Self> {
        let (min_x, min_y) = parse_pair(lower)?;
        let (max_x, max_y) = parse_pair(upper)?;
        Some(Self::new(min_x, min_y, max_x, max_y))
    }

    /// Return `true` when the two envelopes share at least one point.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Return `true` when `other` lies entirely inside `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    /// Lower corner as `"x y"`.
    #[must_use]
    pub fn lower_corner(&self) -> String { format!("{} {}", self.min_x, self.min_y) }

    /// Upper corner as `"x y"`.
    #[must_use]
    pub fn upper_corner(&self) -> String { format!("{} {}", self.max_x, self.max_y) }
}

fn parse_pair(text: &str) -> Option<(f64, f64)> {
    let mut parts = text.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y))) => Some((x, y)),
        _ => None,
    }
}

/// A property declared by a feature type's application schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Local name of the property element.
    pub name: String,
    /// Declared schema type, as written.
    pub type_name: String,
    /// Whether the property holds a geometry.
    pub is_geometry: bool,
}

/// Reference data describing one advertised feature type.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTypeDescriptor {
    /// Qualified type name.
    pub name: TypeName,
    /// Human-readable title.
    pub title: Option<String>,
    /// Default CRS identifier.
    pub default_crs: Option<String>,
    /// Other supported CRS identifiers.
    pub other_crs: Vec<String>,
    /// WGS84 extent.
    pub extent: Option<Envelope>,
    /// Whether the service holds at least one instance.
    pub instantiated: bool,
    /// Declared properties; empty when the schema was not described.
    pub properties: Vec<PropertyDescriptor>,
}

impl FeatureTypeDescriptor {
    /// Geometry-valued properties.
    pub fn geometry_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_geometry)
    }

    /// Return `true` when `name` is declared, or when nothing is declared.
    #[must_use]
    pub fn accepts_property(&self, name: &str) -> bool {
        let local = name.rsplit_once(':').map_or(name, |(_, local)| local);
        self.properties.is_empty() || self.properties.iter().any(|p| p.name == local)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct OperationMetadata {
    endpoints: BTreeMap<HttpMethod, Url>,
    constraints: BTreeMap<String, String>,
    parameters: BTreeMap<String, Vec<String>>,
}

/// Capabilities of the service under test, computed once.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySet {
    version: String,
    operations: BTreeMap<Operation, OperationMetadata>,
    constraints: BTreeMap<String, String>,
    feature_types: Vec<FeatureTypeDescriptor>,
    spatial_operators: BTreeSet<String>,
}

impl CapabilitySet {
    /// Parse a capabilities document.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::StructuralValidationFailure`] when the input is
    /// not a `wfs:WFS_Capabilities` document.
    pub fn parse(document: &str) -> VerifyResult<Self> {
        Self::from_document(&xml::parse(document)?)
    }

    /// Build from a parsed capabilities document.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::StructuralValidationFailure`] when the root is
    /// not `wfs:WFS_Capabilities`.
    pub fn from_document(root: &XmlElement) -> VerifyResult<Self> {
        if !root.is(WFS_NS, "WFS_Capabilities") {
            return Err(VerifyError::structure(
                format!("{{{WFS_NS}}}WFS_Capabilities"),
                root.expanded_name(),
            ));
        }
        let mut operations = BTreeMap::new();
        let mut constraints = BTreeMap::new();
        if let Some(metadata) = root.child(OWS_NS, "OperationsMetadata") {
            for op in metadata.children_named(OWS_NS, "Operation") {
                let Some(operation) = op.attr("name").and_then(|n| n.parse::<Operation>().ok())
                else {
                    continue;
                };
                operations.insert(operation, operation_metadata(op));
            }
            constraints = read_constraints(metadata);
        }
        let feature_types = root
            .child(WFS_NS, "FeatureTypeList")
            .map(|list| {
                list.children_named(WFS_NS, "FeatureType")
                    .filter_map(feature_type)
                    .collect()
            })
            .unwrap_or_default();
        let spatial_operators = root
            .child(FES_NS, "Filter_Capabilities")
            .map(|caps| {
                caps.find_all(FES_NS, "SpatialOperator")
                    .into_iter()
                    .filter_map(|op| op.attr("name").map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            version: root.attr("version").unwrap_or(DEFAULT_VERSION).to_owned(),
            operations,
            constraints,
            feature_types,
            spatial_operators,
        })
    }

    /// Advertised protocol version.
    #[must_use]
    pub fn version(&self) -> &str { &self.version }

    /// Return `true` when the operation is advertised.
    #[must_use]
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains_key(&operation)
    }

    /// Value of a service-wide constraint.
    #[must_use]
    pub fn constraint_value(&self, name: &str) -> Option<&str> {
        self.constraints.get(name).map(String::as_str)
    }

    /// Value of a constraint declared on one operation.
    #[must_use]
    pub fn operation_constraint(&self, operation: Operation, name: &str) -> Option<&str> {
        self.operations
            .get(&operation)
            .and_then(|meta| meta.constraints.get(name))
            .map(String::as_str)
    }

    /// Return `true` when the conformance class constraint is `TRUE`.
    #[must_use]
    pub fn implements(&self, class: ConformanceClass) -> bool {
        is_true(self.constraint_value(class.constraint_name()))
    }

    /// Endpoint for an operation and HTTP method, query component removed.
    #[must_use]
    pub fn endpoint(&self, operation: Operation, method: HttpMethod) -> Option<&Url> {
        self.operations
            .get(&operation)
            .and_then(|meta| meta.endpoints.get(&method))
    }

    /// Bindings usable for an operation.
    ///
    /// Service-wide encoding constraints are united with the operation's own
    /// constraints; a binding is only offered when an endpoint exists for its
    /// HTTP method. `Transaction` is never offered over GET. When no encoding
    /// constraint is advertised at all, the endpoints alone decide.
    #[must_use]
    pub fn bindings(&self, operation: Operation) -> BTreeSet<Binding> {
        let Some(meta) = self.operations.get(&operation) else {
            return BTreeSet::new();
        };
        let encodings = [
            (Binding::Get, ConformanceClass::KvpEncoding),
            (Binding::Post, ConformanceClass::XmlEncoding),
            (Binding::Soap, ConformanceClass::SoapEncoding),
        ];
        let advertised_any = encodings.iter().any(|(_, class)| {
            let name = class.constraint_name();
            self.constraints.contains_key(name) || meta.constraints.contains_key(name)
        });
        encodings
            .into_iter()
            .filter(|(binding, class)| {
                let name = class.constraint_name();
                let declared = is_true(self.constraint_value(name))
                    || is_true(meta.constraints.get(name).map(String::as_str));
                let allowed = declared || (!advertised_any && *binding != Binding::Soap);
                let reachable = binding
                    .method()
                    .is_some_and(|method| meta.endpoints.contains_key(&method));
                allowed && reachable
            })
            .map(|(binding, _)| binding)
            .filter(|binding| !(operation == Operation::Transaction && *binding == Binding::Get))
            .collect()
    }

    /// First advertised binding in the order POST, GET, SOAP.
    #[must_use]
    pub fn default_binding(&self, operation: Operation) -> Option<Binding> {
        let offered = self.bindings(operation);
        [Binding::Post, Binding::Get, Binding::Soap]
            .into_iter()
            .find(|b| offered.contains(b))
    }

    /// Advertised feature types.
    #[must_use]
    pub fn feature_types(&self) -> &[FeatureTypeDescriptor] { &self.feature_types }

    /// Descriptor for one feature type.
    #[must_use]
    pub fn feature_type(&self, name: &TypeName) -> Option<&FeatureTypeDescriptor> {
        self.feature_types.iter().find(|ft| &ft.name == name)
    }

    /// Feature types known to hold data.
    pub fn instantiated_types(&self) -> impl Iterator<Item = &FeatureTypeDescriptor> {
        self.feature_types.iter().filter(|ft| ft.instantiated)
    }

    /// `ResponseCacheTimeout` in seconds, if advertised.
    #[must_use]
    pub fn cache_timeout(&self) -> Option<Duration> {
        self.constraint_value("ResponseCacheTimeout")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// `CountDefault`, if advertised.
    #[must_use]
    pub fn count_default(&self) -> Option<u32> {
        self.constraint_value("CountDefault")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether paging stays consistent across transactions.
    #[must_use]
    pub fn paging_is_transaction_safe(&self) -> bool {
        is_true(self.constraint_value("PagingIsTransactionSafe"))
    }

    /// Stored query languages advertised for `CreateStoredQuery`.
    #[must_use]
    pub fn query_languages(&self) -> &[String] {
        self.operations
            .get(&Operation::CreateStoredQuery)
            .and_then(|meta| meta.parameters.get("language"))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Return `true` when stored queries may be written in `language`.
    ///
    /// WFS query expressions are always supported.
    #[must_use]
    pub fn supports_language(&self, language: &str) -> bool {
        language == QUERY_LANGUAGE_WFS || self.query_languages().iter().any(|l| l == language)
    }

    /// Spatial operators named in the filter capabilities.
    #[must_use]
    pub const fn spatial_operators(&self) -> &BTreeSet<String> { &self.spatial_operators }

    /// Copy of `self` with instantiation flags and property declarations
    /// taken from a data sample.
    #[must_use]
    pub fn with_sample(&self, sample: &DataSample) -> Self {
        let mut out = self.clone();
        for ft in &mut out.feature_types {
            ft.instantiated = !sample.ids(&ft.name).is_empty();
            if let Some(props) = sample.properties(&ft.name) {
                ft.properties = props.to_vec();
            }
        }
        out
    }
}

fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn read_constraints(parent: &XmlElement) -> BTreeMap<String, String> {
    parent
        .children_named(OWS_NS, "Constraint")
        .filter_map(|c| {
            let name = c.attr("name")?;
            let value = c
                .child(OWS_NS, "DefaultValue")
                .or_else(|| c.find(OWS_NS, "Value"))
                .map(|v| v.text().to_owned())
                .unwrap_or_default();
            Some((name.to_owned(), value))
        })
        .collect()
}

fn operation_metadata(op: &XmlElement) -> OperationMetadata {
    let mut endpoints = BTreeMap::new();
    for http in op.find_all(OWS_NS, "HTTP") {
        for (method, local) in [(HttpMethod::Get, "Get"), (HttpMethod::Post, "Post")] {
            let href = http
                .child(OWS_NS, local)
                .and_then(|e| e.attr_ns(XLINK_NS, "href"))
                .and_then(|h| Url::parse(h.trim()).ok());
            if let Some(mut url) = href {
                url.set_query(None);
                url.set_fragment(None);
                endpoints.entry(method).or_insert(url);
            }
        }
    }
    let parameters = op
        .children_named(OWS_NS, "Parameter")
        .filter_map(|p| {
            let name = p.attr("name")?;
            let values = p
                .find_all(OWS_NS, "Value")
                .into_iter()
                .map(|v| v.text().to_owned())
                .collect();
            Some((name.to_owned(), values))
        })
        .collect();
    OperationMetadata {
        endpoints,
        constraints: read_constraints(op),
        parameters,
    }
}

fn feature_type(ft: &XmlElement) -> Option<FeatureTypeDescriptor> {
    let name_el = ft.child(WFS_NS, "Name")?;
    let (namespace, local) = name_el
        .resolve_qname(name_el.text())
        .unwrap_or_else(|| (String::new(), name_el.text().to_owned()));
    let text_of = |local_name: &str| ft.child(WFS_NS, local_name).map(|e| e.text().to_owned());
    let extent = ft.child(OWS_NS, "WGS84BoundingBox").and_then(|bbox| {
        let lower = bbox.child(OWS_NS, "LowerCorner")?;
        let upper = bbox.child(OWS_NS, "UpperCorner")?;
        Envelope::from_corners(lower.text(), upper.text())
    });
    Some(FeatureTypeDescriptor {
        name: TypeName::new(namespace, local),
        title: text_of("Title"),
        default_crs: text_of("DefaultCRS"),
        other_crs: ft
            .children_named(WFS_NS, "OtherCRS")
            .map(|e| e.text().to_owned())
            .collect(),
        extent,
        instantiated: false,
        properties: Vec::new(),
    })
}
