//! Query expressions, filters, transaction actions and stored query
//! definitions carried by request payloads.

use std::collections::BTreeMap;

use crate::{
    capabilities::Envelope,
    protocol::{FES_NS, GML_NS, TypeName, WFS_NS},
    xml::XmlElement,
};

/// Namespace URI to prefix bindings used when rendering qualified names.
pub type Prefixes = BTreeMap<String, String>;

fn prefixed(name: &TypeName, prefixes: &Prefixes) -> String {
    name.prefixed(prefixes.get(name.namespace()).map_or("", String::as_str))
}

/// A filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Select features by identifier.
    ResourceId(Vec<String>),
    /// Select features whose property equals a literal.
    PropertyIsEqualTo {
        /// Property path, e.g. `gml:name`.
        property: String,
        /// Literal value.
        literal: String,
    },
    /// Select features whose geometry intersects an envelope.
    Bbox {
        /// Geometry property; `None` means the default geometry.
        property: Option<String>,
        /// Query envelope.
        envelope: Envelope,
        /// CRS of the envelope.
        srs_name: Option<String>,
    },
    /// Conjunction of predicates.
    And(Vec<Self>),
}

impl Filter {
    /// Identifier filter over `ids`.
    pub fn resource_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ResourceId(ids.into_iter().map(Into::into).collect())
    }

    /// Identifiers when the filter is a pure identifier filter.
    #[must_use]
    pub fn as_resource_ids(&self) -> Option<&[String]> {
        match self {
            Self::ResourceId(ids) => Some(ids),
            _ => None,
        }
    }

    /// Property paths the filter references.
    #[must_use]
    pub fn property_names(&self) -> Vec<&str> {
        match self {
            Self::ResourceId(_) => Vec::new(),
            Self::PropertyIsEqualTo { property, .. } => vec![property.as_str()],
            Self::Bbox { property, .. } => property.iter().map(String::as_str).collect(),
            Self::And(parts) => parts.iter().flat_map(Self::property_names).collect(),
        }
    }

    /// The `fes:Filter` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(FES_NS, "Filter").with_children(self.predicates())
    }

    fn predicates(&self) -> Vec<XmlElement> {
        match self {
            Self::ResourceId(ids) => ids
                .iter()
                .map(|id| XmlElement::new(FES_NS, "ResourceId").with_attr("rid", id.as_str()))
                .collect(),
            Self::PropertyIsEqualTo { property, literal } => {
                let reference =
                    XmlElement::new(FES_NS, "ValueReference").with_text(property.as_str());
                vec![
                    XmlElement::new(FES_NS, "PropertyIsEqualTo")
                        .with_child(reference)
                        .with_child(XmlElement::new(FES_NS, "Literal").with_text(literal.as_str())),
                ]
            }
            Self::Bbox {
                property,
                envelope,
                srs_name,
            } => {
                let lower =
                    XmlElement::new(GML_NS, "lowerCorner").with_text(envelope.lower_corner());
                let upper =
                    XmlElement::new(GML_NS, "upperCorner").with_text(envelope.upper_corner());
                let mut env = XmlElement::new(GML_NS, "Envelope")
                    .with_child(lower)
                    .with_child(upper);
                if let Some(srs) = srs_name {
                    env = env.with_attr("srsName", srs.as_str());
                }
                let mut bbox = XmlElement::new(FES_NS, "BBOX");
                if let Some(prop) = property {
                    let reference =
                        XmlElement::new(FES_NS, "ValueReference").with_text(prop.as_str());
                    bbox = bbox.with_child(reference);
                }
                vec![bbox.with_child(env)]
            }
            Self::And(parts) => vec![
                XmlElement::new(FES_NS, "And")
                    .with_children(parts.iter().flat_map(Self::predicates)),
            ],
        }
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    /// Property path.
    pub property: String,
    /// Descending order when `true`.
    pub descending: bool,
}

impl SortBy {
    fn element(&self) -> XmlElement {
        XmlElement::new(FES_NS, "SortProperty")
            .with_child(XmlElement::new(FES_NS, "ValueReference").with_text(self.property.as_str()))
            .with_child(XmlElement::new(FES_NS, "SortOrder").with_text(self.order()))
    }

    const fn order(&self) -> &'static str { if self.descending { "DESC" } else { "ASC" } }
}

/// An ad hoc query over one or more feature types.
#[derive(Debug, Clone, PartialEq)]
pub struct AdhocQuery {
    /// Queried feature types.
    pub type_names: Vec<TypeName>,
    /// Optional selection predicate.
    pub filter: Option<Filter>,
    /// Ordering.
    pub sort_by: Vec<SortBy>,
}

/// Invocation of a stored query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredQueryCall {
    /// Stored query identifier.
    pub id: String,
    /// Parameter bindings.
    pub parameters: Vec<(String, String)>,
}

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpression {
    /// Ad hoc `wfs:Query`.
    Adhoc(AdhocQuery),
    /// `wfs:StoredQuery` invocation.
    Stored(StoredQueryCall),
}

impl QueryExpression {
    /// Every feature of `type_name`.
    #[must_use]
    pub fn by_type(type_name: TypeName) -> Self {
        Self::Adhoc(AdhocQuery {
            type_names: vec![type_name],
            filter: None,
            sort_by: Vec::new(),
        })
    }

    /// Features of `type_name` with the given identifiers.
    pub fn by_ids<I, S>(type_name: TypeName, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::filtered(type_name, Filter::resource_ids(ids))
    }

    /// Features of `type_name` matching `filter`.
    #[must_use]
    pub fn filtered(type_name: TypeName, filter: Filter) -> Self {
        Self::Adhoc(AdhocQuery {
            type_names: vec![type_name],
            filter: Some(filter),
            sort_by: Vec::new(),
        })
    }

    /// Invoke stored query `id` with parameter bindings.
    pub fn stored<I, K, V>(id: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Stored(StoredQueryCall {
            id: id.into(),
            parameters: parameters
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Queried feature types; empty for stored queries.
    #[must_use]
    pub fn type_names(&self) -> &[TypeName] {
        match self {
            Self::Adhoc(q) => &q.type_names,
            Self::Stored(_) => &[],
        }
    }

    /// Filter of an ad hoc query.
    #[must_use]
    pub const fn filter(&self) -> Option<&Filter> {
        match self {
            Self::Adhoc(q) => q.filter.as_ref(),
            Self::Stored(_) => None,
        }
    }

    /// The `wfs:Query` or `wfs:StoredQuery` element.
    #[must_use]
    pub fn to_element(&self, prefixes: &Prefixes) -> XmlElement {
        match self {
            Self::Adhoc(q) => {
                let names = q
                    .type_names
                    .iter()
                    .map(|t| prefixed(t, prefixes))
                    .collect::<Vec<_>>()
                    .join(" ");
                let mut el = XmlElement::new(WFS_NS, "Query").with_attr("typeNames", names);
                if let Some(filter) = &q.filter {
                    el = el.with_child(filter.to_element());
                }
                if !q.sort_by.is_empty() {
                    el = el.with_child(
                        XmlElement::new(FES_NS, "SortBy")
                            .with_children(q.sort_by.iter().map(SortBy::element)),
                    );
                }
                el
            }
            Self::Stored(call) => XmlElement::new(WFS_NS, "StoredQuery")
                .with_attr("id", call.id.as_str())
                .with_children(call.parameters.iter().map(|(name, value)| {
                    XmlElement::new(WFS_NS, "Parameter")
                        .with_attr("name", name.as_str())
                        .with_text(value.as_str())
                })),
        }
    }

    pub(crate) fn sort_kvp(&self) -> Option<String> {
        let Self::Adhoc(q) = self else { return None };
        (!q.sort_by.is_empty()).then(|| {
            q.sort_by
                .iter()
                .map(|s| format!("{} {}", s.property, s.order()))
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    pub(crate) fn type_names_kvp(&self, prefixes: &Prefixes) -> String {
        self.type_names()
            .iter()
            .map(|t| prefixed(t, prefixes))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A transactional action.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionAction {
    /// Insert new features.
    Insert(Vec<XmlElement>),
    /// Update properties of selected features.
    Update {
        /// Target feature type.
        type_name: TypeName,
        /// Property path and new value pairs.
        properties: Vec<(String, String)>,
        /// Selection.
        filter: Filter,
    },
    /// Delete selected features.
    Delete {
        /// Target feature type.
        type_name: TypeName,
        /// Selection.
        filter: Filter,
    },
    /// Replace the selected feature.
    Replace {
        /// Replacement feature.
        feature: XmlElement,
        /// Selection.
        filter: Filter,
    },
}

impl TransactionAction {
    /// Feature types touched by the action, where known.
    #[must_use]
    pub fn type_name(&self) -> Option<&TypeName> {
        match self {
            Self::Update { type_name, .. } | Self::Delete { type_name, .. } => Some(type_name),
            Self::Insert(_) | Self::Replace { .. } => None,
        }
    }

    /// The action element.
    #[must_use]
    pub fn to_element(&self, prefixes: &Prefixes) -> XmlElement {
        match self {
            Self::Insert(features) => {
                XmlElement::new(WFS_NS, "Insert").with_children(features.iter().cloned())
            }
            Self::Update {
                type_name,
                properties,
                filter,
            } => XmlElement::new(WFS_NS, "Update")
                .with_attr("typeName", prefixed(type_name, prefixes))
                .with_children(properties.iter().map(|(name, value)| {
                    XmlElement::new(WFS_NS, "Property")
                        .with_child(
                            XmlElement::new(WFS_NS, "ValueReference").with_text(name.as_str()),
                        )
                        .with_child(XmlElement::new(WFS_NS, "Value").with_text(value.as_str()))
                }))
                .with_child(filter.to_element()),
            Self::Delete { type_name, filter } => XmlElement::new(WFS_NS, "Delete")
                .with_attr("typeName", prefixed(type_name, prefixes))
                .with_child(filter.to_element()),
            Self::Replace { feature, filter } => XmlElement::new(WFS_NS, "Replace")
                .with_child(feature.clone())
                .with_child(filter.to_element()),
        }
    }
}

/// Declared stored query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// XML Schema built-in type local name, e.g. `string`.
    pub xsd_type: String,
}

/// Body of a stored query definition.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    /// A WFS query expression.
    Expression(QueryExpression),
    /// Opaque text in some other query language.
    Text(String),
}

/// A stored query definition submitted with `CreateStoredQuery`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredQueryDefinition {
    /// Identifier.
    pub id: String,
    /// Title.
    pub title: Option<String>,
    /// Query language URI.
    pub language: String,
    /// Declared parameters.
    pub parameters: Vec<ParameterSpec>,
    /// Feature types returned.
    pub return_types: Vec<TypeName>,
    /// Definition body.
    pub body: QueryBody,
}

impl StoredQueryDefinition {
    /// Return `true` when the body carries nothing.
    #[must_use]
    pub fn body_is_empty(&self) -> bool {
        match &self.body {
            QueryBody::Expression(_) => false,
            QueryBody::Text(text) => text.trim().is_empty(),
        }
    }

    /// Canonical rendering used to recognise identical resubmissions.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut prefixes = Prefixes::new();
        for (idx, t) in self.return_types.iter().enumerate() {
            prefixes
                .entry(t.namespace().to_owned())
                .or_insert_with(|| format!("q{idx}"));
        }
        self.to_element(&prefixes).to_xml_with(&prefixes)
    }

    /// The `wfs:StoredQueryDefinition` element.
    #[must_use]
    pub fn to_element(&self, prefixes: &Prefixes) -> XmlElement {
        let mut el =
            XmlElement::new(WFS_NS, "StoredQueryDefinition").with_attr("id", self.id.as_str());
        if let Some(title) = &self.title {
            el = el.with_child(XmlElement::new(WFS_NS, "Title").with_text(title.as_str()));
        }
        el = el.with_children(self.parameters.iter().map(|p| {
            XmlElement::new(WFS_NS, "Parameter")
                .with_attr("name", p.name.as_str())
                .with_attr("type", format!("xsd:{}", p.xsd_type))
        }));
        let return_types = self
            .return_types
            .iter()
            .map(|t| prefixed(t, prefixes))
            .collect::<Vec<_>>()
            .join(" ");
        let text = XmlElement::new(WFS_NS, "QueryExpressionText")
            .with_attr("returnFeatureTypes", return_types)
            .with_attr("language", self.language.as_str())
            .with_attr("isPrivate", "false");
        let body = match &self.body {
            QueryBody::Expression(expr) => text.with_child(expr.to_element(prefixes)),
            QueryBody::Text(raw) => text.with_text(raw.as_str()),
        };
        el.with_child(body)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn road() -> TypeName { TypeName::new("http://example.org/ns1", "Road") }

    #[rstest]
    fn id_query_renders_resource_ids() {
        let prefixes = Prefixes::from([("http://example.org/ns1".to_owned(), "tns".to_owned())]);
        let el = QueryExpression::by_ids(road(), ["road.1", "road.2"]).to_element(&prefixes);
        assert_eq!(el.attr("typeNames"), Some("tns:Road"));
        let filter = el.child(FES_NS, "Filter").map(|f| f.children.len());
        assert_eq!(filter, Some(2));
    }

    #[rstest]
    fn filter_reports_referenced_properties() {
        let filter = Filter::And(vec![
            Filter::PropertyIsEqualTo {
                property: "gml:name".into(),
                literal: "A1".into(),
            },
            Filter::Bbox {
                property: Some("tns:geom".into()),
                envelope: Envelope::new(0.0, 0.0, 1.0, 1.0),
                srs_name: None,
            },
        ]);
        assert_eq!(filter.property_names(), vec!["gml:name", "tns:geom"]);
    }

    #[rstest]
    fn fingerprint_is_stable_and_sensitive_to_body() {
        let def = StoredQueryDefinition {
            id: "urn:example:q1".into(),
            title: None,
            language: crate::protocol::QUERY_LANGUAGE_WFS.into(),
            parameters: vec![],
            return_types: vec![road()],
            body: QueryBody::Expression(QueryExpression::by_type(road())),
        };
        let same = def.clone();
        assert_eq!(def.fingerprint(), same.fingerprint());
        let other = StoredQueryDefinition {
            body: QueryBody::Text("SELECT *".into()),
            ..def.clone()
        };
        assert_ne!(def.fingerprint(), other.fingerprint());
    }
}
