//! Sampling of the data held by the service under test.
//!
//! Before any test case runs, [`FeatureSampler`] asks the service for a few
//! instances of every advertised feature type and for the property
//! declarations of each type. The resulting [`DataSample`] decides which
//! types count as instantiated and supplies lock and paging targets.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::{
    capabilities::PropertyDescriptor,
    dispatch::{Binding, BindingDispatcher},
    error::VerifyResult,
    protocol::{GML_NS, Operation, TypeName, XSD_NS},
    request::{QueryExpression, RequestBuilder, RequestParams},
    validate::feature_members,
    xml::XmlElement,
};

/// Feature ids and property declarations gathered from the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSample {
    ids: BTreeMap<TypeName, Vec<String>>,
    properties: BTreeMap<TypeName, Vec<PropertyDescriptor>>,
}

impl DataSample {
    /// Create an empty sample.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record sampled ids for a type.
    #[must_use]
    pub fn with_ids<I, S>(mut self, type_name: TypeName, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids
            .insert(type_name, ids.into_iter().map(Into::into).collect());
        self
    }

    /// Record property declarations for a type.
    #[must_use]
    pub fn with_properties(
        mut self,
        type_name: TypeName,
        properties: Vec<PropertyDescriptor>,
    ) -> Self {
        self.properties.insert(type_name, properties);
        self
    }

    /// Sampled ids of a type, in document order.
    #[must_use]
    pub fn ids(&self, type_name: &TypeName) -> &[String] {
        self.ids.get(type_name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Declared properties of a type, if it was described.
    #[must_use]
    pub fn properties(&self, type_name: &TypeName) -> Option<&[PropertyDescriptor]> {
        self.properties.get(type_name).map(Vec::as_slice)
    }

    /// Return `true` when at least one instance of the type was found.
    #[must_use]
    pub fn is_instantiated(&self, type_name: &TypeName) -> bool { !self.ids(type_name).is_empty() }

    /// Types with at least one sampled instance.
    pub fn instantiated_types(&self) -> impl Iterator<Item = &TypeName> {
        self.ids
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(name, _)| name)
    }

    /// Type owning a sampled id.
    #[must_use]
    pub fn type_of(&self, id: &str) -> Option<&TypeName> {
        self.ids
            .iter()
            .find(|(_, ids)| ids.iter().any(|i| i == id))
            .map(|(name, _)| name)
    }
}

/// Gathers a [`DataSample`] using the run's builder and dispatcher.
#[derive(Debug)]
pub struct FeatureSampler<'a> {
    builder: &'a RequestBuilder,
    dispatcher: &'a BindingDispatcher,
    sample_size: u32,
}

impl<'a> FeatureSampler<'a> {
    /// Create a sampler fetching at most `sample_size` features per type.
    #[must_use]
    pub const fn new(
        builder: &'a RequestBuilder,
        dispatcher: &'a BindingDispatcher,
        sample_size: u32,
    ) -> Self {
        Self {
            builder,
            dispatcher,
            sample_size,
        }
    }

    /// Sample every advertised feature type. Types that cannot be fetched are
    /// recorded as uninstantiated rather than failing the run.
    pub async fn sample(&self) -> DataSample {
        let capabilities = self.dispatcher.capabilities();
        let mut sample = DataSample::new();
        for ft in capabilities.feature_types() {
            let ids = self.sample_ids(&ft.name).await;
            debug!(type_name = %ft.name, count = ids.len(), "sampled feature ids");
            sample = sample.with_ids(ft.name.clone(), ids);
            if let Some(props) = self.describe(&ft.name).await {
                sample = sample.with_properties(ft.name.clone(), props);
            }
        }
        sample
    }

    async fn sample_ids(&self, type_name: &TypeName) -> Vec<String> {
        let bindings = self.dispatcher.capabilities().bindings(Operation::GetFeature);
        for binding in bindings {
            match self.fetch_ids(type_name, binding).await {
                Ok(ids) if !ids.is_empty() => return ids,
                Ok(_) => {}
                Err(err) => {
                    warn!(type_name = %type_name, %binding, error = %err, "sampling failed");
                }
            }
        }
        Vec::new()
    }

    async fn fetch_ids(&self, type_name: &TypeName, binding: Binding) -> VerifyResult<Vec<String>> {
        let params = RequestParams::default()
            .with_query(QueryExpression::by_type(type_name.clone()))
            .with_count(self.sample_size);
        let payload = self.builder.build(Operation::GetFeature, params)?;
        let record = self.dispatcher.dispatch(&payload, binding, None).await?;
        if record.status != 200 {
            return Ok(Vec::new());
        }
        Ok(record
            .root()
            .map(|root| {
                feature_members(root)
                    .into_iter()
                    .filter(|f| f.is(type_name.namespace(), type_name.local_name()))
                    .filter_map(|f| f.attr_ns(GML_NS, "id"))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe(&self, type_name: &TypeName) -> Option<Vec<PropertyDescriptor>> {
        if !self.dispatcher.capabilities().supports(Operation::DescribeFeatureType) {
            return None;
        }
        let params = RequestParams::default().with_type_name(type_name.clone());
        let payload = self.builder.build(Operation::DescribeFeatureType, params).ok()?;
        let record = self
            .dispatcher
            .dispatch(&payload, Binding::Any, None)
            .await
            .ok()?;
        if record.status != 200 {
            return None;
        }
        record.root().and_then(|schema| declared_properties(schema, type_name))
    }
}

/// Property declarations of `type_name` in an application schema.
///
/// Follows the global element declaration to its named complex type and
/// collects the element particles of that type. Properties whose type is a
/// GML `*PropertyType` are flagged as geometries.
#[must_use]
pub fn declared_properties(
    schema: &XmlElement,
    type_name: &TypeName,
) -> Option<Vec<PropertyDescriptor>> {
    if !schema.is(XSD_NS, "schema") {
        return None;
    }
    let element = schema
        .children_named(XSD_NS, "element")
        .find(|e| e.attr("name") == Some(type_name.local_name()))?;
    let complex = match element.child(XSD_NS, "complexType") {
        Some(inline) => inline,
        None => {
            let (_, type_local) = element.resolve_qname(element.attr("type")?)?;
            schema
                .children_named(XSD_NS, "complexType")
                .find(|c| c.attr("name") == Some(type_local.as_str()))?
        }
    };
    let props = complex
        .find_all(XSD_NS, "element")
        .into_iter()
        .filter_map(|particle| {
            let name = particle.attr("name")?;
            let declared = particle.attr("type").unwrap_or_default();
            let is_geometry = particle.resolve_qname(declared).is_some_and(|(ns, local)| {
                ns == GML_NS && local.ends_with("PropertyType") && is_geometry_type(&local)
            });
            Some(PropertyDescriptor {
                name: name.to_owned(),
                type_name: declared.to_owned(),
                is_geometry,
            })
        })
        .collect();
    Some(props)
}

fn is_geometry_type(local: &str) -> bool {
    const NON_GEOMETRY: [&str; 4] = [
        "FeaturePropertyType",
        "ReferenceType",
        "CodeType",
        "MeasureType",
    ];
    !NON_GEOMETRY.contains(&local)
}
