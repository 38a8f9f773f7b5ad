//! Capabilities documents and feature data served by [`SimulatedWfs`].
//!
//! [`SimulatedWfs`]: crate::SimulatedWfs

use rstest::fixture;
use wfs_verify::{protocol::TypeName, xml::XmlElement};

/// Namespace of the simulated feature types.
pub const NS: &str = "http://example.org/ns1";

/// Base URL the simulated service advertises.
pub const ENDPOINT: &str = "http://iut.test/wfs";

/// Number of `Road` features served by default.
pub const ROAD_COUNT: usize = 5;

/// Number of `Building` features served by default.
pub const BUILDING_COUNT: usize = 3;

/// The `tns:Road` type.
#[must_use]
pub fn road() -> TypeName { TypeName::new(NS, "Road") }

/// The `tns:Building` type.
#[must_use]
pub fn building() -> TypeName { TypeName::new(NS, "Building") }

/// One stored feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFeature {
    /// `gml:id`.
    pub id: String,
    /// Local name of the feature type in [`NS`].
    pub type_name: String,
    /// Value of the `name` property.
    pub name: String,
}

impl SimFeature {
    /// Feature `index` of type `type_name`, with id `{type}.{index}` in
    /// lowercase.
    #[must_use]
    pub fn numbered(type_name: &str, index: usize) -> Self {
        Self {
            id: format!("{}.{index}", type_name.to_ascii_lowercase()),
            type_name: type_name.to_owned(),
            name: format!("{type_name} {index}"),
        }
    }

    /// The feature as a GML element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(NS, self.type_name.as_str())
            .with_ns_attr(wfs_verify::protocol::GML_NS, "id", self.id.as_str())
            .with_child(XmlElement::new(NS, "name").with_text(self.name.as_str()))
    }
}

/// Default data set: [`ROAD_COUNT`] roads and [`BUILDING_COUNT`] buildings.
#[fixture]
pub fn features() -> Vec<SimFeature> {
    (1..=ROAD_COUNT)
        .map(|i| SimFeature::numbered("Road", i))
        .chain((1..=BUILDING_COUNT).map(|i| SimFeature::numbered("Building", i)))
        .collect()
}

/// Which parts of the service the capabilities document advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertised {
    /// `ImplementsLockingWFS` with `LockFeature` and `GetFeatureWithLock`.
    pub locking: bool,
    /// `ImplementsResultPaging`.
    pub paging: bool,
    /// `ManageStoredQueries` with the create, drop and list operations.
    pub stored_queries: bool,
    /// `SOAPEncoding`.
    pub soap: bool,
}

impl Default for Advertised {
    fn default() -> Self {
        Self {
            locking: true,
            paging: true,
            stored_queries: true,
            soap: false,
        }
    }
}

fn operation(name: &str, get: bool) -> String {
    let get_link = if get {
        format!(r#"<ows:Get xlink:href="{ENDPOINT}?"/>"#)
    } else {
        String::new()
    };
    format!(
        r#"<ows:Operation name="{name}"><ows:DCP><ows:HTTP>
  {get_link}<ows:Post xlink:href="{ENDPOINT}"/>
</ows:HTTP></ows:DCP></ows:Operation>"#
    )
}

fn constraint(name: &str, value: impl std::fmt::Display) -> String {
    format!(
        r#"<ows:Constraint name="{name}">
  <ows:NoValues/><ows:DefaultValue>{value}</ows:DefaultValue>
</ows:Constraint>"#
    )
}

fn flag(on: bool) -> &'static str { if on { "TRUE" } else { "FALSE" } }

/// Capabilities document for the simulated service.
#[must_use]
pub fn capabilities_document(advertised: Advertised) -> String {
    let mut operations = vec![
        operation("GetCapabilities", true),
        operation("GetFeature", true),
        operation("Transaction", false),
    ];
    if advertised.locking {
        operations.push(operation("LockFeature", true));
        operations.push(operation("GetFeatureWithLock", true));
    }
    if advertised.stored_queries {
        operations.push(operation("ListStoredQueries", true));
        operations.push(operation("CreateStoredQuery", false));
        operations.push(operation("DropStoredQuery", true));
    }
    let constraints = [
        constraint("KVPEncoding", "TRUE"),
        constraint("XMLEncoding", "TRUE"),
        constraint("SOAPEncoding", flag(advertised.soap)),
        constraint("ImplementsBasicWFS", "TRUE"),
        constraint("ImplementsTransactionalWFS", "TRUE"),
        constraint("ImplementsLockingWFS", flag(advertised.locking)),
        constraint("ImplementsResultPaging", flag(advertised.paging)),
        constraint("ManageStoredQueries", flag(advertised.stored_queries)),
        constraint("ResponseCacheTimeout", 300),
    ];
    format!(
        r#"<wfs:WFS_Capabilities version="2.0.2"
    xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:ows="http://www.opengis.net/ows/1.1"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    xmlns:tns="{NS}">
  <ows:OperationsMetadata>{}{}</ows:OperationsMetadata>
  <wfs:FeatureTypeList>
    <wfs:FeatureType>
      <wfs:Name>tns:Road</wfs:Name>
      <wfs:DefaultCRS>urn:ogc:def:crs:EPSG::4326</wfs:DefaultCRS>
    </wfs:FeatureType>
    <wfs:FeatureType>
      <wfs:Name>tns:Building</wfs:Name>
      <wfs:DefaultCRS>urn:ogc:def:crs:EPSG::4326</wfs:DefaultCRS>
    </wfs:FeatureType>
  </wfs:FeatureTypeList>
</wfs:WFS_Capabilities>"#,
        operations.concat(),
        constraints.concat()
    )
}

/// Capabilities advertising every class the simulated service implements.
#[fixture]
pub fn capabilities() -> String { capabilities_document(Advertised::default()) }

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;
    use wfs_verify::{
        capabilities::CapabilitySet,
        protocol::{ConformanceClass, Operation},
    };

    use super::*;

    #[rstest]
    fn default_capabilities_parse(capabilities: String) {
        let caps = CapabilitySet::parse(&capabilities).expect("capabilities");
        assert!(caps.implements(ConformanceClass::LockingWfs));
        assert!(caps.supports(Operation::GetFeatureWithLock));
        assert!(caps.supports(Operation::ListStoredQueries));
        assert_eq!(caps.feature_types().len(), 2);
    }

    #[rstest]
    fn classes_can_be_withheld() {
        let document = capabilities_document(Advertised {
            locking: false,
            ..Advertised::default()
        });
        let caps = CapabilitySet::parse(&document).expect("capabilities");
        assert!(!caps.implements(ConformanceClass::LockingWfs));
        assert!(!caps.supports(Operation::LockFeature));
    }

    #[rstest]
    fn feature_ids_follow_type_names(features: Vec<SimFeature>) {
        assert_eq!(features.len(), ROAD_COUNT + BUILDING_COUNT);
        assert_eq!(features.first().map(|f| f.id.as_str()), Some("road.1"));
    }
}
