//! Shared fixtures for unit tests.

#![expect(clippy::expect_used, reason = "test fixtures")]

use std::sync::Arc;

use crate::{capabilities::CapabilitySet, protocol::TypeName};

/// Namespace of the fixture feature types.
pub const NS1: &str = "http://example.org/ns1";

/// Capabilities advertising two feature types and the locking, paging and
/// stored query classes over GET and POST.
pub const CAPABILITIES: &str = r#"<wfs:WFS_Capabilities version="2.0.2"
    xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:ows="http://www.opengis.net/ows/1.1"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    xmlns:tns="http://example.org/ns1">
  <ows:OperationsMetadata>
    <ows:Operation name="GetFeature"><ows:DCP><ows:HTTP>
      <ows:Get xlink:href="http://iut.test/wfs?"/><ows:Post xlink:href="http://iut.test/wfs"/>
    </ows:HTTP></ows:DCP></ows:Operation>
    <ows:Operation name="LockFeature"><ows:DCP><ows:HTTP>
      <ows:Get xlink:href="http://iut.test/wfs?"/><ows:Post xlink:href="http://iut.test/wfs"/>
    </ows:HTTP></ows:DCP></ows:Operation>
    <ows:Operation name="Transaction"><ows:DCP><ows:HTTP>
      <ows:Post xlink:href="http://iut.test/wfs"/>
    </ows:HTTP></ows:DCP></ows:Operation>
    <ows:Operation name="CreateStoredQuery"><ows:DCP><ows:HTTP>
      <ows:Post xlink:href="http://iut.test/wfs"/>
    </ows:HTTP></ows:DCP></ows:Operation>
    <ows:Operation name="DropStoredQuery"><ows:DCP><ows:HTTP>
      <ows:Get xlink:href="http://iut.test/wfs?"/><ows:Post xlink:href="http://iut.test/wfs"/>
    </ows:HTTP></ows:DCP></ows:Operation>
    <ows:Constraint name="KVPEncoding"><ows:DefaultValue>TRUE</ows:DefaultValue></ows:Constraint>
    <ows:Constraint name="XMLEncoding"><ows:DefaultValue>TRUE</ows:DefaultValue></ows:Constraint>
    <ows:Constraint name="ImplementsLockingWFS">
      <ows:DefaultValue>TRUE</ows:DefaultValue>
    </ows:Constraint>
    <ows:Constraint name="ImplementsResultPaging">
      <ows:DefaultValue>TRUE</ows:DefaultValue>
    </ows:Constraint>
    <ows:Constraint name="ManageStoredQueries">
      <ows:DefaultValue>TRUE</ows:DefaultValue>
    </ows:Constraint>
  </ows:OperationsMetadata>
  <wfs:FeatureTypeList>
    <wfs:FeatureType><wfs:Name>tns:Road</wfs:Name></wfs:FeatureType>
    <wfs:FeatureType><wfs:Name>tns:Building</wfs:Name></wfs:FeatureType>
  </wfs:FeatureTypeList>
</wfs:WFS_Capabilities>"#;

/// Parsed [`CAPABILITIES`].
pub fn capabilities() -> Arc<CapabilitySet> {
    Arc::new(CapabilitySet::parse(CAPABILITIES).expect("fixture capabilities"))
}

/// The `tns:Road` type.
pub fn road() -> TypeName { TypeName::new(NS1, "Road") }

/// The `tns:Building` type.
pub fn building() -> TypeName { TypeName::new(NS1, "Building") }
