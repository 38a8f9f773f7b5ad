//! SOAP envelope wrapping and unwrapping.

use std::str::FromStr;

use crate::{
    protocol::{OWS_NS, SOAP11_NS, SOAP12_NS},
    xml::XmlElement,
};

/// SOAP version used by the SOAP binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SoapVersion {
    /// SOAP 1.1.
    V11,
    /// SOAP 1.2.
    #[default]
    V12,
}

impl SoapVersion {
    /// Envelope namespace.
    #[must_use]
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::V11 => SOAP11_NS,
            Self::V12 => SOAP12_NS,
        }
    }

    /// Request content type.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::V11 => "text/xml; charset=utf-8",
            Self::V12 => "application/soap+xml; charset=utf-8",
        }
    }
}

impl FromStr for SoapVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.1" => Ok(Self::V11),
            "1.2" => Ok(Self::V12),
            other => Err(format!("unsupported SOAP version '{other}'")),
        }
    }
}

/// Wrap a request element in `Envelope/Body`.
#[must_use]
pub fn wrap(request: XmlElement, version: SoapVersion) -> XmlElement {
    let ns = version.namespace();
    XmlElement::new(ns, "Envelope").with_child(XmlElement::new(ns, "Body").with_child(request))
}

fn is_envelope(element: &XmlElement) -> bool {
    element.is(SOAP11_NS, "Envelope") || element.is(SOAP12_NS, "Envelope")
}

/// Reduce a SOAP response to the document a non-enveloped binding would
/// return: the body's payload, or the exception report carried by a fault.
///
/// Documents that are not envelopes are returned unchanged.
#[must_use]
pub fn unwrap(document: XmlElement) -> XmlElement {
    if !is_envelope(&document) {
        return document;
    }
    let ns = document.namespace.clone().unwrap_or_default();
    let Some(payload) = document
        .child(&ns, "Body")
        .and_then(XmlElement::first_child)
    else {
        return document;
    };
    if payload.is(&ns, "Fault") {
        return payload
            .find(OWS_NS, "ExceptionReport")
            .unwrap_or(payload)
            .clone();
    }
    payload.clone()
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;

    use super::*;
    use crate::{protocol::WFS_NS, xml};

    #[rstest]
    #[case(SoapVersion::V11)]
    #[case(SoapVersion::V12)]
    fn unwrap_returns_body_payload(#[case] version: SoapVersion) {
        let env = wrap(XmlElement::new(WFS_NS, "FeatureCollection"), version);
        let reparsed = xml::parse(&env.to_xml()).expect("envelope");
        assert!(unwrap(reparsed).is(WFS_NS, "FeatureCollection"));
    }

    #[rstest]
    fn fault_yields_exception_report() {
        let doc = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
          <soap:Body><soap:Fault>
            <soap:Code><soap:Value>soap:Sender</soap:Value></soap:Code>
            <soap:Detail>
              <ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1">
                <ows:Exception exceptionCode="LockHasExpired"/>
              </ows:ExceptionReport>
            </soap:Detail>
          </soap:Fault></soap:Body>
        </soap:Envelope>"#;
        let unwrapped = unwrap(xml::parse(doc).expect("fault"));
        assert!(unwrapped.is(OWS_NS, "ExceptionReport"));
    }

    #[rstest]
    fn plain_documents_pass_through() {
        let doc = XmlElement::new(WFS_NS, "LockFeatureResponse");
        assert_eq!(unwrap(doc.clone()), doc);
    }
}
