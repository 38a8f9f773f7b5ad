//! Rendering of simulated responses and exception reports.

use std::collections::BTreeMap;

use url::Url;
use wfs_verify::{
    dispatch::HttpReply,
    protocol::{DEFAULT_VERSION, ExceptionCode, FES_NS, OWS_NS, QRY_GET_FEATURE_BY_ID, WFS_NS},
    xml::XmlElement,
};

use super::request::Encoding;
use crate::fixtures::{NS, SimFeature};

/// An exception the service reports instead of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub code: &'static str,
    pub status: u16,
    pub locator: Option<String>,
    pub text: String,
}

impl Fault {
    pub(crate) fn new(
        code: ExceptionCode,
        locator: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            code: code.as_str(),
            status: code.http_status(),
            locator: Some(locator.into()),
            text: text.into(),
        }
    }

    pub(crate) fn not_supported(operation: &str) -> Self {
        Self {
            code: "OperationNotSupported",
            status: 400,
            locator: Some(operation.to_owned()),
            text: format!("{operation} is not implemented"),
        }
    }

    fn to_element(&self) -> XmlElement {
        let mut exception =
            XmlElement::new(OWS_NS, "Exception").with_attr("exceptionCode", self.code);
        if let Some(locator) = &self.locator {
            exception = exception.with_attr("locator", locator.as_str());
        }
        XmlElement::new(OWS_NS, "ExceptionReport")
            .with_attr("version", "2.0.0")
            .with_child(exception.with_child(
                XmlElement::new(OWS_NS, "ExceptionText").with_text(self.text.as_str()),
            ))
    }
}

/// One page of a feature collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Collection {
    pub members: Vec<SimFeature>,
    pub matched: usize,
    pub hits: bool,
    pub next: Option<u64>,
    pub previous: Option<u64>,
    pub lock_id: Option<String>,
}

/// A successful answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Capabilities(String),
    Collection(Collection),
    Feature(SimFeature),
    Locked {
        lock_id: String,
        locked: Vec<String>,
        not_locked: Vec<String>,
    },
    Transaction {
        inserted: usize,
        deleted: usize,
    },
    Created,
    Dropped,
    StoredQueries(Vec<(String, String)>),
}

fn resource_ids(ids: &[String]) -> impl Iterator<Item = XmlElement> + '_ {
    ids.iter()
        .map(|id| XmlElement::new(FES_NS, "ResourceId").with_attr("rid", id.as_str()))
}

/// Continuation URL for cursor `token`, relative to the request URL.
fn continuation(base: &Url, token: u64) -> String {
    let mut url = base.clone();
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("service", "WFS")
        .append_pair("version", DEFAULT_VERSION)
        .append_pair("request", "GetFeature")
        .append_pair("cursor", &token.to_string());
    url.to_string()
}

fn collection(page: &Collection, base: &Url) -> XmlElement {
    let returned = if page.hits { 0 } else { page.members.len() };
    let mut root = XmlElement::new(WFS_NS, "FeatureCollection")
        .with_attr("timeStamp", "2026-01-01T00:00:00Z")
        .with_attr("numberMatched", page.matched.to_string())
        .with_attr("numberReturned", returned.to_string());
    if let Some(lock_id) = &page.lock_id {
        root = root.with_attr("lockId", lock_id.as_str());
    }
    if let Some(token) = page.next {
        root = root.with_attr("next", continuation(base, token));
    }
    if let Some(token) = page.previous {
        root = root.with_attr("previous", continuation(base, token));
    }
    if page.hits {
        return root;
    }
    root.with_children(
        page.members
            .iter()
            .map(|f| XmlElement::new(WFS_NS, "member").with_child(f.to_element())),
    )
}

fn render(reply: &Reply, base: &Url) -> XmlElement {
    match reply {
        Reply::Capabilities(_) => XmlElement::default(),
        Reply::Collection(page) => collection(page, base),
        Reply::Feature(feature) => feature.to_element(),
        Reply::Locked {
            lock_id,
            locked,
            not_locked,
        } => {
            let mut root = XmlElement::new(WFS_NS, "LockFeatureResponse")
                .with_attr("lockId", lock_id.as_str());
            if !locked.is_empty() {
                root = root.with_child(
                    XmlElement::new(WFS_NS, "FeaturesLocked").with_children(resource_ids(locked)),
                );
            }
            if !not_locked.is_empty() {
                root = root.with_child(
                    XmlElement::new(WFS_NS, "FeaturesNotLocked")
                        .with_children(resource_ids(not_locked)),
                );
            }
            root
        }
        Reply::Transaction { inserted, deleted } => XmlElement::new(WFS_NS, "TransactionResponse")
            .with_attr("version", DEFAULT_VERSION)
            .with_child(
                XmlElement::new(WFS_NS, "TransactionSummary")
                    .with_child(
                        XmlElement::new(WFS_NS, "totalInserted").with_text(inserted.to_string()),
                    )
                    .with_child(XmlElement::new(WFS_NS, "totalUpdated").with_text("0"))
                    .with_child(
                        XmlElement::new(WFS_NS, "totalDeleted").with_text(deleted.to_string()),
                    ),
            ),
        Reply::Created => {
            XmlElement::new(WFS_NS, "CreateStoredQueryResponse").with_attr("status", "OK")
        }
        Reply::Dropped => {
            XmlElement::new(WFS_NS, "DropStoredQueryResponse").with_attr("status", "OK")
        }
        Reply::StoredQueries(queries) => XmlElement::new(WFS_NS, "ListStoredQueriesResponse")
            .with_children(queries.iter().map(|(id, returns)| {
                XmlElement::new(WFS_NS, "StoredQuery")
                    .with_attr("id", id.as_str())
                    .with_child(XmlElement::new(WFS_NS, "Title").with_text(id.as_str()))
                    .with_child(
                        XmlElement::new(WFS_NS, "ReturnFeatureType").with_text(returns.as_str()),
                    )
            })),
    }
}

/// Stored queries every service offers, as `(id, return type)` pairs.
pub(crate) fn predefined_queries() -> Vec<(String, String)> {
    vec![(QRY_GET_FEATURE_BY_ID.to_owned(), "tns:Road tns:Building".to_owned())]
}

fn serialise(element: &XmlElement) -> String {
    let prefixes = BTreeMap::from([(NS.to_owned(), "tns".to_owned())]);
    element.to_xml_with(&prefixes)
}

fn soap_wrap(element: XmlElement, soap_ns: &str, fault: bool) -> XmlElement {
    let payload = if fault {
        XmlElement::new(soap_ns, "Fault")
            .with_child(XmlElement::new(soap_ns, "Detail").with_child(element))
    } else {
        element
    };
    XmlElement::new(soap_ns, "Envelope")
        .with_child(XmlElement::new(soap_ns, "Body").with_child(payload))
}

fn content_type(encoding: &Encoding) -> &'static str {
    match encoding {
        Encoding::Soap(_) => "application/soap+xml; charset=utf-8",
        Encoding::Kvp | Encoding::Xml => "application/xml; charset=utf-8",
    }
}

/// Encode an answer as an HTTP reply in the encoding the request used.
pub(crate) fn encode(result: Result<Reply, Fault>, encoding: &Encoding, base: &Url) -> HttpReply {
    let (status, element, is_fault) = match result {
        Ok(Reply::Capabilities(document)) => {
            return HttpReply {
                status: 200,
                headers: vec![("Content-Type".to_owned(), content_type(&Encoding::Xml).to_owned())],
                body: document,
            };
        }
        Ok(reply) => (200, render(&reply, base), false),
        Err(fault) => (fault.status, fault.to_element(), true),
    };
    let document = match encoding {
        Encoding::Soap(ns) => soap_wrap(element, ns, is_fault),
        Encoding::Kvp | Encoding::Xml => element,
    };
    HttpReply {
        status,
        headers: vec![("Content-Type".to_owned(), content_type(encoding).to_owned())],
        body: serialise(&document),
    }
}
