//! Decoding of incoming KVP, XML and SOAP requests.

use std::{collections::BTreeMap, time::Duration};

use wfs_verify::{
    dispatch::{HttpMethod, HttpRequest, envelope},
    protocol::{FES_NS, SOAP11_NS, SOAP12_NS, WFS_NS},
    xml::{self, XmlElement},
};

/// How a request arrived; replies use the same encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Encoding {
    Kvp,
    Xml,
    Soap(String),
}

/// Features a query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Every feature of a type, by local name.
    Type(String),
    /// Features by id.
    Ids(Vec<String>),
    /// A stored query invocation.
    Stored {
        id: String,
        parameters: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FeatureRequest {
    pub queries: Vec<Selection>,
    pub count: Option<usize>,
    pub start_index: usize,
    pub hits: bool,
    pub lock_some: bool,
    pub expiry: Option<Duration>,
    pub lock_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TransactionRequest {
    pub lock_id: Option<String>,
    pub release_all: bool,
    pub deletes: Vec<String>,
    pub inserts: Vec<XmlElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Definition {
    pub id: Option<String>,
    pub language: String,
    pub query: Option<Selection>,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    GetCapabilities,
    GetFeature(FeatureRequest),
    GetFeatureWithLock(FeatureRequest),
    LockFeature(FeatureRequest),
    Transaction(TransactionRequest),
    CreateStoredQuery(Definition),
    DropStoredQuery(Option<String>),
    ListStoredQueries,
    Continue(String),
    Unknown(String),
}

impl Call {
    /// Operation name used in the request log.
    pub(crate) fn name(&self) -> &str {
        match self {
            Self::GetCapabilities => "GetCapabilities",
            Self::GetFeature(_) | Self::Continue(_) => "GetFeature",
            Self::GetFeatureWithLock(_) => "GetFeatureWithLock",
            Self::LockFeature(_) => "LockFeature",
            Self::Transaction(_) => "Transaction",
            Self::CreateStoredQuery(_) => "CreateStoredQuery",
            Self::DropStoredQuery(_) => "DropStoredQuery",
            Self::ListStoredQueries => "ListStoredQueries",
            Self::Unknown(name) => name,
        }
    }
}

/// Reasons a request cannot be decoded at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Undecodable {
    pub encoding: Encoding,
    pub reason: String,
}

/// Decode `request`.
pub(crate) fn decode(request: &HttpRequest) -> Result<(Encoding, Call), Undecodable> {
    match (request.method, request.body.as_deref()) {
        (HttpMethod::Get, _) | (HttpMethod::Post, None) => Ok((Encoding::Kvp, decode_kvp(request))),
        (HttpMethod::Post, Some(body)) => decode_xml(body),
    }
}

fn local_part(qname: &str) -> String {
    qname.rsplit(':').next().unwrap_or(qname).to_owned()
}

fn list(value: &str) -> Vec<String> {
    value
        .split([',', '(', ')', ' '])
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect()
}

fn seconds(value: Option<&str>) -> Option<Duration> {
    value.and_then(|v| v.trim().parse::<u64>().ok()).map(Duration::from_secs)
}

fn number(value: Option<&str>) -> Option<usize> { value.and_then(|v| v.trim().parse().ok()) }

const STANDARD_KEYS: [&str; 16] = [
    "SERVICE",
    "VERSION",
    "REQUEST",
    "STOREDQUERY_ID",
    "TYPENAMES",
    "TYPENAME",
    "RESOURCEID",
    "FILTER",
    "SORTBY",
    "NAMESPACES",
    "COUNT",
    "STARTINDEX",
    "RESULTTYPE",
    "EXPIRY",
    "LOCKACTION",
    "LOCKID",
];

fn decode_kvp(request: &HttpRequest) -> Call {
    let pairs: BTreeMap<String, String> = request
        .url
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_uppercase(), v.into_owned()))
        .collect();
    let get = |key: &str| pairs.get(key).map(String::as_str);
    if let Some(token) = get("CURSOR") {
        return Call::Continue(token.to_owned());
    }
    let queries = if let Some(id) = get("STOREDQUERY_ID") {
        vec![Selection::Stored {
            id: id.to_owned(),
            parameters: pairs
                .iter()
                .filter(|(k, _)| !STANDARD_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }]
    } else if let Some(ids) = get("RESOURCEID") {
        vec![Selection::Ids(list(ids))]
    } else {
        get("TYPENAMES")
            .or_else(|| get("TYPENAME"))
            .map(|names| list(names).iter().map(|n| Selection::Type(local_part(n))).collect())
            .unwrap_or_default()
    };
    let features = FeatureRequest {
        queries,
        count: number(get("COUNT")),
        start_index: number(get("STARTINDEX")).unwrap_or_default(),
        hits: get("RESULTTYPE").is_some_and(|r| r.eq_ignore_ascii_case("hits")),
        lock_some: get("LOCKACTION").is_some_and(|a| a.eq_ignore_ascii_case("SOME")),
        expiry: seconds(get("EXPIRY")),
        lock_id: get("LOCKID").map(str::to_owned),
    };
    match get("REQUEST").unwrap_or_default() {
        "GetCapabilities" => Call::GetCapabilities,
        "GetFeature" => Call::GetFeature(features),
        "GetFeatureWithLock" => Call::GetFeatureWithLock(features),
        "LockFeature" => Call::LockFeature(features),
        "ListStoredQueries" => Call::ListStoredQueries,
        "DropStoredQuery" => Call::DropStoredQuery(get("STOREDQUERY_ID").map(str::to_owned)),
        other => Call::Unknown(other.to_owned()),
    }
}

fn decode_xml(body: &str) -> Result<(Encoding, Call), Undecodable> {
    let document = xml::parse(body).map_err(|err| Undecodable {
        encoding: Encoding::Xml,
        reason: err.to_string(),
    })?;
    let encoding = match document.namespace.as_deref() {
        Some(ns @ (SOAP11_NS | SOAP12_NS)) if document.local_name == "Envelope" => {
            Encoding::Soap(ns.to_owned())
        }
        _ => Encoding::Xml,
    };
    let root = envelope::unwrap(document);
    if root.namespace.as_deref() != Some(WFS_NS) {
        return Err(Undecodable {
            encoding,
            reason: format!("unexpected request element {}", root.expanded_name()),
        });
    }
    let call = match root.local_name.as_str() {
        "GetCapabilities" => Call::GetCapabilities,
        "GetFeature" => Call::GetFeature(feature_request(&root)),
        "GetFeatureWithLock" => Call::GetFeatureWithLock(feature_request(&root)),
        "LockFeature" => Call::LockFeature(feature_request(&root)),
        "Transaction" => Call::Transaction(transaction(&root)),
        "CreateStoredQuery" => Call::CreateStoredQuery(definition(&root)),
        "DropStoredQuery" => Call::DropStoredQuery(root.attr("id").map(str::to_owned)),
        "ListStoredQueries" => Call::ListStoredQueries,
        other => Call::Unknown(other.to_owned()),
    };
    Ok((encoding, call))
}

fn resource_ids(parent: &XmlElement) -> Vec<String> {
    parent
        .find_all(FES_NS, "ResourceId")
        .into_iter()
        .filter_map(|r| r.attr("rid"))
        .map(str::to_owned)
        .collect()
}

fn selection(query: &XmlElement) -> Option<Selection> {
    if query.is(WFS_NS, "StoredQuery") {
        return Some(Selection::Stored {
            id: query.attr("id").unwrap_or_default().to_owned(),
            parameters: query
                .children_named(WFS_NS, "Parameter")
                .map(|p| (p.attr("name").unwrap_or_default().to_owned(), p.text().to_owned()))
                .collect(),
        });
    }
    if !query.is(WFS_NS, "Query") {
        return None;
    }
    let ids = resource_ids(query);
    if ids.is_empty() {
        query
            .attr("typeNames")
            .map(|names| {
                let first = list(names).first().map(|n| local_part(n));
                Selection::Type(first.unwrap_or_default())
            })
    } else {
        Some(Selection::Ids(ids))
    }
}

fn feature_request(root: &XmlElement) -> FeatureRequest {
    FeatureRequest {
        queries: root.children.iter().filter_map(selection).collect(),
        count: number(root.attr("count")),
        start_index: number(root.attr("startIndex")).unwrap_or_default(),
        hits: root.attr("resultType").is_some_and(|r| r.eq_ignore_ascii_case("hits")),
        lock_some: root.attr("lockAction").is_some_and(|a| a.eq_ignore_ascii_case("SOME")),
        expiry: seconds(root.attr("expiry")),
        lock_id: root.attr("lockId").map(str::to_owned),
    }
}

fn transaction(root: &XmlElement) -> TransactionRequest {
    TransactionRequest {
        lock_id: root.attr("lockId").map(str::to_owned),
        release_all: !root.attr("releaseAction").is_some_and(|a| a.eq_ignore_ascii_case("SOME")),
        deletes: root
            .children_named(WFS_NS, "Delete")
            .flat_map(resource_ids)
            .collect(),
        inserts: root
            .children_named(WFS_NS, "Insert")
            .flat_map(|insert| insert.children.iter().cloned())
            .collect(),
    }
}

fn definition(root: &XmlElement) -> Definition {
    let stored = root.child(WFS_NS, "StoredQueryDefinition");
    let text = stored.and_then(|d| d.child(WFS_NS, "QueryExpressionText"));
    Definition {
        id: stored.and_then(|d| d.attr("id")).map(str::to_owned),
        language: text
            .and_then(|t| t.attr("language"))
            .unwrap_or_default()
            .to_owned(),
        query: text.and_then(|t| t.children.iter().find_map(selection)),
    }
}
