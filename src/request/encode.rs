//! KVP and XML encodings of a [`Payload`].

use super::{Payload, QueryExpression};
use crate::{
    error::{VerifyError, VerifyResult},
    protocol::{Operation, SERVICE, WFS_NS},
    xml::XmlElement,
};

fn pair(key: &str, value: impl Into<String>) -> (String, String) { (key.to_owned(), value.into()) }

/// Render per-query values; multiple queries use the parenthesised list form.
fn per_query(values: &[String]) -> String {
    match values {
        [single] => single.clone(),
        many => many.iter().map(|v| format!("({v})")).collect(),
    }
}

fn query_pairs(payload: &Payload, out: &mut Vec<(String, String)>) {
    let queries = &payload.params.queries;
    let stored: Vec<_> = queries
        .iter()
        .filter_map(|q| match q {
            QueryExpression::Stored(call) => Some(call),
            QueryExpression::Adhoc(_) => None,
        })
        .collect();
    if let Some(call) = stored.first() {
        out.push(pair("STOREDQUERY_ID", call.id.as_str()));
        out.extend(call.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        return;
    }
    if queries.is_empty() {
        return;
    }
    let all_ids: Option<Vec<&[String]>> = queries
        .iter()
        .map(|q| q.filter().and_then(|f| f.as_resource_ids()))
        .collect();
    if let Some(ids) = all_ids {
        let joined = ids.iter().flat_map(|group| group.iter()).cloned().collect::<Vec<_>>();
        out.push(pair("RESOURCEID", joined.join(",")));
    } else {
        let names = queries
            .iter()
            .map(|q| q.type_names_kvp(&payload.prefixes))
            .collect::<Vec<_>>();
        out.push(pair("TYPENAMES", per_query(&names)));
        let filters = queries
            .iter()
            .map(|q| {
                q.filter()
                    .map(|f| f.to_element().to_xml_with(&payload.prefixes))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        if filters.iter().any(|f| !f.is_empty()) {
            out.push(pair("FILTER", per_query(&filters)));
        }
        let sorts = queries.iter().filter_map(QueryExpression::sort_kvp).collect::<Vec<_>>();
        if !sorts.is_empty() {
            out.push(pair("SORTBY", per_query(&sorts)));
        }
    }
    out.push(namespaces(payload));
}

fn namespaces(payload: &Payload) -> (String, String) {
    let bindings = payload
        .prefixes
        .iter()
        .map(|(ns, prefix)| format!("xmlns({prefix},{ns})"))
        .collect::<Vec<_>>();
    pair("NAMESPACES", bindings.join(","))
}

/// `(KVP key, XML attribute, value)` triples shared by the query operations.
fn common_attrs(payload: &Payload) -> Vec<(&'static str, &'static str, String)> {
    let p = &payload.params;
    let mut out = Vec::new();
    if let Some(count) = p.count {
        out.push(("COUNT", "count", count.to_string()));
    }
    if let Some(start) = p.start_index {
        out.push(("STARTINDEX", "startIndex", start.to_string()));
    }
    if let Some(result_type) = p.result_type {
        out.push(("RESULTTYPE", "resultType", result_type.as_str().to_owned()));
    }
    if let Some(expiry) = p.expiry {
        out.push(("EXPIRY", "expiry", expiry.as_secs().to_string()));
    }
    if let Some(action) = p.lock_action {
        out.push(("LOCKACTION", "lockAction", action.as_str().to_owned()));
    }
    if let Some(lock_id) = &p.lock_id {
        out.push(("LOCKID", "lockId", lock_id.clone()));
    }
    out
}

fn push_common_pairs(payload: &Payload, out: &mut Vec<(String, String)>) {
    out.extend(common_attrs(payload).into_iter().map(|(key, _, value)| pair(key, value)));
}

pub(super) fn kvp(payload: &Payload) -> VerifyResult<Vec<(String, String)>> {
    let operation = payload.operation;
    let mut out = vec![pair("SERVICE", SERVICE)];
    if operation != Operation::GetCapabilities {
        out.push(pair("VERSION", payload.version.as_str()));
    }
    out.push(pair("REQUEST", operation.name()));
    let p = &payload.params;
    match operation {
        Operation::Transaction | Operation::CreateStoredQuery => {
            return Err(VerifyError::malformed(
                operation.name(),
                "operation has no key-value pair encoding",
            ));
        }
        Operation::GetCapabilities | Operation::ListStoredQueries => {}
        Operation::DescribeFeatureType => {
            if !p.type_names.is_empty() {
                let names = p
                    .type_names
                    .iter()
                    .map(|t| {
                        let prefix = payload.prefixes.get(t.namespace()).map_or("", String::as_str);
                        t.prefixed(prefix)
                    })
                    .collect::<Vec<_>>();
                out.push(pair("TYPENAMES", names.join(",")));
                out.push(namespaces(payload));
            }
        }
        Operation::DescribeStoredQueries | Operation::DropStoredQuery => {
            if !p.stored_query_ids.is_empty() {
                out.push(pair("STOREDQUERY_ID", p.stored_query_ids.join(",")));
            }
        }
        Operation::GetPropertyValue => {
            query_pairs(payload, &mut out);
            out.extend(p.value_reference.as_deref().map(|v| pair("VALUEREFERENCE", v)));
            push_common_pairs(payload, &mut out);
        }
        Operation::GetFeature | Operation::GetFeatureWithLock | Operation::LockFeature => {
            query_pairs(payload, &mut out);
            push_common_pairs(payload, &mut out);
        }
    }
    Ok(out)
}

fn root(payload: &Payload) -> XmlElement {
    let el = XmlElement::new(WFS_NS, payload.operation.name()).with_attr("service", SERVICE);
    if payload.operation == Operation::GetCapabilities {
        el
    } else {
        el.with_attr("version", payload.version.as_str())
    }
}

fn with_common_attrs(el: XmlElement, payload: &Payload) -> XmlElement {
    common_attrs(payload)
        .into_iter()
        .fold(el, |acc, (_, attr, value)| acc.with_attr(attr, value))
}

pub(super) fn element(payload: &Payload) -> XmlElement {
    let p = &payload.params;
    let prefixes = &payload.prefixes;
    let queries = p.queries.iter().map(|q| q.to_element(prefixes));
    match payload.operation {
        Operation::GetCapabilities | Operation::ListStoredQueries => root(payload),
        Operation::DescribeFeatureType => root(payload).with_children(p.type_names.iter().map(|t| {
            let prefix = prefixes.get(t.namespace()).map_or("", String::as_str);
            XmlElement::new(WFS_NS, "TypeName").with_text(t.prefixed(prefix))
        })),
        Operation::GetFeature | Operation::GetFeatureWithLock | Operation::LockFeature => {
            with_common_attrs(root(payload), payload).with_children(queries)
        }
        Operation::GetPropertyValue => {
            let mut el = with_common_attrs(root(payload), payload).with_children(queries);
            if let Some(path) = &p.value_reference {
                el = el.with_attr("valueReference", path.as_str());
            }
            el
        }
        Operation::Transaction => {
            let mut el = root(payload);
            if let Some(lock_id) = &p.lock_id {
                el = el.with_attr("lockId", lock_id.as_str());
            }
            if let Some(release) = p.release_action {
                el = el.with_attr("releaseAction", release.as_str());
            }
            el.with_children(p.actions.iter().map(|a| a.to_element(prefixes)))
        }
        Operation::CreateStoredQuery => {
            root(payload).with_children(p.definition.iter().map(|d| d.to_element(prefixes)))
        }
        Operation::DropStoredQuery => {
            let el = root(payload);
            match p.stored_query_ids.first() {
                Some(id) => el.with_attr("id", id.as_str()),
                None => el,
            }
        }
        Operation::DescribeStoredQueries => root(payload).with_children(
            p.stored_query_ids
                .iter()
                .map(|id| XmlElement::new(WFS_NS, "StoredQueryId").with_text(id.as_str())),
        ),
    }
}
