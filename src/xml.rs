//! Namespace-aware element tree used for request payloads and responses.
//!
//! Parsing is delegated to `quick-xml`; this module only keeps enough
//! structure (names, attributes, text, in-scope prefixes) for the
//! verification components to navigate documents and to serialise the
//! requests they build.

use std::{collections::BTreeMap, sync::Arc};

use quick_xml::{
    escape::escape,
    events::{BytesStart, Event},
    name::{Namespace, PrefixDeclaration, ResolveResult},
    reader::NsReader,
};
use thiserror::Error;

use crate::protocol::{FES_NS, GML_NS, OWS_NS, SOAP11_NS, SOAP12_NS, WFS_NS, XLINK_NS, XSD_NS};

/// Errors raised while parsing an XML entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    /// The underlying reader rejected the input.
    #[error("malformed XML: {0}")]
    Malformed(String),
    /// The input contained no root element.
    #[error("no root element")]
    Empty,
    /// An end tag had no matching start tag.
    #[error("unbalanced end tag")]
    Unbalanced,
}

/// A namespace-qualified attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Namespace URI, `None` for unqualified attributes.
    pub namespace: Option<String>,
    /// Local name.
    pub local_name: String,
    /// Unescaped value.
    pub value: String,
}

/// An element with its attributes, text content and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Namespace URI, `None` when the element is unqualified.
    pub namespace: Option<String>,
    /// Local name.
    pub local_name: String,
    /// Attributes in document order, namespace declarations excluded.
    pub attributes: Vec<XmlAttribute>,
    /// Child elements in document order.
    pub children: Vec<Self>,
    /// Concatenated character data.
    pub text: String,
    scope: Arc<BTreeMap<String, String>>,
}

impl XmlElement {
    /// Create an element in `namespace`.
    #[must_use]
    pub fn new(namespace: &str, local_name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.to_owned()),
            local_name: local_name.into(),
            ..Self::default()
        }
    }

    /// Add an unqualified attribute.
    #[must_use]
    pub fn with_attr(mut self, local_name: &str, value: impl Into<String>) -> Self {
        self.set_attr(None, local_name, value.into());
        self
    }

    /// Add a namespace-qualified attribute.
    #[must_use]
    pub fn with_ns_attr(
        mut self,
        namespace: &str,
        local_name: &str,
        value: impl Into<String>,
    ) -> Self {
        self.set_attr(Some(namespace), local_name, value.into());
        self
    }

    /// Append a child element.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Append several child elements.
    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = Self>) -> Self {
        self.children.extend(children);
        self
    }

    /// Set the text content.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    fn set_attr(&mut self, namespace: Option<&str>, local_name: &str, value: String) {
        let owned = namespace.map(str::to_owned);
        if let Some(existing) = self
            .attributes
            .iter_mut()
            .find(|a| a.namespace == owned && a.local_name == local_name)
        {
            existing.value = value;
        } else {
            self.attributes.push(XmlAttribute {
                namespace: owned,
                local_name: local_name.to_owned(),
                value,
            });
        }
    }

    /// Return `true` when the element has the given expanded name.
    #[must_use]
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Clark-notation name used in diagnostics, e.g. `{ns}local`.
    #[must_use]
    pub fn expanded_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{ns}}}{}", self.local_name),
            None => self.local_name.clone(),
        }
    }

    /// Value of an unqualified attribute.
    #[must_use]
    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Value of a namespace-qualified attribute.
    #[must_use]
    pub fn attr_ns(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Trimmed text content.
    #[must_use]
    pub fn text(&self) -> &str { self.text.trim() }

    /// First child element, if any.
    #[must_use]
    pub fn first_child(&self) -> Option<&Self> { self.children.first() }

    /// First child with the given expanded name.
    #[must_use]
    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&Self> {
        self.children.iter().find(|c| c.is(namespace, local_name))
    }

    /// Children with the given expanded name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a Self> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, local_name))
    }

    /// All descendants in document order, excluding `self`.
    #[must_use]
    pub fn descendants(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack: Vec<&Self> = self.children.iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(next.children.iter().rev());
        }
        out
    }

    /// `self` or the first descendant with the given expanded name.
    #[must_use]
    pub fn find(&self, namespace: &str, local_name: &str) -> Option<&Self> {
        if self.is(namespace, local_name) {
            return Some(self);
        }
        self.descendants()
            .into_iter()
            .find(|e| e.is(namespace, local_name))
    }

    /// Every descendant with the given expanded name.
    #[must_use]
    pub fn find_all(&self, namespace: &str, local_name: &str) -> Vec<&Self> {
        self.descendants()
            .into_iter()
            .filter(|e| e.is(namespace, local_name))
            .collect()
    }

    /// Resolve a `prefix:local` value against the prefixes in scope where the
    /// element was parsed.
    #[must_use]
    pub fn resolve_qname(&self, qname: &str) -> Option<(String, String)> {
        let (prefix, local) = qname.trim().split_once(':').unwrap_or(("", qname.trim()));
        self.scope
            .get(prefix)
            .map(|ns| (ns.clone(), local.to_owned()))
    }

    /// Serialise with generated prefixes.
    #[must_use]
    pub fn to_xml(&self) -> String { self.to_xml_with(&BTreeMap::new()) }

    /// Serialise, preferring the supplied `namespace -> prefix` bindings.
    ///
    /// All namespaces used in the tree are declared on the root element.
    #[must_use]
    pub fn to_xml_with(&self, preferred: &BTreeMap<String, String>) -> String {
        let prefixes = assign_prefixes(self, preferred);
        let mut out = String::new();
        write_element(self, &prefixes, true, &mut out);
        out
    }
}

fn well_known_prefix(namespace: &str) -> Option<&'static str> {
    match namespace {
        WFS_NS => Some("wfs"),
        FES_NS => Some("fes"),
        OWS_NS => Some("ows"),
        GML_NS => Some("gml"),
        XLINK_NS => Some("xlink"),
        XSD_NS => Some("xsd"),
        SOAP11_NS | SOAP12_NS => Some("soap"),
        _ => None,
    }
}

fn assign_prefixes(
    root: &XmlElement,
    preferred: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut used: Vec<&str> = Vec::new();
    for element in std::iter::once(root).chain(root.descendants()) {
        let attr_namespaces = element.attributes.iter().filter_map(|a| a.namespace.as_ref());
        for ns in element.namespace.iter().chain(attr_namespaces) {
            if !used.contains(&ns.as_str()) {
                used.push(ns.as_str());
            }
        }
    }
    let mut extra = preferred
        .keys()
        .filter(|ns| !used.contains(&ns.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    used.append(&mut extra);

    let mut bindings: Vec<(String, String)> = Vec::new();
    let mut generated = 0_u32;
    for ns in used {
        let taken = |p: &str| bindings.iter().any(|(_, bound)| bound == p);
        let prefix = match preferred.get(ns) {
            Some(p) if !taken(p) => p.clone(),
            _ => match well_known_prefix(ns) {
                Some(p) if !taken(p) => p.to_owned(),
                _ => loop {
                    generated += 1;
                    let candidate = format!("ns{generated}");
                    if !taken(&candidate) {
                        break candidate;
                    }
                },
            },
        };
        bindings.push((ns.to_owned(), prefix));
    }
    bindings
}

fn prefix_for<'a>(prefixes: &'a [(String, String)], namespace: Option<&String>) -> Option<&'a str> {
    let ns = namespace?;
    prefixes
        .iter()
        .find(|(bound, _)| bound == ns)
        .map(|(_, prefix)| prefix.as_str())
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) => format!("{p}:{local}"),
        None => local.to_owned(),
    }
}

fn write_element(
    element: &XmlElement,
    prefixes: &[(String, String)],
    root: bool,
    out: &mut String,
) {
    let name = qualified(prefix_for(prefixes, element.namespace.as_ref()), &element.local_name);
    out.push('<');
    out.push_str(&name);
    if root {
        for (ns, prefix) in prefixes {
            out.push_str(&format!(" xmlns:{prefix}=\"{}\"", escape(ns.as_str())));
        }
    }
    for attr in &element.attributes {
        let attr_name = qualified(prefix_for(prefixes, attr.namespace.as_ref()), &attr.local_name);
        out.push_str(&format!(" {attr_name}=\"{}\"", escape(attr.value.as_str())));
    }
    if element.children.is_empty() && element.text.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    out.push_str(&escape(element.text.as_str()));
    for child in &element.children {
        write_element(child, prefixes, false, out);
    }
    out.push_str(&format!("</{name}>"));
}

fn owned_namespace(resolved: &ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
        _ => None,
    }
}

fn malformed(err: impl std::fmt::Display) -> XmlError { XmlError::Malformed(err.to_string()) }

fn open_element(
    reader: &NsReader<&[u8]>,
    namespace: Option<String>,
    start: &BytesStart<'_>,
    parent_scope: &Arc<BTreeMap<String, String>>,
) -> Result<XmlElement, XmlError> {
    let mut declarations = Vec::new();
    let mut attributes = Vec::new();
    for item in start.attributes() {
        let attr = item.map_err(malformed)?;
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        if let Some(binding) = attr.key.as_namespace_binding() {
            let prefix = match binding {
                PrefixDeclaration::Default => String::new(),
                PrefixDeclaration::Named(p) => String::from_utf8_lossy(p).into_owned(),
            };
            declarations.push((prefix, value));
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        attributes.push(XmlAttribute {
            namespace: owned_namespace(&resolved),
            local_name: String::from_utf8_lossy(local.as_ref()).into_owned(),
            value,
        });
    }
    let scope = if declarations.is_empty() {
        Arc::clone(parent_scope)
    } else {
        let mut merged = (**parent_scope).clone();
        merged.extend(declarations);
        Arc::new(merged)
    };
    Ok(XmlElement {
        namespace,
        local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        children: Vec::new(),
        text: String::new(),
        scope,
    })
}

fn close_into(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Parse a complete XML entity into its root element.
///
/// # Errors
///
/// Returns [`XmlError`] when the input is not well-formed or has no root.
pub fn parse(input: &str) -> Result<XmlElement, XmlError> {
    let mut reader = NsReader::from_str(input);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;
    let base_scope = Arc::new(BTreeMap::from([(
        "xml".to_owned(),
        "http://www.w3.org/XML/1998/namespace".to_owned(),
    )]));
    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(malformed)?;
        let namespace = owned_namespace(&resolved);
        let parent_scope = stack.last().map_or(&base_scope, |p| &p.scope).clone();
        match event {
            Event::Start(start) => {
                let element = open_element(&reader, namespace, &start, &parent_scope)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&reader, namespace, &start, &parent_scope)?;
                close_into(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::Unbalanced)?;
                close_into(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(XmlError::Malformed("unclosed element at end of input".to_owned()));
    }
    root.ok_or(XmlError::Empty)
}

/// Heuristic used before parsing a response body.
#[must_use]
pub fn looks_like_xml(body: &str) -> bool { body.trim_start().starts_with('<') }
