//! Seams for the schema, path and topology oracles.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    capabilities::Envelope,
    protocol::{FES_NS, GML_NS, OWS_NS, WFS_NS, XLINK_NS},
    xml::XmlElement,
};

/// Failures reported by the schema and path oracles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// The document broke its schema.
    #[error("{}", .0.join("; "))]
    SchemaViolations(Vec<String>),
    /// A path step uses a prefix with no namespace binding.
    #[error("unbound prefix '{0}'")]
    UnboundPrefix(String),
    /// The path expression has no steps.
    #[error("empty path expression '{0}'")]
    EmptyExpression(String),
}

/// Structural validator for whole documents.
pub trait SchemaValidator: Send + Sync {
    /// Validate a document, returning every violation found.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::SchemaViolations`] when the document is
    /// invalid.
    fn validate(&self, document: &XmlElement) -> Result<(), OracleError>;
}

/// Path-expression evaluator over parsed documents.
pub trait XPathEvaluator: Send + Sync {
    /// Evaluate `expression` as a boolean over `document`.
    ///
    /// # Errors
    ///
    /// Returns an [`OracleError`] when the expression cannot be evaluated.
    fn evaluate(&self, document: &XmlElement, expression: &str) -> Result<bool, OracleError>;
}

/// Spatial relations checked by [`TopologyOracle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialRelation {
    /// Shares at least one point.
    Intersects,
    /// Lies entirely inside the reference.
    Within,
    /// Encloses the reference.
    Contains,
    /// Shares no point.
    Disjoint,
}

impl SpatialRelation {
    /// Filter operator name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intersects => "Intersects",
            Self::Within => "Within",
            Self::Contains => "Contains",
            Self::Disjoint => "Disjoint",
        }
    }
}

/// Decides spatial relations between geometries.
pub trait TopologyOracle: Send + Sync {
    /// Return `true` when `subject` stands in `relation` to `reference`.
    fn relates(&self, subject: &Envelope, reference: &Envelope, relation: SpatialRelation) -> bool;
}

/// Topology oracle working on bounding boxes only.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeOracle;

impl TopologyOracle for EnvelopeOracle {
    fn relates(&self, subject: &Envelope, reference: &Envelope, relation: SpatialRelation) -> bool {
        match relation {
            SpatialRelation::Intersects => subject.intersects(reference),
            SpatialRelation::Within => reference.contains(subject),
            SpatialRelation::Contains => subject.contains(reference),
            SpatialRelation::Disjoint => !subject.intersects(reference),
        }
    }
}

/// Bounding box of the GML geometry inside `element`.
///
/// Reads `gml:Envelope` corners when present, otherwise the extent of every
/// `gml:pos` and `gml:posList` coordinate pair.
#[must_use]
pub fn envelope_of(element: &XmlElement) -> Option<Envelope> {
    if let Some(env) = element.find(GML_NS, "Envelope") {
        let lower = env.child(GML_NS, "lowerCorner")?;
        let upper = env.child(GML_NS, "upperCorner")?;
        return Envelope::from_corners(lower.text(), upper.text());
    }
    let coords: Vec<f64> = element
        .find_all(GML_NS, "pos")
        .into_iter()
        .chain(element.find_all(GML_NS, "posList"))
        .flat_map(|p| p.text().split_whitespace().map(str::to_owned).collect::<Vec<_>>())
        .filter_map(|c| c.parse().ok())
        .collect();
    let mut pairs = coords.chunks_exact(2).filter_map(|pair| match *pair {
        [x, y] => Some((x, y)),
        _ => None,
    });
    let (x0, y0) = pairs.next()?;
    Some(pairs.fold(Envelope::new(x0, y0, x0, y0), |acc, (x, y)| {
        Envelope::new(acc.min_x.min(x), acc.min_y.min(y), acc.max_x.max(x), acc.max_y.max(y))
    }))
}

/// Minimal path evaluator.
///
/// Supports absolute (`/a/b`) and anywhere (`//a/b`) location paths of
/// prefixed names or `*`, optionally ending in `@attr`. The expression is
/// true when the selected node set is non-empty.
#[derive(Debug, Clone)]
pub struct PathEvaluator {
    namespaces: BTreeMap<String, String>,
}

impl Default for PathEvaluator {
    fn default() -> Self {
        let namespaces = [
            ("wfs", WFS_NS),
            ("fes", FES_NS),
            ("ows", OWS_NS),
            ("gml", GML_NS),
            ("xlink", XLINK_NS),
        ]
        .into_iter()
        .map(|(p, ns)| (p.to_owned(), ns.to_owned()))
        .collect();
        Self { namespaces }
    }
}

impl PathEvaluator {
    /// Bind an additional prefix.
    #[must_use]
    pub fn with_namespace(mut self, prefix: &str, namespace: &str) -> Self {
        self.namespaces.insert(prefix.to_owned(), namespace.to_owned());
        self
    }

    fn matches(&self, element: &XmlElement, step: &str) -> Result<bool, OracleError> {
        if step == "*" {
            return Ok(true);
        }
        match step.split_once(':') {
            Some((prefix, local)) => {
                let ns = self
                    .namespaces
                    .get(prefix)
                    .ok_or_else(|| OracleError::UnboundPrefix(prefix.to_owned()))?;
                Ok(element.is(ns, local))
            }
            None => Ok(element.local_name == step),
        }
    }

    fn select<'a>(
        &self,
        candidates: Vec<&'a XmlElement>,
        step: &str,
    ) -> Result<Vec<&'a XmlElement>, OracleError> {
        let mut out = Vec::new();
        for candidate in candidates {
            if self.matches(candidate, step)? {
                out.push(candidate);
            }
        }
        Ok(out)
    }
}

impl XPathEvaluator for PathEvaluator {
    fn evaluate(&self, document: &XmlElement, expression: &str) -> Result<bool, OracleError> {
        let (anywhere, path) = match expression.trim().strip_prefix("//") {
            Some(rest) => (true, rest),
            None => (false, expression.trim().trim_start_matches('/')),
        };
        let steps: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, init)) = steps.split_last() else {
            return Err(OracleError::EmptyExpression(expression.to_owned()));
        };
        let (element_steps, attribute) = match last.strip_prefix('@') {
            Some(attr) => (init, Some(attr)),
            None => (steps.as_slice(), None),
        };
        let mut selected = vec![document];
        for (idx, step) in element_steps.iter().enumerate() {
            let candidates = match (idx, anywhere) {
                (0, true) => std::iter::once(document).chain(document.descendants()).collect(),
                (0, false) => vec![document],
                _ => selected.iter().copied().flat_map(|e| e.children.iter()).collect(),
            };
            selected = self.select(candidates, step)?;
        }
        Ok(match attribute {
            Some(name) => {
                let local = name.rsplit_once(':').map_or(name, |(_, l)| l);
                selected.iter().any(|e| e.attributes.iter().any(|a| a.local_name == local))
            }
            None => !selected.is_empty(),
        })
    }
}
