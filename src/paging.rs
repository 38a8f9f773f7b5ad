//! Result paging.
//!
//! A windowed `GetFeature` response carries opaque `next` and `previous`
//! continuation URIs. [`PagingCursorWalker`] follows them in either
//! direction, refuses to dereference a cursor older than the advertised
//! `ResponseCacheTimeout` and checks that every page of a walk stays within
//! the feature types of the query that started it.

use std::{collections::BTreeSet, fmt, time::Duration};

use tracing::debug;
use url::Url;

use crate::{
    context::VerificationContext,
    dispatch::{Binding, ResponseRecord},
    error::{VerifyError, VerifyResult},
    protocol::{ConformanceClass, GML_NS, Operation, ResultType, TypeName},
    request::{Prefixes, QueryExpression, RequestParams},
    validate::feature_members,
};

/// Direction of a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards later results.
    Next,
    /// Towards earlier results.
    Previous,
}

impl Direction {
    /// Attribute carrying the continuation on a feature collection.
    #[must_use]
    pub const fn attribute(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Previous => "previous",
        }
    }
}

/// Identity of the query a walk started from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    type_names: Vec<TypeName>,
    rendered: String,
}

impl QueryFingerprint {
    /// Fingerprint of a query expression: its types, filter and ordering.
    #[must_use]
    pub fn of(query: &QueryExpression) -> Self {
        let prefixes: Prefixes = query
            .type_names()
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.namespace().to_owned(), format!("p{idx}")))
            .collect();
        Self {
            type_names: query.type_names().to_vec(),
            rendered: query.to_element(&prefixes).to_xml_with(&prefixes),
        }
    }

    /// Feature types of the query.
    #[must_use]
    pub fn type_names(&self) -> &[TypeName] { &self.type_names }

    fn admits(&self, namespace: &str, local: &str) -> bool {
        self.type_names.is_empty()
            || self
                .type_names
                .iter()
                .any(|t| t.namespace() == namespace && t.local_name() == local)
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.rendered) }
}

/// An opaque continuation reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// Continuation URI as issued by the service.
    pub token: Url,
    /// Query the walk started from.
    pub anchor: QueryFingerprint,
    /// Window size of the walk.
    pub window: u32,
    /// Direction the cursor leads.
    pub direction: Direction,
    /// Clock time at which the page carrying the cursor arrived.
    pub issued_at: Duration,
}

/// One window of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Member feature ids in document order.
    pub members: Vec<String>,
    /// Value of `numberReturned`.
    pub number_returned: u64,
    /// Value of `numberMatched`, which may be `unknown`.
    pub number_matched: Option<String>,
    /// Forward continuation.
    pub next: Option<PageCursor>,
    /// Backward continuation; absent on the first page.
    pub previous: Option<PageCursor>,
}

impl Page {
    /// Member ids as a set.
    #[must_use]
    pub fn member_set(&self) -> BTreeSet<String> { self.members.iter().cloned().collect() }
}

/// Walks paged results for one test case.
#[derive(Debug)]
pub struct PagingCursorWalker<'a> {
    ctx: &'a VerificationContext,
}

impl<'a> PagingCursorWalker<'a> {
    /// Create a walker for a service implementing result paging.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when paging is not advertised.
    pub fn new(ctx: &'a VerificationContext) -> VerifyResult<Self> {
        if !ctx.capabilities().implements(ConformanceClass::ResultPaging) {
            return Err(VerifyError::unsupported("ImplementsResultPaging"));
        }
        Ok(Self { ctx })
    }

    /// First window of `query` holding at most `window` members.
    ///
    /// # Errors
    ///
    /// Fails when the response is not a well-formed feature collection.
    pub async fn first_page(&self, query: QueryExpression, window: u32) -> VerifyResult<Page> {
        self.fetch_first(query, window, ResultType::Results).await
    }

    /// First window of a `hits` request: no members, only counts and a
    /// forward continuation.
    ///
    /// # Errors
    ///
    /// Fails when the response is not a well-formed feature collection.
    pub async fn first_hits(&self, query: QueryExpression, window: u32) -> VerifyResult<Page> {
        self.fetch_first(query, window, ResultType::Hits).await
    }

    /// Follow the forward continuation of `page`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::SemanticAssertionFailure`] when `page` has no
    /// `next` continuation and [`VerifyError::ExpiredCursor`] when it is
    /// older than the cache timeout.
    pub async fn next(&self, page: &Page) -> VerifyResult<Page> {
        self.follow(page.next.as_ref(), Direction::Next).await
    }

    /// Follow the backward continuation of `page`.
    ///
    /// # Errors
    ///
    /// See [`Self::next`].
    pub async fn previous(&self, page: &Page) -> VerifyResult<Page> {
        self.follow(page.previous.as_ref(), Direction::Previous).await
    }

    /// Step forward from `page` and back again, and check that the page
    /// reached contains every member of `page`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::SemanticAssertionFailure`] when members went
    /// missing, besides the errors of [`Self::next`].
    pub async fn check_round_trip(&self, page: &Page) -> VerifyResult<Page> {
        let forward = self.next(page).await?;
        let back = self.previous(&forward).await?;
        let original = page.member_set();
        let returned = back.member_set();
        let missing: Vec<&String> = original.difference(&returned).collect();
        if !missing.is_empty() {
            return Err(VerifyError::assertion(
                "members of previous(next(page))",
                format!("superset of {original:?}"),
                format!("{returned:?}, missing {missing:?}"),
            ));
        }
        Ok(back)
    }

    async fn fetch_first(
        &self,
        query: QueryExpression,
        window: u32,
        result_type: ResultType,
    ) -> VerifyResult<Page> {
        let anchor = QueryFingerprint::of(&query);
        let params = RequestParams::default()
            .with_query(query)
            .with_count(window)
            .with_result_type(result_type);
        let payload = self.ctx.builder.build(Operation::GetFeature, params)?;
        let record = self.ctx.dispatcher.dispatch(&payload, Binding::Any, None).await?;
        self.read_page(&record, &anchor, window)
    }

    async fn follow(
        &self,
        continuation: Option<&PageCursor>,
        direction: Direction,
    ) -> VerifyResult<Page> {
        let Some(cursor) = continuation else {
            return Err(VerifyError::assertion(
                format!("{} continuation", direction.attribute()),
                "present",
                "absent",
            ));
        };
        let elapsed = self.ctx.now().saturating_sub(cursor.issued_at);
        if let Some(timeout) = self.ctx.capabilities().cache_timeout().filter(|t| elapsed > *t) {
            return Err(VerifyError::ExpiredCursor {
                token: cursor.token.to_string(),
                elapsed,
                timeout,
            });
        }
        debug!(direction = direction.attribute(), token = %cursor.token, "following cursor");
        let record = self.ctx.dispatcher.retrieve(&cursor.token).await?;
        self.read_page(&record, &cursor.anchor, cursor.window)
    }

    fn read_page(
        &self,
        record: &ResponseRecord,
        anchor: &QueryFingerprint,
        window: u32,
    ) -> VerifyResult<Page> {
        let root = self
            .ctx
            .validator
            .assert_response(record, Operation::GetFeature, &["numberReturned"])?;
        let number_returned = root
            .attr("numberReturned")
            .and_then(|n| n.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                VerifyError::structure(
                    "non-negative integer numberReturned",
                    root.attr("numberReturned").unwrap_or_default(),
                )
            })?;
        let mut members = Vec::new();
        for member in feature_members(root) {
            if !anchor.admits(member.namespace.as_deref().unwrap_or_default(), &member.local_name) {
                return Err(VerifyError::assertion(
                    "member type",
                    format!("one of {:?}", anchor.type_names()),
                    member.expanded_name(),
                ));
            }
            members.extend(member.attr_ns(GML_NS, "id").map(str::to_owned));
        }
        if u64::from(window) < u64::try_from(members.len()).unwrap_or(u64::MAX) {
            return Err(VerifyError::assertion(
                "page size",
                format!("at most {window}"),
                members.len().to_string(),
            ));
        }
        let issued_at = self.ctx.now();
        let cursor = |direction: Direction| -> VerifyResult<Option<PageCursor>> {
            let Some(raw) = root.attr(direction.attribute()) else {
                return Ok(None);
            };
            let token = Url::parse(raw.trim()).map_err(|err| {
                VerifyError::structure(
                    format!("absolute URI in {}", direction.attribute()),
                    format!("{raw} ({err})"),
                )
            })?;
            Ok(Some(PageCursor {
                token,
                anchor: anchor.clone(),
                window,
                direction,
                issued_at,
            }))
        };
        Ok(Page {
            members,
            number_returned,
            number_matched: root.attr("numberMatched").map(str::to_owned),
            next: cursor(Direction::Next)?,
            previous: cursor(Direction::Previous)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        request::Filter,
        test_fixtures::{building, road},
    };

    #[rstest]
    fn fingerprint_tracks_types_and_filter() {
        let all = QueryFingerprint::of(&QueryExpression::by_type(road()));
        let same = QueryFingerprint::of(&QueryExpression::by_type(road()));
        let filtered = QueryFingerprint::of(&QueryExpression::filtered(
            road(),
            Filter::resource_ids(["road.1"]),
        ));
        assert_eq!(all, same);
        assert_ne!(all, filtered);
        assert_ne!(all, QueryFingerprint::of(&QueryExpression::by_type(building())));
    }

    #[rstest]
    fn fingerprint_admits_only_its_types() {
        let anchor = QueryFingerprint::of(&QueryExpression::by_type(road()));
        assert!(anchor.admits(road().namespace(), "Road"));
        assert!(!anchor.admits(road().namespace(), "Building"));
    }
}
