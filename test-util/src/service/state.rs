//! Features, locks, cursors and stored queries held by the simulated service.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use tracing::debug;
use wfs_verify::{
    protocol::{
        DEFAULT_LOCK_EXPIRY,
        ExceptionCode,
        GML_NS,
        QRY_GET_FEATURE_BY_ID,
        QRY_GET_FEATURE_BY_ID_URN,
        QUERY_LANGUAGE_WFS,
    },
    xml::XmlElement,
};

use super::{
    Faults,
    reply::{Collection, Fault, Reply, predefined_queries},
    request::{Call, Definition, FeatureRequest, Selection, TransactionRequest},
};
use crate::fixtures::{NS, SimFeature};

#[derive(Debug, Clone)]
struct Lock {
    features: BTreeSet<String>,
    expires_at: Duration,
    released: bool,
}

#[derive(Debug, Clone)]
struct Cursor {
    ids: Vec<String>,
    start: usize,
    count: usize,
}

#[derive(Debug, Clone)]
struct Stored {
    query: Option<Selection>,
    dropped: bool,
}

type Answer = Result<Reply, Fault>;

/// Mutable state behind [`SimulatedWfs`](super::SimulatedWfs).
#[derive(Debug)]
pub(crate) struct ServiceState {
    pub(crate) features: Vec<SimFeature>,
    pub(crate) capabilities: String,
    pub(crate) faults: Faults,
    pub(crate) log: Vec<String>,
    locks: BTreeMap<String, Lock>,
    issued_locks: u64,
    cursors: BTreeMap<u64, Cursor>,
    issued_cursors: u64,
    stored: BTreeMap<String, Stored>,
    inserted: u64,
}

impl ServiceState {
    pub(crate) const fn new(features: Vec<SimFeature>, capabilities: String) -> Self {
        Self {
            features,
            capabilities,
            faults: Faults {
                ignore_lock_conflicts: false,
                never_expire: false,
                keep_dropped_queries: false,
                broken_previous_links: false,
                accept_any_language: false,
                stale_locks_as_invalid: false,
            },
            log: Vec::new(),
            locks: BTreeMap::new(),
            issued_locks: 0,
            cursors: BTreeMap::new(),
            issued_cursors: 0,
            stored: BTreeMap::new(),
            inserted: 0,
        }
    }

    /// Answer one decoded request at clock time `now`.
    pub(crate) fn handle(&mut self, call: Call, now: Duration) -> Answer {
        self.log.push(call.name().to_owned());
        match call {
            Call::GetCapabilities => Ok(Reply::Capabilities(self.capabilities.clone())),
            Call::GetFeature(request) => self.get_feature(&request),
            Call::Continue(token) => self.resume(&token),
            Call::LockFeature(request) => self.lock_feature(&request, now),
            Call::GetFeatureWithLock(request) => self.get_feature_with_lock(&request, now),
            Call::Transaction(request) => self.transaction(&request, now),
            Call::CreateStoredQuery(definition) => self.create_stored_query(definition),
            Call::DropStoredQuery(id) => self.drop_stored_query(id.as_deref()),
            Call::ListStoredQueries => Ok(self.list_stored_queries()),
            Call::Unknown(name) => Err(Fault::not_supported(&name)),
        }
    }

    /// Ids of locks that are neither released nor expired at `now`.
    pub(crate) fn active_locks(&self, now: Duration) -> Vec<String> {
        self.locks
            .iter()
            .filter(|(_, lock)| self.is_active(lock, now))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of stored queries that are defined and not dropped.
    pub(crate) fn stored_query_ids(&self) -> Vec<String> {
        self.stored
            .iter()
            .filter(|(_, q)| !q.dropped)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn is_active(&self, lock: &Lock, now: Duration) -> bool {
        !lock.released && (self.faults.never_expire || now <= lock.expires_at)
    }

    fn active_lock(&self, id: &str, now: Duration) -> Option<&Lock> {
        self.locks.get(id).filter(|lock| self.is_active(lock, now))
    }

    fn holder(&self, feature: &str, now: Duration) -> Option<&str> {
        self.locks
            .iter()
            .find(|(_, lock)| lock.features.contains(feature) && self.is_active(lock, now))
            .map(|(id, _)| id.as_str())
    }

    fn feature(&self, id: &str) -> Option<&SimFeature> { self.features.iter().find(|f| f.id == id) }

    fn select(&self, selection: &Selection) -> Vec<String> {
        match selection {
            Selection::Type(local) => self
                .features
                .iter()
                .filter(|f| &f.type_name == local)
                .map(|f| f.id.clone())
                .collect(),
            Selection::Ids(ids) => ids
                .iter()
                .filter(|id| self.feature(id).is_some())
                .cloned()
                .collect(),
            Selection::Stored { .. } => Vec::new(),
        }
    }

    fn resolve(&self, queries: &[Selection]) -> Result<Vec<String>, Fault> {
        let mut ids = Vec::new();
        for query in queries {
            let selected = match query {
                Selection::Stored { id, .. } => {
                    let stored = self
                        .stored
                        .get(id)
                        .filter(|q| !q.dropped || self.faults.keep_dropped_queries)
                        .ok_or_else(|| {
                            Fault::new(
                                ExceptionCode::InvalidParameterValue,
                                "STOREDQUERY_ID",
                                format!("no stored query {id}"),
                            )
                        })?;
                    stored.query.as_ref().map(|q| self.select(q)).unwrap_or_default()
                }
                other => self.select(other),
            };
            for id in selected {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn by_id(&self, queries: &[Selection]) -> Option<Answer> {
        let [Selection::Stored { id, parameters }] = queries else {
            return None;
        };
        if id != QRY_GET_FEATURE_BY_ID && id != QRY_GET_FEATURE_BY_ID_URN {
            return None;
        }
        let wanted = parameters
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("ID"))
            .map(|(_, value)| value.as_str());
        let Some(wanted) = wanted else {
            return Some(Err(Fault::new(
                ExceptionCode::MissingParameterValue,
                "ID",
                "GetFeatureById needs an ID",
            )));
        };
        Some(self.feature(wanted).cloned().map(Reply::Feature).ok_or_else(|| Fault {
            code: "NotFound",
            status: 404,
            locator: Some("ID".to_owned()),
            text: format!("no feature {wanted}"),
        }))
    }

    fn open_cursor(&mut self, ids: Vec<String>, start: usize, count: usize) -> u64 {
        let token = self.issued_cursors;
        self.issued_cursors = self.issued_cursors.saturating_add(1);
        self.cursors.insert(token, Cursor { ids, start, count });
        token
    }

    fn page(&mut self, ids: &[String], start: usize, count: usize) -> Collection {
        let members: Vec<SimFeature> = ids
            .iter()
            .skip(start)
            .take(count)
            .filter_map(|id| self.feature(id).cloned())
            .collect();
        let end = start.saturating_add(count);
        let next = (end < ids.len()).then(|| self.open_cursor(ids.to_vec(), end, count));
        let previous = (start > 0).then(|| {
            let back = if self.faults.broken_previous_links {
                end
            } else {
                start.saturating_sub(count)
            };
            self.open_cursor(ids.to_vec(), back, count)
        });
        Collection {
            members,
            matched: ids.len(),
            hits: false,
            next,
            previous,
            lock_id: None,
        }
    }

    fn get_feature(&mut self, request: &FeatureRequest) -> Answer {
        if let Some(answer) = self.by_id(&request.queries) {
            return answer;
        }
        if request.queries.is_empty() {
            return Err(Fault::new(
                ExceptionCode::MissingParameterValue,
                "typeNames",
                "GetFeature needs a query",
            ));
        }
        let ids = self.resolve(&request.queries)?;
        let count = request.count.filter(|c| *c > 0).unwrap_or_else(|| ids.len().max(1));
        if request.hits {
            let next = (!ids.is_empty()).then(|| self.open_cursor(ids.clone(), 0, count));
            return Ok(Reply::Collection(Collection {
                matched: ids.len(),
                hits: true,
                next,
                ..Collection::default()
            }));
        }
        Ok(Reply::Collection(self.page(&ids, request.start_index, count)))
    }

    fn resume(&mut self, token: &str) -> Answer {
        let cursor = token
            .parse::<u64>()
            .ok()
            .and_then(|t| self.cursors.get(&t))
            .cloned()
            .ok_or_else(|| {
                Fault::new(
                    ExceptionCode::InvalidParameterValue,
                    "cursor",
                    format!("unknown cursor {token}"),
                )
            })?;
        Ok(Reply::Collection(self.page(&cursor.ids, cursor.start, cursor.count)))
    }

    /// Take a new lock on the features `request` selects. Returns the lock
    /// id with the locked and not-locked ids.
    fn acquire(
        &mut self,
        request: &FeatureRequest,
        now: Duration,
    ) -> Result<(String, Vec<String>, Vec<String>), Fault> {
        let ids = self.resolve(&request.queries)?;
        let ignore = self.faults.ignore_lock_conflicts;
        let (free, held): (Vec<String>, Vec<String>) = ids
            .into_iter()
            .partition(|id| ignore || self.holder(id, now).is_none());
        if !request.lock_some && !held.is_empty() {
            return Err(Fault::new(
                ExceptionCode::CannotLockAllFeatures,
                "lockAction",
                format!("{} features are locked elsewhere", held.len()),
            ));
        }
        self.issued_locks = self.issued_locks.saturating_add(1);
        let lock_id = format!("lock-{}", self.issued_locks);
        let expiry = request.expiry.unwrap_or(DEFAULT_LOCK_EXPIRY);
        self.locks.insert(
            lock_id.clone(),
            Lock {
                features: free.iter().cloned().collect(),
                expires_at: now.saturating_add(expiry),
                released: false,
            },
        );
        debug!(lock_id = %lock_id, locked = free.len(), not_locked = held.len(), "lock granted");
        Ok((lock_id, free, held))
    }

    fn lock_feature(&mut self, request: &FeatureRequest, now: Duration) -> Answer {
        match (&request.lock_id, request.queries.is_empty()) {
            (Some(_), false) => Err(Fault::new(
                ExceptionCode::OperationParsingFailed,
                "lockId",
                "lockId cannot be combined with a query",
            )),
            (Some(lock_id), true) => self.renew(lock_id, request.expiry, now),
            (None, true) => Err(Fault::new(
                ExceptionCode::MissingParameterValue,
                "typeNames",
                "LockFeature needs a query or a lockId",
            )),
            (None, false) => {
                let (lock_id, locked, not_locked) = self.acquire(request, now)?;
                Ok(Reply::Locked {
                    lock_id,
                    locked,
                    not_locked,
                })
            }
        }
    }

    fn renew(&mut self, lock_id: &str, expiry: Option<Duration>, now: Duration) -> Answer {
        let never_expire = self.faults.never_expire;
        let lock = self
            .locks
            .get_mut(lock_id)
            .filter(|lock| !lock.released && (never_expire || now <= lock.expires_at))
            .ok_or_else(|| {
                Fault::new(
                    ExceptionCode::LockHasExpired,
                    "lockId",
                    format!("lock {lock_id} has expired"),
                )
            })?;
        lock.expires_at = now.saturating_add(expiry.unwrap_or(DEFAULT_LOCK_EXPIRY));
        Ok(Reply::Locked {
            lock_id: lock_id.to_owned(),
            locked: lock.features.iter().cloned().collect(),
            not_locked: Vec::new(),
        })
    }

    fn get_feature_with_lock(&mut self, request: &FeatureRequest, now: Duration) -> Answer {
        if request.hits {
            return Err(Fault::new(
                ExceptionCode::InvalidParameterValue,
                "resultType",
                "GetFeatureWithLock cannot return hits",
            ));
        }
        if request.lock_id.is_some() {
            return Err(Fault::new(
                ExceptionCode::OperationParsingFailed,
                "lockId",
                "GetFeatureWithLock does not take a lockId",
            ));
        }
        let (lock_id, locked, _) = self.acquire(request, now)?;
        let members: Vec<SimFeature> = locked
            .iter()
            .filter_map(|id| self.feature(id).cloned())
            .collect();
        Ok(Reply::Collection(Collection {
            matched: members.len(),
            members,
            lock_id: Some(lock_id),
            ..Collection::default()
        }))
    }

    fn check_deletes(&self, request: &TransactionRequest, now: Duration) -> Result<(), Fault> {
        for id in &request.deletes {
            let Some(holder) = self.holder(id, now) else {
                continue;
            };
            match request.lock_id.as_deref() {
                None => {
                    return Err(Fault::new(
                        ExceptionCode::MissingParameterValue,
                        "lockId",
                        format!("{id} is locked"),
                    ));
                }
                Some(presented) if presented != holder => {
                    return Err(Fault::new(
                        ExceptionCode::InvalidParameterValue,
                        "lockId",
                        format!("{id} is locked by another lock"),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn insert(&mut self, element: &XmlElement) {
        self.inserted = self.inserted.saturating_add(1);
        let id = element
            .attr_ns(GML_NS, "id")
            .map_or_else(|| format!("inserted.{}", self.inserted), str::to_owned);
        self.features.push(SimFeature {
            id,
            type_name: element.local_name.clone(),
            name: element.child(NS, "name").map(|n| n.text().to_owned()).unwrap_or_default(),
        });
    }

    fn transaction(&mut self, request: &TransactionRequest, now: Duration) -> Answer {
        if let Some(lock_id) = request
            .lock_id
            .as_deref()
            .filter(|id| self.active_lock(id, now).is_none())
        {
            if self.faults.stale_locks_as_invalid {
                return Err(Fault::new(
                    ExceptionCode::InvalidParameterValue,
                    "lockId",
                    format!("unknown lock {lock_id}"),
                ));
            }
            return Err(Fault::new(
                ExceptionCode::LockHasExpired,
                "lockId",
                format!("lock {lock_id} has expired"),
            ));
        }
        self.check_deletes(request, now)?;
        let before = self.features.len();
        self.features.retain(|f| !request.deletes.contains(&f.id));
        let deleted = before.saturating_sub(self.features.len());
        for element in &request.inserts {
            self.insert(element);
        }
        if let Some(lock) = request.lock_id.as_deref().and_then(|id| self.locks.get_mut(id)) {
            if request.release_all {
                lock.released = true;
            } else {
                lock.features.retain(|f| !request.deletes.contains(f));
            }
        }
        Ok(Reply::Transaction {
            inserted: request.inserts.len(),
            deleted,
        })
    }

    fn create_stored_query(&mut self, definition: Definition) -> Answer {
        let Some(id) = definition.id else {
            return Err(Fault::new(
                ExceptionCode::MissingParameterValue,
                "id",
                "StoredQueryDefinition needs an id",
            ));
        };
        if definition.language != QUERY_LANGUAGE_WFS && !self.faults.accept_any_language {
            return Err(Fault::new(
                ExceptionCode::InvalidParameterValue,
                "language",
                format!("unsupported query language {}", definition.language),
            ));
        }
        if self.stored.get(&id).is_some_and(|q| !q.dropped) {
            return Err(Fault::new(
                ExceptionCode::DuplicateStoredQueryIdValue,
                id.as_str(),
                format!("{id} is already defined"),
            ));
        }
        self.stored.insert(
            id,
            Stored {
                query: definition.query,
                dropped: false,
            },
        );
        Ok(Reply::Created)
    }

    fn drop_stored_query(&mut self, id: Option<&str>) -> Answer {
        let Some(id) = id else {
            return Err(Fault::new(
                ExceptionCode::MissingParameterValue,
                "id",
                "DropStoredQuery needs an id",
            ));
        };
        let stored = self
            .stored
            .get_mut(id)
            .filter(|q| !q.dropped)
            .ok_or_else(|| {
                Fault::new(
                    ExceptionCode::InvalidParameterValue,
                    "id",
                    format!("no stored query {id}"),
                )
            })?;
        stored.dropped = true;
        Ok(Reply::Dropped)
    }

    fn list_stored_queries(&self) -> Reply {
        let mut queries = predefined_queries();
        queries.extend(self.stored.iter().filter(|(_, q)| !q.dropped).map(|(id, q)| {
            let returns = match &q.query {
                Some(Selection::Type(local)) => format!("tns:{local}"),
                _ => String::new(),
            };
            (id.clone(), returns)
        }));
        Reply::StoredQueries(queries)
    }
}
