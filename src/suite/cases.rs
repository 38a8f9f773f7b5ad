//! Registered test cases.

use std::{sync::Arc, time::Duration};

use tracing::debug;

use super::{CaseFn, CaseFuture, TestCase};
use crate::{
    context::VerificationContext,
    error::{VerifyError, VerifyResult},
    locking::{LockTarget, LockingVerifier},
    paging::PagingCursorWalker,
    protocol::{ConformanceClass, ExceptionCode, LockAction, Operation, ResultType, TypeName},
    request::{QueryBody, QueryExpression, StoredQueryDefinition},
    stored_query::{StoredQueryRegistry, type_query_definition},
    validate::feature_members,
};

/// Expiry of locks a case holds for the whole of its body.
const HOLD: Duration = Duration::from_secs(60);

/// A query language no service is expected to know.
const FOREIGN_LANGUAGE: &str = "http://qry.example.org/unknown-language";

const LOCK: &[Operation] = &[Operation::LockFeature];
const LOCK_AND_TRANSACT: &[Operation] = &[Operation::LockFeature, Operation::Transaction];
const LOCK_WITH_FEATURES: &[Operation] = &[Operation::GetFeatureWithLock];
const PAGE: &[Operation] = &[Operation::GetFeature];
const MANAGE: &[Operation] = &[Operation::CreateStoredQuery, Operation::DropStoredQuery];
const MANAGE_AND_LIST: &[Operation] = &[
    Operation::CreateStoredQuery,
    Operation::DropStoredQuery,
    Operation::ListStoredQueries,
];

const fn case(
    name: &'static str,
    class: ConformanceClass,
    operations: &'static [Operation],
    run: CaseFn,
) -> TestCase {
    TestCase {
        name,
        class,
        operations,
        needs_data: true,
        run,
    }
}

const fn without_data(mut test: TestCase) -> TestCase {
    test.needs_data = false;
    test
}

/// Every test case, in execution order.
#[must_use]
pub fn registry() -> Vec<TestCase> {
    use ConformanceClass::{LockingWfs, ManageStoredQueries, ResultPaging};
    vec![
        case("lock_all_conflict", LockingWfs, LOCK, lock_all_conflict),
        case("lock_some_excludes_locked", LockingWfs, LOCK, lock_some_excludes_locked),
        case("lock_id_with_query", LockingWfs, LOCK, lock_id_with_query),
        without_data(case("renew_unknown_lock", LockingWfs, LOCK, renew_unknown_lock)),
        case("lock_all_of_type", LockingWfs, LOCK_AND_TRANSACT, lock_all_of_type),
        case("release_idempotent", LockingWfs, LOCK_AND_TRANSACT, release_idempotent),
        case(
            "delete_locked_without_lock_id",
            LockingWfs,
            LOCK_AND_TRANSACT,
            delete_locked_without_lock_id,
        ),
        case("get_feature_with_lock", LockingWfs, LOCK_WITH_FEATURES, get_feature_with_lock),
        case(
            "get_feature_with_lock_hits",
            LockingWfs,
            LOCK_WITH_FEATURES,
            get_feature_with_lock_hits,
        ),
        case("lock_expiry", LockingWfs, LOCK, lock_expiry),
        case("renew_resets_expiry", LockingWfs, LOCK_AND_TRANSACT, renew_resets_expiry),
        case("paging_hits_window", ResultPaging, PAGE, paging_hits_window),
        case("paging_round_trip", ResultPaging, PAGE, paging_round_trip),
        case("create_invoke_drop", ManageStoredQueries, MANAGE, create_invoke_drop),
        case("list_stored_queries", ManageStoredQueries, MANAGE_AND_LIST, list_stored_queries),
        case("duplicate_stored_query", ManageStoredQueries, MANAGE, duplicate_stored_query),
        case("invoke_after_drop", ManageStoredQueries, MANAGE, invoke_after_drop),
        without_data(case(
            "unsupported_language",
            ManageStoredQueries,
            MANAGE,
            unsupported_language,
        )),
        without_data(case("drop_unknown", ManageStoredQueries, MANAGE, drop_unknown)),
    ]
}

/// One sampled feature and its type.
fn one_feature(ctx: &mut VerificationContext) -> VerifyResult<LockTarget> {
    let type_name = ctx.pick_type()?;
    let id = ctx.pick_feature(&type_name)?;
    Ok(LockTarget::by_ids(type_name, [id]))
}

/// Two distinct sampled features of one type.
fn two_features(ctx: &mut VerificationContext) -> VerifyResult<(TypeName, String, String)> {
    let type_name = ctx.pick_type()?;
    let first = ctx.pick_feature(&type_name)?;
    let second = ctx
        .sample
        .ids(&type_name)
        .iter()
        .find(|id| **id != first)
        .cloned()
        .ok_or_else(|| VerifyError::unsupported(format!("two sampled instances of {type_name}")))?;
    Ok((type_name, first, second))
}

fn expect_count(what: &str, expected: u64, actual: u64) -> VerifyResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(VerifyError::assertion(what, expected.to_string(), actual.to_string()))
    }
}

fn lock_all_conflict(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let mut locks = LockingVerifier::new(ctx)?;
        let held = locks.lock(&target, LockAction::All, HOLD).await?.accepted()?;
        held.assert_fully_locked()?;
        let entry = locks
            .lock(&target, LockAction::All, HOLD)
            .await?
            .rejected(ExceptionCode::CannotLockAllFeatures)?;
        debug!(lock_id = %held.lock_id, locator = ?entry.locator, "overlapping lock refused");
        Ok(())
    })
}

fn lock_some_excludes_locked(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let (type_name, first, second) = two_features(ctx)?;
        let mut locks = LockingVerifier::new(ctx)?;
        let held = locks
            .lock(&LockTarget::by_ids(type_name.clone(), [first.clone()]), LockAction::All, HOLD)
            .await?
            .accepted()?;
        let both = LockTarget::by_ids(type_name, [first.clone(), second.clone()]);
        let partial = locks.lock(&both, LockAction::Some, HOLD).await?.accepted()?;
        if partial.lock_id == held.lock_id {
            return Err(VerifyError::assertion("lockId of second lock", "a new lock", held.lock_id));
        }
        if partial.locked.contains(&first) {
            return Err(VerifyError::assertion(
                format!("FeaturesLocked of {}", partial.lock_id),
                format!("without {first}"),
                format!("{:?}", partial.locked),
            ));
        }
        if !partial.locked.contains(&second) {
            return Err(VerifyError::assertion(
                format!("FeaturesLocked of {}", partial.lock_id),
                format!("including {second}"),
                format!("{:?}", partial.locked),
            ));
        }
        Ok(())
    })
}

fn lock_id_with_query(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let mut locks = LockingVerifier::new(ctx)?;
        let held = locks.lock(&target, LockAction::All, HOLD).await?.accepted()?;
        locks
            .lock_with_existing_id(&target, &held.lock_id, HOLD)
            .await?
            .rejected(ExceptionCode::OperationParsingFailed)?;
        Ok(())
    })
}

fn renew_unknown_lock(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let unknown = format!("{}{}", ctx.case, ctx.now().as_nanos());
        let mut locks = LockingVerifier::new(ctx)?;
        locks
            .renew(&unknown, HOLD)
            .await?
            .rejected(ExceptionCode::LockHasExpired)?;
        Ok(())
    })
}

/// Lock every instantiated type over every binding advertised for
/// `LockFeature`, releasing each lock before taking the next.
fn lock_all_of_type(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let bindings = ctx.capabilities().bindings(Operation::LockFeature);
        let types: Vec<TypeName> = ctx.sample.instantiated_types().cloned().collect();
        if types.is_empty() {
            return Err(VerifyError::unsupported("no instantiated feature type"));
        }
        for binding in bindings {
            for type_name in &types {
                let known = ctx.sample.ids(type_name).to_vec();
                let target = LockTarget::whole_type(type_name.clone(), known);
                let mut locks = LockingVerifier::new(ctx)?.with_binding(binding);
                let grant = locks.lock(&target, LockAction::All, HOLD).await?.accepted()?;
                grant.assert_fully_locked()?;
                locks.release(&grant.lock_id).await?;
                debug!(%binding, type_name = %type_name, "whole type locked and released");
            }
        }
        Ok(())
    })
}

fn release_idempotent(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let mut locks = LockingVerifier::new(ctx)?;
        let grant = locks.lock(&target, LockAction::All, HOLD).await?.accepted()?;
        locks.release(&grant.lock_id).await?;
        locks.release(&grant.lock_id).await?;
        let again = locks.lock(&target, LockAction::All, HOLD).await?.accepted()?;
        again.assert_fully_locked()
    })
}

fn delete_locked_without_lock_id(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let mut locks = LockingVerifier::new(ctx)?;
        locks.lock(&target, LockAction::All, HOLD).await?.accepted()?;
        locks.delete_without_lock_id(&target).await?;
        Ok(())
    })
}

fn get_feature_with_lock(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let mut locks = LockingVerifier::new(ctx)?;
        let grant = locks
            .lock_with_features(&target, LockAction::All, HOLD, ResultType::Results)
            .await?
            .accepted()?;
        grant.assert_fully_locked()?;
        locks
            .lock(&target, LockAction::All, HOLD)
            .await?
            .rejected(ExceptionCode::CannotLockAllFeatures)?;
        Ok(())
    })
}

fn get_feature_with_lock_hits(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let mut locks = LockingVerifier::new(ctx)?;
        locks
            .lock_with_features(&target, LockAction::All, HOLD, ResultType::Hits)
            .await?
            .rejected(ExceptionCode::InvalidParameterValue)?;
        Ok(())
    })
}

fn lock_expiry(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let expiry = ctx.settings.lock_expiry;
        let mut locks = LockingVerifier::new(ctx)?;
        let grant = locks.lock(&target, LockAction::All, expiry).await?.accepted()?;
        locks.await_expiry(&grant.lock_id).await?;
        locks
            .renew(&grant.lock_id, expiry)
            .await?
            .rejected(ExceptionCode::LockHasExpired)?;
        Ok(())
    })
}

fn renew_resets_expiry(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let target = one_feature(ctx)?;
        let expiry = ctx.settings.lock_expiry;
        let buffer = ctx.settings.expiry_buffer;
        if expiry <= buffer.saturating_mul(2) {
            return Err(VerifyError::unsupported("lock expiry longer than twice the expiry buffer"));
        }
        let clock = Arc::clone(&ctx.clock);
        let mut locks = LockingVerifier::new(ctx)?;
        let grant = locks.lock(&target, LockAction::All, expiry).await?.accepted()?;
        clock.sleep(expiry.saturating_sub(buffer)).await;
        locks.renew(&grant.lock_id, expiry).await?.accepted()?;
        clock.sleep(buffer.saturating_mul(2)).await;
        locks.release(&grant.lock_id).await
    })
}

fn paging_hits_window(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let type_name = ctx.pick_type()?;
        let walker = PagingCursorWalker::new(ctx)?;
        let hits = walker.first_hits(QueryExpression::by_type(type_name), 1).await?;
        expect_count("numberReturned of hits response", 0, hits.number_returned)?;
        if hits.previous.is_some() {
            return Err(VerifyError::assertion("previous of hits response", "absent", "present"));
        }
        let page = walker.next(&hits).await?;
        expect_count("numberReturned of next page", 1, page.number_returned)
    })
}

fn paging_round_trip(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let type_name = ctx.pick_type()?;
        let window = ctx.settings.page_window;
        let walker = PagingCursorWalker::new(ctx)?;
        let first = walker
            .first_page(QueryExpression::by_type(type_name.clone()), window)
            .await?;
        if first.previous.is_some() {
            return Err(VerifyError::assertion("previous of first page", "absent", "present"));
        }
        if first.next.is_none() {
            return Err(VerifyError::unsupported(format!(
                "more than {window} instances of {type_name}"
            )));
        }
        walker.check_round_trip(&first).await?;
        Ok(())
    })
}

fn create_invoke_drop(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let type_name = ctx.pick_type()?;
        let mut registry = StoredQueryRegistry::new(ctx)?;
        let id = registry.id_for("create-invoke-drop");
        registry
            .create(&type_query_definition(id.as_str(), &type_name))
            .await?
            .accepted()?;
        let record = registry.invoke(&id, &[]).await?.accepted()?;
        let members = record.root().map_or(0, |root| feature_members(root).len());
        if members == 0 {
            return Err(VerifyError::assertion(
                format!("members returned by {id}"),
                "at least one",
                "none",
            ));
        }
        registry.drop(&id).await?.accepted()
    })
}

fn list_stored_queries(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let type_name = ctx.pick_type()?;
        let mut registry = StoredQueryRegistry::new(ctx)?;
        let id = registry.id_for("listed");
        registry
            .create(&type_query_definition(id.as_str(), &type_name))
            .await?
            .accepted()?;
        let listed = registry.list().await?;
        if !listed.contains(&id) {
            return Err(VerifyError::assertion(
                "ListStoredQueries",
                format!("includes {id}"),
                listed.join(", "),
            ));
        }
        Ok(())
    })
}

fn duplicate_stored_query(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let type_name = ctx.pick_type()?;
        let mut registry = StoredQueryRegistry::new(ctx)?;
        let definition = type_query_definition(registry.id_for("duplicate"), &type_name);
        registry.create(&definition).await?.accepted()?;
        registry
            .create(&definition)
            .await?
            .rejected(ExceptionCode::DuplicateStoredQueryIdValue)?;
        Ok(())
    })
}

fn invoke_after_drop(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let type_name = ctx.pick_type()?;
        let mut registry = StoredQueryRegistry::new(ctx)?;
        let id = registry.id_for("dropped");
        registry
            .create(&type_query_definition(id.as_str(), &type_name))
            .await?
            .accepted()?;
        registry.drop(&id).await?.accepted()?;
        for _ in 0..2 {
            registry
                .invoke(&id, &[])
                .await?
                .rejected(ExceptionCode::InvalidParameterValue)?;
        }
        Ok(())
    })
}

fn unsupported_language(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        if ctx.capabilities().supports_language(FOREIGN_LANGUAGE) {
            return Err(VerifyError::unsupported(format!(
                "a query language other than {FOREIGN_LANGUAGE}"
            )));
        }
        let mut registry = StoredQueryRegistry::new(ctx)?;
        let definition = StoredQueryDefinition {
            id: registry.id_for("foreign-language"),
            title: None,
            language: FOREIGN_LANGUAGE.to_owned(),
            parameters: Vec::new(),
            return_types: Vec::new(),
            body: QueryBody::Text("SELECT * FROM features".to_owned()),
        };
        registry
            .create(&definition)
            .await?
            .rejected(ExceptionCode::InvalidParameterValue)?;
        Ok(())
    })
}

fn drop_unknown(ctx: &mut VerificationContext) -> CaseFuture<'_> {
    Box::pin(async move {
        let mut registry = StoredQueryRegistry::new(ctx)?;
        let id = registry.id_for("never-created");
        registry
            .drop(&id)
            .await?
            .rejected(ExceptionCode::InvalidParameterValue)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn case_names_are_unique() {
        let cases = registry();
        let names: BTreeSet<&str> = cases.iter().map(|c| c.name).collect();
        assert_eq!(names.len(), cases.len());
    }

    #[rstest]
    #[case(ConformanceClass::LockingWfs)]
    #[case(ConformanceClass::ResultPaging)]
    #[case(ConformanceClass::ManageStoredQueries)]
    fn every_class_under_test_has_cases(#[case] class: ConformanceClass) {
        assert!(registry().iter().any(|c| c.class == class));
    }
}
