//! Test case registry and runner.
//!
//! A [`TestCase`] names the conformance class it exercises and the
//! operations it needs. [`run_case`] skips cases whose preconditions the
//! service does not meet, runs the rest under the run budget and always
//! releases what the case left behind, whatever the verdict.

pub mod cases;
mod report;

use std::{collections::BTreeSet, fmt, time::Instant};

use futures_util::future::BoxFuture;
use tracing::{Instrument, info, info_span, warn};

pub use self::report::{CaseReport, RunReport, Verdict};
use crate::{
    capabilities::CapabilitySet,
    context::{ContextFactory, VerificationContext},
    error::{VerifyError, VerifyResult},
    protocol::{ConformanceClass, Operation},
    sampler::DataSample,
    stored_query::StoredQueryRegistry,
};

/// Future returned by a test case body.
pub type CaseFuture<'a> = BoxFuture<'a, VerifyResult<()>>;

/// Test case body.
pub type CaseFn = for<'a> fn(&'a mut VerificationContext) -> CaseFuture<'a>;

/// One registered test case.
#[derive(Clone, Copy)]
pub struct TestCase {
    /// Unique name, also used to seed the case's selector.
    pub name: &'static str,
    /// Conformance class the case verifies.
    pub class: ConformanceClass,
    /// Operations the service must advertise.
    pub operations: &'static [Operation],
    /// Whether the case needs at least one instantiated feature type.
    pub needs_data: bool,
    /// Case body.
    pub run: CaseFn,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("operations", &self.operations)
            .field("needs_data", &self.needs_data)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    /// First precondition the service fails, if any.
    #[must_use]
    pub fn unmet_precondition(
        &self,
        capabilities: &CapabilitySet,
        sample: &DataSample,
    ) -> Option<String> {
        if !capabilities.implements(self.class) {
            return Some(format!("{} not implemented", self.class.constraint_name()));
        }
        if let Some(missing) = self.operations.iter().find(|op| !capabilities.supports(**op)) {
            return Some(format!("{missing} not advertised"));
        }
        if self.needs_data && sample.instantiated_types().next().is_none() {
            return Some("no instantiated feature type".to_owned());
        }
        None
    }
}

/// Run one case in a fresh context.
pub async fn run_case(factory: &ContextFactory, case: &TestCase) -> CaseReport {
    let started = Instant::now();
    if let Some(reason) = case.unmet_precondition(factory.capabilities(), factory.sample()) {
        info!(case = case.name, %reason, "case skipped");
        let verdict = Verdict::Skipped { reason };
        return CaseReport::new(case.name, case.class, verdict, started.elapsed());
    }
    let mut ctx = factory.create(case.name);
    let budget = factory.settings().run_timeout;
    let span = info_span!("case", name = case.name, class = %case.class);
    let result = tokio::time::timeout(budget, (case.run)(&mut ctx))
        .instrument(span.clone())
        .await
        .unwrap_or_else(|_elapsed| Err(VerifyError::TimedOut(budget)));
    let leaks = ctx.release_all().instrument(span).await;
    let verdict = Verdict::from_result(&result);
    match &verdict {
        Verdict::Passed => info!(case = case.name, "PASS"),
        Verdict::Failed { kind, message } => {
            warn!(case = case.name, kind = %kind, %message, "FAIL");
        }
        Verdict::Skipped { reason } => info!(case = case.name, %reason, "SKIP"),
    }
    let mut report = CaseReport::new(case.name, case.class, verdict, started.elapsed());
    report.leaks = leaks;
    report
}

/// Run every case of `cases` whose class is in `only`, or all of them when
/// `only` is empty, in order.
pub async fn run_suite(
    factory: &ContextFactory,
    cases: &[TestCase],
    only: &BTreeSet<ConformanceClass>,
) -> RunReport {
    let selected: Vec<&TestCase> = cases
        .iter()
        .filter(|case| only.is_empty() || only.contains(&case.class))
        .collect();
    let mut report = RunReport::new();
    if selected
        .iter()
        .any(|case| case.class == ConformanceClass::ManageStoredQueries)
    {
        preclean(factory).await;
    }
    for case in selected {
        report.cases.push(run_case(factory, case).await);
    }
    info!(
        passed = report.passed(),
        failed = report.failed(),
        skipped = report.skipped(),
        leaks = report.leaks().count(),
        "run finished"
    );
    report
}

async fn preclean(factory: &ContextFactory) {
    let mut ctx = factory.create("preclean");
    let result = match StoredQueryRegistry::new(&mut ctx) {
        Ok(mut registry) => registry.preclean().await,
        Err(err) => Err(err),
    };
    match result {
        Ok(0) | Err(VerifyError::Unsupported(_)) => {}
        Ok(dropped) => info!(dropped, "stale stored queries dropped"),
        Err(err) => warn!(error = %err, "stored query preclean failed"),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_fixtures::{capabilities, road};

    fn noop(_ctx: &mut VerificationContext) -> CaseFuture<'_> { Box::pin(async { Ok(()) }) }

    fn test_case(
        class: ConformanceClass,
        operations: &'static [Operation],
        needs_data: bool,
    ) -> TestCase {
        TestCase {
            name: "noop",
            class,
            operations,
            needs_data,
            run: noop,
        }
    }

    #[rstest]
    fn precondition_requires_data_when_asked() {
        let caps = capabilities();
        let empty = DataSample::new();
        let sampled = DataSample::new().with_ids(road(), ["road.1"]);
        let needy = test_case(ConformanceClass::LockingWfs, &[Operation::LockFeature], true);
        assert_eq!(
            needy.unmet_precondition(&caps, &empty).as_deref(),
            Some("no instantiated feature type")
        );
        assert_eq!(needy.unmet_precondition(&caps, &sampled), None);
    }

    #[rstest]
    #[case(ConformanceClass::TransactionalWfs, &[], "ImplementsTransactionalWFS not implemented")]
    #[case(
        ConformanceClass::LockingWfs,
        &[Operation::GetFeatureWithLock],
        "GetFeatureWithLock not advertised"
    )]
    fn precondition_names_what_is_missing(
        #[case] class: ConformanceClass,
        #[case] operations: &'static [Operation],
        #[case] reason: &str,
    ) {
        let caps = capabilities();
        let missing =
            test_case(class, operations, false).unmet_precondition(&caps, &DataSample::new());
        assert_eq!(missing.as_deref(), Some(reason));
    }
}
