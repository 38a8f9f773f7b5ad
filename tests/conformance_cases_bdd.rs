//! Behaviour-driven tests running registered cases against the simulated
//! service.
#![expect(clippy::expect_used, reason = "test assertions")]

mod harness;

use std::cell::RefCell;

use harness::{Rig, rig};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use test_util::Faults;
use tokio::runtime::Runtime;
use wfs_verify::suite::{CaseReport, Verdict};

struct CaseWorld {
    rt: Runtime,
    rig: RefCell<Option<Rig>>,
    report: RefCell<Option<CaseReport>>,
}

impl CaseWorld {
    fn new() -> Self {
        Self {
            rt: Runtime::new().expect("runtime"),
            rig: RefCell::new(None),
            report: RefCell::new(None),
        }
    }

    fn serve(&self, faults: Faults) {
        let built = self.rt.block_on(rig(faults));
        self.rig.replace(Some(built));
    }

    fn run(&self, name: &str) {
        let rig_ref = self.rig.borrow();
        let current = rig_ref.as_ref().expect("service not started");
        let report = self.rt.block_on(current.run(name));
        self.report.replace(Some(report));
    }

    fn report(&self) -> CaseReport { self.report.borrow().clone().expect("case not run") }

    fn with_rig<T>(&self, f: impl FnOnce(&Rig) -> T) -> T {
        let rig_ref = self.rig.borrow();
        f(rig_ref.as_ref().expect("service not started"))
    }
}

#[fixture]
fn world() -> CaseWorld { CaseWorld::new() }

#[given("a conforming service")]
fn given_conforming(world: &CaseWorld) { world.serve(Faults::default()); }

#[given("a service that ignores lock conflicts")]
fn given_ignores_conflicts(world: &CaseWorld) {
    world.serve(Faults {
        ignore_lock_conflicts: true,
        ..Faults::default()
    });
}

#[given("a service whose locks never expire")]
fn given_never_expires(world: &CaseWorld) {
    world.serve(Faults {
        never_expire: true,
        ..Faults::default()
    });
}

#[given("a service that keeps dropped stored queries")]
fn given_keeps_dropped(world: &CaseWorld) {
    world.serve(Faults {
        keep_dropped_queries: true,
        ..Faults::default()
    });
}

#[given("a service with broken previous links")]
fn given_broken_previous(world: &CaseWorld) {
    world.serve(Faults {
        broken_previous_links: true,
        ..Faults::default()
    });
}

#[when("I run the case \"{name}\"")]
fn when_run(world: &CaseWorld, name: String) { world.run(&name); }

#[then("the verdict is \"{label}\"")]
fn then_verdict(world: &CaseWorld, label: String) {
    let report = world.report();
    assert_eq!(report.verdict.label(), label, "{}: {:?}", report.name, report.verdict);
}

#[then("the failure kind is \"{expected}\"")]
fn then_failure_kind(world: &CaseWorld, expected: String) {
    let report = world.report();
    let Verdict::Failed { kind, .. } = &report.verdict else {
        panic!("expected a failure, got {:?}", report.verdict);
    };
    assert_eq!(kind, &expected);
}

#[then("no lock is left active")]
fn then_no_locks(world: &CaseWorld) {
    assert!(world.report().leaks.is_empty());
    assert!(world.with_rig(|r| r.service.active_locks()).is_empty());
}

#[then("no stored query is left defined")]
fn then_no_stored_queries(world: &CaseWorld) {
    assert!(world.report().leaks.is_empty());
    assert!(world.with_rig(|r| r.service.stored_query_ids()).is_empty());
}

#[scenario(path = "tests/features/conformance_cases.feature", index = 0)]
fn conforming_lock_conflict(world: CaseWorld) { let _ = world; }

#[scenario(path = "tests/features/conformance_cases.feature", index = 1)]
fn ignored_conflicts_detected(world: CaseWorld) { let _ = world; }

#[scenario(path = "tests/features/conformance_cases.feature", index = 2)]
fn eternal_locks_detected(world: CaseWorld) { let _ = world; }

#[scenario(path = "tests/features/conformance_cases.feature", index = 3)]
fn dropped_queries_detected(world: CaseWorld) { let _ = world; }

#[scenario(path = "tests/features/conformance_cases.feature", index = 4)]
fn broken_previous_links_detected(world: CaseWorld) { let _ = world; }

#[scenario(path = "tests/features/conformance_cases.feature", index = 5)]
fn stored_query_cleanup(world: CaseWorld) { let _ = world; }
