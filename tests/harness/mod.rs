//! Shared setup for tests that point the harness at the simulated service.

use std::sync::Arc;

use test_util::{
    Faults,
    SimulatedWfs,
    fixtures::{Advertised, capabilities_document},
};
use wfs_verify::{
    capabilities::CapabilitySet,
    clock::SimulatedClock,
    context::{ContextFactory, VerificationContext, VerificationSettings},
    suite::{CaseReport, cases, run_case},
};

/// A simulated service with a harness factory pointed at it.
pub struct Rig {
    /// Clock shared by the service and the harness.
    pub clock: SimulatedClock,
    /// The service under test.
    pub service: SimulatedWfs,
    /// Sampled factory for case contexts.
    pub factory: ContextFactory,
}

impl Rig {
    /// Run the registered case `name`.
    pub async fn run(&self, name: &str) -> CaseReport {
        let case = cases::registry()
            .into_iter()
            .find(|case| case.name == name)
            .unwrap_or_else(|| panic!("no case named {name}"));
        run_case(&self.factory, &case).await
    }

    /// Fresh context for a hand-written scenario.
    pub fn context(&self, name: &str) -> VerificationContext { self.factory.create(name) }
}

/// Settings with a paging window smaller than every simulated type.
pub fn settings() -> VerificationSettings {
    VerificationSettings {
        page_window: 2,
        ..VerificationSettings::default()
    }
}

/// Build a sampled rig over a service exhibiting `faults`.
pub async fn rig(faults: Faults) -> Rig {
    let clock = SimulatedClock::new();
    let service = SimulatedWfs::new(Arc::new(clock.clone())).with_faults(faults);
    let capabilities = match CapabilitySet::parse(&capabilities_document(Advertised::default())) {
        Ok(capabilities) => capabilities,
        Err(err) => panic!("simulated capabilities do not parse: {err}"),
    };
    let factory = ContextFactory::new(
        Arc::new(service.clone()),
        Arc::new(capabilities),
        Arc::new(clock.clone()),
        settings(),
    )
    .sample_service()
    .await;
    Rig {
        clock,
        service,
        factory,
    }
}
