//! Per-case verification state.
//!
//! A [`ContextFactory`] holds what every test case shares read-only: the
//! transport, the capabilities, the data sample and the settings. Each case
//! gets its own [`VerificationContext`] with a fresh ledger, lock model,
//! stored query catalog and a selector seeded from the run seed and the case
//! name, so no mutable state crosses case boundaries.

use std::{fmt, sync::Arc, time::Duration};

use tracing::info;

use crate::{
    capabilities::CapabilitySet,
    clock::Clock,
    dispatch::{BindingDispatcher, SoapVersion, Transport},
    error::{VerifyError, VerifyResult},
    ledger::{ResourceLeakWarning, ResourceLedger},
    locking::LockLifecycleModel,
    protocol::TypeName,
    request::RequestBuilder,
    sampler::{DataSample, FeatureSampler},
    select::{SeededSelector, Selector, pick},
    stored_query::StoredQueryCatalog,
    validate::ResponseValidator,
};

/// Tunables of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSettings {
    /// Network timeout per dispatch.
    pub request_timeout: Duration,
    /// Upper bound on one test case, sleeps included.
    pub run_timeout: Duration,
    /// Expiry requested by lock probes.
    pub lock_expiry: Duration,
    /// Grace period after a lock's expiry before it is probed.
    pub expiry_buffer: Duration,
    /// Window size of paged walks.
    pub page_window: u32,
    /// Feature ids sampled per type.
    pub sample_size: u32,
    /// Run seed.
    pub seed: u64,
    /// SOAP version of the SOAP binding.
    pub soap_version: SoapVersion,
    /// Prefix of stored query ids created by the harness.
    pub stored_query_prefix: String,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(600),
            lock_expiry: Duration::from_secs(30),
            expiry_buffer: Duration::from_secs(4),
            page_window: 1,
            sample_size: 10,
            seed: 0x5EED,
            soap_version: SoapVersion::default(),
            stored_query_prefix: "urn:example:wfs-verify:".to_owned(),
        }
    }
}

/// Everything one test case works with.
#[derive(Debug)]
pub struct VerificationContext {
    /// Name of the owning test case.
    pub case: String,
    /// Request builder.
    pub builder: RequestBuilder,
    /// Binding dispatcher.
    pub dispatcher: BindingDispatcher,
    /// Response validator.
    pub validator: ResponseValidator,
    /// Time source for expiry and cursor ageing.
    pub clock: Arc<dyn Clock>,
    /// Feature and type selection.
    pub selector: Box<dyn Selector>,
    /// Resources created by this case.
    pub ledger: ResourceLedger,
    /// Locks granted to this case.
    pub locks: LockLifecycleModel,
    /// Stored queries this case created or dropped.
    pub stored_queries: StoredQueryCatalog,
    /// Data sampled before the run.
    pub sample: Arc<DataSample>,
    /// Run settings.
    pub settings: Arc<VerificationSettings>,
}

impl VerificationContext {
    /// Capabilities of the service under test.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet { self.dispatcher.capabilities() }

    /// Current time on the context clock.
    #[must_use]
    pub fn now(&self) -> Duration { self.clock.now() }

    /// Pick an instantiated feature type.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when no type holds data.
    pub fn pick_type(&mut self) -> VerifyResult<TypeName> {
        let types: Vec<TypeName> = self.sample.instantiated_types().cloned().collect();
        pick(self.selector.as_mut(), &types)
            .cloned()
            .ok_or_else(|| VerifyError::unsupported("no instantiated feature type"))
    }

    /// Pick an instantiated feature type other than `excluded`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when fewer than two types hold
    /// data.
    pub fn pick_other_type(&mut self, excluded: &TypeName) -> VerifyResult<TypeName> {
        let types: Vec<TypeName> = self
            .sample
            .instantiated_types()
            .filter(|t| *t != excluded)
            .cloned()
            .collect();
        pick(self.selector.as_mut(), &types)
            .cloned()
            .ok_or_else(|| VerifyError::unsupported("a second instantiated feature type"))
    }

    /// Pick one sampled feature id of `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when the type was not sampled.
    pub fn pick_feature(&mut self, type_name: &TypeName) -> VerifyResult<String> {
        let sample = Arc::clone(&self.sample);
        pick(self.selector.as_mut(), sample.ids(type_name))
            .cloned()
            .ok_or_else(|| VerifyError::unsupported(format!("no sampled instance of {type_name}")))
    }

    /// Release everything this case left behind.
    pub async fn release_all(&mut self) -> Vec<ResourceLeakWarning> {
        self.ledger.release_all(&self.dispatcher, &self.builder).await
    }
}

/// Creates a fresh [`VerificationContext`] per test case.
#[derive(Clone)]
pub struct ContextFactory {
    transport: Arc<dyn Transport>,
    capabilities: Arc<CapabilitySet>,
    validator: ResponseValidator,
    clock: Arc<dyn Clock>,
    sample: Arc<DataSample>,
    settings: Arc<VerificationSettings>,
}

impl fmt::Debug for ContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFactory")
            .field("settings", &self.settings)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ContextFactory {
    /// Create a factory with an empty data sample.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        capabilities: Arc<CapabilitySet>,
        clock: Arc<dyn Clock>,
        settings: VerificationSettings,
    ) -> Self {
        Self {
            transport,
            capabilities,
            validator: ResponseValidator::new(),
            clock,
            sample: Arc::new(DataSample::new()),
            settings: Arc::new(settings),
        }
    }

    /// Use a different validator.
    #[must_use]
    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Adopt a data sample, marking sampled types as instantiated.
    #[must_use]
    pub fn with_sample(mut self, sample: DataSample) -> Self {
        self.capabilities = Arc::new(self.capabilities.with_sample(&sample));
        self.sample = Arc::new(sample);
        self
    }

    /// Sample the service and adopt the result.
    pub async fn sample_service(self) -> Self {
        let dispatcher = self.dispatcher();
        let builder = RequestBuilder::new(Arc::clone(&self.capabilities));
        let sample = FeatureSampler::new(&builder, &dispatcher, self.settings.sample_size)
            .sample()
            .await;
        info!(
            instantiated = sample.instantiated_types().count(),
            "service data sampled"
        );
        self.with_sample(sample)
    }

    /// Shared capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &Arc<CapabilitySet> { &self.capabilities }

    /// Shared data sample.
    #[must_use]
    pub fn sample(&self) -> &DataSample { &self.sample }

    /// Run settings.
    #[must_use]
    pub fn settings(&self) -> &VerificationSettings { &self.settings }

    /// Dispatcher over the shared transport.
    #[must_use]
    pub fn dispatcher(&self) -> BindingDispatcher {
        BindingDispatcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.capabilities),
            self.settings.request_timeout,
        )
        .with_soap_version(self.settings.soap_version)
    }

    /// Fresh context for the named case.
    #[must_use]
    pub fn create(&self, case: &str) -> VerificationContext {
        VerificationContext {
            case: case.to_owned(),
            builder: RequestBuilder::new(Arc::clone(&self.capabilities)),
            dispatcher: self.dispatcher(),
            validator: self.validator.clone(),
            clock: Arc::clone(&self.clock),
            selector: Box::new(SeededSelector::new(case_seed(self.settings.seed, case))),
            ledger: ResourceLedger::new(),
            locks: LockLifecycleModel::new(),
            stored_queries: StoredQueryCatalog::new(),
            sample: Arc::clone(&self.sample),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// FNV-1a over the case name, starting from the run seed.
fn case_seed(seed: u64, case: &str) -> u64 {
    case.bytes().fold(seed ^ 0xcbf2_9ce4_8422_2325, |acc, byte| {
        (acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}
