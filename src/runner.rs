//! Run orchestration for the `wfs-verify` binary.
//!
//! Keeps the binary thin: configuration is turned into
//! [`VerificationSettings`], the capabilities document is loaded, the service
//! is sampled and the registered cases are run.

use std::{collections::BTreeSet, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use cli_defs::VerifyConfig;
use tracing::info;
use url::Url;

use crate::{
    capabilities::CapabilitySet,
    clock::{Clock, SystemClock},
    context::{ContextFactory, VerificationSettings},
    dispatch::{HttpMethod, HttpRequest, HttpTransport, SoapVersion, Transport},
    protocol::ConformanceClass,
    suite::{RunReport, cases, run_suite},
};

/// Output format of the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// One line per case.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow!("unknown report format '{other}'")),
        }
    }
}

/// Render `report` in `format`.
///
/// # Errors
///
/// Returns an error if JSON serialisation fails.
pub fn render(report: &RunReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(report.to_text()),
        ReportFormat::Json => report.to_json().context("serialising run report"),
    }
}

/// Settings for a run described by `config`.
///
/// # Errors
///
/// Returns an error for an unknown SOAP version or a zero paging window.
pub fn settings_from(config: &VerifyConfig) -> Result<VerificationSettings> {
    let soap_version = SoapVersion::from_str(&config.soap_version).map_err(|err| anyhow!(err))?;
    if config.page_window == 0 {
        bail!("page window must be at least 1");
    }
    Ok(VerificationSettings {
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        run_timeout: Duration::from_secs(config.run_timeout_secs),
        lock_expiry: Duration::from_secs(config.lock_expiry_secs),
        expiry_buffer: Duration::from_secs(config.expiry_buffer_secs),
        page_window: config.page_window,
        sample_size: config.sample_size,
        seed: config.seed,
        soap_version,
        ..VerificationSettings::default()
    })
}

/// Conformance classes named in a comma-separated list. `None` or an empty
/// list selects every class.
///
/// # Errors
///
/// Returns an error naming the first unknown class.
pub fn parse_classes(only: Option<&str>) -> Result<BTreeSet<ConformanceClass>> {
    only.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| ConformanceClass::from_str(name).map_err(anyhow::Error::from))
        .collect()
}

/// `GetCapabilities` request for `endpoint`. Parameters already present in
/// the URL are kept.
#[must_use]
pub fn capabilities_request(endpoint: &Url) -> HttpRequest {
    let mut url = endpoint.clone();
    let has = |key: &str| endpoint.query_pairs().any(|(k, _)| k.eq_ignore_ascii_case(key));
    let missing: Vec<(&str, &str)> = [("service", "WFS"), ("request", "GetCapabilities")]
        .into_iter()
        .filter(|(key, _)| !has(key))
        .collect();
    if !missing.is_empty() {
        url.query_pairs_mut().extend_pairs(missing);
    }
    HttpRequest {
        method: HttpMethod::Get,
        url,
        headers: vec![("Accept".to_owned(), "application/xml, text/xml".to_owned())],
        body: None,
    }
}

/// Load the capabilities document named by `config`, preferring a local
/// file over the URL.
///
/// # Errors
///
/// Returns an error when neither source is configured, the document cannot
/// be obtained or it is not a capabilities document.
pub async fn load_capabilities(
    config: &VerifyConfig,
    transport: &dyn Transport,
    timeout: Duration,
) -> Result<CapabilitySet> {
    if let Some(path) = &config.capabilities_file {
        let document = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading capabilities from {path}"))?;
        return CapabilitySet::parse(&document)
            .with_context(|| format!("parsing capabilities from {path}"));
    }
    let raw = config
        .capabilities_url
        .as_deref()
        .ok_or_else(|| anyhow!("either --capabilities-url or --capabilities-file is required"))?;
    let endpoint = Url::parse(raw).with_context(|| format!("invalid capabilities URL {raw}"))?;
    let reply = transport
        .send(capabilities_request(&endpoint), timeout)
        .await
        .context("fetching capabilities")?;
    if reply.status != 200 {
        bail!("GetCapabilities at {endpoint} returned status {}", reply.status);
    }
    CapabilitySet::parse(&reply.body)
        .with_context(|| format!("parsing capabilities from {endpoint}"))
}

/// Run the registered cases against the service reached through
/// `transport`.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the capabilities
/// cannot be loaded. Case failures are reported, not returned.
pub async fn run_with(
    config: &VerifyConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
) -> Result<RunReport> {
    let settings = settings_from(config)?;
    let only = parse_classes(config.only.as_deref())?;
    let capabilities =
        load_capabilities(config, transport.as_ref(), settings.request_timeout).await?;
    info!(
        version = capabilities.version(),
        feature_types = capabilities.feature_types().len(),
        "capabilities loaded"
    );
    let factory = ContextFactory::new(transport, Arc::new(capabilities), clock, settings)
        .sample_service()
        .await;
    Ok(run_suite(&factory, &cases::registry(), &only).await)
}

/// Run against a live service over HTTP.
///
/// # Errors
///
/// See [`run_with`]; also fails when the HTTP client cannot be built.
pub async fn run(config: &VerifyConfig) -> Result<RunReport> {
    let transport = HttpTransport::new().context("building HTTP client")?;
    run_with(config, Arc::new(transport), Arc::new(SystemClock::new())).await
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(None, 0)]
    #[case(Some(""), 0)]
    #[case(Some("locking"), 1)]
    #[case(Some("locking, paging,ManageStoredQueries"), 3)]
    fn parses_class_lists(#[case] only: Option<&str>, #[case] expected: usize) {
        assert_eq!(parse_classes(only).expect("classes").len(), expected);
    }

    #[rstest]
    fn rejects_unknown_classes() {
        let err = parse_classes(Some("locking,teleportation")).expect_err("unknown class");
        assert!(err.to_string().contains("teleportation"));
    }

    #[rstest]
    fn capabilities_request_keeps_existing_parameters() {
        let endpoint = Url::parse("http://iut.test/wfs?map=roads&SERVICE=WFS").expect("url");
        let request = capabilities_request(&endpoint);
        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("map".to_owned(), "roads".to_owned()),
                ("SERVICE".to_owned(), "WFS".to_owned()),
                ("request".to_owned(), "GetCapabilities".to_owned()),
            ]
        );
    }

    #[rstest]
    fn settings_follow_configuration() {
        let config = VerifyConfig {
            lock_expiry_secs: 12,
            soap_version: "1.1".to_owned(),
            page_window: 3,
            ..VerifyConfig::default()
        };
        let settings = settings_from(&config).expect("settings");
        assert_eq!(settings.lock_expiry, Duration::from_secs(12));
        assert_eq!(settings.soap_version, SoapVersion::V11);
        assert_eq!(settings.page_window, 3);
    }

    #[rstest]
    #[case("1.3", 1)]
    #[case("1.2", 0)]
    fn settings_reject_invalid_values(#[case] soap: &str, #[case] window: u32) {
        let config = VerifyConfig {
            soap_version: soap.to_owned(),
            page_window: window,
            ..VerifyConfig::default()
        };
        assert!(settings_from(&config).is_err());
    }

    #[rstest]
    #[case("text", ReportFormat::Text)]
    #[case("JSON", ReportFormat::Json)]
    fn parses_report_formats(#[case] raw: &str, #[case] expected: ReportFormat) {
        assert_eq!(raw.parse::<ReportFormat>().expect("format"), expected);
    }
}
