//! Binding dispatch.
//!
//! A [`BindingDispatcher`] serialises a [`Payload`] for one of the protocol
//! bindings, sends it through a [`Transport`] and normalises the reply into a
//! [`ResponseRecord`]. SOAP envelopes are stripped so validators see the same
//! document for every binding. Dispatch holds no state between calls and
//! never retries.

pub mod envelope;
pub mod transport;

use std::{fmt, sync::Arc, time::Duration};

use tracing::debug;
use url::Url;

pub use self::{
    envelope::SoapVersion,
    transport::{HttpMethod, HttpReply, HttpRequest, HttpTransport, Transport, TransportError},
};
use crate::{
    capabilities::CapabilitySet,
    error::{VerifyError, VerifyResult},
    protocol::{OWS_NS, Operation},
    request::Payload,
    xml::{self, XmlElement},
};

/// Encoding and transport binding of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Binding {
    /// Key-value pairs over HTTP GET.
    Get,
    /// XML over HTTP POST.
    Post,
    /// SOAP envelope over HTTP POST.
    Soap,
    /// Whatever the service advertises first.
    Any,
}

impl Binding {
    /// HTTP method used by the binding, `None` for [`Binding::Any`].
    #[must_use]
    pub const fn method(self) -> Option<HttpMethod> {
        match self {
            Self::Get => Some(HttpMethod::Get),
            Self::Post | Self::Soap => Some(HttpMethod::Post),
            Self::Any => None,
        }
    }

    /// Lowercase label used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Soap => "soap",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One `ows:Exception` of an exception report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// `exceptionCode` attribute.
    pub code: String,
    /// `locator` attribute, if any.
    pub locator: Option<String>,
    /// `ows:ExceptionText` contents.
    pub texts: Vec<String>,
}

impl ExceptionEntry {
    fn from_element(el: &XmlElement) -> Self {
        Self {
            code: el.attr("exceptionCode").unwrap_or_default().to_owned(),
            locator: el.attr("locator").map(str::to_owned),
            texts: el
                .children_named(OWS_NS, "ExceptionText")
                .map(|t| t.text().to_owned())
                .collect(),
        }
    }
}

/// Normalised response of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    /// HTTP status.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: String,
    /// Parsed document with any SOAP envelope removed.
    pub document: Option<XmlElement>,
    /// Parse error when the body looked like XML but was not well formed.
    pub parse_error: Option<String>,
    exceptions: Vec<ExceptionEntry>,
}

impl ResponseRecord {
    /// Normalise a transport reply.
    #[must_use]
    pub fn from_reply(reply: HttpReply) -> Self {
        let (document, parse_error) = if xml::looks_like_xml(&reply.body) {
            match xml::parse(&reply.body) {
                Ok(doc) => (Some(envelope::unwrap(doc)), None),
                Err(err) => (None, Some(err.to_string())),
            }
        } else {
            (None, None)
        };
        let exceptions = document
            .as_ref()
            .filter(|doc| doc.is(OWS_NS, "ExceptionReport"))
            .map(|report| {
                report
                    .children_named(OWS_NS, "Exception")
                    .map(ExceptionEntry::from_element)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            status: reply.status,
            headers: reply.headers,
            body: reply.body,
            document,
            parse_error,
            exceptions,
        }
    }

    /// Root element of the document.
    #[must_use]
    pub const fn root(&self) -> Option<&XmlElement> { self.document.as_ref() }

    /// Attribute of the root element.
    #[must_use]
    pub fn root_attr(&self, name: &str) -> Option<&str> { self.root().and_then(|r| r.attr(name)) }

    /// Exceptions reported by the service.
    #[must_use]
    pub fn exceptions(&self) -> &[ExceptionEntry] { &self.exceptions }

    /// Return `true` when the body is an exception report.
    #[must_use]
    pub const fn is_exception(&self) -> bool { !self.exceptions.is_empty() }

    /// Code of the first reported exception.
    #[must_use]
    pub fn exception_code(&self) -> Option<&str> {
        self.exceptions.first().map(|e| e.code.as_str())
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { transport::find_header(&self.headers, name) }
}

/// A request resolved to a concrete binding and endpoint.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Operation being sent.
    pub operation: Operation,
    /// Concrete binding, never [`Binding::Any`].
    pub binding: Binding,
    /// Endpoint the request goes to.
    pub endpoint: Url,
    /// Request payload.
    pub payload: Payload,
}

/// Sends payloads over the advertised bindings.
#[derive(Clone)]
pub struct BindingDispatcher {
    transport: Arc<dyn Transport>,
    capabilities: Arc<CapabilitySet>,
    timeout: Duration,
    soap: SoapVersion,
}

impl fmt::Debug for BindingDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingDispatcher")
            .field("timeout", &self.timeout)
            .field("soap", &self.soap)
            .finish_non_exhaustive()
    }
}

impl BindingDispatcher {
    /// Create a dispatcher with the given per-request timeout.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        capabilities: Arc<CapabilitySet>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            capabilities,
            timeout,
            soap: SoapVersion::default(),
        }
    }

    /// Use a different SOAP version.
    #[must_use]
    pub const fn with_soap_version(mut self, version: SoapVersion) -> Self {
        self.soap = version;
        self
    }

    /// Capabilities the dispatcher resolves endpoints from.
    #[must_use]
    pub const fn capabilities(&self) -> &Arc<CapabilitySet> { &self.capabilities }

    /// Resolve `binding` and the endpoint for a payload.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when the binding or an endpoint
    /// for it is not advertised.
    pub fn prepare(
        &self,
        payload: &Payload,
        binding: Binding,
        endpoint: Option<&Url>,
    ) -> VerifyResult<RequestContext> {
        let operation = payload.operation();
        let concrete = match binding {
            Binding::Any => self.capabilities.default_binding(operation).ok_or_else(|| {
                VerifyError::unsupported(format!("no binding advertised for {operation}"))
            })?,
            other => other,
        };
        let Some(method) = concrete.method() else {
            return Err(VerifyError::unsupported(format!("{concrete} binding")));
        };
        let resolved = match endpoint {
            Some(url) => url.clone(),
            None => self
                .capabilities
                .endpoint(operation, method)
                .cloned()
                .ok_or_else(|| {
                    VerifyError::unsupported(format!(
                        "{operation} has no {} endpoint",
                        method.as_str()
                    ))
                })?,
        };
        Ok(RequestContext {
            operation,
            binding: concrete,
            endpoint: resolved,
            payload: payload.clone(),
        })
    }

    /// Send a payload and normalise the response.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Unsupported`] when the binding is not
    /// advertised, [`VerifyError::MalformedRequest`] when the payload has no
    /// encoding for the binding, and [`VerifyError::TransportFailure`] when no
    /// response was obtained.
    pub async fn dispatch(
        &self,
        payload: &Payload,
        binding: Binding,
        endpoint: Option<&Url>,
    ) -> VerifyResult<ResponseRecord> {
        let ctx = self.prepare(payload, binding, endpoint)?;
        self.send(&ctx).await
    }

    /// Send a prepared request.
    ///
    /// # Errors
    ///
    /// See [`BindingDispatcher::dispatch`].
    pub async fn send(&self, ctx: &RequestContext) -> VerifyResult<ResponseRecord> {
        let request = self.encode(ctx)?;
        debug!(
            operation = %ctx.operation,
            binding = %ctx.binding,
            endpoint = %ctx.endpoint,
            "dispatching request"
        );
        self.exchange(ctx.operation.name(), request).await
    }

    /// Dereference a continuation URI with GET.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::TransportFailure`] when no response was
    /// obtained.
    pub async fn retrieve(&self, uri: &Url) -> VerifyResult<ResponseRecord> {
        debug!(uri = %uri, "retrieving continuation");
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: uri.clone(),
            headers: Vec::new(),
            body: None,
        };
        self.exchange(Operation::GetFeature.name(), request).await
    }

    fn encode(&self, ctx: &RequestContext) -> VerifyResult<HttpRequest> {
        let payload = &ctx.payload;
        match ctx.binding {
            Binding::Get => {
                let pairs = payload.to_kvp()?;
                let mut url = ctx.endpoint.clone();
                url.query_pairs_mut().clear().extend_pairs(&pairs);
                Ok(HttpRequest {
                    method: HttpMethod::Get,
                    url,
                    headers: Vec::new(),
                    body: None,
                })
            }
            Binding::Post => Ok(HttpRequest {
                method: HttpMethod::Post,
                url: ctx.endpoint.clone(),
                headers: vec![(
                    "Content-Type".to_owned(),
                    "application/xml; charset=utf-8".to_owned(),
                )],
                body: Some(payload.to_xml()),
            }),
            Binding::Soap => {
                let wrapped = envelope::wrap(payload.to_element(), self.soap);
                let mut headers =
                    vec![("Content-Type".to_owned(), self.soap.content_type().to_owned())];
                if self.soap == SoapVersion::V11 {
                    headers.push(("SOAPAction".to_owned(), "\"\"".to_owned()));
                }
                Ok(HttpRequest {
                    method: HttpMethod::Post,
                    url: ctx.endpoint.clone(),
                    headers,
                    body: Some(wrapped.to_xml_with(payload.prefixes())),
                })
            }
            Binding::Any => Err(VerifyError::unsupported("unresolved binding")),
        }
    }

    async fn exchange(
        &self,
        operation: &str,
        request: HttpRequest,
    ) -> VerifyResult<ResponseRecord> {
        let endpoint = request.url.to_string();
        let reply = self
            .transport
            .send(request, self.timeout)
            .await
            .map_err(|err| VerifyError::TransportFailure {
                operation: operation.to_owned(),
                endpoint,
                reason: if err.is_timeout {
                    format!("timed out after {:?}", self.timeout)
                } else {
                    err.message
                },
            })?;
        let record = ResponseRecord::from_reply(reply);
        debug!(
            status = record.status,
            exception = record.exception_code().unwrap_or("none"),
            "response received"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests;
