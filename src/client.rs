//! Delivery of write requests to a remote write endpoint.
use super::{
    error::{
        ConfigError,
        PushError,
    },
    remote_write::WriteRequest,
};
use derive_more::{
    Deref,
    From,
};
use prost::Message;
use reqwest::{
    blocking,
    header::{
        HeaderMap,
        HeaderName,
        HeaderValue,
        CONTENT_ENCODING,
        CONTENT_TYPE,
    },
    Certificate,
    Identity,
    Method,
    Url,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    thread,
    time::{
        Duration,
        Instant,
    },
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

const REMOTE_WRITE_VERSION_HEADER: &str = "x-prometheus-remote-write-version";
const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// The time allowed for a single attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An extra header sent with every request, given as `key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomHeader {
    pub name: HeaderName,
    pub value: HeaderValue,
}

impl FromStr for CustomHeader {
    type Err = ConfigError;

    /// Split on the first `=`, so the value may contain `=` itself. Nothing is trimmed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidHeader {
            header: s.to_string(),
            reason,
        };
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| invalid("expected key=value".to_string()))?;
        let name = HeaderName::from_str(name).map_err(|e| invalid(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { name, value })
    }
}

/// Parse a list of `key=value` headers, keeping their order.
pub fn parse_headers<I, S>(headers: I) -> Result<Vec<CustomHeader>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    headers
        .into_iter()
        .map(|header| header.as_ref().parse())
        .collect()
}

/// The waits between delivery attempts. There is one attempt per wait.
#[derive(Debug, Clone, PartialEq, Eq, Deref, From)]
pub struct BackoffSchedule(Vec<Duration>);

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

/// TLS settings of the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM file with an extra root certificate to trust.
    pub ca_file: Option<PathBuf>,
    /// PEM file with the client certificate. Requires `key_file`.
    pub cert_file: Option<PathBuf>,
    /// PEM file with the client private key. Requires `cert_file`.
    pub key_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
    /// Speak HTTP/2 without negotiation. Only applies to `https` endpoints.
    pub enable_http2: bool,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    /// The time allowed for a single attempt.
    pub timeout: Duration,
    /// Sent after the remote write headers, in order, replacing any header with the same name.
    pub headers: Vec<CustomHeader>,
    /// Without TLS options the transport uses the default trust roots and HTTP/1.1.
    pub tls: Option<TlsOptions>,
    /// Dump every request and response at debug level.
    pub debug: bool,
    pub backoff: BackoffSchedule,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
            headers: Vec::new(),
            tls: None,
            debug: false,
            backoff: BackoffSchedule::default(),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply the TLS options to the transport builder.
fn configure_tls(
    mut builder: blocking::ClientBuilder,
    tls: &TlsOptions,
    url: &Url,
) -> Result<blocking::ClientBuilder, ConfigError> {
    if tls.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = &tls.ca_file {
        let pem = read_file(path)?;
        let certificate =
            Certificate::from_pem(&pem).map_err(|source| ConfigError::InvalidCertificate {
                path: path.clone(),
                source,
            })?;
        builder = builder.add_root_certificate(certificate);
    }
    match (&tls.cert_file, &tls.key_file) {
        (Some(cert_path), Some(key_path)) => {
            let mut pem = read_file(cert_path)?;
            pem.push(b'\n');
            pem.extend(read_file(key_path)?);
            let identity =
                Identity::from_pem(&pem).map_err(|source| ConfigError::InvalidCertificate {
                    path: cert_path.clone(),
                    source,
                })?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => return Err(ConfigError::IncompleteKeyPair),
    }
    builder = match tls.enable_http2 && url.scheme() == "https" {
        true => builder.http2_prior_knowledge(),
        false => builder.http1_only(),
    };
    Ok(builder)
}

/// Pushes write requests to a single endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    http: blocking::Client,
    url: Url,
    headers: HeaderMap,
    backoff: BackoffSchedule,
    debug: bool,
}

impl Client {
    /// Build the transport and the request headers. Nothing is sent.
    pub fn configure(config: ClientConfig) -> Result<Self, ConfigError> {
        let invalid_url = |reason: String| ConfigError::InvalidUrl {
            url: config.url.clone(),
            reason,
        };
        let url = Url::parse(&config.url).map_err(|e| invalid_url(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid_url(format!("unsupported scheme {}", url.scheme())));
        }

        let builder = blocking::Client::builder().timeout(config.timeout);
        let builder = match &config.tls {
            Some(tls) => configure_tls(builder, tls, &url)?,
            None => builder.http1_only(),
        };
        let http = builder.build().map_err(ConfigError::Build)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-protobuf"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("snappy"));
        headers.insert(
            REMOTE_WRITE_VERSION_HEADER,
            HeaderValue::from_static(REMOTE_WRITE_VERSION),
        );
        for header in config.headers {
            headers.insert(header.name, header.value);
        }

        debug!(url = %url, headers = headers.len(), "configured remote write client");
        Ok(Self {
            http,
            url,
            headers,
            backoff: config.backoff,
            debug: config.debug,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    /// Encode, compress and send the request once.
    ///
    /// Any status other than 200 is a failure.
    pub fn push(&self, request: &WriteRequest) -> Result<(), PushError> {
        let body = snap::raw::Encoder::new().compress_vec(&request.encode_to_vec())?;
        let length = body.len();
        if self.debug {
            debug!(url = %self.url, headers = ?self.headers, request = ?request, "request dump");
        }

        let start = Instant::now();
        let response = self
            .http
            .request(Method::POST, self.url.clone())
            .headers(self.headers.clone())
            .body(body)
            .send()
            .map_err(|e| {
                warn!(url = %self.url, error = %e, "failed to send the write request");
                PushError::Transport(e)
            })?;
        let status = response.status();
        info!(
            method = %Method::POST,
            url = %self.url,
            length,
            status = status.as_u16(),
            duration = ?start.elapsed(),
            "pushed write request"
        );
        let response_headers = response.headers().clone();
        let text = response.text()?;
        if self.debug {
            debug!(headers = ?response_headers, body = %text, "response dump");
        }

        match status.as_u16() {
            200 => Ok(()),
            status => Err(PushError::Status { status, body: text }),
        }
    }

    /// Push the request, retrying on the backoff schedule.
    ///
    /// Every failure is followed by its wait, including the last one. An empty schedule means
    /// a single attempt.
    pub fn push_with_retries(&self, request: &WriteRequest) -> Result<(), PushError> {
        if self.backoff.is_empty() {
            return self.push(request);
        }
        let attempts = self.backoff.len();
        let mut last_error = None;
        for (idx, delay) in self.backoff.iter().enumerate() {
            match self.push(request) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        attempt = idx + 1,
                        attempts,
                        error = %e,
                        delay = ?delay,
                        "write request failed, backing off"
                    );
                    last_error = Some(e);
                    thread::sleep(*delay);
                }
            }
        }
        match last_error {
            Some(e) => {
                error!(attempts, error = %e, "giving up on the write request");
                Err(e)
            }
            None => Ok(()),
        }
    }
}
