use clap::{
    Parser,
    ValueHint,
};
use prom_push::{
    parse_headers,
    ClientConfig,
    ConfigError,
    FormatOptions,
    TlsOptions,
    DEFAULT_JOB_LABEL,
};
use std::{
    path::PathBuf,
    time::Duration,
};

/// Read Prometheus exposition text from stdin and push it to a remote write endpoint.
#[derive(Parser, Debug)]
#[command(name = "prom-push", version, about, long_about = None)]
pub struct Cli {
    /// Remote write endpoint
    #[arg(long, env = "PROM_PUSH_URL", value_hint = ValueHint::Url)]
    pub url: String,

    /// PEM file with a CA certificate to trust
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub tls_ca_file: Option<PathBuf>,

    /// PEM file with the client certificate
    #[arg(long, value_hint = ValueHint::FilePath, requires = "tls_key_file")]
    pub tls_cert_file: Option<PathBuf>,

    /// PEM file with the client private key
    #[arg(long, value_hint = ValueHint::FilePath, requires = "tls_cert_file")]
    pub tls_key_file: Option<PathBuf>,

    /// Do not verify the server certificate
    #[arg(long)]
    pub tls_skip_verify: bool,

    /// Use HTTP/2 without negotiation (https endpoints with TLS flags only)
    #[arg(long)]
    pub enable_http2: bool,

    /// Seconds allowed for each attempt
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Dump requests and responses
    #[arg(long)]
    pub debug: bool,

    /// Value of the job label added to every time series
    #[arg(long, default_value = DEFAULT_JOB_LABEL)]
    pub job_label: String,

    /// Extra header as key=value, may be repeated
    #[arg(long = "header", value_name = "KEY=VALUE")]
    pub headers: Vec<String>,

    /// Send time series without metadata (deprecated)
    #[arg(long)]
    pub no_metadata: bool,
}

impl Cli {
    /// The TLS options, when any TLS flag is set.
    pub fn tls_options(&self) -> Option<TlsOptions> {
        let any_set = self.tls_ca_file.is_some()
            || self.tls_cert_file.is_some()
            || self.tls_key_file.is_some()
            || self.tls_skip_verify;
        any_set.then(|| TlsOptions {
            ca_file: self.tls_ca_file.clone(),
            cert_file: self.tls_cert_file.clone(),
            key_file: self.tls_key_file.clone(),
            insecure_skip_verify: self.tls_skip_verify,
            enable_http2: self.enable_http2,
        })
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::new(self.url.as_str());
        config.timeout = Duration::from_secs(self.timeout);
        config.headers = parse_headers(&self.headers)?;
        config.tls = self.tls_options();
        config.debug = self.debug;
        Ok(config)
    }

    pub fn format_options(&self) -> FormatOptions {
        let options = FormatOptions::new(self.job_label.as_str());
        match self.no_metadata {
            true => options.without_metadata(),
            false => options,
        }
    }
}
