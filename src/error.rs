use derive_more::Display;
use std::{
    io,
    path::PathBuf,
};

/// Errors raised while configuring the client, before any request is sent.
#[derive(Debug, Display)]
pub enum ConfigError {
    /// A custom header is not a `key=value` pair, or is not a valid HTTP header.
    #[display(fmt = "invalid header \"{header}\": {reason}")]
    InvalidHeader { header: String, reason: String },
    #[display(fmt = "invalid url \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
    #[display(fmt = "failed to read {path:?}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },
    /// The CA certificate, or the client certificate and key, could not be loaded.
    #[display(fmt = "invalid certificate in {path:?}: {source}")]
    InvalidCertificate {
        path: PathBuf,
        source: reqwest::Error,
    },
    #[display(fmt = "a client certificate and a client key must be given together")]
    IncompleteKeyPair,
    #[display(fmt = "failed to build the http client: {_0}")]
    Build(reqwest::Error),
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::InvalidCertificate { source, .. } => Some(source),
            Self::Build(source) => Some(source),
            Self::InvalidHeader { .. } | Self::InvalidUrl { .. } | Self::IncompleteKeyPair => None,
        }
    }
}

/// A failed delivery attempt.
#[derive(Debug, Display)]
pub enum PushError {
    #[display(fmt = "failed to compress the write request: {_0}")]
    Compress(snap::Error),
    /// The request could not be sent, or the response could not be read.
    #[display(fmt = "failed to send the write request: {_0}")]
    Transport(reqwest::Error),
    /// The endpoint answered with a status other than 200.
    #[display(fmt = "unable to push timeseries: {status} - {body}")]
    Status { status: u16, body: String },
}

impl PushError {
    /// The status code returned by the endpoint, if it answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Compress(_) | Self::Transport(_) => None,
        }
    }
}

impl std::error::Error for PushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compress(source) => Some(source),
            Self::Transport(source) => Some(source),
            Self::Status { .. } => None,
        }
    }
}

impl From<snap::Error> for PushError {
    fn from(value: snap::Error) -> Self {
        Self::Compress(value)
    }
}

impl From<reqwest::Error> for PushError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}
