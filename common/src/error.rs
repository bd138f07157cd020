use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {0}; add it to the credentials store before flashing")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("sensor did not respond")]
    Timeout,
    #[error("sensor checksum mismatch")]
    ChecksumMismatch,
    #[error("sensor line fault: {0}")]
    Line(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("failed to read request: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write response: {0}")]
    Write(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("wifi driver refused to connect: {0}")]
    Driver(String),
    #[error("wifi still down after {attempts} connect attempt(s)")]
    AttemptsExhausted { attempts: u32 },
}
