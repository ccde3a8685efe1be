//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (alpha in (0, 1], buffers non-trivial, ports valid)
//! - Validate addresses that are parsed later at bind time
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// Smallest buffer that still fits a realistic request head.
pub const MIN_BUFFER_CAPACITY: usize = 256;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),
    #[error("listener.max_connections must be greater than 0")]
    MaxConnections,
    #[error("origin.host must not be empty when origin.www_ip is unset")]
    OriginHost,
    #[error("origin.port must not be 0")]
    OriginPort,
    #[error("abr.alpha must be in (0, 1], got {0}")]
    Alpha(f64),
    #[error("abr.threshold_factor must be positive, got {0}")]
    ThresholdFactor(f64),
    #[error("abr.initial_throughput_kbps must be non-negative, got {0}")]
    InitialThroughput(f64),
    #[error("buffers.capacity must be at least {MIN_BUFFER_CAPACITY} bytes, got {0}")]
    BufferCapacity(usize),
    #[error("buffers.{0} must be greater than 0")]
    BufferLimit(&'static str),
    #[error("event_loop.{0} must be greater than 0")]
    EventLoop(&'static str),
    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Check a configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    if config.origin.www_ip.is_none() && config.origin.host.trim().is_empty() {
        errors.push(ValidationError::OriginHost);
    }
    if config.origin.port == 0 {
        errors.push(ValidationError::OriginPort);
    }

    let abr = &config.abr;
    if !(abr.alpha > 0.0 && abr.alpha <= 1.0) {
        errors.push(ValidationError::Alpha(abr.alpha));
    }
    if !(abr.threshold_factor > 0.0 && abr.threshold_factor.is_finite()) {
        errors.push(ValidationError::ThresholdFactor(abr.threshold_factor));
    }
    if !(abr.initial_throughput_kbps >= 0.0 && abr.initial_throughput_kbps.is_finite()) {
        errors.push(ValidationError::InitialThroughput(abr.initial_throughput_kbps));
    }

    let buffers = &config.buffers;
    if buffers.capacity < MIN_BUFFER_CAPACITY {
        errors.push(ValidationError::BufferCapacity(buffers.capacity));
    }
    if buffers.max_manifest_bytes == 0 {
        errors.push(ValidationError::BufferLimit("max_manifest_bytes"));
    }
    if buffers.max_pending_bytes == 0 {
        errors.push(ValidationError::BufferLimit("max_pending_bytes"));
    }
    if buffers.read_chunk == 0 {
        errors.push(ValidationError::BufferLimit("read_chunk"));
    }

    if config.event_loop.poll_timeout_ms == 0 {
        errors.push(ValidationError::EventLoop("poll_timeout_ms"));
    }
    if config.event_loop.events_capacity == 0 {
        errors.push(ValidationError::EventLoop("events_capacity"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
