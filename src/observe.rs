//! Observation points of the login pipeline.
//!
//! The pipeline reports what it does through an [`AuthObserver`] instead of
//! printing or dumping responses itself. [`TracingObserver`] forwards every
//! event to `tracing`; tests can plug in a recorder.

use crate::okta::transaction::AuthStatus;
use std::fmt;
use tracing::{debug, info};

/// Where an authentication transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    PrimarySubmitted,
    Status(AuthStatus),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::PrimarySubmitted => f.write_str("PRIMARY_SUBMITTED"),
            Self::Status(status) => status.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    RequestSent {
        method: &'static str,
        endpoint: String,
    },
    ResponseReceived {
        endpoint: String,
        status: u16,
    },
    StateTransition {
        from: Phase,
        to: Phase,
    },
    Retrying {
        operation: &'static str,
        attempt: u32,
        delay_ms: u64,
    },
}

pub trait AuthObserver: Send + Sync {
    fn on_event(&self, event: &AuthEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AuthObserver for TracingObserver {
    fn on_event(&self, event: &AuthEvent) {
        match event {
            AuthEvent::RequestSent { method, endpoint } => {
                debug!(http.method = method, url = %endpoint, "request sent");
            }
            AuthEvent::ResponseReceived { endpoint, status } => {
                debug!(url = %endpoint, http.status = status, "response received");
            }
            AuthEvent::StateTransition { from, to } => {
                info!("authentication state {} -> {}", from, to);
            }
            AuthEvent::Retrying {
                operation,
                attempt,
                delay_ms,
            } => {
                info!("{} failed, attempt {} in {}ms", operation, attempt, delay_ms);
            }
        }
    }
}
