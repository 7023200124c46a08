use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};
use uuid::Uuid;

const TELEMETRY_TARGET: &str = "plubot::events::telemetry";

/// Operation names used by the persistence layer.
pub const OP_SAVE_FLOW: &str = "SaveFlow";
pub const OP_WRITE_BACKUP: &str = "WriteBackup";
pub const OP_RECOVER_BACKUP: &str = "RecoverBackup";
pub const OP_RESTORE_MANUAL_BACKUP: &str = "RestoreManualBackup";
pub const OP_IMPORT_MANUAL_BACKUP: &str = "ImportManualBackup";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationLifecycle {
    Start,
    Success,
    Failure,
}

impl fmt::Display for OperationLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "operation_start"),
            Self::Success => write!(f, "operation_success"),
            Self::Failure => write!(f, "operation_failure"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationTelemetry {
    pub correlation_id: String,
    pub operation: String,
    pub project_id: Option<String>,
    pub lifecycle: OperationLifecycle,
    pub error_reason: Option<String>,
    pub duration_ms: Option<u128>,
}

impl OperationTelemetry {
    fn new(
        operation: &str,
        correlation_id: &str,
        project_id: Option<&str>,
        lifecycle: OperationLifecycle,
    ) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            operation: operation.to_string(),
            project_id: project_id.map(str::to_string),
            lifecycle,
            error_reason: None,
            duration_ms: None,
        }
    }

    fn now_unix_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    }
}

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn operation_start(
    operation: &str,
    correlation_id: &str,
    project_id: Option<&str>,
) -> OperationTelemetry {
    let telemetry = OperationTelemetry::new(
        operation,
        correlation_id,
        project_id,
        OperationLifecycle::Start,
    );
    debug!(
        target: TELEMETRY_TARGET,
        operation = %telemetry.operation,
        correlation_id = %telemetry.correlation_id,
        project_id = ?telemetry.project_id,
        lifecycle = %telemetry.lifecycle,
        timestamp_ms = OperationTelemetry::now_unix_ms(),
        "operation_start"
    );
    telemetry
}

pub fn operation_success(
    operation: &str,
    correlation_id: &str,
    project_id: Option<&str>,
    duration_ms: Option<u128>,
) -> OperationTelemetry {
    let mut telemetry = OperationTelemetry::new(
        operation,
        correlation_id,
        project_id,
        OperationLifecycle::Success,
    );
    telemetry.duration_ms = duration_ms;
    info!(
        target: TELEMETRY_TARGET,
        operation = %telemetry.operation,
        correlation_id = %telemetry.correlation_id,
        project_id = ?telemetry.project_id,
        lifecycle = %telemetry.lifecycle,
        duration_ms = ?telemetry.duration_ms,
        timestamp_ms = OperationTelemetry::now_unix_ms(),
        "operation_success"
    );
    telemetry
}

pub fn operation_failure(
    operation: &str,
    correlation_id: &str,
    project_id: Option<&str>,
    reason: Option<String>,
) -> OperationTelemetry {
    let mut telemetry = OperationTelemetry::new(
        operation,
        correlation_id,
        project_id,
        OperationLifecycle::Failure,
    );
    telemetry.error_reason = reason;
    let error_reason = telemetry.error_reason.as_deref().unwrap_or("unclassified");

    error!(
        target: TELEMETRY_TARGET,
        operation = %telemetry.operation,
        correlation_id = %telemetry.correlation_id,
        project_id = ?telemetry.project_id,
        lifecycle = %telemetry.lifecycle,
        error = %error_reason,
        timestamp_ms = OperationTelemetry::now_unix_ms(),
        "operation_failure"
    );

    telemetry
}
