// error.rs - Fatal setup errors shared by the capture and audit handles
use std::io;
use thiserror::Error;

/// Errors that abort startup. Per-frame and per-record decode failures
/// are represented separately (`network::packet::PacketError`,
/// `process::bsm::TokenError`) and are recovered inside the read loops.
#[derive(Debug, Error)]
pub enum Error {
    /// No numbered capture device could be opened at all.
    #[error("no capture device available (tried 0..{tried})")]
    DeviceUnavailable { tried: usize },

    /// A capture device opened, but one of its configuration steps failed.
    /// This does not fall through to the next device.
    #[error("capture device configuration failed ({step}): {source}")]
    DeviceConfigurationFailed {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    /// The requested interface does not exist on this host.
    #[error("interface '{name}' not found; available: {available}")]
    InterfaceNotFound { name: String, available: String },

    /// The audit trail device could not be opened.
    #[error("could not open audit pipe: {0}")]
    AuditPipeUnavailable(#[source] io::Error),

    /// The audit trail opened, but a preselection control call failed.
    #[error("audit pipe configuration failed ({step}): {source}")]
    AuditConfigurationFailed {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    /// Reading one audit record failed. Non-fatal: the read loop logs
    /// this and retries on the next pass.
    #[error("audit record unreadable: {0}")]
    AuditRecordUnreadable(#[source] io::Error),
}

impl Error {
    /// True when the underlying OS error suggests missing privileges,
    /// so the top level can hint at running as root.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::DeviceConfigurationFailed { source, .. }
            | Error::AuditConfigurationFailed { source, .. }
            | Error::AuditPipeUnavailable(source)
            | Error::AuditRecordUnreadable(source) => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
