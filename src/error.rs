//! Error handling for the runtime core.
//!
//! Every request the core handles originates as a gRPC call from kubelet to
//! `runtime.v1.RuntimeService`, so every fallible path ultimately needs to
//! become a [`tonic::Status`]. Internally, operations are free to use
//! [`anyhow::Context`] to build up a cause chain; [`Error`] is the small,
//! closed set of kinds that chain collapses to at the RPC boundary (see
//! spec §7).

use std::time::Duration;

use thiserror::Error;
use tonic::{Code, Status};

/// Shorthand used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error kinds named in spec §7.
#[derive(Debug, Error)]
pub enum Error {
    /// The backend reported that a sandbox or container does not exist.
    /// Recovered locally by idempotent stop/remove calls; surfaced as
    /// `NOT_FOUND` everywhere else.
    #[error("not found: {0}")]
    NotFound(String),

    /// `LXENetworkPlugin` named something other than `default` or `cni`.
    #[error("unknown network plugin: {0}")]
    UnknownNetworkPlugin(String),

    /// One of the four intentionally unimplemented CRI verbs was called.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Any non-not-found error surfaced by the backend client, wrapped with
    /// the operation and entity id that failed.
    #[error("backend failure during {operation} on {entity}")]
    BackendFailure {
        operation: &'static str,
        entity: String,
        #[source]
        source: anyhow::Error,
    },

    /// A network plugin `When*` hook failed.
    #[error("network plugin failure during {hook} for {sandbox_id}")]
    NetworkPluginFailure {
        hook: &'static str,
        sandbox_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The streaming HTTP endpoint failed to set up an exec/port-forward
    /// session.
    #[error("streaming setup failure: {0}")]
    StreamingSetupFailure(#[source] anyhow::Error),

    /// Exec completed with a non-zero exit code. Carries the captured
    /// stdout/stderr alongside the code so a caller that needs the CRI
    /// response shape (spec §8 scenario 6) can still build one from the
    /// error rather than losing the output.
    #[error("command exited with code {code}: {message}")]
    ExecExitError {
        code: i32,
        message: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

impl Error {
    pub fn backend_failure(
        operation: &'static str,
        entity: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Error::BackendFailure {
            operation,
            entity: entity.into(),
            source,
        }
    }

    pub fn network_plugin_failure(
        hook: &'static str,
        sandbox_id: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Error::NetworkPluginFailure {
            hook,
            sandbox_id: sandbox_id.into(),
            source,
        }
    }

    /// True for the one kind that idempotent stop/remove calls must swallow.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Status {
        match &err {
            Error::NotFound(id) => Status::new(Code::NotFound, id.clone()),
            Error::UnknownNetworkPlugin(_) => Status::new(Code::FailedPrecondition, err.to_string()),
            Error::NotImplemented(what) => Status::new(Code::Unimplemented, *what),
            Error::ExecExitError { message, .. } => Status::new(Code::Internal, message.clone()),
            Error::BackendFailure { .. }
            | Error::NetworkPluginFailure { .. }
            | Error::StreamingSetupFailure(_) => Status::new(Code::Internal, format!("{err:#}")),
        }
    }
}

/// Timeout applied to container stop calls cascaded from sandbox
/// stop/remove (spec §5).
pub const CASCADE_STOP_TIMEOUT: Duration = Duration::from_secs(30);
