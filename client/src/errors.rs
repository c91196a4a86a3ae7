// Copyright 2025-2026 The Quarry Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Display;
use std::io;
use std::sync::Arc;

use thiserror::Error as ThisError;

/// Error type returned in the public API.
///
/// Arc-wrapping strategy: non-Clone sources (tonic::Status, io::Error) and
/// nested errors are Arc-wrapped; strings are stored inline.
#[derive(Debug, Clone, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// Malformed data from the master; never retried.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The lookup key falls in a range no tablet covers, or the requested
    /// tablet does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("network error: {0}")]
    NetworkError(String),

    /// The master cannot serve locations right now; retried with backoff.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The contacted master is not the leader of the master quorum.
    #[error("master is not the leader: {0}")]
    MasterNotLeader(String),

    /// Master-reported error with no more specific mapping.
    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("invalid unix domain socket path '{0}'")]
    InvalidSocketPath(String),

    /// Arc-wrapped: tonic::Status is not Clone
    #[error("gRPC error: {0}")]
    Grpc(#[source] Arc<tonic::Status>),

    /// Arc-wrapped: tonic::transport::Error is not Clone
    #[error("gRPC transport error: {0}")]
    Transport(Arc<tonic::transport::Error>),

    /// Arc-wrapped: io::Error is not Clone
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// An error with a description prepended; the inner kind still governs
    /// classification.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Arc<Error>,
    },
}

impl Error {
    /// Prepends a description, keeping the underlying kind for
    /// classification.
    pub fn context(self, context: impl Display) -> Self {
        Error::Wrapped {
            context: context.to_string(),
            source: Arc::new(self),
        }
    }

    /// Whether the error is transient and worth retrying before the
    /// deadline.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NetworkError(_)
            | Error::ServiceUnavailable(_)
            | Error::MasterNotLeader(_)
            | Error::Transport(_) => true,
            Error::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::Unknown | tonic::Code::Internal
            ),
            Error::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
            ),
            Error::Wrapped { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn is_service_unavailable(&self) -> bool {
        match self {
            Error::ServiceUnavailable(_) => true,
            Error::Grpc(status) => status.code() == tonic::Code::Unavailable,
            Error::Wrapped { source, .. } => source.is_service_unavailable(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Grpc(status) => status.code() == tonic::Code::NotFound,
            Error::Wrapped { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_master_not_leader(&self) -> bool {
        match self {
            Error::MasterNotLeader(_) => true,
            Error::Wrapped { source, .. } => source.is_master_not_leader(),
            _ => false,
        }
    }

    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Corruption(_) => true,
            Error::Wrapped { source, .. } => source.is_corruption(),
            _ => false,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        match self {
            Error::TimedOut(_) => true,
            Error::Grpc(status) => status.code() == tonic::Code::DeadlineExceeded,
            Error::Wrapped { source, .. } => source.is_timed_out(),
            _ => false,
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::NotFound => Error::NotFound(status.message().to_string()),
            tonic::Code::DeadlineExceeded => Error::TimedOut(status.message().to_string()),
            _ => Error::Grpc(Arc::new(status)),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport(Arc::new(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            Error::TimedOut(err.to_string())
        } else {
            Error::Io(Arc::new(err))
        }
    }
}
