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

use std::fmt::Debug;
use std::sync::LazyLock;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use quarry_common::proto::{
    GetTableLocationsRequestPb, GetTableLocationsResponsePb, GetTabletLocationsRequestPb,
    GetTabletLocationsResponsePb, MasterErrorPb, app_status, master_error,
};

use crate::Result;
use crate::errors::Error;
use crate::util::LogThrottle;

/// Transport to the master quorum's current leader.
///
/// The cache owns retry policy and response merging; implementations own
/// connection management and master discovery. `reconnect_to_leader` is
/// invoked when a response reveals the contacted master is no longer the
/// leader, before the retry goes out.
pub trait MasterClient: Send + Sync + Debug {
    fn get_table_locations(
        &self,
        req: GetTableLocationsRequestPb,
    ) -> BoxFuture<'_, Result<GetTableLocationsResponsePb>>;

    fn get_tablet_locations(
        &self,
        req: GetTabletLocationsRequestPb,
    ) -> BoxFuture<'_, Result<GetTabletLocationsResponsePb>>;

    fn reconnect_to_leader(&self) -> BoxFuture<'_, ()> {
        Box::pin(std::future::ready(()))
    }
}

/// Access to the optional application-level error all master responses
/// carry.
pub(crate) trait MasterResponse {
    fn error(&self) -> Option<&MasterErrorPb>;
}

impl MasterResponse for GetTableLocationsResponsePb {
    fn error(&self) -> Option<&MasterErrorPb> {
        self.error.as_ref()
    }
}

impl MasterResponse for GetTabletLocationsResponsePb {
    fn error(&self) -> Option<&MasterErrorPb> {
        self.error.as_ref()
    }
}

/// Maps a master-reported error onto the client error kinds.
pub(crate) fn response_error(pb: &MasterErrorPb) -> Error {
    let msg = pb
        .status
        .as_ref()
        .map(|s| s.message.clone())
        .unwrap_or_default();
    match master_error::Code::try_from(pb.code) {
        Ok(master_error::Code::NotTheLeader)
        | Ok(master_error::Code::CatalogManagerNotInitialized) => Error::MasterNotLeader(msg),
        Ok(master_error::Code::TabletNotRunning) => Error::ServiceUnavailable(msg),
        _ => {
            let code = pb
                .status
                .as_ref()
                .and_then(|s| app_status::ErrorCode::try_from(s.code).ok());
            match code {
                Some(app_status::ErrorCode::ServiceUnavailable) => Error::ServiceUnavailable(msg),
                Some(app_status::ErrorCode::NotFound) => Error::NotFound(msg),
                Some(app_status::ErrorCode::TimedOut) => Error::TimedOut(msg),
                Some(app_status::ErrorCode::NetworkError) => Error::NetworkError(msg),
                Some(app_status::ErrorCode::Corruption) => Error::Corruption(msg),
                _ => Error::RemoteError(msg),
            }
        }
    }
}

/// What the lookup retry loop should do about an RPC attempt's error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Surface to the caller; no retry will help.
    Terminal,
    /// Back off and retry until the deadline.
    Transient,
    /// Re-resolve the master leader, then back off and retry.
    LeaderChange,
}

pub(crate) fn retry_decision(err: &Error) -> RetryDecision {
    if err.is_master_not_leader() {
        RetryDecision::LeaderChange
    } else if err.is_retryable() || err.is_service_unavailable() {
        RetryDecision::Transient
    } else {
        RetryDecision::Terminal
    }
}

static TERMINAL_WARN: LazyLock<LogThrottle> = LazyLock::new(LogThrottle::new);

/// Logs a terminal lookup failure, at most once per second across the
/// process.
pub(crate) fn warn_terminal(err: &Error) {
    if TERMINAL_WARN.should_log(Duration::from_secs(1)) {
        warn!(%err, "master lookup failed");
    }
}
