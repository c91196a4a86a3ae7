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

use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    use_unix_domain_sockets: bool,
    tablet_locations_by_id_ttl: Duration,
    max_concurrent_master_lookups: usize,
    lookup_backoff: Duration,
    include_non_voter_replicas: bool,
}

impl Config {
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Whether to try connecting to co-located tablet servers over their
    /// advertised unix domain socket instead of TCP.
    pub fn use_unix_domain_sockets(&self) -> bool {
        self.use_unix_domain_sockets
    }

    /// How long tablet locations fetched by tablet id stay fresh. Locations
    /// fetched by key use the TTL the master puts in the response.
    pub fn tablet_locations_by_id_ttl(&self) -> Duration {
        self.tablet_locations_by_id_ttl
    }

    /// Cap on in-flight master location lookups across the whole cache.
    pub fn max_concurrent_master_lookups(&self) -> usize {
        self.max_concurrent_master_lookups
    }

    /// Base delay for the linear lookup retry backoff.
    pub fn lookup_backoff(&self) -> Duration {
        self.lookup_backoff
    }

    /// When set, location requests ask the master for non-voter replicas in
    /// addition to voters.
    pub fn include_non_voter_replicas(&self) -> bool {
        self.include_non_voter_replicas
    }
}

#[derive(Clone)]
pub struct Builder {
    c: Config,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            c: Config {
                use_unix_domain_sockets: false,
                tablet_locations_by_id_ttl: Duration::from_secs(60 * 60),
                max_concurrent_master_lookups: 50,
                lookup_backoff: Duration::from_millis(10),
                include_non_voter_replicas: false,
            },
        }
    }

    #[must_use]
    pub fn use_unix_domain_sockets(mut self, x: bool) -> Self {
        self.c.use_unix_domain_sockets = x;
        self
    }

    #[must_use]
    pub fn tablet_locations_by_id_ttl(mut self, x: Duration) -> Self {
        self.c.tablet_locations_by_id_ttl = x;
        self
    }

    #[must_use]
    pub fn max_concurrent_master_lookups(mut self, x: usize) -> Self {
        self.c.max_concurrent_master_lookups = x.max(1);
        self
    }

    #[must_use]
    pub fn lookup_backoff(mut self, x: Duration) -> Self {
        self.c.lookup_backoff = x;
        self
    }

    #[must_use]
    pub fn include_non_voter_replicas(mut self, x: bool) -> Self {
        self.c.include_non_voter_replicas = x;
        self
    }

    pub fn build(self) -> Arc<Config> {
        Arc::new(self.c)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
