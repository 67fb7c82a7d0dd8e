//! The answer engine of an authoritative DNS server.
//!
//! Serves records out of a compiled store (see `dns-store`), picking
//! per-client record variants by location, expanding wildcards,
//! chasing CNAMEs, and hot-swapping the store on reload signals.
//!
//! The moving parts, in query order: [`pipeline`] is the entry point
//! a listener calls; it acquires a reader from [`reload`], resolves
//! the client's [`location`], consults the response [`cache`], runs
//! the [`resolver`] state machine on a miss, and hands the outcome to
//! the [`assembler`].

pub mod assembler;
pub mod authority;
pub mod cache;
pub mod location;
pub mod metrics;
pub mod pipeline;
pub mod reload;
pub mod resolver;
pub mod watch;

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dns_types::protocol::types::ClientSubnet;

/// Tunables for the answer engine, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Most rdatas returned for a weighted type.
    pub max_answer: usize,

    /// Whether to follow CNAMEs to their targets within our own
    /// data.
    pub chase_cnames: bool,

    /// Most CNAME hops to follow.
    pub max_chase_hops: usize,

    /// Hard cap on UDP response size, regardless of what the client
    /// advertises.
    pub udp_payload_cap: u16,

    /// How long a weighted answer may sit in the response cache; zero
    /// disables caching them entirely.
    pub wrs_cache_timeout: Duration,

    /// Response cache capacity, in entries.
    pub cache_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_answer: 8,
            chase_cnames: true,
            max_chase_hops: 10,
            udp_payload_cap: 1232,
            wrs_cache_timeout: Duration::ZERO,
            cache_size: 4096,
        }
    }
}

/// Per-query state handed in by the listener.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// The transport source address of the query.
    pub source: IpAddr,

    /// The Client Subnet option, if the query carried one.
    pub client_subnet: Option<ClientSubnet>,

    /// When the listener will give up on this query.  Checked between
    /// CNAME hops; a single store lookup is never interrupted.
    pub deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new(source: IpAddr) -> Self {
        Self {
            source,
            client_subnet: None,
            deadline: None,
        }
    }

    /// Whether the deadline has passed.
    pub fn cancelled(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod test_store;
