//! The query pipeline: what a listener calls, once per decoded query.
//!
//! The pipeline is a list of stages built once at startup and walked
//! iteratively; the first stage to produce a response wins.  The EDNS
//! gate answers protocol-level problems (FORMERR, BADVERS, unknown
//! types); the core stage acquires a reader, resolves the location,
//! consults the response cache, runs the resolver, and assembles the
//! answer.  Exactly one message is written on success, none on a
//! write error.

use std::fmt;
use std::time::Duration;

use dns_store::{LocationId, StoreError};
use dns_types::protocol::types::*;

use crate::assembler::{attach_edns, build_response};
use crate::authority::{find_authority, Authority};
use crate::cache::{CacheKey, SharedResponseCache};
use crate::location::resolve_location;
use crate::metrics::QueryMetrics;
use crate::reload::StoreHandle;
use crate::resolver::{resolve_query, Resolution, ResolutionError};
use crate::{QueryContext, ServerConfig};

/// Where a response can be written.  The transport decides the size
/// budget: datagram writers return their payload cap, stream writers
/// `None`.
pub trait ResponseWriter: Send {
    fn payload_limit(&self) -> Option<usize>;

    /// # Errors
    ///
    /// If the transport write fails.
    fn write_message(&mut self, octets: &[u8]) -> std::io::Result<()>;
}

/// What `Pipeline::serve` reports back to the listener.
#[derive(Debug)]
pub struct ServeOutcome {
    pub rcode: Rcode,
    pub metrics: QueryMetrics,
    pub error: Option<ServeError>,
}

/// Failures along the pipeline.  Where possible the message has
/// already been written (as ServFail) before the error is surfaced.
#[derive(Debug)]
pub enum ServeError {
    Resolution(ResolutionError),
    Store(StoreError),
    Serialise(dns_types::protocol::serialise::Error),
    Write(std::io::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServeError::Resolution(error) => write!(f, "resolution failed: {error}"),
            ServeError::Store(error) => write!(f, "store failed: {error}"),
            ServeError::Serialise(error) => write!(f, "could not serialise response: {error}"),
            ServeError::Write(error) => write!(f, "could not write response: {error}"),
        }
    }
}

impl std::error::Error for ServeError {}

/// The stage list.  Monomorphic: stages are enum variants, walked
/// with a match, no per-query dynamic dispatch.
pub struct Pipeline {
    config: ServerConfig,
    stages: Vec<Stage>,
}

enum Stage {
    EdnsGate(EdnsGate),
    Core(CoreStage),
}

impl Pipeline {
    pub fn new(handle: StoreHandle, cache: SharedResponseCache, config: ServerConfig) -> Self {
        let stages = vec![
            Stage::EdnsGate(EdnsGate {
                payload_cap: config.udp_payload_cap,
            }),
            Stage::Core(CoreStage {
                handle,
                cache,
                config: config.clone(),
            }),
        ];

        Self { config, stages }
    }

    /// Serve one query: walk the stages, serialise within the
    /// transport's budget, write.
    pub async fn serve(
        &self,
        ctx: &QueryContext,
        writer: &mut dyn ResponseWriter,
        query: &Message,
    ) -> ServeOutcome {
        let mut metrics = QueryMetrics::new();

        let mut served = None;
        for stage in &self.stages {
            match stage {
                Stage::EdnsGate(gate) => {
                    if let Some(response) = gate.serve(query, &mut metrics) {
                        served = Some((response, None));
                        break;
                    }
                }
                Stage::Core(core) => {
                    served = Some(core.serve(ctx, query, &mut metrics).await);
                    break;
                }
            }
        }

        // the core stage always answers, so this is unreachable with
        // a well-formed stage list; answer ServFail rather than drop
        let (response, error) = served.unwrap_or_else(|| {
            let mut response = query.make_response();
            response.header.rcode = Rcode::ServerFailure;
            (response, None)
        });

        let rcode = response.header.rcode;
        let octets = match self.serialise_for(writer, query, &response) {
            Ok(octets) => octets,
            Err(serialise_error) => {
                return ServeOutcome {
                    rcode,
                    metrics,
                    error: Some(ServeError::Serialise(serialise_error)),
                }
            }
        };

        if let Err(write_error) = writer.write_message(&octets) {
            return ServeOutcome {
                rcode,
                metrics,
                error: Some(ServeError::Write(write_error)),
            };
        }

        tracing::debug!(id = %query.header.id, %rcode, octets = %octets.len(), "served");
        ServeOutcome {
            rcode,
            metrics,
            error,
        }
    }

    fn serialise_for(
        &self,
        writer: &dyn ResponseWriter,
        query: &Message,
        response: &Message,
    ) -> Result<Vec<u8>, dns_types::protocol::serialise::Error> {
        match writer.payload_limit() {
            Some(transport_cap) => {
                // the lesser of what the client advertises and our
                // own cap, never below the classic 512
                let client = query
                    .edns
                    .as_ref()
                    .map(|edns| edns.effective_payload_size())
                    .unwrap_or(MIN_UDP_PAYLOAD_SIZE);
                let limit = transport_cap
                    .min(client as usize)
                    .min(self.config.udp_payload_cap as usize)
                    .max(MIN_UDP_PAYLOAD_SIZE as usize);
                let (octets, _truncated) = response.serialise_with_limit(limit)?;
                Ok(octets)
            }
            None => response.to_octets(),
        }
    }
}

/// Answers protocol-level problems before any store work happens.
struct EdnsGate {
    payload_cap: u16,
}

impl EdnsGate {
    fn serve(&self, query: &Message, metrics: &mut QueryMetrics) -> Option<Message> {
        if query.header.is_response {
            metrics.failures += 1;
            return Some(Message::make_format_error_response(query.header.id));
        }

        if query.header.opcode != Opcode::Standard {
            let mut response = query.make_response();
            response.header.rcode = Rcode::NotImplemented;
            return Some(response);
        }

        if let Some(edns) = &query.edns {
            // only EDNS version 0 is implemented; RFC 6891 section
            // 6.1.3 says BADVERS
            if edns.version > 0 {
                let mut response = query.make_response();
                response.set_badvers(self.payload_cap);
                return Some(response);
            }
        }

        if query.questions.len() != 1 {
            metrics.failures += 1;
            return Some(Message::make_format_error_response(query.header.id));
        }

        if query.questions[0].is_unknown() {
            metrics.refused += 1;
            let mut response = query.make_response();
            response.header.rcode = Rcode::Refused;
            return Some(response);
        }

        None
    }
}

/// The terminal stage: location, cache, resolver, assembler.
struct CoreStage {
    handle: StoreHandle,
    cache: SharedResponseCache,
    config: ServerConfig,
}

impl CoreStage {
    async fn serve(
        &self,
        ctx: &QueryContext,
        query: &Message,
        metrics: &mut QueryMetrics,
    ) -> (Message, Option<ServeError>) {
        // the gate guarantees exactly one question
        let question = &query.questions[0];
        let reader = self.handle.reader().await;

        // the client subnet rides in the query's OPT record; the
        // listener context only overrides it for tests and trusted
        // front-ends
        let mut ctx = ctx.clone();
        if ctx.client_subnet.is_none() {
            ctx.client_subnet = query
                .edns
                .as_ref()
                .and_then(|edns| edns.client_subnet())
                .cloned();
        }
        let ctx = &ctx;

        // authority walk for the location step (the sentinel and the
        // zone default live at the apex)
        let auth = match find_authority(&reader, &question.name, &LocationId::empty()) {
            Ok(auth) => auth,
            Err(error) => {
                metrics.failures += 1;
                return self.servfail(query, ServeError::Store(error));
            }
        };
        let cut = match &auth {
            Authority::Authoritative(cut) => Some(cut),
            Authority::Delegated { parent, .. } => Some(parent),
            Authority::Foreign => None,
        };

        let location =
            match resolve_location(&reader, cut, ctx.client_subnet.as_ref(), ctx.source) {
                Ok(location) => location,
                Err(error) => {
                    metrics.failures += 1;
                    return self.servfail(query, ServeError::Store(error));
                }
            };

        let cache_key = CacheKey::new(&location.location, question);
        let mut response = match self.cache.get(&cache_key) {
            Some(mut cached) => {
                metrics.cache_hits += 1;
                cached.header.id = query.header.id;
                cached.header.recursion_desired = query.header.recursion_desired;
                cached
            }
            None => {
                metrics.cache_misses += 1;

                let resolution = match resolve_query(
                    &reader,
                    &self.config,
                    ctx,
                    &question.name,
                    question.qtype,
                    &location,
                ) {
                    Ok(resolution) => resolution,
                    Err(error) => {
                        metrics.failures += 1;
                        return self.servfail(query, ServeError::Resolution(error));
                    }
                };
                count_resolution(metrics, question, &resolution);

                let (response, weighted) =
                    build_response(&reader, &self.config, query, &resolution, &location.location);
                if weighted {
                    metrics.weighted += 1;
                }

                self.maybe_cache(cache_key, &response, weighted);
                response
            }
        };

        if let Some(query_edns) = &query.edns {
            attach_edns(&mut response, query_edns, &self.config, location.scope);
        }

        (response, None)
    }

    /// Cache a response unless weighted selection makes it
    /// per-query.  A positive WRS timeout lets weighted answers live
    /// that long.
    fn maybe_cache(&self, key: CacheKey, response: &Message, weighted: bool) {
        if !matches!(
            response.header.rcode,
            Rcode::NoError | Rcode::NameError
        ) {
            return;
        }

        let min_ttl = response
            .answers
            .iter()
            .chain(response.authority.iter())
            .map(|rr| rr.ttl)
            .min();
        let Some(min_ttl) = min_ttl else {
            return;
        };

        let mut ttl = Duration::from_secs(min_ttl.into());
        if weighted {
            if self.config.wrs_cache_timeout.is_zero() {
                return;
            }
            ttl = ttl.min(self.config.wrs_cache_timeout);
        }

        self.cache.insert(key, response.clone(), ttl);
    }

    fn servfail(&self, query: &Message, error: ServeError) -> (Message, Option<ServeError>) {
        tracing::warn!(%error, "answering ServFail");
        let mut response = query.make_response();
        response.header.rcode = Rcode::ServerFailure;
        if let Some(query_edns) = &query.edns {
            attach_edns(&mut response, query_edns, &self.config, None);
        }
        (response, Some(error))
    }
}

fn count_resolution(metrics: &mut QueryMetrics, question: &Question, resolution: &Resolution) {
    match resolution.rcode {
        Rcode::Refused => metrics.refused += 1,
        Rcode::NameError => metrics.name_errors += 1,
        _ => {}
    }
    if resolution.authoritative {
        metrics.authoritative += 1;
    }
    if !resolution.authoritative
        && resolution
            .authority
            .iter()
            .any(|rr| rr.rtype_with_data.rtype() == RecordType::NS)
    {
        metrics.delegations += 1;
    }
    if question.qtype != QueryType::Record(RecordType::CNAME)
        && resolution
            .answers
            .iter()
            .any(|rr| rr.rtype_with_data.rtype() == RecordType::CNAME)
    {
        metrics.chases += 1;
    }
}
