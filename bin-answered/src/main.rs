use clap::Parser;
use std::collections::HashSet;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use dns_auth::cache::SharedResponseCache;
use dns_auth::pipeline::{Pipeline, ResponseWriter, ServeOutcome};
use dns_auth::reload::{open_any_store, ReloadController, StoreHandle};
use dns_auth::watch::spawn_poll_watcher;
use dns_auth::{QueryContext, ServerConfig};
use dns_store::{key, Store};
use dns_types::protocol::types::*;

mod metrics;
mod net_util;

use crate::metrics::*;
use crate::net_util::*;

/// How long a single query may take before the resolver gives up on
/// it.
const QUERY_DEADLINE: Duration = Duration::from_secs(5);

fn prune_cache_and_update_metrics(cache: &SharedResponseCache) {
    let (overflow, current_size, expired, pruned) = cache.prune();

    CACHE_SIZE.set(current_size.try_into().unwrap_or(i64::MAX));
    CACHE_EXPIRED_TOTAL.inc_by(expired.try_into().unwrap_or(u64::MAX));
    CACHE_PRUNED_TOTAL.inc_by(pruned.try_into().unwrap_or(u64::MAX));

    if overflow {
        CACHE_OVERFLOW_COUNT.inc();
    }

    if expired > 0 || pruned > 0 {
        tracing::info!(%expired, %pruned, "pruned cache");
    }
}

/// A writer that buffers the single response message, for the
/// listener to flush once `serve` returns.
struct BufferedWriter {
    limit: Option<usize>,
    octets: Option<Vec<u8>>,
}

impl BufferedWriter {
    fn udp() -> Self {
        Self {
            limit: Some(65_535),
            octets: None,
        }
    }

    fn tcp() -> Self {
        Self {
            limit: None,
            octets: None,
        }
    }
}

impl ResponseWriter for BufferedWriter {
    fn payload_limit(&self) -> Option<usize> {
        self.limit
    }

    fn write_message(&mut self, octets: &[u8]) -> std::io::Result<()> {
        self.octets = Some(octets.to_vec());
        Ok(())
    }
}

fn observe_outcome(query: &Message, outcome: &ServeOutcome) {
    if let Some(question) = query.questions.first() {
        let qtype = question.qtype.to_string();
        DNS_QUESTIONS_TOTAL.with_label_values(&[&qtype]).inc();
    }
    let rcode = outcome.rcode.to_string();
    DNS_RESPONSES_TOTAL.with_label_values(&[&rcode]).inc();
    observe_query(&outcome.metrics);

    if let Some(error) = &outcome.error {
        tracing::warn!(%error, rcode = %outcome.rcode, "query completed with error");
    }
}

/// Decode and serve one raw message, returning the octets to send (if
/// any).
async fn handle_raw_message(
    pipeline: &Pipeline,
    source: IpAddr,
    buf: &[u8],
    mut writer: BufferedWriter,
) -> Option<Vec<u8>> {
    match Message::from_octets(buf) {
        Ok(query) => {
            let mut ctx = QueryContext::new(source);
            ctx.deadline = Some(Instant::now() + QUERY_DEADLINE);

            let outcome = pipeline.serve(&ctx, &mut writer, &query).await;
            observe_outcome(&query, &outcome);
            writer.octets
        }
        Err(error) => {
            tracing::debug!(?error, "could not parse query");
            let id = error.id()?;
            Message::make_format_error_response(id).to_octets().ok()
        }
    }
}

async fn listen_udp_task(pipeline: Arc<Pipeline>, socket: UdpSocket) {
    let socket = Arc::new(socket);
    let mut buf = vec![0u8; 65_535];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((size, peer)) => {
                DNS_REQUESTS_TOTAL.with_label_values(&["udp"]).inc();
                let octets = buf[..size].to_vec();
                let pipeline = pipeline.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    let response_timer = DNS_RESPONSE_TIME_SECONDS
                        .with_label_values(&["udp"])
                        .start_timer();
                    if let Some(response) = handle_raw_message(
                        &pipeline,
                        peer.ip(),
                        &octets,
                        BufferedWriter::udp(),
                    )
                    .await
                    {
                        if let Err(error) = socket.send_to(&response, peer).await {
                            tracing::debug!(?peer, ?error, "UDP send error");
                        }
                    }
                    response_timer.observe_duration();
                });
            }
            Err(error) => tracing::debug!(?error, "UDP recv error"),
        }
    }
}

async fn listen_tcp_task(pipeline: Arc<Pipeline>, socket: TcpListener) {
    loop {
        match socket.accept().await {
            Ok((mut stream, peer)) => {
                DNS_REQUESTS_TOTAL.with_label_values(&["tcp"]).inc();
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let response_timer = DNS_RESPONSE_TIME_SECONDS
                        .with_label_values(&["tcp"])
                        .start_timer();
                    let response = match read_tcp_bytes(&mut stream).await {
                        Ok(bytes) => {
                            handle_raw_message(
                                &pipeline,
                                peer.ip(),
                                bytes.as_ref(),
                                BufferedWriter::tcp(),
                            )
                            .await
                        }
                        Err(error) => {
                            let id = match error {
                                TcpError::TooShort { id, .. } => id,
                                TcpError::IO { id, .. } => id,
                            };
                            tracing::debug!(?peer, ?error, "TCP read error");
                            id.and_then(|id| {
                                Message::make_format_error_response(id).to_octets().ok()
                            })
                        }
                    };
                    if let Some(octets) = response {
                        if let Err(error) = send_tcp_bytes(&mut stream, &octets).await {
                            tracing::debug!(?peer, ?error, "TCP send error");
                        }
                    }
                    response_timer.observe_duration();
                });
            }
            Err(error) => tracing::debug!(?error, "TCP accept error"),
        }
    }
}

/// Delete expired cache entries every 5 minutes.
async fn prune_cache_task(cache: SharedResponseCache) {
    loop {
        sleep(Duration::from_secs(60 * 5)).await;
        prune_cache_and_update_metrics(&cache);
    }
}

/// Mirror reload counters into the Prometheus registry.
async fn reload_metrics_task(stats: Arc<dns_auth::reload::ReloadStats>) {
    loop {
        sleep(Duration::from_secs(15)).await;
        observe_reloads(&stats);
    }
}

fn begin_logging() {
    let log_format = if let Ok(var) = env::var("RUST_LOG_FORMAT") {
        let mut set = HashSet::new();
        for s in var.split(',') {
            set.insert(s.to_string());
        }
        set
    } else {
        HashSet::new()
    };

    let logger = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(!log_format.contains("no-ansi"));

    if log_format.contains("json") {
        if log_format.contains("no-time") {
            logger.json().without_time().init();
        } else {
            logger.json().init();
        }
    } else if log_format.contains("pretty") {
        if log_format.contains("no-time") {
            logger.pretty().without_time().init();
        } else {
            logger.pretty().init();
        }
    } else if log_format.contains("compact") {
        if log_format.contains("no-time") {
            logger.compact().without_time().init();
        } else {
            logger.compact().init();
        }
    } else if log_format.contains("no-time") {
        logger.without_time().init();
    } else {
        logger.init();
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser, Clone)]
/// An authoritative DNS server that answers from a compiled data
/// store.
///
/// answered serves:
///
/// - records out of an immutable hash-table file or a log-structured
///   KV store directory
///
/// - per-client record variants, selected by client subnet or
///   transport address against the compiled location maps
///
/// - wildcards, CNAME chains, and delegations
///
/// The store is produced by the offline compiler; this server never
/// writes on the query path.  Writing `reload` or `switchdb` into the
/// control directory reloads or replaces the store without a restart.
///
/// Prometheus metrics are served at
/// "http://{metrics_interface}:{metrics_port}/metrics"
struct Args {
    /// Interface to listen on
    #[clap(short, long, value_parser, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// Port to listen on
    #[clap(short, long, value_parser, default_value_t = 53)]
    port: u16,

    /// The compiled data: a hash file, or a KV store directory
    #[clap(short, long, value_parser)]
    data: PathBuf,

    /// Name whose records must be present before a store is put into
    /// service
    #[clap(long, value_parser)]
    probe_name: String,

    /// Directory watched for `reload` and `switchdb` signal files;
    /// defaults to the directory containing the data
    #[clap(short = 'c', long, value_parser)]
    control_dir: Option<PathBuf>,

    /// Seconds between opportunistic partial reloads
    #[clap(long, value_parser, default_value_t = 60)]
    reload_interval: u64,

    /// Seconds a reload may take before it is abandoned
    #[clap(long, value_parser, default_value_t = 10)]
    reload_timeout: u64,

    /// Seconds between filesystem polls for signal files
    #[clap(long, value_parser, default_value_t = 2)]
    watch_interval: u64,

    /// Most rdatas returned for weighted record types
    #[clap(long, value_parser, default_value_t = 8)]
    max_answer: usize,

    /// Do not follow CNAMEs within our own data
    #[clap(long, action(clap::ArgAction::SetTrue))]
    no_chase_cnames: bool,

    /// How many responses to hold in the cache
    #[clap(short = 's', long, value_parser, default_value_t = 4096)]
    cache_size: usize,

    /// Seconds a weighted-random answer may be cached; 0 never caches
    /// them
    #[clap(long, value_parser, default_value_t = 0)]
    wrs_cache_timeout: u64,

    /// Upper bound on UDP responses, regardless of what clients
    /// advertise
    #[clap(long, value_parser, default_value_t = 1232)]
    udp_payload_cap: u16,

    /// Interface to listen on to serve Prometheus metrics
    #[clap(long, value_parser, default_value_t = Ipv4Addr::LOCALHOST)]
    metrics_interface: Ipv4Addr,

    /// Port to listen on to serve Prometheus metrics
    #[clap(long, value_parser, default_value_t = 9420)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging();

    let Some(probe_name) = DomainName::from_dotted_string(&args.probe_name) else {
        tracing::error!(probe_name = %args.probe_name, "probe name does not parse");
        process::exit(1);
    };

    tracing::info!(path = %args.data.display(), "opening store");
    let store = match open_any_store(&args.data) {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(%error, "could not open store");
            process::exit(1);
        }
    };

    // initialisation order: open store, probe it, only then register
    // watchers and start serving
    match store.reader().lookup(&key::record_key(&probe_name.octets)) {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::error!(probe = %probe_name.to_dotted_string(), "probe name not found in store");
            process::exit(1);
        }
        Err(error) => {
            tracing::error!(%error, "probe lookup failed");
            process::exit(1);
        }
    }

    let config = ServerConfig {
        max_answer: std::cmp::max(1, args.max_answer),
        chase_cnames: !args.no_chase_cnames,
        max_chase_hops: 10,
        udp_payload_cap: args.udp_payload_cap,
        wrs_cache_timeout: Duration::from_secs(args.wrs_cache_timeout),
        cache_size: std::cmp::max(1, args.cache_size),
    };

    let handle = StoreHandle::new(store);
    let cache = SharedResponseCache::with_desired_size(config.cache_size);
    let pipeline = Arc::new(Pipeline::new(handle.clone(), cache.clone(), config));

    let control_dir = args.control_dir.clone().unwrap_or_else(|| {
        args.data
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf()
    });
    let controller = Arc::new(ReloadController::new(
        handle,
        cache.clone(),
        &probe_name,
        Duration::from_secs(args.reload_timeout),
    ));

    let events = spawn_poll_watcher(
        vec![args.data.clone(), control_dir.clone()],
        Duration::from_secs(std::cmp::max(1, args.watch_interval)),
    );
    tokio::spawn(controller.clone().run(
        control_dir,
        events,
        Duration::from_secs(std::cmp::max(1, args.reload_interval)),
    ));
    tokio::spawn(reload_metrics_task(controller.stats()));
    tokio::spawn(prune_cache_task(cache));

    tracing::info!(interface = %args.interface, port = %args.port, "binding DNS UDP socket");
    let udp = match UdpSocket::bind((args.interface, args.port)).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    tracing::info!(interface = %args.interface, port = %args.port, "binding DNS TCP socket");
    let tcp = match TcpListener::bind((args.interface, args.port)).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not bind DNS TCP socket");
            process::exit(1);
        }
    };

    tokio::spawn(listen_udp_task(pipeline.clone(), udp));
    tokio::spawn(listen_tcp_task(pipeline, tcp));

    tracing::info!(interface = %args.metrics_interface, port = %args.metrics_port, "binding HTTP TCP socket");
    let metrics_addr = SocketAddr::from((args.metrics_interface, args.metrics_port));
    if let Err(error) = serve_prometheus_endpoint_task(metrics_addr).await {
        tracing::error!(?error, "could not bind HTTP TCP socket");
        process::exit(1);
    }
}
