//! The per-query resolution state machine.
//!
//! Given a name, type, and resolved location, this walks: authority
//! check, DS carve-out, exact lookup, wildcard expansion, weighted
//! selection, CNAME chase, rcode determination.  It performs no I/O
//! outside the store driver and allocates only for the records it
//! returns.

use std::fmt;

use rand::seq::SliceRandom;

use dns_store::frame::Frame;
use dns_store::{key, FrameStep, LocationId, Store, StoreError};
use dns_types::protocol::types::*;

use crate::authority::{find_authority, record_from_frame, Authority, ZoneCut};
use crate::location::{resolve_location, ResolvedLocation};
use crate::{QueryContext, ServerConfig};

/// What the resolver produced for one query.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Records for the answer section, CNAMEs first in chase order.
    pub answers: Vec<ResourceRecord>,

    /// Records for the authority section: the apex SOA on negative
    /// answers, the NS set on delegations.
    pub authority: Vec<ResourceRecord>,

    pub rcode: Rcode,

    /// Whether AA should be set.
    pub authoritative: bool,

    /// Whether any rdatas were selected by weighted-random sampling.
    /// Such a response must not be cached unconditionally.
    pub weighted: bool,

    /// The ECS scope to echo, after any chase adjustments.
    pub scope: Option<u8>,
}

impl Resolution {
    fn refused(scope: Option<u8>) -> Self {
        Self {
            answers: Vec::new(),
            authority: Vec::new(),
            rcode: Rcode::Refused,
            authoritative: false,
            weighted: false,
            scope,
        }
    }
}

/// Failures that turn into ServFail.
#[derive(Debug)]
pub enum ResolutionError {
    Store(StoreError),

    /// A record frame that does not decode.
    Corrupt { name: DomainName },

    /// A CNAME chain that revisits a name already answered.
    ChaseCycle { target: DomainName },

    /// The listener's deadline passed mid-resolution.
    Cancelled,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolutionError::Store(error) => write!(f, "store error: {error}"),
            ResolutionError::Corrupt { name } => {
                write!(f, "undecodable record at {}", name.to_dotted_string())
            }
            ResolutionError::ChaseCycle { target } => {
                write!(f, "CNAME cycle through {}", target.to_dotted_string())
            }
            ResolutionError::Cancelled => write!(f, "query cancelled"),
        }
    }
}

impl std::error::Error for ResolutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolutionError::Store(error) => Some(error),
            _ => None,
        }
    }
}

impl From<StoreError> for ResolutionError {
    fn from(error: StoreError) -> Self {
        ResolutionError::Store(error)
    }
}

/// Resolve one query to its answer and authority records.
///
/// # Errors
///
/// See `ResolutionError`; every variant is answered as ServFail by
/// the pipeline.
pub fn resolve_query<S: Store + ?Sized>(
    store: &S,
    config: &ServerConfig,
    ctx: &QueryContext,
    qname: &DomainName,
    qtype: QueryType,
    qlocation: &ResolvedLocation,
) -> Result<Resolution, ResolutionError> {
    let _span = tracing::error_span!("resolve", name = %qname.to_dotted_string(), %qtype).entered();

    let mut answers: Vec<ResourceRecord> = Vec::new();
    let mut authority: Vec<ResourceRecord> = Vec::new();
    let mut rcode = Rcode::NoError;
    let mut authoritative = false;
    let mut weighted = false;

    let scope = qlocation.scope;
    let mut location = qlocation.location.clone();
    let mut current = qname.clone();
    let mut hops = 0usize;

    loop {
        if ctx.cancelled() {
            return Err(ResolutionError::Cancelled);
        }

        // authority records are unscoped; the walk does not depend on
        // the client's location
        let auth = find_authority(store, &current, &LocationId::empty())?;

        if hops > 0 {
            // each hop recomputes the location for the new name; a
            // scope change aborts the chase and keeps the previous
            // scope
            let cut = match &auth {
                Authority::Authoritative(cut) => Some(cut),
                Authority::Delegated { parent, .. } => Some(parent),
                Authority::Foreign => None,
            };
            let relocated = resolve_location(store, cut, ctx.client_subnet.as_ref(), ctx.source)?;
            if relocated.scope != scope {
                tracing::debug!(
                    target = %current.to_dotted_string(),
                    "ECS scope changed across CNAME target, not chasing further"
                );
                break;
            }
            location = relocated.location;
        }

        match auth {
            Authority::Foreign => {
                if hops == 0 {
                    tracing::debug!("not authoritative");
                    return Ok(Resolution::refused(scope));
                }
                // the chain left our data; return it as-is
                break;
            }

            Authority::Delegated { cut, parent } => {
                // DS is answered at the parent side of the cut
                if qtype == QueryType::Record(RecordType::DS) && cut.apex == current {
                    match resolve_in_zone(store, config, &parent, &current, qtype, &location)? {
                        ZoneStep::Records {
                            rrs,
                            weighted: selected,
                        } => {
                            answers.extend(rrs);
                            weighted |= selected;
                            if hops == 0 {
                                authoritative = true;
                            }
                        }
                        _ => {
                            if hops == 0 {
                                authoritative = true;
                            }
                            if let Some(soa) = parent.soa_rr() {
                                authority = vec![soa];
                            }
                        }
                    }
                    break;
                }

                tracing::trace!(cut = %cut.apex.to_dotted_string(), "got delegation");
                authority = cut.ns.clone();
                authoritative = false;
                break;
            }

            Authority::Authoritative(cut) => {
                if hops == 0 {
                    authoritative = true;
                }

                match resolve_in_zone(store, config, &cut, &current, qtype, &location)? {
                    ZoneStep::Records {
                        rrs,
                        weighted: selected,
                    } => {
                        answers.extend(rrs);
                        weighted |= selected;
                        break;
                    }
                    ZoneStep::NoData => {
                        if let Some(soa) = cut.soa_rr() {
                            authority = vec![soa];
                        }
                        break;
                    }
                    ZoneStep::NxDomain => {
                        rcode = Rcode::NameError;
                        if let Some(soa) = cut.soa_rr() {
                            authority = vec![soa];
                        }
                        break;
                    }
                    ZoneStep::Cname { rr, target } => {
                        answers.push(rr);

                        let chase = config.chase_cnames
                            && qtype != QueryType::Record(RecordType::CNAME)
                            && qtype != QueryType::Any
                            && (ctx.client_subnet.is_none() || scope == Some(0));
                        if !chase {
                            break;
                        }

                        if answers.iter().any(|rr| rr.name == target) {
                            return Err(ResolutionError::ChaseCycle { target });
                        }

                        hops += 1;
                        if hops > config.max_chase_hops {
                            tracing::warn!(
                                target = %target.to_dotted_string(),
                                limit = %config.max_chase_hops,
                                "CNAME hop limit reached, returning chain as-is"
                            );
                            break;
                        }

                        current = target;
                    }
                }
            }
        }
    }

    Ok(Resolution {
        answers,
        authority,
        rcode,
        authoritative,
        weighted,
        scope,
    })
}

/// The outcome of matching one name inside one authoritative zone.
enum ZoneStep {
    Records {
        rrs: Vec<ResourceRecord>,
        weighted: bool,
    },
    Cname {
        rr: ResourceRecord,
        target: DomainName,
    },
    NoData,
    NxDomain,
}

/// Exact lookup, wildcard expansion, and negative classification for
/// one name within its zone.
fn resolve_in_zone<S: Store + ?Sized>(
    store: &S,
    config: &ServerConfig,
    cut: &ZoneCut,
    name: &DomainName,
    qtype: QueryType,
    location: &LocationId,
) -> Result<ZoneStep, ResolutionError> {
    let record_key = key::record_key(&name.octets);
    let name_exists = store.lookup(&record_key)?.is_some();

    let records = collect_records(store, &record_key, name, location)?;
    if let Some(step) = step_from_records(config, qtype, records)? {
        return Ok(step);
    }

    if name_exists {
        return Ok(ZoneStep::NoData);
    }

    // wildcard expansion: replace the leftmost label with `*` and
    // walk up, never crossing the zone cut.  Names with non-ASCII
    // octets never wildcard-match.
    if name.is_ascii() {
        let apex_labels = cut.apex.labels.len();
        let mut suffix = name.parent();
        while let Some(base) = suffix {
            if base.labels.len() < apex_labels {
                break;
            }
            // prepending `*` cannot fail on a non-root suffix of a
            // valid name
            let candidate = DomainName::from_labels(
                std::iter::once(Label::wildcard())
                    .chain(base.labels.iter().cloned())
                    .collect(),
            )
            .unwrap();

            let wildcard_key = key::record_key(&candidate.octets);
            let records = collect_records(store, &wildcard_key, name, location)?;
            if let Some(step) = step_from_records(config, qtype, records)? {
                return Ok(step);
            }

            suffix = base.parent();
        }
    }

    Ok(ZoneStep::NxDomain)
}

/// Type-match the records visible at a name.  `None` means nothing
/// here was visible to this query.
fn step_from_records(
    config: &ServerConfig,
    qtype: QueryType,
    records: Vec<ResourceRecord>,
) -> Result<Option<ZoneStep>, ResolutionError> {
    if records.is_empty() {
        return Ok(None);
    }

    let mut matched: Vec<ResourceRecord> = records
        .iter()
        .filter(|rr| rr.rtype_with_data.matches(qtype))
        .cloned()
        .collect();

    if !matched.is_empty() {
        let weighted = match qtype {
            QueryType::Record(rtype) => select_weighted(rtype, &mut matched, config.max_answer),
            QueryType::Any => false,
        };
        return Ok(Some(ZoneStep::Records {
            rrs: matched,
            weighted,
        }));
    }

    if let Some(rr) = records
        .iter()
        .find(|rr| rr.rtype_with_data.rtype() == RecordType::CNAME)
    {
        if let RecordTypeWithData::CNAME { cname } = &rr.rtype_with_data {
            return Ok(Some(ZoneStep::Cname {
                rr: rr.clone(),
                target: cname.clone(),
            }));
        }
    }

    // records exist at the name but none match and none alias
    Ok(Some(ZoneStep::NoData))
}

/// Types whose multi-rdata answers are selected by weighted-random
/// sampling.
fn is_weighted(rtype: RecordType) -> bool {
    matches!(rtype, RecordType::A | RecordType::AAAA | RecordType::HTTPS)
}

/// For weighted types with more than one candidate: sample up to
/// `max_answer` without replacement.  Returns whether sampling
/// happened (making the result uncacheable).
pub(crate) fn select_weighted(
    rtype: RecordType,
    rrs: &mut Vec<ResourceRecord>,
    max_answer: usize,
) -> bool {
    if !is_weighted(rtype) || rrs.len() <= 1 {
        return false;
    }

    let mut rng = rand::thread_rng();
    rrs.shuffle(&mut rng);
    rrs.truncate(std::cmp::max(max_answer, 1));
    true
}

/// Decode all record frames visible at `key` into records owned by
/// `owner`.
pub(crate) fn collect_records<S: Store + ?Sized>(
    store: &S,
    key: &[u8],
    owner: &DomainName,
    location: &LocationId,
) -> Result<Vec<ResourceRecord>, ResolutionError> {
    let mut out = Vec::new();
    let mut bad = false;

    store.for_each_frame(key, location, &mut |frame| {
        if let Frame::Record(record) = frame {
            match record_from_frame(
                owner,
                RecordType::from(record.rtype),
                record.ttl,
                record.rdata,
            ) {
                Some(rr) => out.push(rr),
                None => {
                    bad = true;
                    return FrameStep::Stop;
                }
            }
        }
        FrameStep::Continue
    })?;

    if bad {
        return Err(ResolutionError::Corrupt {
            name: owner.clone(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store::*;
    use dns_types::protocol::types::test_util::*;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};

    fn ctx() -> QueryContext {
        QueryContext::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
    }

    fn at(location: LocationId, scope: Option<u8>) -> ResolvedLocation {
        ResolvedLocation { location, scope }
    }

    fn resolve(
        qname: &str,
        qtype: RecordType,
        location: ResolvedLocation,
    ) -> Result<Resolution, ResolutionError> {
        let (_dir, store) = fixture_hash_store();
        resolve_query(
            &store,
            &ServerConfig::default(),
            &ctx(),
            &domain(qname),
            QueryType::Record(qtype),
            &location,
        )
    }

    #[test]
    fn answers_default_location_record() {
        let resolution = resolve(
            "foo.example.com.",
            RecordType::A,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(Rcode::NoError, resolution.rcode);
        assert!(resolution.authoritative);
        assert!(!resolution.weighted);
        assert_eq!(1, resolution.answers.len());
        assert_eq!(
            RecordTypeWithData::A {
                address: Ipv4Addr::new(1, 1, 1, 1)
            },
            resolution.answers[0].rtype_with_data
        );
        assert_eq!(180, resolution.answers[0].ttl);
    }

    #[test]
    fn answers_subnet_scoped_record() {
        let resolution = resolve(
            "foo.example.com.",
            RecordType::A,
            at(loc(0x20), Some(24)),
        )
        .unwrap();

        assert_eq!(1, resolution.answers.len());
        assert_eq!(
            RecordTypeWithData::A {
                address: Ipv4Addr::new(1, 1, 1, 2)
            },
            resolution.answers[0].rtype_with_data
        );
        assert_eq!(Some(24), resolution.scope);
    }

    #[test]
    fn nxdomain_with_soa() {
        let resolution = resolve(
            "nxdomain.example.org.",
            RecordType::A,
            at(LocationId::fallback_default(), None),
        )
        .unwrap();

        assert_eq!(Rcode::NameError, resolution.rcode);
        assert!(resolution.authoritative);
        assert!(resolution.answers.is_empty());
        assert_eq!(1, resolution.authority.len());
        assert_eq!(
            RecordType::SOA,
            resolution.authority[0].rtype_with_data.rtype()
        );
        assert_eq!(domain("example.org."), resolution.authority[0].name);
    }

    #[test]
    fn nodata_when_name_exists_without_type() {
        let resolution = resolve(
            "bar.example.com.",
            RecordType::TXT,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(Rcode::NoError, resolution.rcode);
        assert!(resolution.answers.is_empty());
        assert_eq!(1, resolution.authority.len());
        assert_eq!(
            RecordType::SOA,
            resolution.authority[0].rtype_with_data.rtype()
        );
    }

    #[test]
    fn refused_outside_our_zones() {
        let resolution = resolve(
            "www.notourdomain.com.",
            RecordType::A,
            at(LocationId::fallback_default(), None),
        )
        .unwrap();

        assert_eq!(Rcode::Refused, resolution.rcode);
        assert!(!resolution.authoritative);
    }

    #[test]
    fn weighted_selection_flags_and_bounds() {
        let mut seen_orders = HashSet::new();
        for _ in 0..64 {
            let resolution = resolve(
                "wrr.example.com.",
                RecordType::A,
                at(zone_default_location(), None),
            )
            .unwrap();

            assert!(resolution.weighted);
            assert_eq!(3, resolution.answers.len());
            seen_orders.insert(
                resolution
                    .answers
                    .iter()
                    .map(|rr| format!("{:?}", rr.rtype_with_data))
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }

        // sampling without replacement over three records: more than
        // one order shows up over 64 runs
        assert!(seen_orders.len() > 1);
    }

    #[test]
    fn weighted_respects_max_answer() {
        let (_dir, store) = fixture_hash_store();
        let config = ServerConfig {
            max_answer: 2,
            ..ServerConfig::default()
        };

        let resolution = resolve_query(
            &store,
            &config,
            &ctx(),
            &domain("wrr.example.com."),
            QueryType::Record(RecordType::A),
            &at(zone_default_location(), None),
        )
        .unwrap();

        assert!(resolution.weighted);
        assert_eq!(2, resolution.answers.len());
    }

    #[test]
    fn single_record_is_not_weighted() {
        let resolution = resolve(
            "bar.example.com.",
            RecordType::A,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert!(!resolution.weighted);
        assert_eq!(1, resolution.answers.len());
    }

    #[test]
    fn wildcard_matches_ascii_name() {
        let resolution = resolve(
            "anything.wild.example.com.",
            RecordType::TXT,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(Rcode::NoError, resolution.rcode);
        assert_eq!(1, resolution.answers.len());
        // the answer is synthesised at the queried name
        assert_eq!(domain("anything.wild.example.com."), resolution.answers[0].name);
        assert_eq!(
            RecordTypeWithData::TXT {
                octets: b"wild".to_vec()
            },
            resolution.answers[0].rtype_with_data
        );
    }

    #[test]
    fn wildcard_matches_multiple_labels_down() {
        let resolution = resolve(
            "a.b.wild.example.com.",
            RecordType::TXT,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(1, resolution.answers.len());
        assert_eq!(domain("a.b.wild.example.com."), resolution.answers[0].name);
    }

    #[test]
    fn wildcard_loses_to_exact_name() {
        // bar.example.com exists; even though it has no TXT, the
        // wildcard must not fire
        let resolution = resolve(
            "bar.example.com.",
            RecordType::TXT,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert!(resolution.answers.is_empty());
        assert_eq!(Rcode::NoError, resolution.rcode);
    }

    #[test]
    fn wildcard_never_matches_non_ascii_names() {
        let (_dir, store) = fixture_hash_store();

        let mut labels = vec![Label::try_from(&[0xc3u8, 0xa9][..]).unwrap()];
        labels.extend(domain("wild.example.com.").labels);
        let name = DomainName::from_labels(labels).unwrap();

        let resolution = resolve_query(
            &store,
            &ServerConfig::default(),
            &ctx(),
            &name,
            QueryType::Record(RecordType::TXT),
            &at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(Rcode::NameError, resolution.rcode);
        assert!(resolution.answers.is_empty());
    }

    #[test]
    fn chases_cname_to_address() {
        let resolution = resolve(
            "cname-a.example.com.",
            RecordType::A,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(2, resolution.answers.len());
        assert_eq!(
            RecordType::CNAME,
            resolution.answers[0].rtype_with_data.rtype()
        );
        assert_eq!(domain("cname-a.example.com."), resolution.answers[0].name);
        assert_eq!(
            RecordTypeWithData::A {
                address: Ipv4Addr::new(1, 1, 1, 1)
            },
            resolution.answers[1].rtype_with_data
        );
        assert!(resolution.authoritative);
    }

    #[test]
    fn cname_query_returns_cname_without_chase() {
        let resolution = resolve(
            "cname-a.example.com.",
            RecordType::CNAME,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(1, resolution.answers.len());
        assert_eq!(
            RecordType::CNAME,
            resolution.answers[0].rtype_with_data.rtype()
        );
    }

    #[test]
    fn chase_into_delegation_returns_referral() {
        let resolution = resolve(
            "www.example.com.",
            RecordType::A,
            at(zone_default_location(), None),
        )
        .unwrap();

        // single CNAME answer, NS referral in authority, AA clear
        assert_eq!(1, resolution.answers.len());
        assert_eq!(
            RecordType::CNAME,
            resolution.answers[0].rtype_with_data.rtype()
        );
        assert_eq!(2, resolution.authority.len());
        assert!(resolution
            .authority
            .iter()
            .all(|rr| rr.rtype_with_data.rtype() == RecordType::NS));
        assert!(!resolution.authoritative);
    }

    #[test]
    fn chase_stops_when_scope_would_change() {
        let (_dir, store) = fixture_hash_store();

        // the first name sits in a resolver-sensitive zone, so its
        // scope is zero and chasing is allowed; the hop target
        // resolves through the subnet map at /24, which would change
        // the scope, so the chase stops at the CNAME
        let mut ctx = QueryContext::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)));
        ctx.client_subnet = Some(ClientSubnet::from_addr(
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 0)),
            24,
        ));

        let resolution = resolve_query(
            &store,
            &ServerConfig::default(),
            &ctx,
            &domain("rs-cname.sensitive.example."),
            QueryType::Record(RecordType::A),
            &at(loc(0x30), Some(0)),
        )
        .unwrap();

        assert_eq!(1, resolution.answers.len());
        assert_eq!(
            RecordType::CNAME,
            resolution.answers[0].rtype_with_data.rtype()
        );
        assert_eq!(Some(0), resolution.scope);
    }

    #[test]
    fn cname_cycle_is_an_error() {
        let error = resolve(
            "loop1.example.com.",
            RecordType::A,
            at(zone_default_location(), None),
        )
        .unwrap_err();

        assert!(matches!(error, ResolutionError::ChaseCycle { .. }));
    }

    #[test]
    fn hop_limit_returns_chain_as_is() {
        let resolution = resolve(
            "chain0.example.com.",
            RecordType::A,
            at(zone_default_location(), None),
        )
        .unwrap();

        // limit of 10 hops: the original name plus ten targets
        assert_eq!(11, resolution.answers.len());
        assert!(resolution
            .answers
            .iter()
            .all(|rr| rr.rtype_with_data.rtype() == RecordType::CNAME));
        assert_eq!(Rcode::NoError, resolution.rcode);
    }

    #[test]
    fn delegation_without_cname() {
        let resolution = resolve(
            "www.nonauth.example.com.",
            RecordType::A,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert!(resolution.answers.is_empty());
        assert_eq!(2, resolution.authority.len());
        assert!(!resolution.authoritative);
        assert_eq!(Rcode::NoError, resolution.rcode);
    }

    #[test]
    fn ds_is_answered_at_the_parent() {
        // no DS record in the fixture: the parent zone answers NODATA
        // with its own SOA, not a referral
        let resolution = resolve(
            "nonauth.example.com.",
            RecordType::DS,
            at(zone_default_location(), None),
        )
        .unwrap();

        assert!(resolution.answers.is_empty());
        assert!(resolution.authoritative);
        assert_eq!(1, resolution.authority.len());
        assert_eq!(domain("example.com."), resolution.authority[0].name);
        assert_eq!(
            RecordType::SOA,
            resolution.authority[0].rtype_with_data.rtype()
        );
    }

    #[test]
    fn any_query_returns_all_types_unweighted() {
        let (_dir, store) = fixture_hash_store();

        let resolution = resolve_query(
            &store,
            &ServerConfig::default(),
            &ctx(),
            &domain("wrr.example.com."),
            QueryType::Any,
            &at(zone_default_location(), None),
        )
        .unwrap();

        assert_eq!(3, resolution.answers.len());
        assert!(!resolution.weighted);
    }

    #[test]
    fn cancelled_context_stops_resolution() {
        let (_dir, store) = fixture_hash_store();
        let mut ctx = ctx();
        ctx.deadline = Some(std::time::Instant::now() - std::time::Duration::from_secs(1));

        let error = resolve_query(
            &store,
            &ServerConfig::default(),
            &ctx,
            &domain("foo.example.com."),
            QueryType::Record(RecordType::A),
            &at(zone_default_location(), None),
        )
        .unwrap_err();

        assert!(matches!(error, ResolutionError::Cancelled));
    }
}
