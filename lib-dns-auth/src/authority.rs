//! Authority classification: which zone, if any, answers for a name.
//!
//! Authority is determined by longest-suffix match against the apex
//! names present in the store.  Walking the query name toward the
//! root, the first suffix carrying a SOA is an apex we are
//! authoritative for; a suffix carrying only NS records is a
//! delegation cut, answered by the enclosing zone if we have one.

use dns_store::frame::Frame;
use dns_store::{key, FrameStep, LocationId, Store, StoreError};
use dns_types::protocol::deserialise::ConsumableBuffer;
use dns_types::protocol::types::*;

/// Everything the engine needs to know about a zone cut.
#[derive(Debug, Clone)]
pub struct ZoneCut {
    /// The name the cut sits at.
    pub apex: DomainName,

    /// The SOA record at the apex, present iff we are authoritative
    /// here.
    pub soa: Option<ResourceRecord>,

    /// The NS set at the cut.
    pub ns: Vec<ResourceRecord>,

    /// Whether the apex carries the resolver-sensitive marker, which
    /// switches location resolution to the resolver map.
    pub resolver_sensitive: bool,

    /// The zone's default location, used when no prefix matches the
    /// client.
    pub default_location: Option<LocationId>,
}

impl ZoneCut {
    /// The SOA record, which `soa` guarantees for authoritative cuts.
    pub fn soa_rr(&self) -> Option<ResourceRecord> {
        self.soa.clone()
    }
}

/// The outcome of the authority check for one name.
#[derive(Debug, Clone)]
pub enum Authority {
    /// The name is inside a zone we carry a SOA for.
    Authoritative(ZoneCut),

    /// The name is below a delegation inside a zone we carry: `cut`
    /// holds the NS set, `parent` the enclosing authoritative zone.
    Delegated { cut: ZoneCut, parent: ZoneCut },

    /// The name is in nobody's zone here: refuse.
    Foreign,
}

/// Classify a name against the store's zones.
///
/// # Errors
///
/// If a store read fails or an authority record does not decode.
pub fn find_authority<S: Store + ?Sized>(
    store: &S,
    name: &DomainName,
    location: &LocationId,
) -> Result<Authority, StoreError> {
    let mut suffix = Some(name.clone());
    let mut delegation: Option<ZoneCut> = None;

    while let Some(at) = suffix {
        let parent = at.parent();
        let cut = cut_meta(store, &at, location)?;

        if cut.soa.is_some() {
            return Ok(match delegation {
                Some(delegated) => Authority::Delegated {
                    cut: delegated,
                    parent: cut,
                },
                None => Authority::Authoritative(cut),
            });
        }

        if delegation.is_none() && !cut.ns.is_empty() {
            delegation = Some(cut);
        }

        suffix = parent;
    }

    Ok(Authority::Foreign)
}

/// Read the cut-relevant frames at one name: SOA, NS set, the
/// resolver-sensitive marker, and the zone default location.
///
/// # Errors
///
/// If the store read fails or a SOA/NS frame does not decode.
pub fn cut_meta<S: Store + ?Sized>(
    store: &S,
    name: &DomainName,
    location: &LocationId,
) -> Result<ZoneCut, StoreError> {
    let mut soa = None;
    let mut ns = Vec::new();
    let mut resolver_sensitive = false;
    let mut default_location = None;
    let mut bad_frame = false;

    let soa_type = u16::from(RecordType::SOA);
    let ns_type = u16::from(RecordType::NS);

    store.for_each_frame(&key::record_key(&name.octets), location, &mut |frame| {
        match frame {
            Frame::Record(record) if record.rtype == soa_type => {
                if soa.is_none() {
                    match record_from_frame(name, RecordType::SOA, record.ttl, record.rdata) {
                        Some(rr) => soa = Some(rr),
                        None => bad_frame = true,
                    }
                }
            }
            Frame::Record(record) if record.rtype == ns_type => {
                match record_from_frame(name, RecordType::NS, record.ttl, record.rdata) {
                    Some(rr) => ns.push(rr),
                    None => bad_frame = true,
                }
            }
            Frame::Record(_) => {}
            Frame::MapEntry(id) => default_location = Some(id),
            Frame::ResolverSensitive => resolver_sensitive = true,
        }
        if bad_frame {
            FrameStep::Stop
        } else {
            FrameStep::Continue
        }
    })?;

    if bad_frame {
        return Err(StoreError::Corrupt("undecodable authority record"));
    }

    Ok(ZoneCut {
        apex: name.clone(),
        soa,
        ns,
        resolver_sensitive,
        default_location,
    })
}

/// Decode one record frame's rdata into a full resource record at
/// `name`.  Rdata in the store is uncompressed wire form.
pub fn record_from_frame(
    name: &DomainName,
    rtype: RecordType,
    ttl: u32,
    rdata: &[u8],
) -> Option<ResourceRecord> {
    let rdlength = u16::try_from(rdata.len()).ok()?;
    let mut buffer = ConsumableBuffer::new(rdata);
    let rtype_with_data =
        RecordTypeWithData::deserialise(0, rtype, rdlength, &mut buffer).ok()?;

    Some(ResourceRecord {
        name: name.clone(),
        rtype_with_data,
        rclass: RecordClass::IN,
        ttl,
    })
}
