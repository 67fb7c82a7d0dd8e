//! Mapping a client to a location identifier.
//!
//! The store carries two longest-prefix maps per IP version: the
//! location map, keyed by the client subnet (or the transport source
//! address), and the resolver map, keyed by the resolver's own
//! address, consulted when the owner's zone is marked
//! resolver-sensitive.
//!
//! Longest-prefix matching is driven through the store's
//! `first_present`: the candidate keys run from the deepest prefix
//! down to zero, and the first present key is the deepest match.
//! The matched depth becomes the ECS scope echoed to the querier.

use std::net::IpAddr;

use dns_store::frame::{Frame, FrameIter};
use dns_store::key::{self, MapKind};
use dns_store::{LocationId, Store, StoreError};
use dns_types::protocol::types::ClientSubnet;

use crate::authority::ZoneCut;

/// The outcome of location resolution for one query name.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResolvedLocation {
    /// The location identifier to filter record frames by.
    pub location: LocationId,

    /// The ECS scope to echo; `None` when the query carried no ECS
    /// option.  Zero when the answer was not derived from the client
    /// subnet.
    pub scope: Option<u8>,
}

/// Resolve the location for a query.
///
/// `cut` is the authority result for the query name, if any: it
/// supplies the resolver-sensitive marker and the zone default.  The
/// steps, in order: resolver map for resolver-sensitive owners, then
/// the ECS subnet, then the transport source address, then the zone
/// default, then the process-wide fallback.
///
/// # Errors
///
/// If a store read fails or a map entry is malformed.
pub fn resolve_location<S: Store + ?Sized>(
    store: &S,
    cut: Option<&ZoneCut>,
    client_subnet: Option<&ClientSubnet>,
    source: IpAddr,
) -> Result<ResolvedLocation, StoreError> {
    // a scope of zero tells the querier the answer was not
    // subnet-specific
    let blanket_scope = client_subnet.map(|_| 0);

    if cut.map(|c| c.resolver_sensitive).unwrap_or(false) {
        if let Some((location, _)) = probe(store, MapKind::Resolver, source, u8::MAX)? {
            return Ok(ResolvedLocation {
                location,
                scope: blanket_scope,
            });
        }
    }

    if let Some(ecs) = client_subnet {
        if let Some(addr) = ecs.to_addr() {
            if let Some((location, depth)) =
                probe(store, MapKind::Location, addr, ecs.source_prefix)?
            {
                return Ok(ResolvedLocation {
                    location,
                    scope: Some(depth),
                });
            }
        }
    }

    if let Some((location, _)) = probe(store, MapKind::Location, source, u8::MAX)? {
        return Ok(ResolvedLocation {
            location,
            scope: blanket_scope,
        });
    }

    let location = cut
        .and_then(|c| c.default_location.clone())
        .unwrap_or_else(LocationId::fallback_default);
    Ok(ResolvedLocation {
        location,
        scope: blanket_scope,
    })
}

/// Longest-prefix probe of one map.  Returns the location and the
/// depth at which the match was found.
fn probe<S: Store + ?Sized>(
    store: &S,
    kind: MapKind,
    addr: IpAddr,
    max_prefix: u8,
) -> Result<Option<(LocationId, u8)>, StoreError> {
    let limit = match addr {
        IpAddr::V4(_) => std::cmp::min(max_prefix, 32),
        IpAddr::V6(_) => std::cmp::min(max_prefix, 128),
    };

    let keys = key::map_probe_keys(kind, addr, limit);
    let Some((value, index)) = store.first_present(&keys)? else {
        return Ok(None);
    };

    for frame in FrameIter::new(value) {
        if let Frame::MapEntry(location) = frame? {
            let depth = key::probe_index_to_prefix(limit, index);
            return Ok(Some((location, depth)));
        }
    }

    // a present key with no map entry carries nothing useful
    Ok(None)
}
