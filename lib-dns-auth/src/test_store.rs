//! A compiled store fixture shared by the crate's tests: two
//! authoritative zones, a delegation, location-scoped records,
//! wildcards, CNAME chains, and both prefix maps, built through the
//! same writer the offline compiler uses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use dns_store::frame::{encode_map_entry_frame, encode_record_frame, encode_resolver_sensitive_frame};
use dns_store::hashfile::writer::HashFileWriter;
use dns_store::key::{self, MapKind};
use dns_store::kv::KvStore;
use dns_store::{HashFile, LocationId};
use dns_types::protocol::types::test_util::*;
use dns_types::protocol::types::RecordTypeWithData;

pub fn loc(octet: u8) -> LocationId {
    LocationId::new(&[0, octet]).unwrap()
}

/// The per-zone default location of `example.com.`.
pub fn zone_default_location() -> LocationId {
    loc(0x10)
}

/// One frame under one key.  The hash store gets each as its own
/// record; the KV store appends them per key in order.
fn fixture_entries() -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut entries = Vec::new();

    // example.com. - the main zone
    record(&mut entries, "example.com.", None, soa("ns1.example.com."), 180);
    record(&mut entries, "example.com.", None, ns("ns1.example.com."), 300);
    record(&mut entries, "example.com.", None, ns("ns2.example.com."), 300);
    map_entry_at(&mut entries, "example.com.", zone_default_location());

    record(&mut entries, "ns1.example.com.", None, a(192, 0, 2, 10), 300);
    record(&mut entries, "ns2.example.com.", None, a(192, 0, 2, 11), 300);

    record(
        &mut entries,
        "foo.example.com.",
        Some(zone_default_location()),
        a(1, 1, 1, 1),
        180,
    );
    record(
        &mut entries,
        "foo.example.com.",
        Some(loc(0x20)),
        a(1, 1, 1, 2),
        180,
    );

    record(&mut entries, "bar.example.com.", None, a(5, 5, 5, 5), 300);

    record(
        &mut entries,
        "www.example.com.",
        None,
        cname("www.nonauth.example.com."),
        300,
    );

    // a delegation: NS but no SOA
    record(
        &mut entries,
        "nonauth.example.com.",
        None,
        ns("ns1.nonauth.example.com."),
        300,
    );
    record(
        &mut entries,
        "nonauth.example.com.",
        None,
        ns("ns2.nonauth.example.com."),
        300,
    );
    record(&mut entries, "ns1.nonauth.example.com.", None, a(192, 0, 2, 1), 300);
    record(
        &mut entries,
        "ns1.nonauth.example.com.",
        None,
        RecordTypeWithData::AAAA {
            address: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1),
        },
        300,
    );
    record(&mut entries, "ns2.nonauth.example.com.", None, a(192, 0, 2, 2), 300);

    // weighted-selection data
    record(&mut entries, "wrr.example.com.", None, a(6, 6, 6, 1), 300);
    record(&mut entries, "wrr.example.com.", None, a(6, 6, 6, 2), 300);
    record(&mut entries, "wrr.example.com.", None, a(6, 6, 6, 3), 300);

    // wildcards
    record(
        &mut entries,
        "*.wild.example.com.",
        None,
        RecordTypeWithData::TXT {
            octets: b"wild".to_vec(),
        },
        300,
    );

    // CNAME chains: one well-behaved, one cyclic, one too long
    record(
        &mut entries,
        "cname-a.example.com.",
        None,
        cname("foo.example.com."),
        300,
    );
    record(
        &mut entries,
        "loop1.example.com.",
        None,
        cname("loop2.example.com."),
        300,
    );
    record(
        &mut entries,
        "loop2.example.com.",
        None,
        cname("loop1.example.com."),
        300,
    );
    for i in 0..12 {
        record(
            &mut entries,
            &format!("chain{i}.example.com."),
            None,
            cname(&format!("chain{}.example.com.", i + 1)),
            300,
        );
    }
    record(&mut entries, "chain12.example.com.", None, a(8, 8, 8, 8), 300);

    // enough rdata to overflow a 512-octet datagram
    for i in 0..30u8 {
        record(
            &mut entries,
            "big.example.com.",
            None,
            RecordTypeWithData::TXT {
                octets: vec![i; 64],
            },
            300,
        );
    }

    // additional-section targets
    record(
        &mut entries,
        "mx.example.com.",
        None,
        RecordTypeWithData::MX {
            preference: 10,
            exchange: domain("mail.example.com."),
        },
        300,
    );
    record(&mut entries, "mail.example.com.", None, a(192, 0, 2, 20), 300);
    record(
        &mut entries,
        "https.example.com.",
        None,
        RecordTypeWithData::HTTPS {
            priority: 1,
            target: domain("svc.example.com."),
            params: Vec::new(),
        },
        300,
    );
    record(&mut entries, "svc.example.com.", None, a(203, 0, 113, 1), 300);
    record(&mut entries, "svc.example.com.", None, a(203, 0, 113, 2), 300);

    // example.org. - a second zone, no default location
    record(&mut entries, "example.org.", None, soa("ns1.example.org."), 180);
    record(&mut entries, "example.org.", None, ns("ns1.example.org."), 300);
    record(&mut entries, "example.org.", None, ns("ns2.example.org."), 300);
    record(&mut entries, "ns1.example.org.", None, a(192, 0, 2, 30), 300);
    record(&mut entries, "ns2.example.org.", None, a(192, 0, 2, 31), 300);
    record(&mut entries, "deep.under.example.org.", None, a(192, 0, 2, 40), 300);

    // sensitive.example. - a resolver-sensitive zone
    record(&mut entries, "sensitive.example.", None, soa("ns1.sensitive.example."), 180);
    record(&mut entries, "sensitive.example.", None, ns("ns1.sensitive.example."), 300);
    record(&mut entries, "sensitive.example.", None, ns("ns2.sensitive.example."), 300);
    marker_at(&mut entries, "sensitive.example.");
    record(&mut entries, "ns1.sensitive.example.", None, a(192, 0, 2, 50), 300);
    record(&mut entries, "ns2.sensitive.example.", None, a(192, 0, 2, 51), 300);
    record(&mut entries, "rs.sensitive.example.", None, a(7, 0, 0, 1), 300);
    record(
        &mut entries,
        "rs.sensitive.example.",
        Some(loc(0x30)),
        a(7, 7, 7, 7),
        300,
    );
    record(
        &mut entries,
        "rs-cname.sensitive.example.",
        None,
        cname("foo.example.com."),
        300,
    );

    // the location map
    map(&mut entries, MapKind::Location, v4(1, 1, 1, 0), 24, loc(0x20));
    map(&mut entries, MapKind::Location, v4(10, 0, 0, 0), 8, loc(0x41));
    map(&mut entries, MapKind::Location, v4(10, 1, 0, 0), 16, loc(0x42));
    map(&mut entries, MapKind::Location, v4(10, 1, 2, 0), 24, loc(0x43));
    map(
        &mut entries,
        MapKind::Location,
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0)),
        32,
        loc(0x51),
    );

    // the resolver map
    map(&mut entries, MapKind::Resolver, v4(9, 9, 9, 0), 24, loc(0x30));

    entries
}

/// The fixture as an immutable hash file.
pub fn fixture_hash_store() -> (tempfile::TempDir, HashFile) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.chf");

    let mut writer = HashFileWriter::new();
    for (key, frame) in fixture_entries() {
        writer.insert(&key, &frame);
    }
    writer.write_to(&path).unwrap();

    let file = HashFile::open(&path).unwrap();
    (dir, file)
}

/// The fixture as a KV store (opened primary, so tests can write).
pub fn fixture_kv_store() -> (tempfile::TempDir, KvStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = KvStore::open_primary(dir.path()).unwrap();
    for (key, frame) in fixture_entries() {
        store.add_frame(&key, &frame).unwrap();
    }
    (dir, store)
}

fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

fn a(a_: u8, b: u8, c: u8, d: u8) -> RecordTypeWithData {
    RecordTypeWithData::A {
        address: Ipv4Addr::new(a_, b, c, d),
    }
}

fn ns(name: &str) -> RecordTypeWithData {
    RecordTypeWithData::NS {
        nsdname: domain(name),
    }
}

fn cname(name: &str) -> RecordTypeWithData {
    RecordTypeWithData::CNAME {
        cname: domain(name),
    }
}

fn soa(mname: &str) -> RecordTypeWithData {
    RecordTypeWithData::SOA {
        mname: domain(mname),
        rname: domain("hostmaster.example.com."),
        serial: 1,
        refresh: 3600,
        retry: 600,
        expire: 604_800,
        minimum: 180,
    }
}

fn record(
    entries: &mut Vec<(Vec<u8>, Vec<u8>)>,
    name: &str,
    location: Option<LocationId>,
    rtype_with_data: RecordTypeWithData,
    ttl: u32,
) {
    let owner = domain(name);
    let mut frame = Vec::new();
    encode_record_frame(
        &mut frame,
        location.as_ref(),
        u16::from(rtype_with_data.rtype()),
        ttl,
        &rtype_with_data.rdata_octets(),
    );
    entries.push((key::record_key(&owner.octets), frame));
}

fn map_entry_at(entries: &mut Vec<(Vec<u8>, Vec<u8>)>, name: &str, location: LocationId) {
    let owner = domain(name);
    let mut frame = Vec::new();
    encode_map_entry_frame(&mut frame, &location);
    entries.push((key::record_key(&owner.octets), frame));
}

fn marker_at(entries: &mut Vec<(Vec<u8>, Vec<u8>)>, name: &str) {
    let owner = domain(name);
    let mut frame = Vec::new();
    encode_resolver_sensitive_frame(&mut frame);
    entries.push((key::record_key(&owner.octets), frame));
}

fn map(
    entries: &mut Vec<(Vec<u8>, Vec<u8>)>,
    kind: MapKind,
    addr: IpAddr,
    prefix_len: u8,
    location: LocationId,
) {
    let mut frame = Vec::new();
    encode_map_entry_frame(&mut frame, &location);
    entries.push((key::map_key(kind, addr, prefix_len), frame));
}
