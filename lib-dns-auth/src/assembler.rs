//! Building the response message from a resolution.
//!
//! The assembler fills the three record sections, pulls glue
//! addresses for anything the answer points at, and echoes EDNS
//! state.  Size-budgeted truncation happens at serialisation time,
//! via `Message::serialise_with_limit`.

use dns_store::{LocationId, Store};
use dns_types::protocol::types::*;

use crate::resolver::{collect_records, select_weighted, Resolution};
use crate::ServerConfig;

/// Assemble the sections of a response.  Returns the message (without
/// EDNS state; see `attach_edns`) and whether anything in it - the
/// answers or the glue - was weighted-randomly selected.
pub fn build_response<S: Store + ?Sized>(
    store: &S,
    config: &ServerConfig,
    query: &Message,
    resolution: &Resolution,
    location: &LocationId,
) -> (Message, bool) {
    let mut response = query.make_response();
    response.header.rcode = resolution.rcode;
    response.header.is_authoritative = resolution.authoritative;
    response.answers = resolution.answers.clone();
    response.authority = resolution.authority.clone();

    let mut weighted = resolution.weighted;

    // glue: addresses for every target the answer and authority
    // sections name, where we have them
    let mut targets: Vec<&DomainName> = Vec::new();
    for rr in response.answers.iter().chain(response.authority.iter()) {
        if let Some(target) = rr.rtype_with_data.target_name() {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    let mut additional = Vec::new();
    for target in targets {
        // a target already answered needs no glue
        if response.answers.iter().any(|rr| {
            rr.name == *target
                && matches!(
                    rr.rtype_with_data.rtype(),
                    RecordType::A | RecordType::AAAA
                )
        }) {
            continue;
        }

        let key = dns_store::key::record_key(&target.octets);
        let records = match collect_records(store, &key, target, location) {
            Ok(records) => records,
            Err(error) => {
                // glue is best-effort: a bad target never fails the
                // response
                tracing::warn!(target = %target.to_dotted_string(), %error, "skipping glue");
                continue;
            }
        };

        for rtype in [RecordType::A, RecordType::AAAA] {
            let mut addresses: Vec<ResourceRecord> = records
                .iter()
                .filter(|rr| rr.rtype_with_data.rtype() == rtype)
                .cloned()
                .collect();
            weighted |= select_weighted(rtype, &mut addresses, config.max_answer);
            additional.append(&mut addresses);
        }
    }
    response.additional = additional;

    (response, weighted)
}

/// Echo EDNS state into a response to a query that carried EDNS: our
/// payload size, the client subnet option with the resolved scope,
/// and an extended error on refusals.
pub fn attach_edns(
    response: &mut Message,
    query_edns: &Edns,
    config: &ServerConfig,
    scope: Option<u8>,
) {
    let mut edns = Edns::response(config.udp_payload_cap);

    if let Some(ecs) = query_edns.client_subnet() {
        if let Some(scope_prefix) = scope {
            edns.options.push(EdnsOption::ClientSubnet(ClientSubnet {
                family: ecs.family,
                source_prefix: ecs.source_prefix,
                scope_prefix,
                address: ecs.address.clone(),
            }));
        }
    }

    if response.header.rcode == Rcode::Refused {
        edns.options
            .push(EdnsOption::ExtendedError(ExtendedError::not_authoritative()));
    }

    response.edns = Some(edns);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ResolvedLocation;
    use crate::resolver::resolve_query;
    use crate::test_store::*;
    use crate::QueryContext;
    use dns_types::protocol::types::test_util::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn run(
        qname: &str,
        qtype: RecordType,
        location: LocationId,
    ) -> (Message, bool) {
        let (_dir, store) = fixture_hash_store();
        let config = ServerConfig::default();
        let ctx = QueryContext::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        let resolved = ResolvedLocation {
            location: location.clone(),
            scope: None,
        };

        let query = Message::from_question(
            1,
            Question {
                name: domain(qname),
                qtype: QueryType::Record(qtype),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        let resolution = resolve_query(
            &store,
            &config,
            &ctx,
            &domain(qname),
            QueryType::Record(qtype),
            &resolved,
        )
        .unwrap();

        build_response(&store, &config, &query, &resolution, &location)
    }

    #[test]
    fn referral_carries_ns_glue() {
        let (response, weighted) = run(
            "www.example.com.",
            RecordType::A,
            zone_default_location(),
        );

        assert!(!response.header.is_authoritative);
        assert_eq!(1, response.answers.len());
        assert_eq!(2, response.authority.len());

        // A and AAAA for ns1, A for ns2
        assert_eq!(3, response.additional.len());
        assert!(response
            .additional
            .iter()
            .any(|rr| rr.name == domain("ns1.nonauth.example.com.")
                && rr.rtype_with_data.rtype() == RecordType::AAAA));
        assert!(!weighted);
    }

    #[test]
    fn mx_exchange_gets_glue() {
        let (response, weighted) = run("mx.example.com.", RecordType::MX, zone_default_location());

        assert_eq!(1, response.answers.len());
        assert_eq!(1, response.additional.len());
        assert_eq!(domain("mail.example.com."), response.additional[0].name);
        assert!(!weighted);
    }

    #[test]
    fn weighted_glue_sets_the_flag() {
        let (response, weighted) = run(
            "https.example.com.",
            RecordType::HTTPS,
            zone_default_location(),
        );

        assert_eq!(1, response.answers.len());
        assert_eq!(2, response.additional.len());
        assert!(weighted);
    }

    #[test]
    fn negative_answer_has_no_glue() {
        let (response, _) = run("bar.example.com.", RecordType::TXT, zone_default_location());

        assert!(response.answers.is_empty());
        assert_eq!(1, response.authority.len());
        assert!(response.additional.is_empty());
    }

    #[test]
    fn edns_echo_carries_scope() {
        let config = ServerConfig::default();
        let mut response = Message::from_question(
            7,
            Question {
                name: domain("foo.example.com."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        )
        .make_response();

        let mut query_edns = Edns::response(4096);
        query_edns
            .options
            .push(EdnsOption::ClientSubnet(ClientSubnet::from_addr(
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 0)),
                24,
            )));

        attach_edns(&mut response, &query_edns, &config, Some(24));

        let edns = response.edns.unwrap();
        assert_eq!(config.udp_payload_cap, edns.udp_payload_size);
        let ecs = edns.client_subnet().unwrap();
        assert_eq!(24, ecs.source_prefix);
        assert_eq!(24, ecs.scope_prefix);
        assert_eq!(vec![1, 1, 1], ecs.address);
    }

    #[test]
    fn refused_gets_extended_error() {
        let config = ServerConfig::default();
        let mut response = Message::make_format_error_response(9);
        response.header.rcode = Rcode::Refused;

        attach_edns(&mut response, &Edns::response(512), &config, None);

        let edns = response.edns.unwrap();
        assert!(edns.options.iter().any(|opt| matches!(
            opt,
            EdnsOption::ExtendedError(ede) if ede.info_code == EDE_NOT_AUTHORITATIVE
        )));
    }
}
