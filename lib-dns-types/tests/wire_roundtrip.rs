use fake::{Fake, Faker};
use std::net::{Ipv4Addr, Ipv6Addr};

use dns_types::protocol::deserialise::ConsumableBuffer;
use dns_types::protocol::serialise::WritableBuffer;
use dns_types::protocol::types::*;

#[test]
fn roundtrip_message() {
    for _ in 0..100 {
        let original = arbitrary_message();
        let deserialised = Message::from_octets(&original.to_octets().unwrap());

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_message_with_edns() {
    for _ in 0..100 {
        let mut original = arbitrary_message();
        original.edns = Some(arbitrary_edns());
        let deserialised = Message::from_octets(&original.to_octets().unwrap());

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_question() {
    for _ in 0..100 {
        let original = arbitrary_question();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised = Question::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_resourcerecord() {
    for _ in 0..100 {
        let original = arbitrary_resourcerecord();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer).unwrap();
        let deserialised =
            ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_domainname() {
    for _ in 0..100 {
        let original = arbitrary_domainname();

        let mut buffer = WritableBuffer::default();
        buffer.write_name(&original, false);
        let deserialised = DomainName::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

fn arbitrary_message() -> Message {
    let qdcount = (0..4).fake::<u16>();
    let ancount = (0..4).fake::<u16>();
    let nscount = (0..4).fake::<u16>();
    let arcount = (0..4).fake::<u16>();

    let mut questions = Vec::with_capacity(qdcount as usize);
    let mut answers = Vec::with_capacity(ancount as usize);
    let mut authority = Vec::with_capacity(nscount as usize);
    let mut additional = Vec::with_capacity(arcount as usize);

    for _ in 0..qdcount {
        questions.push(arbitrary_question());
    }
    for _ in 0..ancount {
        answers.push(arbitrary_resourcerecord());
    }
    for _ in 0..nscount {
        authority.push(arbitrary_resourcerecord());
    }
    for _ in 0..arcount {
        additional.push(arbitrary_resourcerecord());
    }

    Message {
        header: arbitrary_header(),
        questions,
        answers,
        authority,
        additional,
        edns: None,
    }
}

fn arbitrary_header() -> Header {
    Header {
        id: Faker.fake(),
        is_response: Faker.fake(),
        opcode: (Faker.fake::<u8>() & 0b0000_1111).into(),
        is_authoritative: Faker.fake(),
        is_truncated: Faker.fake(),
        recursion_desired: Faker.fake(),
        recursion_available: Faker.fake(),
        rcode: (Faker.fake::<u8>() & 0b0000_1111).into(),
    }
}

fn arbitrary_question() -> Question {
    Question {
        name: arbitrary_domainname(),
        qtype: Faker.fake::<u16>().into(),
        qclass: Faker.fake::<u16>().into(),
    }
}

fn arbitrary_resourcerecord() -> ResourceRecord {
    ResourceRecord {
        name: arbitrary_domainname(),
        rtype_with_data: arbitrary_recordtypewithdata(),
        rclass: arbitrary_recordclass(),
        ttl: Faker.fake(),
    }
}

fn arbitrary_recordtypewithdata() -> RecordTypeWithData {
    // this should match the `RecordTypeWithData` deserialisation
    match (0..13).fake::<u8>() {
        0 => RecordTypeWithData::A {
            address: Ipv4Addr::from(Faker.fake::<u32>()),
        },
        1 => RecordTypeWithData::NS {
            nsdname: arbitrary_domainname(),
        },
        2 => RecordTypeWithData::CNAME {
            cname: arbitrary_domainname(),
        },
        3 => RecordTypeWithData::SOA {
            mname: arbitrary_domainname(),
            rname: arbitrary_domainname(),
            serial: Faker.fake(),
            refresh: Faker.fake(),
            retry: Faker.fake(),
            expire: Faker.fake(),
            minimum: Faker.fake(),
        },
        4 => RecordTypeWithData::PTR {
            ptrdname: arbitrary_domainname(),
        },
        5 => RecordTypeWithData::MX {
            preference: Faker.fake(),
            exchange: arbitrary_domainname(),
        },
        6 => RecordTypeWithData::TXT {
            octets: arbitrary_octets((0..64).fake()),
        },
        7 => RecordTypeWithData::AAAA {
            address: Ipv6Addr::from(Faker.fake::<u128>()),
        },
        8 => RecordTypeWithData::SRV {
            priority: Faker.fake(),
            weight: Faker.fake(),
            port: Faker.fake(),
            target: arbitrary_domainname(),
        },
        9 => RecordTypeWithData::DS {
            key_tag: Faker.fake(),
            algorithm: Faker.fake(),
            digest_type: Faker.fake(),
            digest: arbitrary_octets((0..32).fake()),
        },
        10 => RecordTypeWithData::SVCB {
            priority: Faker.fake(),
            target: arbitrary_domainname(),
            params: arbitrary_octets((0..16).fake()),
        },
        11 => RecordTypeWithData::HTTPS {
            priority: Faker.fake(),
            target: arbitrary_domainname(),
            params: arbitrary_octets((0..16).fake()),
        },
        _ => {
            // stay clear of the assigned type numbers
            let tag = match RecordType::from((100..200).fake::<u16>()) {
                RecordType::Unknown(tag) => tag,
                _ => unreachable!(),
            };
            RecordTypeWithData::Unknown {
                tag,
                octets: arbitrary_octets((0..64).fake()),
            }
        }
    }
}

fn arbitrary_edns() -> Edns {
    let mut options = Vec::new();
    if Faker.fake() {
        options.push(EdnsOption::ClientSubnet(ClientSubnet::from_addr(
            std::net::IpAddr::V4(Ipv4Addr::from(Faker.fake::<u32>())),
            (0..=32).fake(),
        )));
    }
    if Faker.fake() {
        options.push(EdnsOption::Unknown {
            code: (20000..30000).fake(),
            octets: arbitrary_octets((0..16).fake()),
        });
    }

    Edns {
        udp_payload_size: Faker.fake(),
        extended_rcode: Faker.fake(),
        version: Faker.fake(),
        dnssec_ok: Faker.fake(),
        options,
    }
}

fn arbitrary_domainname() -> DomainName {
    let num_labels = (1..5).fake::<usize>();
    let mut labels = Vec::with_capacity(num_labels + 1);

    for _ in 0..num_labels {
        let label_len = (1..63).fake::<usize>();
        let mut label = Vec::with_capacity(label_len);

        for _ in 0..label_len {
            label.push(Faker.fake::<u8>().to_ascii_lowercase());
        }

        labels.push(Label::try_from(label.as_slice()).unwrap());
    }

    labels.push(Label::new());

    DomainName::from_labels(labels).unwrap()
}

fn arbitrary_recordclass() -> RecordClass {
    Faker.fake::<u16>().into()
}

fn arbitrary_octets(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(Faker.fake());
    }
    out
}
