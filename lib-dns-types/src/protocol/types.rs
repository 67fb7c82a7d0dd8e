use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Maximum encoded length of a domain name, including both length and
/// label octets.
pub const DOMAINNAME_MAX_LEN: usize = 255;

/// Maximum length of a single label.
pub const LABEL_MAX_LEN: usize = 63;

pub const HEADER_MASK_QR: u8 = 0b1000_0000;
pub const HEADER_MASK_OPCODE: u8 = 0b0111_1000;
pub const HEADER_OFFSET_OPCODE: usize = 3;
pub const HEADER_MASK_AA: u8 = 0b0000_0100;
pub const HEADER_MASK_TC: u8 = 0b0000_0010;
pub const HEADER_MASK_RD: u8 = 0b0000_0001;
pub const HEADER_MASK_RA: u8 = 0b1000_0000;
pub const HEADER_MASK_RCODE: u8 = 0b0000_1111;
pub const HEADER_OFFSET_RCODE: usize = 0;

/// The OPT pseudo-RR type (RFC 6891).  It never appears as a
/// `RecordType`: deserialisation lifts it into `Message.edns` and
/// serialisation emits it from there.
pub const TYPE_OPT: u16 = 41;

/// EDNS option code for Client Subnet (RFC 7871).
pub const OPTION_CODE_CLIENT_SUBNET: u16 = 8;

/// EDNS option code for Extended DNS Errors (RFC 8914).
pub const OPTION_CODE_EXTENDED_ERROR: u16 = 15;

/// Extended DNS Error: this server is not authoritative for the name.
pub const EDE_NOT_AUTHORITATIVE: u16 = 20;

/// Address family numbers used by the Client Subnet option.
pub const ADDRESS_FAMILY_IPV4: u16 = 1;
pub const ADDRESS_FAMILY_IPV6: u16 = 2;

/// The high eight bits of the 12-bit BADVERS rcode (RFC 6891 section
/// 6.1.3): the header carries the low four bits (zero), the OPT TTL
/// carries these.
pub const EXTENDED_RCODE_BADVERS: u8 = 1;

/// Smallest UDP payload every DNS implementation must accept.
pub const MIN_UDP_PAYLOAD_SIZE: u16 = 512;

/// Basic DNS message format, used for both queries and responses.
///
/// ```text
///     +---------------------+
///     |        Header       |
///     +---------------------+
///     |       Question      | the question for the name server
///     +---------------------+
///     |        Answer       | RRs answering the question
///     +---------------------+
///     |      Authority      | RRs pointing toward an authority
///     +---------------------+
///     |      Additional     | RRs holding additional information
///     +---------------------+
/// ```
///
/// See section 4.1 of RFC 1035.  The OPT pseudo-record, if any, is
/// held apart from the additional section in `edns`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
    pub edns: Option<Edns>,
}

impl Message {
    pub fn make_response(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                is_response: true,
                opcode: self.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: self.header.recursion_desired,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: self.questions.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            edns: None,
        }
    }

    pub fn make_format_error_response(id: u16) -> Self {
        Self {
            header: Header {
                id,
                is_response: true,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::FormatError,
            },
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            edns: None,
        }
    }

    pub fn from_question(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                is_response: false,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            edns: None,
        }
    }

    /// Answer an unsupported EDNS version with BADVERS: the header
    /// rcode carries the low four bits (zero), the OPT record the
    /// high eight.
    pub fn set_badvers(&mut self, payload_size: u16) {
        self.header.rcode = Rcode::NoError;
        self.edns = Some(Edns {
            udp_payload_size: payload_size,
            extended_rcode: EXTENDED_RCODE_BADVERS,
            version: 0,
            dnssec_ok: false,
            options: Vec::new(),
        });
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.1 of RFC 1035.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Header {
    /// A 16 bit identifier assigned by the program that generates any
    /// kind of query, copied into the corresponding reply.
    pub id: u16,

    /// Whether this message is a query (0) or a response (1).
    pub is_response: bool,

    /// What kind of query this message carries.
    pub opcode: Opcode,

    /// Authoritative Answer - valid in responses, and specifies that
    /// the responding name server is an authority for the domain name
    /// in the question section.
    pub is_authoritative: bool,

    /// TrunCation - this message was truncated to fit the
    /// transmission channel.
    pub is_truncated: bool,

    /// Recursion Desired - set in a query and copied into the
    /// response.
    pub recursion_desired: bool,

    /// Recursion Available - whether recursive query support is
    /// available.  This server never recurses, so responses always
    /// clear it.
    pub recursion_available: bool,

    /// Response code.
    pub rcode: Rcode,
}

/// A `Header` as it appears on the network.  This type is used for
/// serialisation and deserialisation only: including the count fields
/// in the normal `Header` type would require ensuring those values
/// are correct.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    /// The header that will be persisted to / is taken from the
    /// `Message`.
    pub header: Header,

    /// Number of entries in the question section.
    pub qdcount: u16,

    /// Number of resource records in the answer section.
    pub ancount: u16,

    /// Number of resource records in the authority section.
    pub nscount: u16,

    /// Number of resource records in the additional section.
    pub arcount: u16,
}

/// A single question.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                     QNAME                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QTYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QCLASS                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.2 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Question {
    pub name: DomainName,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl Question {
    pub fn is_unknown(&self) -> bool {
        self.qtype.is_unknown() || self.qclass.is_unknown()
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.name.to_dotted_string(),
            self.qclass,
            self.qtype
        )
    }
}

/// The structure for a single resource record.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                                               /
///     /                      NAME                     /
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     CLASS                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TTL                      |
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                   RDLENGTH                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
///     /                     RDATA                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.3 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ResourceRecord {
    /// A domain name to which this resource record pertains.
    pub name: DomainName,

    /// A combination of the RTYPE and RDATA fields.
    pub rtype_with_data: RecordTypeWithData,

    /// The class of the data in the RDATA field.
    pub rclass: RecordClass,

    /// How long (in seconds) the record may be cached.
    pub ttl: u32,
}

impl ResourceRecord {
    pub fn is_unknown(&self) -> bool {
        self.rtype_with_data.is_unknown() || self.rclass.is_unknown()
    }

    pub fn matches(&self, question: &Question) -> bool {
        self.rtype_with_data.matches(question.qtype) && self.rclass.matches(question.qclass)
    }
}

/// A record type with its associated, deserialised, data.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordTypeWithData {
    /// A 32 bit Internet address.
    A { address: Ipv4Addr },

    /// A domain name which specifies a host which should be
    /// authoritative for the specified class and domain.
    NS { nsdname: DomainName },

    /// A domain name which specifies the canonical or primary name
    /// for the owner.  The owner name is an alias.
    CNAME { cname: DomainName },

    /// The start of a zone of authority.
    ///
    /// `MNAME` is the primary source of data for this zone, `RNAME`
    /// the mailbox of the person responsible for it.  `SERIAL` wraps
    /// and should be compared using sequence space arithmetic.
    /// `MINIMUM` is a lower bound on the TTL of any RR exported from
    /// the zone.  All times are in seconds.
    SOA {
        mname: DomainName,
        rname: DomainName,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },

    /// A domain name which points to some location in the domain name
    /// space.
    PTR { ptrdname: DomainName },

    /// A mail exchange for the owner name: a 16 bit preference (lower
    /// preferred) and the exchange host.
    MX {
        preference: u16,
        exchange: DomainName,
    },

    /// One or more character strings.
    TXT { octets: Vec<u8> },

    /// A 128 bit Internet address.
    AAAA { address: Ipv6Addr },

    /// The location of a service (RFC 2782): priority and weight for
    /// server selection, the port, and the target host.
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },

    /// A delegation signer digest (RFC 4034 section 5).  The digest
    /// is kept opaque: this server stores and serves it, a signing
    /// collaborator produces it.
    DS {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: Vec<u8>,
    },

    /// General-purpose service binding (RFC 9460): a priority, a
    /// target name, and the service parameters in wire form.
    SVCB {
        priority: u16,
        target: DomainName,
        params: Vec<u8>,
    },

    /// Service binding for HTTPS origins; same wire shape as SVCB.
    HTTPS {
        priority: u16,
        target: DomainName,
        params: Vec<u8>,
    },

    /// Any other record.
    Unknown {
        tag: RecordTypeUnknown,
        octets: Vec<u8>,
    },
}

impl RecordTypeWithData {
    pub fn is_unknown(&self) -> bool {
        self.rtype().is_unknown()
    }

    pub fn matches(&self, qtype: QueryType) -> bool {
        self.rtype().matches(qtype)
    }

    pub fn rtype(&self) -> RecordType {
        match self {
            RecordTypeWithData::A { .. } => RecordType::A,
            RecordTypeWithData::NS { .. } => RecordType::NS,
            RecordTypeWithData::CNAME { .. } => RecordType::CNAME,
            RecordTypeWithData::SOA { .. } => RecordType::SOA,
            RecordTypeWithData::PTR { .. } => RecordType::PTR,
            RecordTypeWithData::MX { .. } => RecordType::MX,
            RecordTypeWithData::TXT { .. } => RecordType::TXT,
            RecordTypeWithData::AAAA { .. } => RecordType::AAAA,
            RecordTypeWithData::SRV { .. } => RecordType::SRV,
            RecordTypeWithData::DS { .. } => RecordType::DS,
            RecordTypeWithData::SVCB { .. } => RecordType::SVCB,
            RecordTypeWithData::HTTPS { .. } => RecordType::HTTPS,
            RecordTypeWithData::Unknown { tag, .. } => RecordType::Unknown(*tag),
        }
    }

    /// The name this record points at, for types whose rdata names
    /// another host the additional section may want addresses for.
    pub fn target_name(&self) -> Option<&DomainName> {
        match self {
            RecordTypeWithData::NS { nsdname } => Some(nsdname),
            RecordTypeWithData::MX { exchange, .. } => Some(exchange),
            RecordTypeWithData::SRV { target, .. } => Some(target),
            RecordTypeWithData::SVCB { target, .. } | RecordTypeWithData::HTTPS { target, .. } => {
                if target.is_root() {
                    None
                } else {
                    Some(target)
                }
            }
            _ => None,
        }
    }
}

/// What sort of query this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Opcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OpcodeReserved(u8);

impl Opcode {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Opcode::Reserved(_))
    }
}

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(octet)) => octet,
        }
    }
}

/// What sort of response this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Rcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RcodeReserved(u8);

impl Rcode {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Rcode::Reserved(_))
    }
}

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(octet)) => octet,
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rcode::NoError => write!(f, "NOERROR"),
            Rcode::FormatError => write!(f, "FORMERR"),
            Rcode::ServerFailure => write!(f, "SERVFAIL"),
            Rcode::NameError => write!(f, "NXDOMAIN"),
            Rcode::NotImplemented => write!(f, "NOTIMP"),
            Rcode::Refused => write!(f, "REFUSED"),
            Rcode::Reserved(RcodeReserved(octet)) => write!(f, "RESERVED{octet}"),
        }
    }
}

/// A domain name is a sequence of labels, where each label is a
/// length octet followed by that number of octets.
///
/// A label must be 63 octets or shorter.  A name must be 255 octets
/// or shorter in total, including both length and label octets.
/// Labels are lowercased on construction: owner names are stored and
/// compared lowercased in wire form.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DomainName {
    pub octets: Vec<u8>,
    pub labels: Vec<Label>,
}

impl DomainName {
    pub fn root_domain() -> Self {
        DomainName {
            octets: vec![0],
            labels: vec![Label::new()],
        }
    }

    pub fn is_root(&self) -> bool {
        self.octets.len() == 1 && self.labels.len() == 1
    }

    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        self.labels.ends_with(&other.labels)
    }

    /// True if the leftmost label is the single octet `*`.
    pub fn is_wildcard(&self) -> bool {
        self.labels.first().map(Label::is_wildcard).unwrap_or(false)
    }

    /// True if every label octet is plain ASCII.  Only such names are
    /// eligible for wildcard matching.
    pub fn is_ascii(&self) -> bool {
        self.octets.iter().all(u8::is_ascii)
    }

    /// The name with the leftmost label removed, or `None` for the
    /// root.
    pub fn parent(&self) -> Option<DomainName> {
        if self.is_root() {
            None
        } else {
            let skip = 1 + self.labels[0].len();
            Some(DomainName {
                octets: self.octets[skip..].to_vec(),
                labels: self.labels[1..].to_vec(),
            })
        }
    }

    /// The name with the leftmost label replaced by `*`.  Returns
    /// `None` for the root.
    pub fn to_wildcard(&self) -> Option<DomainName> {
        if self.is_root() {
            return None;
        }

        let skip = 1 + self.labels[0].len();
        let mut octets = Vec::with_capacity(2 + self.octets.len() - skip);
        octets.push(1);
        octets.push(b'*');
        octets.extend_from_slice(&self.octets[skip..]);

        let mut labels = Vec::with_capacity(self.labels.len());
        labels.push(Label::wildcard());
        labels.extend_from_slice(&self.labels[1..]);

        Some(DomainName { octets, labels })
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.octets.len());
        for label in &self.labels {
            for octet in label.octets() {
                out.push(*octet as char);
            }
            if !label.is_empty() {
                out.push('.');
            }
        }

        out
    }

    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root_domain());
        }

        let chunks = s.split('.').collect::<Vec<_>>();
        let mut labels = Vec::with_capacity(chunks.len() + 1);
        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.is_empty() {
                if i != chunks.len() - 1 {
                    return None;
                }
                labels.push(Label::new());
            } else {
                labels.push(Label::try_from(chunk.as_bytes()).ok()?);
            }
        }
        if !chunks.last().map(|c| c.is_empty()).unwrap_or(false) {
            labels.push(Label::new());
        }

        Self::from_labels(labels)
    }

    pub fn from_labels(labels: Vec<Label>) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }

        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut blank_label = false;

        for label in &labels {
            if blank_label {
                return None;
            }

            blank_label = label.is_empty();
            octets.push(label.len() as u8);
            octets.extend_from_slice(label.octets());
        }

        if blank_label && octets.len() <= DOMAINNAME_MAX_LEN {
            Some(Self { octets, labels })
        } else {
            None
        }
    }

    /// Parse a packed wire-form name (no compression pointers), as
    /// found in store keys and frame rdata.  Lowercases as it goes.
    pub fn from_wire_octets(octets: &[u8]) -> Option<Self> {
        if octets.is_empty() || octets.len() > DOMAINNAME_MAX_LEN {
            return None;
        }

        let mut labels = Vec::with_capacity(5);
        let mut pos = 0;
        loop {
            let len = *octets.get(pos)? as usize;
            if len == 0 {
                labels.push(Label::new());
                break;
            }
            let label = octets.get(pos + 1..pos + 1 + len)?;
            labels.push(Label::try_from(label).ok()?);
            pos += 1 + len;
        }

        if pos + 1 != octets.len() {
            return None;
        }

        Self::from_labels(labels)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainName")
            .field("to_dotted_string()", &self.to_dotted_string())
            .finish()
    }
}

/// A label, stored lowercased, at most 63 octets.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Label(Vec<u8>);

impl Label {
    pub fn new() -> Self {
        Label(Vec::new())
    }

    pub fn wildcard() -> Self {
        Label(vec![b'*'])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == [b'*']
    }

    pub fn octets(&self) -> &[u8] {
        &self.0
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<&[u8]> for Label {
    type Error = LabelTryFromOctetsError;

    fn try_from(octets: &[u8]) -> Result<Self, Self::Error> {
        if octets.len() > LABEL_MAX_LEN {
            return Err(LabelTryFromOctetsError::TooLong);
        }

        Ok(Label(octets.to_ascii_lowercase()))
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Errors that can arise when converting a byte slice into a `Label`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LabelTryFromOctetsError {
    TooLong,
}

/// Query types are a superset of record types.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QueryType {
    Record(RecordType),
    Any,
}

impl QueryType {
    pub fn is_unknown(&self) -> bool {
        match self {
            QueryType::Record(rtype) => rtype.is_unknown(),
            QueryType::Any => false,
        }
    }
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryType::Any,
            _ => QueryType::Record(RecordType::from(value)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::Any => 255,
            QueryType::Record(rtype) => rtype.into(),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryType::Any => write!(f, "ANY"),
            QueryType::Record(rtype) => rtype.fmt(f),
        }
    }
}

/// Query classes are a superset of record classes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QueryClass {
    Record(RecordClass),
    Any,
}

impl QueryClass {
    pub fn is_unknown(&self) -> bool {
        match self {
            QueryClass::Record(rclass) => rclass.is_unknown(),
            QueryClass::Any => false,
        }
    }
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryClass::Any,
            _ => QueryClass::Record(RecordClass::from(value)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::Any => 255,
            QueryClass::Record(rclass) => rclass.into(),
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryClass::Any => write!(f, "ANY"),
            QueryClass::Record(rclass) => rclass.fmt(f),
        }
    }
}

/// Record types are used by resource records and by queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    DS,
    SVCB,
    HTTPS,
    Unknown(RecordTypeUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordType`s cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordTypeUnknown(u16);

impl RecordType {
    pub fn is_unknown(&self) -> bool {
        matches!(self, RecordType::Unknown(_))
    }

    pub fn matches(&self, qtype: QueryType) -> bool {
        match qtype {
            QueryType::Any => true,
            QueryType::Record(rtype) => rtype == *self,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::DS => write!(f, "DS"),
            RecordType::SVCB => write!(f, "SVCB"),
            RecordType::HTTPS => write!(f, "HTTPS"),
            RecordType::Unknown(RecordTypeUnknown(n)) => write!(f, "{n}"),
        }
    }
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            43 => RecordType::DS,
            64 => RecordType::SVCB,
            65 => RecordType::HTTPS,
            _ => RecordType::Unknown(RecordTypeUnknown(value)),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::DS => 43,
            RecordType::SVCB => 64,
            RecordType::HTTPS => 65,
            RecordType::Unknown(RecordTypeUnknown(value)) => value,
        }
    }
}

/// Record classes are used by resource records and by queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordClass {
    IN,
    Unknown(RecordClassUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordClass`es cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordClassUnknown(u16);

impl RecordClass {
    pub fn is_unknown(&self) -> bool {
        matches!(self, RecordClass::Unknown(_))
    }

    pub fn matches(&self, qclass: QueryClass) -> bool {
        match qclass {
            QueryClass::Any => true,
            QueryClass::Record(rclass) => rclass == *self,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::Unknown(RecordClassUnknown(n)) => write!(f, "{n}"),
        }
    }
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            _ => RecordClass::Unknown(RecordClassUnknown(value)),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::Unknown(RecordClassUnknown(value)) => value,
        }
    }
}

/// The EDNS(0) state carried by a message's OPT pseudo-record (RFC
/// 6891).
///
/// ```text
///     +------------+--------------+------------------------------+
///     | Field Name | Field Type   | Description                  |
///     +------------+--------------+------------------------------+
///     | NAME       | domain name  | MUST be 0 (root domain)      |
///     | TYPE       | u_int16_t    | OPT (41)                     |
///     | CLASS      | u_int16_t    | requestor's UDP payload size |
///     | TTL        | u_int32_t    | extended RCODE and flags     |
///     | RDLEN      | u_int16_t    | length of all RDATA          |
///     | RDATA      | octet stream | {attribute,value} pairs      |
///     +------------+--------------+------------------------------+
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Edns {
    /// The sender's maximum UDP payload size.
    pub udp_payload_size: u16,

    /// High eight bits of the 12-bit extended rcode.
    pub extended_rcode: u8,

    /// EDNS version.  This server implements version 0 only.
    pub version: u8,

    /// The DNSSEC OK bit.
    pub dnssec_ok: bool,

    /// Decoded options.
    pub options: Vec<EdnsOption>,
}

impl Edns {
    pub fn response(udp_payload_size: u16) -> Self {
        Self {
            udp_payload_size,
            extended_rcode: 0,
            version: 0,
            dnssec_ok: false,
            options: Vec::new(),
        }
    }

    pub fn client_subnet(&self) -> Option<&ClientSubnet> {
        self.options.iter().find_map(|opt| match opt {
            EdnsOption::ClientSubnet(ecs) => Some(ecs),
            _ => None,
        })
    }

    /// The sender's payload size, clamped from below per RFC 6891
    /// section 6.2.3.
    pub fn effective_payload_size(&self) -> u16 {
        std::cmp::max(self.udp_payload_size, MIN_UDP_PAYLOAD_SIZE)
    }
}

/// A single decoded EDNS option.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum EdnsOption {
    ClientSubnet(ClientSubnet),
    ExtendedError(ExtendedError),
    Unknown { code: u16, octets: Vec<u8> },
}

/// The Client Subnet option (RFC 7871).
///
/// ```text
///                 +0 (MSB)                            +1 (LSB)
///      +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
///   0: |                          FAMILY                               |
///      +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
///   2: |     SOURCE PREFIX-LENGTH      |     SCOPE PREFIX-LENGTH       |
///      +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
///   4: |                           ADDRESS...                          /
///      +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ClientSubnet {
    /// Address family: 1 for IPv4, 2 for IPv6.
    pub family: u16,

    /// The prefix length the client asserts is significant.
    pub source_prefix: u8,

    /// In a query, must be 0.  In a response, the prefix length the
    /// answer is valid for.
    pub scope_prefix: u8,

    /// The address, truncated to `source_prefix` bits and zero-padded
    /// to whole octets.
    pub address: Vec<u8>,
}

impl ClientSubnet {
    /// Build an option from a client address, truncating to the
    /// prefix.
    pub fn from_addr(addr: IpAddr, source_prefix: u8) -> Self {
        let (family, octets, max_prefix) = match addr {
            IpAddr::V4(a) => (ADDRESS_FAMILY_IPV4, a.octets().to_vec(), 32),
            IpAddr::V6(a) => (ADDRESS_FAMILY_IPV6, a.octets().to_vec(), 128),
        };
        let source_prefix = std::cmp::min(source_prefix, max_prefix);
        let mut address = octets;
        address.truncate(source_prefix.div_ceil(8) as usize);
        if source_prefix % 8 != 0 {
            if let Some(last) = address.last_mut() {
                *last &= 0xffu8 << (8 - source_prefix % 8);
            }
        }

        Self {
            family,
            source_prefix,
            scope_prefix: 0,
            address,
        }
    }

    /// The full address with the truncated tail zero-filled, or
    /// `None` if the family is unknown or the address overlong.
    pub fn to_addr(&self) -> Option<IpAddr> {
        match self.family {
            ADDRESS_FAMILY_IPV4 => {
                if self.address.len() > 4 {
                    return None;
                }
                let mut octets = [0u8; 4];
                octets[..self.address.len()].copy_from_slice(&self.address);
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            ADDRESS_FAMILY_IPV6 => {
                if self.address.len() > 16 {
                    return None;
                }
                let mut octets = [0u8; 16];
                octets[..self.address.len()].copy_from_slice(&self.address);
                Some(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            _ => None,
        }
    }
}

/// The Extended DNS Error option (RFC 8914).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ExtendedError {
    pub info_code: u16,
    pub extra_text: String,
}

impl ExtendedError {
    pub fn not_authoritative() -> Self {
        Self {
            info_code: EDE_NOT_AUTHORITATIVE,
            extra_text: String::new(),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_labels = u.int_in_range::<usize>(0..=6)?;
        let mut labels = Vec::with_capacity(num_labels + 1);
        for _ in 0..num_labels {
            let label_len = u.int_in_range::<u8>(1..=20)?;
            let mut label = Vec::with_capacity(label_len as usize);
            let bs = u.bytes(label_len.into())?;
            for b in bs {
                let ascii_byte = if b.is_ascii() { *b } else { *b % 128 };
                let octet = if ascii_byte == b'.'
                    || ascii_byte == b'*'
                    || ascii_byte == 0
                    || (ascii_byte as char).is_whitespace()
                {
                    b'x'
                } else {
                    ascii_byte
                };
                label.push(octet);
            }
            labels.push(Label::try_from(label.as_slice()).unwrap());
        }
        labels.push(Label::new());
        Ok(Self::from_labels(labels).unwrap())
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordTypeWithData {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let len = u.int_in_range(0..=64)?;
        let octets = Vec::from(u.bytes(len)?);

        let rtype_with_data = match u.int_in_range(0..=12)? {
            0 => RecordTypeWithData::A {
                address: Ipv4Addr::from(u.arbitrary::<u32>()?),
            },
            1 => RecordTypeWithData::NS {
                nsdname: u.arbitrary()?,
            },
            2 => RecordTypeWithData::CNAME {
                cname: u.arbitrary()?,
            },
            3 => RecordTypeWithData::SOA {
                mname: u.arbitrary()?,
                rname: u.arbitrary()?,
                serial: u.arbitrary()?,
                refresh: u.arbitrary()?,
                retry: u.arbitrary()?,
                expire: u.arbitrary()?,
                minimum: u.arbitrary()?,
            },
            4 => RecordTypeWithData::PTR {
                ptrdname: u.arbitrary()?,
            },
            5 => RecordTypeWithData::MX {
                preference: u.arbitrary()?,
                exchange: u.arbitrary()?,
            },
            6 => RecordTypeWithData::TXT { octets },
            7 => RecordTypeWithData::AAAA {
                address: Ipv6Addr::from(u.arbitrary::<u128>()?),
            },
            8 => RecordTypeWithData::SRV {
                priority: u.arbitrary()?,
                weight: u.arbitrary()?,
                port: u.arbitrary()?,
                target: u.arbitrary()?,
            },
            9 => RecordTypeWithData::DS {
                key_tag: u.arbitrary()?,
                algorithm: u.arbitrary()?,
                digest_type: u.arbitrary()?,
                digest: octets,
            },
            10 => RecordTypeWithData::SVCB {
                priority: u.arbitrary()?,
                target: u.arbitrary()?,
                params: Vec::new(),
            },
            11 => RecordTypeWithData::HTTPS {
                priority: u.arbitrary()?,
                target: u.arbitrary()?,
                params: Vec::new(),
            },
            _ => {
                // tags below 100 collide with assigned type numbers
                let tag = RecordTypeUnknown(u.int_in_range(100..=200)?);
                RecordTypeWithData::Unknown { tag, octets }
            }
        };
        Ok(rtype_with_data)
    }
}


#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    use arbitrary::{Arbitrary, Unstructured};

    pub fn arbitrary_rtype_with_data() -> RecordTypeWithData {
        use rand::RngCore;

        let mut rng = rand::thread_rng();
        for size in [128, 256, 512, 1024, 2048, 4096] {
            let mut buf = vec![0u8; size];
            rng.fill_bytes(&mut buf);

            if let Ok(r) = RecordTypeWithData::arbitrary(&mut Unstructured::new(&buf)) {
                return r;
            }
        }

        panic!("could not generate arbitrary value!");
    }

    pub fn arbitrary_resourcerecord() -> ResourceRecord {
        ResourceRecord {
            name: domain("arbitrary.example.com."),
            rtype_with_data: arbitrary_rtype_with_data(),
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::A { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn aaaa_record(name: &str, address: Ipv6Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::AAAA { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn cname_record(name: &str, target_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::CNAME {
                cname: domain(target_name),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn ns_record(superdomain_name: &str, nameserver_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(superdomain_name),
            rtype_with_data: RecordTypeWithData::NS {
                nsdname: domain(nameserver_name),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn mx_record(name: &str, preference: u16, exchange: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::MX {
                preference,
                exchange: domain(exchange),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn txt_record(name: &str, octets: &[u8]) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::TXT {
                octets: octets.into(),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn srv_record(name: &str, port: u16, target: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::SRV {
                priority: 0,
                weight: 0,
                port,
                target: domain(target),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn https_record(name: &str, priority: u16, target: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::HTTPS {
                priority,
                target: domain(target),
                params: Vec::new(),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn soa_record(name: &str, mname: &str, serial: u32) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::SOA {
                mname: domain(mname),
                rname: domain("hostmaster.example.com."),
                serial,
                refresh: 3600,
                retry: 600,
                expire: 604_800,
                minimum: 180,
            },
            rclass: RecordClass::IN,
            ttl: 180,
        }
    }
}
