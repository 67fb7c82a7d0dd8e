//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let id = wire_header.header.id;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());
        let mut edns = None;

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.ancount {
            match RrOrOpt::deserialise(id, buffer)? {
                RrOrOpt::Rr(rr) => answers.push(rr),
                RrOrOpt::Opt(_) => return Err(Error::OptOutsideAdditional(id)),
            }
        }
        for _ in 0..wire_header.nscount {
            match RrOrOpt::deserialise(id, buffer)? {
                RrOrOpt::Rr(rr) => authority.push(rr),
                RrOrOpt::Opt(_) => return Err(Error::OptOutsideAdditional(id)),
            }
        }
        for _ in 0..wire_header.arcount {
            match RrOrOpt::deserialise(id, buffer)? {
                RrOrOpt::Rr(rr) => additional.push(rr),
                RrOrOpt::Opt(parsed) => {
                    // RFC 6891 section 6.1.1: at most one OPT
                    if edns.is_some() {
                        return Err(Error::DuplicateOpt(id));
                    }
                    edns = Some(parsed);
                }
            }
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
            edns,
        })
    }
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;
        let qclass = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            name,
            qtype: QueryType::from(qtype),
            qclass: QueryClass::from(qclass),
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed, or is an OPT pseudo-record
    /// (which belongs in `Message.edns`, not in a section).
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        match RrOrOpt::deserialise(id, buffer)? {
            RrOrOpt::Rr(rr) => Ok(rr),
            RrOrOpt::Opt(_) => Err(Error::OptOutsideAdditional(id)),
        }
    }
}

/// A record from the answer, authority, or additional sections: either
/// a real resource record or the OPT pseudo-record, which gets lifted
/// into `Message.edns`.
enum RrOrOpt {
    Rr(ResourceRecord),
    Opt(Edns),
}

impl RrOrOpt {
    fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        if rtype == TYPE_OPT {
            if !name.is_root() {
                return Err(Error::OptInvalid(id));
            }
            return Ok(RrOrOpt::Opt(Edns::deserialise(id, buffer)?));
        }

        let rtype = RecordType::from(rtype);
        let rclass = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        let rclass = RecordClass::from(rclass);
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rtype_with_data =
            RecordTypeWithData::deserialise(id, rtype, rdlength, buffer)?;

        Ok(RrOrOpt::Rr(ResourceRecord {
            name,
            rtype_with_data,
            rclass,
            ttl,
        }))
    }
}

impl RecordTypeWithData {
    /// Deserialise the rdata of a record whose type, class, and TTL
    /// have already been read.  Consumes exactly `rdlength` octets or
    /// fails.
    ///
    /// # Errors
    ///
    /// If the rdata cannot be parsed.
    pub fn deserialise(
        id: u16,
        rtype: RecordType,
        rdlength: u16,
        buffer: &mut ConsumableBuffer,
    ) -> Result<Self, Error> {
        let rdata_start = buffer.position;

        fn raw_rdata(
            id: u16,
            rdlength: u16,
            buffer: &mut ConsumableBuffer,
        ) -> Result<Vec<u8>, Error> {
            if let Some(octets) = buffer.take(rdlength as usize) {
                Ok(octets.to_vec())
            } else {
                Err(Error::ResourceRecordTooShort(id))
            }
        }

        // for records which include domain names, deserialise them to
        // expand pointers.
        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordTypeWithData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                refresh: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                retry: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                expire: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                minimum: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::MX => RecordTypeWithData::MX {
                preference: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                exchange: DomainName::deserialise(id, buffer)?,
            },
            RecordType::TXT => RecordTypeWithData::TXT {
                octets: raw_rdata(id, rdlength, buffer)?,
            },
            RecordType::AAAA => {
                let octets = buffer.take(16).ok_or(Error::ResourceRecordTooShort(id))?;
                // 16 bytes taken just above
                let array: [u8; 16] = octets.try_into().unwrap();
                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::from(array),
                }
            }
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                weight: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                port: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                target: DomainName::deserialise(id, buffer)?,
            },
            RecordType::DS => {
                let key_tag = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
                let algorithm = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
                let digest_type = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
                let digest_len = (rdlength as usize)
                    .checked_sub(buffer.position - rdata_start)
                    .ok_or(Error::ResourceRecordInvalid(id))?;
                let digest = buffer
                    .take(digest_len)
                    .ok_or(Error::ResourceRecordTooShort(id))?
                    .to_vec();
                RecordTypeWithData::DS {
                    key_tag,
                    algorithm,
                    digest_type,
                    digest,
                }
            }
            RecordType::SVCB | RecordType::HTTPS => {
                let priority = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
                let target = DomainName::deserialise(id, buffer)?;
                let params_len = (rdlength as usize)
                    .checked_sub(buffer.position - rdata_start)
                    .ok_or(Error::ResourceRecordInvalid(id))?;
                let params = buffer
                    .take(params_len)
                    .ok_or(Error::ResourceRecordTooShort(id))?
                    .to_vec();
                if rtype == RecordType::SVCB {
                    RecordTypeWithData::SVCB {
                        priority,
                        target,
                        params,
                    }
                } else {
                    RecordTypeWithData::HTTPS {
                        priority,
                        target,
                        params,
                    }
                }
            }
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: raw_rdata(id, rdlength, buffer)?,
            },
        };

        if buffer.position == rdata_start + (rdlength as usize) {
            Ok(rtype_with_data)
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

impl Edns {
    /// Deserialise the OPT pseudo-record body: the owner name and
    /// type have already been read.
    ///
    /// # Errors
    ///
    /// If the record or an option inside it cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let udp_payload_size = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        let extended_rcode = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
        let version = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
        let flags = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_stop = buffer.position + rdlength as usize;
        let mut options = Vec::new();
        while buffer.position < rdata_stop {
            options.push(EdnsOption::deserialise(id, buffer)?);
        }
        if buffer.position != rdata_stop {
            return Err(Error::OptInvalid(id));
        }

        Ok(Self {
            udp_payload_size,
            extended_rcode,
            version,
            dnssec_ok: flags & 0x8000 != 0,
            options,
        })
    }
}

impl EdnsOption {
    /// # Errors
    ///
    /// If the option cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let code = buffer.next_u16().ok_or(Error::OptTooShort(id))?;
        let length = buffer.next_u16().ok_or(Error::OptTooShort(id))?;
        let octets = buffer
            .take(length as usize)
            .ok_or(Error::OptTooShort(id))?;

        match code {
            OPTION_CODE_CLIENT_SUBNET => {
                Ok(EdnsOption::ClientSubnet(parse_client_subnet(id, octets)?))
            }
            OPTION_CODE_EXTENDED_ERROR => {
                if octets.len() < 2 {
                    return Err(Error::OptionInvalid(id));
                }
                Ok(EdnsOption::ExtendedError(ExtendedError {
                    info_code: u16::from_be_bytes([octets[0], octets[1]]),
                    extra_text: String::from_utf8_lossy(&octets[2..]).into_owned(),
                }))
            }
            _ => Ok(EdnsOption::Unknown {
                code,
                octets: octets.to_vec(),
            }),
        }
    }
}

/// Parse a Client Subnet option body, applying the RFC 7871 section 6
/// validity rules: a known family, an address no longer than the
/// source prefix implies, and zero bits past the prefix.
fn parse_client_subnet(id: u16, octets: &[u8]) -> Result<ClientSubnet, Error> {
    if octets.len() < 4 {
        return Err(Error::OptionInvalid(id));
    }

    let family = u16::from_be_bytes([octets[0], octets[1]]);
    let source_prefix = octets[2];
    let scope_prefix = octets[3];
    let address = &octets[4..];

    let max_prefix = match family {
        ADDRESS_FAMILY_IPV4 => 32,
        ADDRESS_FAMILY_IPV6 => 128,
        _ => return Err(Error::OptionInvalid(id)),
    };
    if source_prefix > max_prefix {
        return Err(Error::OptionInvalid(id));
    }
    if address.len() != source_prefix.div_ceil(8) as usize {
        return Err(Error::OptionInvalid(id));
    }
    if source_prefix % 8 != 0 {
        // "MUST set all bits of ADDRESS not covered by SOURCE
        // PREFIX-LENGTH to 0"
        let last = address[address.len() - 1];
        if last & !(0xffu8 << (8 - source_prefix % 8)) != 0 {
            return Err(Error::OptionInvalid(id));
        }
    }

    Ok(ClientSubnet {
        family,
        source_prefix,
        scope_prefix,
        address: address.to_vec(),
    })
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    #[allow(clippy::missing_panics_doc)]
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Label>::with_capacity(5);
        let start = buffer.position;

        'outer: loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if usize::from(size) <= LABEL_MAX_LEN {
                if size == 0 {
                    octets.push(0);
                    labels.push(Label::new());
                    break 'outer;
                }

                if let Some(os) = buffer.take(size as usize) {
                    // safe because of the bounds check above
                    let label = Label::try_from(os).unwrap();
                    octets.push(size);
                    octets.extend_from_slice(label.octets());
                    labels.push(label);
                } else {
                    return Err(Error::DomainTooShort(id));
                }

                if octets.len() > DOMAINNAME_MAX_LEN {
                    break 'outer;
                }
            } else if size >= 192 {
                // this requires re-parsing the pointed-to domain -
                // not great but works for now.
                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = u16::from_be_bytes([hi, lo]).into();

                // pointer must be to an earlier record (not merely a
                // different one: an earlier one: RFC 1035 section
                // 4.1.4)
                if ptr >= start {
                    return Err(Error::DomainPointerInvalid(id));
                }

                let mut other = DomainName::deserialise(id, &mut buffer.at_offset(ptr))?;
                octets.append(&mut other.octets);
                labels.append(&mut other.labels);
                break 'outer;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if octets.len() <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { octets, labels })
        } else {
            Err(Error::DomainTooLong(id))
        }
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header - so
/// that an error response can be sent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.  An error cannot even be sent back to the
    /// client in this case as, without an ID, it cannot be linked
    /// with the correct query.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record is the wrong format.
    ResourceRecordInvalid(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 255 octets in size.
    DomainTooLong(u16),

    /// A domain pointer points to or after the current record.
    DomainPointerInvalid(u16),

    /// A domain label is longer than 63 octets, but not a pointer.
    DomainLabelInvalid(u16),

    /// An OPT pseudo-record is malformed.
    OptInvalid(u16),

    /// An OPT pseudo-record appears in the answer or authority
    /// section.
    OptOutsideAdditional(u16),

    /// More than one OPT pseudo-record.
    DuplicateOpt(u16),

    /// An EDNS option ends with an incomplete field.
    OptTooShort(u16),

    /// An EDNS option violates its own validity rules.
    OptionInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id) => Some(id),
            Error::QuestionTooShort(id) => Some(id),
            Error::ResourceRecordTooShort(id) => Some(id),
            Error::ResourceRecordInvalid(id) => Some(id),
            Error::DomainTooShort(id) => Some(id),
            Error::DomainTooLong(id) => Some(id),
            Error::DomainPointerInvalid(id) => Some(id),
            Error::DomainLabelInvalid(id) => Some(id),
            Error::OptInvalid(id) => Some(id),
            Error::OptOutsideAdditional(id) => Some(id),
            Error::DuplicateOpt(id) => Some(id),
            Error::OptTooShort(id) => Some(id),
            Error::OptionInvalid(id) => Some(id),
        }
    }
}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    pub position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() > self.position + 3 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            let c = self.octets[self.position + 2];
            let d = self.octets[self.position + 3];
            self.position += 4;
            Some(u32::from_be_bytes([a, b, c, d]))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}
