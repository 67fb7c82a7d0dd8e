//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.

use std::collections::HashMap;

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn to_octets(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    /// Serialise, keeping the result within `limit` octets.  Sections
    /// are dropped whole: additional first, then authority, then (as
    /// a last resort) answers.  The question and the OPT record are
    /// always kept.  Returns the octets and whether TC was set.
    ///
    /// # Errors
    ///
    /// If the message is invalid.
    pub fn serialise_with_limit(&self, limit: usize) -> Result<(Vec<u8>, bool), Error> {
        let octets = self.to_octets()?;
        if octets.len() <= limit {
            return Ok((octets, false));
        }

        let mut truncated = self.clone();
        truncated.header.is_truncated = true;

        truncated.additional.clear();
        let octets = truncated.to_octets()?;
        if octets.len() <= limit {
            return Ok((octets, true));
        }

        truncated.authority.clear();
        let octets = truncated.to_octets()?;
        if octets.len() <= limit {
            return Ok((octets, true));
        }

        truncated.answers.clear();
        Ok((truncated.to_octets()?, true))
    }

    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let qdcount = usize_to_u16(self.questions.len())?;
        let ancount = usize_to_u16(self.answers.len())?;
        let nscount = usize_to_u16(self.authority.len())?;
        let arcount = usize_to_u16(self.additional.len() + usize::from(self.edns.is_some()))?;

        self.header.serialise(buffer);
        buffer.write_u16(qdcount);
        buffer.write_u16(ancount);
        buffer.write_u16(nscount);
        buffer.write_u16(arcount);

        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in &self.answers {
            rr.serialise(buffer)?;
        }
        for rr in &self.authority {
            rr.serialise(buffer)?;
        }
        for rr in &self.additional {
            rr.serialise(buffer)?;
        }
        if let Some(edns) = &self.edns {
            edns.serialise(buffer)?;
        }

        Ok(())
    }
}

impl Header {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        // octet 1
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        // octet 2
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & (u8::from(self.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(self.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        buffer.write_name(&self.name, true);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        buffer.write_name(&self.name, true);
        buffer.write_u16(self.rtype_with_data.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        // filled in below
        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        // Names inside rdata are compressed only for the RFC 1035
        // types; SRV (RFC 2782) and SVCB/HTTPS (RFC 9460) targets
        // must be written in full.
        match &self.rtype_with_data {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::NS { nsdname } => buffer.write_name(nsdname, true),
            RecordTypeWithData::CNAME { cname } => buffer.write_name(cname, true),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                buffer.write_name(mname, true);
                buffer.write_name(rname, true);
                buffer.write_u32(*serial);
                buffer.write_u32(*refresh);
                buffer.write_u32(*retry);
                buffer.write_u32(*expire);
                buffer.write_u32(*minimum);
            }
            RecordTypeWithData::PTR { ptrdname } => buffer.write_name(ptrdname, true),
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => {
                buffer.write_u16(*preference);
                buffer.write_name(exchange, true);
            }
            RecordTypeWithData::TXT { octets } => buffer.write_octets(octets),
            RecordTypeWithData::AAAA { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(*priority);
                buffer.write_u16(*weight);
                buffer.write_u16(*port);
                buffer.write_name(target, false);
            }
            RecordTypeWithData::DS {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                buffer.write_u16(*key_tag);
                buffer.write_u8(*algorithm);
                buffer.write_u8(*digest_type);
                buffer.write_octets(digest);
            }
            RecordTypeWithData::SVCB {
                priority,
                target,
                params,
            }
            | RecordTypeWithData::HTTPS {
                priority,
                target,
                params,
            } => {
                buffer.write_u16(*priority);
                buffer.write_name(target, false);
                buffer.write_octets(params);
            }
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(octets),
        };

        // -2 so we don't also include the 2 octets for the rdlength
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

impl RecordTypeWithData {
    /// The rdata in uncompressed wire form: what record frames and
    /// the offline compiler store.  Compression never applies here;
    /// names are written in full.
    pub fn rdata_octets(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            RecordTypeWithData::A { address } => out.extend_from_slice(&address.octets()),
            RecordTypeWithData::NS { nsdname } => out.extend_from_slice(&nsdname.octets),
            RecordTypeWithData::CNAME { cname } => out.extend_from_slice(&cname.octets),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                out.extend_from_slice(&mname.octets);
                out.extend_from_slice(&rname.octets);
                out.extend_from_slice(&serial.to_be_bytes());
                out.extend_from_slice(&refresh.to_be_bytes());
                out.extend_from_slice(&retry.to_be_bytes());
                out.extend_from_slice(&expire.to_be_bytes());
                out.extend_from_slice(&minimum.to_be_bytes());
            }
            RecordTypeWithData::PTR { ptrdname } => out.extend_from_slice(&ptrdname.octets),
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => {
                out.extend_from_slice(&preference.to_be_bytes());
                out.extend_from_slice(&exchange.octets);
            }
            RecordTypeWithData::TXT { octets } => out.extend_from_slice(octets),
            RecordTypeWithData::AAAA { address } => out.extend_from_slice(&address.octets()),
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                out.extend_from_slice(&target.octets);
            }
            RecordTypeWithData::DS {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                out.extend_from_slice(&key_tag.to_be_bytes());
                out.push(*algorithm);
                out.push(*digest_type);
                out.extend_from_slice(digest);
            }
            RecordTypeWithData::SVCB {
                priority,
                target,
                params,
            }
            | RecordTypeWithData::HTTPS {
                priority,
                target,
                params,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&target.octets);
                out.extend_from_slice(params);
            }
            RecordTypeWithData::Unknown { octets, .. } => out.extend_from_slice(octets),
        }
        out
    }
}

impl Edns {
    /// Serialise as the OPT pseudo-record (RFC 6891 section 6.1.2):
    /// the root owner name, the payload size in the class field, and
    /// the extended rcode / version / flags in the TTL field.
    ///
    /// # Errors
    ///
    /// If an option is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        buffer.write_u8(0);
        buffer.write_u16(TYPE_OPT);
        buffer.write_u16(self.udp_payload_size);
        buffer.write_u8(self.extended_rcode);
        buffer.write_u8(self.version);
        buffer.write_u16(if self.dnssec_ok { 0x8000 } else { 0 });

        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        for option in &self.options {
            option.serialise(buffer)?;
        }

        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

impl EdnsOption {
    /// # Errors
    ///
    /// If the option data is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        match self {
            EdnsOption::ClientSubnet(ecs) => {
                buffer.write_u16(OPTION_CODE_CLIENT_SUBNET);
                buffer.write_u16(usize_to_u16(4 + ecs.address.len())?);
                buffer.write_u16(ecs.family);
                buffer.write_u8(ecs.source_prefix);
                buffer.write_u8(ecs.scope_prefix);
                buffer.write_octets(&ecs.address);
            }
            EdnsOption::ExtendedError(ede) => {
                buffer.write_u16(OPTION_CODE_EXTENDED_ERROR);
                buffer.write_u16(usize_to_u16(2 + ede.extra_text.len())?);
                buffer.write_u16(ede.info_code);
                buffer.write_octets(ede.extra_text.as_bytes());
            }
            EdnsOption::Unknown { code, octets } => {
                buffer.write_u16(*code);
                buffer.write_u16(usize_to_u16(octets.len())?);
                buffer.write_octets(octets);
            }
        }

        Ok(())
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer which can be written to, for serialisation purposes.
/// Tracks where each name suffix was written so later occurrences can
/// be replaced by message-local compression pointers (RFC 1035
/// section 4.1.4).
pub struct WritableBuffer {
    pub octets: Vec<u8>,
    name_offsets: HashMap<Vec<u8>, u16>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: Vec::with_capacity(512),
            name_offsets: HashMap::new(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.push(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.extend_from_slice(octets);
    }

    /// Write a domain name.  If `compress` and some suffix of the
    /// name was already written, emit a pointer to it; either way,
    /// remember the suffixes written here for later names.  Pointers
    /// can only reach the first 16 KiB of the message, so offsets
    /// past that are not remembered.
    pub fn write_name(&mut self, name: &DomainName, compress: bool) {
        let mut byte_pos = 0;
        for label in &name.labels {
            if label.is_empty() {
                self.write_u8(0);
                return;
            }

            let suffix = &name.octets[byte_pos..];
            if compress {
                if let Some(offset) = self.name_offsets.get(suffix) {
                    self.write_u16(0b1100_0000_0000_0000 | offset);
                    return;
                }
            }

            let here = self.index();
            if here < 0b0100_0000_0000_0000 {
                self.name_offsets.insert(suffix.to_vec(), here as u16);
            }

            self.write_u8(label.len() as u8);
            self.write_octets(label.octets());
            byte_pos += 1 + label.len();
        }
    }
}

/// Helper function to convert a `usize` into a `u16` (or return an error).
///
/// # Errors
///
/// If the value cannot be converted.
fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    if let Ok(t) = u16::try_from(counter) {
        Ok(t)
    } else {
        Err(Error::CounterTooLarge {
            counter,
            bits: u16::BITS,
        })
    }
}
