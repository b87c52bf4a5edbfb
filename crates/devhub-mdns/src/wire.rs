//! DNS message codec
//!
//! Just enough of RFC 1035 for the discovery protocol: header, questions and
//! resource records with SRV and A data decoded, everything else kept as
//! opaque bytes. Names are written uncompressed; compressed names are
//! followed on decode with a bound on pointer jumps.
//!
//! ## Wire Layout
//!
//! ```text
//! ┌────┬───────┬─────────┬─────────┬─────────┬─────────┐
//! │ id │ flags │ qdcount │ ancount │ nscount │ arcount │  12 bytes
//! └────┴───────┴─────────┴─────────┴─────────┴─────────┘
//! questions, answers, authorities, additionals
//! ```

use std::net::Ipv4Addr;
use thiserror::Error;

/// Record type A (IPv4 address)
pub const TYPE_A: u16 = 1;

/// Record type SRV (service location)
pub const TYPE_SRV: u16 = 33;

/// Class IN
pub const CLASS_IN: u16 = 1;

const HEADER_LEN: usize = 12;
const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
/// Top bit of the class field (mDNS cache-flush / unicast-response)
const CLASS_MASK: u16 = 0x7fff;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
/// More jumps than this cannot come from a well-formed name
const MAX_POINTER_JUMPS: usize = 126;

/// Malformed wire data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("packet truncated at offset {0}")]
    Truncated(usize),

    #[error("compression pointer loop at offset {0}")]
    PointerLoop(usize),

    #[error("unsupported label type 0x{0:02x}")]
    BadLabel(u8),

    #[error("label of {0} bytes exceeds 63")]
    LabelTooLong(usize),

    #[error("name exceeds 255 bytes")]
    NameTooLong,

    #[error("record data of type {rtype} has invalid length {len}")]
    BadRecordData { rtype: u16, len: usize },

    #[error("too many entries in one section")]
    TooManyEntries,
}

/// A question entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// Decoded record data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    /// IPv4 address
    A(Ipv4Addr),
    /// Service location
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    /// Any other type, kept verbatim
    Other { rtype: u16, data: Vec<u8> },
}

impl RecordData {
    /// Record type code
    pub fn rtype(&self) -> u16 {
        match self {
            RecordData::A(_) => TYPE_A,
            RecordData::Srv { .. } => TYPE_SRV,
            RecordData::Other { rtype, .. } => *rtype,
        }
    }
}

/// A resource record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub class: u16,
    pub ttl: u32,
    pub data: RecordData,
}

impl Record {
    /// Record type code
    pub fn rtype(&self) -> u16 {
        self.data.rtype()
    }

    /// SRV port, if this is an SRV record
    pub fn srv_port(&self) -> Option<u16> {
        match self.data {
            RecordData::Srv { port, .. } => Some(port),
            _ => None,
        }
    }

    /// Address, if this is an A record
    pub fn a_addr(&self) -> Option<Ipv4Addr> {
        match self.data {
            RecordData::A(ip) => Some(ip),
            _ => None,
        }
    }
}

/// A DNS message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub id: u16,
    pub is_response: bool,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Packet {
    /// Query carrying `questions`
    pub fn query(questions: Vec<Question>) -> Self {
        Self {
            questions,
            ..Self::default()
        }
    }

    /// Response carrying `answers`
    pub fn response(answers: Vec<Record>) -> Self {
        Self {
            is_response: true,
            answers,
            ..Self::default()
        }
    }

    /// Encode to wire format
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(512);

        let flags = if self.is_response {
            FLAG_RESPONSE | FLAG_AUTHORITATIVE
        } else {
            0
        };
        put_u16(&mut out, self.id);
        put_u16(&mut out, flags);
        put_u16(&mut out, count(self.questions.len())?);
        put_u16(&mut out, count(self.answers.len())?);
        put_u16(&mut out, count(self.authorities.len())?);
        put_u16(&mut out, count(self.additionals.len())?);

        for q in &self.questions {
            put_name(&mut out, &q.name)?;
            put_u16(&mut out, q.qtype);
            put_u16(&mut out, q.qclass);
        }

        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            put_record(&mut out, record)?;
        }

        Ok(out)
    }

    /// Decode from wire format
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated(buf.len()));
        }

        let id = get_u16(buf, 0)?;
        let flags = get_u16(buf, 2)?;
        let qdcount = get_u16(buf, 4)?;
        let ancount = get_u16(buf, 6)?;
        let nscount = get_u16(buf, 8)?;
        let arcount = get_u16(buf, 10)?;

        let mut pos = HEADER_LEN;

        let mut questions = Vec::new();
        for _ in 0..qdcount {
            let (name, next) = read_name(buf, pos)?;
            let qtype = get_u16(buf, next)?;
            let qclass = get_u16(buf, next + 2)? & CLASS_MASK;
            questions.push(Question { name, qtype, qclass });
            pos = next + 4;
        }

        let mut sections = [Vec::new(), Vec::new(), Vec::new()];
        for (section, n) in sections.iter_mut().zip([ancount, nscount, arcount]) {
            for _ in 0..n {
                let (record, next) = read_record(buf, pos)?;
                section.push(record);
                pos = next;
            }
        }
        let [answers, authorities, additionals] = sections;

        Ok(Self {
            id,
            is_response: flags & FLAG_RESPONSE != 0,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}

fn count(n: usize) -> Result<u16, WireError> {
    u16::try_from(n).map_err(|_| WireError::TooManyEntries)
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_name(out: &mut Vec<u8>, name: &str) -> Result<(), WireError> {
    let mut written = 0;
    for label in name.split('.').filter(|l| !l.is_empty()) {
        let bytes = label.as_bytes();
        if bytes.len() > MAX_LABEL_LEN {
            return Err(WireError::LabelTooLong(bytes.len()));
        }
        written += bytes.len() + 1;
        if written + 1 > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
    }
    out.push(0);
    Ok(())
}

fn put_record(out: &mut Vec<u8>, record: &Record) -> Result<(), WireError> {
    put_name(out, &record.name)?;
    put_u16(out, record.rtype());
    put_u16(out, record.class);
    out.extend_from_slice(&record.ttl.to_be_bytes());

    // Reserve rdlength, patch after writing the data
    let len_at = out.len();
    put_u16(out, 0);
    let data_at = out.len();

    match &record.data {
        RecordData::A(ip) => out.extend_from_slice(&ip.octets()),
        RecordData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            put_u16(out, *priority);
            put_u16(out, *weight);
            put_u16(out, *port);
            put_name(out, target)?;
        }
        RecordData::Other { data, .. } => out.extend_from_slice(data),
    }

    let rdlength = u16::try_from(out.len() - data_at).map_err(|_| WireError::BadRecordData {
        rtype: record.rtype(),
        len: out.len() - data_at,
    })?;
    out[len_at..len_at + 2].copy_from_slice(&rdlength.to_be_bytes());
    Ok(())
}

fn get_u16(buf: &[u8], pos: usize) -> Result<u16, WireError> {
    buf.get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(WireError::Truncated(pos))
}

fn get_u32(buf: &[u8], pos: usize) -> Result<u32, WireError> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(WireError::Truncated(pos))
}

/// Read a possibly compressed name starting at `pos`
///
/// Returns the dotted name and the offset just past it in the original
/// (uncompressed) position.
fn read_name(buf: &[u8], start: usize) -> Result<(String, usize), WireError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut resume_at = None;
    let mut jumps = 0;
    let mut total = 0;

    loop {
        let len = *buf.get(pos).ok_or(WireError::Truncated(pos))?;
        match len & 0xc0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let begin = pos + 1;
                let end = begin + len as usize;
                let label = buf.get(begin..end).ok_or(WireError::Truncated(begin))?;
                total += label.len() + 1;
                if total + 1 > MAX_NAME_LEN {
                    return Err(WireError::NameTooLong);
                }
                labels.push(String::from_utf8_lossy(label).into_owned());
                pos = end;
            }
            0xc0 => {
                let low = *buf.get(pos + 1).ok_or(WireError::Truncated(pos + 1))?;
                if resume_at.is_none() {
                    resume_at = Some(pos + 2);
                }
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(WireError::PointerLoop(pos));
                }
                pos = (((len & 0x3f) as usize) << 8) | low as usize;
            }
            _ => return Err(WireError::BadLabel(len)),
        }
    }

    Ok((labels.join("."), resume_at.unwrap_or(pos)))
}

fn read_record(buf: &[u8], pos: usize) -> Result<(Record, usize), WireError> {
    let (name, pos) = read_name(buf, pos)?;
    let rtype = get_u16(buf, pos)?;
    let class = get_u16(buf, pos + 2)? & CLASS_MASK;
    let ttl = get_u32(buf, pos + 4)?;
    let rdlength = get_u16(buf, pos + 8)? as usize;
    let data_at = pos + 10;
    let rdata = buf
        .get(data_at..data_at + rdlength)
        .ok_or(WireError::Truncated(data_at))?;

    let data = match rtype {
        TYPE_A => {
            let octets: [u8; 4] = rdata.try_into().map_err(|_| WireError::BadRecordData {
                rtype,
                len: rdlength,
            })?;
            RecordData::A(Ipv4Addr::from(octets))
        }
        TYPE_SRV => {
            if rdlength < 7 {
                return Err(WireError::BadRecordData { rtype, len: rdlength });
            }
            // Target may point anywhere in the message
            let (target, _) = read_name(buf, data_at + 6)?;
            RecordData::Srv {
                priority: get_u16(buf, data_at)?,
                weight: get_u16(buf, data_at + 2)?,
                port: get_u16(buf, data_at + 4)?,
                target,
            }
        }
        _ => RecordData::Other {
            rtype,
            data: rdata.to_vec(),
        },
    };

    Ok((
        Record {
            name,
            class,
            ttl,
            data,
        },
        data_at + rdlength,
    ))
}
