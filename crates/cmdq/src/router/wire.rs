//! Class request/response byte layouts

use super::{ClassError, ClassStatus, ObjMask, NEXT_FREE_INDEX};

pub const REQUEST_HEADER_SIZE: usize = 4;
pub const SET_HEADER_SIZE: usize = 8;
pub const ENTRY_HEADER_SIZE: usize = 4;
pub const RESPONSE_HEADER_SIZE: usize = 4;

/// Little-endian cursor over an untrusted buffer
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ClassError> {
        if self.remaining() < len {
            return Err(ClassError::Malformed("truncated buffer"));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8, ClassError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ClassError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, ClassError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i16(&mut self) -> Result<i16, ClassError> {
        Ok(self.u16()? as i16)
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), ClassError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ClassError::Malformed("trailing bytes"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    Set = 0,
    GetStatus = 1,
}

impl TryFrom<u8> for CommandKind {
    type Error = ClassError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Set),
            1 => Ok(Self::GetStatus),
            _ => Err(ClassError::Malformed("unknown command kind")),
        }
    }
}

/// `{classId, kind, rsvd}` followed by the kind-specific payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassRequest<'a> {
    pub class_id: u8,
    pub kind: CommandKind,
    pub payload: &'a [u8],
}

impl<'a> ClassRequest<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, ClassError> {
        let mut r = ByteReader::new(buf);
        let class_id = r.u8()?;
        let kind = CommandKind::try_from(r.u8()?)?;
        let _reserved = r.u16()?;
        let payload = r.take(r.remaining())?;
        Ok(Self {
            class_id,
            kind,
            payload,
        })
    }
}

/// Global parameters that open every Set payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetHeader {
    pub version: u8,
    pub entry_count: u8,
    pub params: u32,
}

/// One typed entry of a Set payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetEntry<'a> {
    /// `None` requests the next free index
    pub index: Option<u8>,
    pub obj_type: u8,
    pub body: &'a [u8],
}

/// Split a Set payload into its header and entries; trailing bytes reject.
pub fn parse_set(payload: &[u8]) -> Result<(SetHeader, Vec<SetEntry<'_>>), ClassError> {
    let mut r = ByteReader::new(payload);
    let version = r.u8()?;
    let entry_count = r.u8()?;
    let _reserved = r.u16()?;
    let header = SetHeader {
        version,
        entry_count,
        params: r.u32()?,
    };

    let mut entries = Vec::with_capacity(header.entry_count as usize);
    for _ in 0..header.entry_count {
        let index = match r.u8()? {
            NEXT_FREE_INDEX => None,
            i => Some(i),
        };
        let obj_type = r.u8()?;
        let len = r.u16()? as usize;
        let body = r.take(len)?;
        entries.push(SetEntry {
            index,
            obj_type,
            body,
        });
    }
    r.finish()?;
    Ok((header, entries))
}

pub fn parse_get_status(payload: &[u8]) -> Result<ObjMask, ClassError> {
    let mut r = ByteReader::new(payload);
    let mask = r.u32()?;
    r.finish()?;
    Ok(mask)
}

/// Build a Set request; `entry_count` is taken from `entries`.
pub fn encode_set(class_id: u8, version: u8, params: u32, entries: &[SetEntry<'_>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        REQUEST_HEADER_SIZE
            + SET_HEADER_SIZE
            + entries
                .iter()
                .map(|e| ENTRY_HEADER_SIZE + e.body.len())
                .sum::<usize>(),
    );
    out.extend_from_slice(&[class_id, CommandKind::Set as u8, 0, 0]);
    out.extend_from_slice(&[version, entries.len() as u8, 0, 0]);
    out.extend_from_slice(&params.to_le_bytes());
    for entry in entries {
        out.push(entry.index.unwrap_or(NEXT_FREE_INDEX));
        out.push(entry.obj_type);
        out.extend_from_slice(&(entry.body.len() as u16).to_le_bytes());
        out.extend_from_slice(entry.body);
    }
    out
}

pub fn encode_get_status(class_id: u8, mask: ObjMask) -> Vec<u8> {
    let mut out = Vec::with_capacity(REQUEST_HEADER_SIZE + 4);
    out.extend_from_slice(&[class_id, CommandKind::GetStatus as u8, 0, 0]);
    out.extend_from_slice(&mask.to_le_bytes());
    out
}

/// `{status, rsvd[3], data}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassResponse {
    pub status: ClassStatus,
    pub data: Vec<u8>,
}

impl ClassResponse {
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            status: ClassStatus::Ok,
            data,
        }
    }

    pub fn error(err: &ClassError) -> Self {
        Self {
            status: err.status(),
            data: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RESPONSE_HEADER_SIZE + self.data.len());
        out.extend_from_slice(&[self.status as u8, 0, 0, 0]);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ClassError> {
        let mut r = ByteReader::new(buf);
        let status = ClassStatus::try_from(r.u8()?)?;
        r.take(3)?;
        Ok(Self {
            status,
            data: r.take(r.remaining())?.to_vec(),
        })
    }

    /// Split a GetStatus reply into the echoed mask and the record bytes.
    pub fn status_records(&self) -> Result<(ObjMask, &[u8]), ClassError> {
        let mut r = ByteReader::new(&self.data);
        let mask = r.u32()?;
        Ok((mask, r.take(r.remaining())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_request_layout() {
        let body = [0xAA, 0xBB];
        let req = encode_set(
            3,
            2,
            0x1122_3344,
            &[
                SetEntry { index: None, obj_type: 1, body: &body },
                SetEntry { index: Some(4), obj_type: 2, body: &[] },
            ],
        );
        assert_eq!(
            req,
            vec![
                3, 0, 0, 0, // class 3, Set
                2, 2, 0, 0, 0x44, 0x33, 0x22, 0x11, // version 2, two entries, params
                0xFF, 1, 2, 0, 0xAA, 0xBB, // next free, type 1
                4, 2, 0, 0, // index 4, type 2, empty body
            ]
        );

        let parsed = ClassRequest::parse(&req).unwrap();
        assert_eq!(parsed.kind, CommandKind::Set);
        let (header, entries) = parse_set(parsed.payload).unwrap();
        assert_eq!(header.params, 0x1122_3344);
        assert_eq!(entries[0].index, None);
        assert_eq!(entries[1].index, Some(4));
    }

    #[test]
    fn set_rejects_trailing_and_truncated_input() {
        let mut req = encode_set(1, 1, 0, &[SetEntry { index: None, obj_type: 0, body: &[1, 2] }]);
        req.push(0);
        let parsed = ClassRequest::parse(&req).unwrap();
        assert_eq!(parse_set(parsed.payload), Err(ClassError::Malformed("trailing bytes")));

        let short = &req[..req.len() - 3];
        let parsed = ClassRequest::parse(short).unwrap();
        assert_eq!(parse_set(parsed.payload), Err(ClassError::Malformed("truncated buffer")));
    }

    #[test]
    fn get_status_mask_is_exact() {
        let req = encode_get_status(5, 0b101);
        let parsed = ClassRequest::parse(&req).unwrap();
        assert_eq!(parsed.kind, CommandKind::GetStatus);
        assert_eq!(parse_get_status(parsed.payload), Ok(0b101));
        assert!(parse_get_status(&[1, 0, 0]).is_err());
    }

    #[test]
    fn response_header_is_four_bytes() {
        let resp = ClassResponse::ok(vec![9, 8]);
        let bytes = resp.encode();
        assert_eq!(bytes, vec![0, 0, 0, 0, 9, 8]);
        assert_eq!(ClassResponse::decode(&bytes).unwrap(), resp);
    }
}
