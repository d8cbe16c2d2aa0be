//! Binary framing of `(file id, value)` pairs stored under inverted keys.
//!
//! A packet is `[u32 BE file id][value bytes]`. The packets of one key are
//! stored back to back, each prefixed with its length as a `u32 BE`.

use keyindex_api::FileId;
use thiserror::Error;

const ID_LEN: usize = 4;
const LEN_PREFIX: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet of {0} bytes is shorter than its file id")]
    TooShort(usize),
    #[error("packet list truncated at offset {offset}: needs {needed} bytes, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub file_id: FileId,
    pub value: Vec<u8>,
}

impl Packet {
    pub fn new(file_id: FileId, value: Vec<u8>) -> Self {
        Self { file_id, value }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ID_LEN + self.value.len());
        out.extend_from_slice(&self.file_id.raw().to_be_bytes());
        out.extend_from_slice(&self.value);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let file_id = peek_file_id(bytes)?;
        Ok(Self {
            file_id,
            value: bytes[ID_LEN..].to_vec(),
        })
    }
}

/// Reads the file id of an encoded packet without copying its value.
pub fn peek_file_id(bytes: &[u8]) -> Result<FileId, PacketError> {
    let id: [u8; ID_LEN] = bytes
        .get(..ID_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(PacketError::TooShort(bytes.len()))?;
    Ok(FileId::new(u32::from_be_bytes(id)))
}

/// Iterates the raw packets of an encoded list.
pub fn frames(list: &[u8]) -> Frames<'_> {
    Frames { list, offset: 0 }
}

pub struct Frames<'a> {
    list: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<&'a [u8], PacketError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.list.get(self.offset..)?;
        if rest.is_empty() {
            return None;
        }
        let Some(len_bytes) = rest.get(..LEN_PREFIX) else {
            let offset = self.offset;
            self.offset = self.list.len();
            return Some(Err(PacketError::Truncated {
                offset,
                needed: LEN_PREFIX,
                available: rest.len(),
            }));
        };
        let mut len = [0u8; LEN_PREFIX];
        len.copy_from_slice(len_bytes);
        let len = u32::from_be_bytes(len) as usize;

        let body = &rest[LEN_PREFIX..];
        if body.len() < len {
            let offset = self.offset;
            self.offset = self.list.len();
            return Some(Err(PacketError::Truncated {
                offset,
                needed: len,
                available: body.len(),
            }));
        }
        self.offset += LEN_PREFIX + len;
        Some(Ok(&body[..len]))
    }
}

pub fn decode_list(list: &[u8]) -> Result<Vec<Packet>, PacketError> {
    frames(list).map(|frame| Packet::decode(frame?)).collect()
}

pub fn encode_list<'a>(packets: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for packet in packets {
        append_frame(&mut out, packet);
    }
    out
}

pub fn append_frame(list: &mut Vec<u8>, packet: &[u8]) {
    list.extend_from_slice(&(packet.len() as u32).to_be_bytes());
    list.extend_from_slice(packet);
}

/// Copies `list` without the packets owned by `file_id`. Returns `None` when
/// nothing matched.
pub fn without_file(list: &[u8], file_id: FileId) -> Result<Option<Vec<u8>>, PacketError> {
    let mut kept = Vec::with_capacity(list.len());
    let mut removed = false;
    for frame in frames(list) {
        let frame = frame?;
        if peek_file_id(frame)? == file_id {
            removed = true;
        } else {
            append_frame(&mut kept, frame);
        }
    }
    Ok(removed.then_some(kept))
}
