//! The thirteen ReplFS wire records (`spec.md` §4.1).
//!
//! Every record is `tag: u8` followed by a fixed-layout body. 32-bit
//! integer fields are network byte order (`#[brw(big)]`); 8-bit fields and
//! byte arrays are transmitted as-is.

use binrw::{BinRead, BinWrite};
use std::io::Cursor;

use crate::bitmap::Bitset128;
use crate::error::WireError;

pub const MAX_FILENAME_SIZE: usize = 128;
pub const MAX_WRITE_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct RollCallAckBody {
    pub proposed_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct OpenFileBody {
    pub file_id: u32,
    pub file_name: [u8; MAX_FILENAME_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct OpenFileAckBody {
    pub server_id: u32,
    pub file_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct WriteBlockBody {
    pub file_id: u32,
    pub commit_num: u32,
    pub write_num: u8,
    pub byte_offset: u32,
    pub block_size: u32,
    pub data: [u8; MAX_WRITE_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct CommitRequestBody {
    pub file_id: u32,
    pub commit_num: u32,
    pub final_write_num: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct ReadyToCommitBody {
    pub server_id: u32,
    pub file_id: u32,
    pub commit_num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct CommitBody {
    pub file_id: u32,
    pub commit_num: u32,
    pub close_flag: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct CommitAckBody {
    pub server_id: u32,
    pub file_id: u32,
    pub commit_num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct WriteResendRequestBody {
    pub server_id: u32,
    pub file_id: u32,
    pub commit_num: u32,
    pub requested_writes: [u8; 16],
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct AbortBody {
    pub file_id: u32,
    pub commit_num: u32,
    pub close_flag: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct AbortAckBody {
    pub server_id: u32,
    pub file_id: u32,
    pub commit_num: u32,
}

/// One of the thirteen protocol records, tagged and ready to multicast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    RollCall,
    RollCallAck(RollCallAckBody),
    OpenFile(OpenFileBody),
    OpenFileAck(OpenFileAckBody),
    WriteBlock(WriteBlockBody),
    CommitRequest(CommitRequestBody),
    ReadyToCommit(ReadyToCommitBody),
    Commit(CommitBody),
    CommitAck(CommitAckBody),
    WriteResendRequest(WriteResendRequestBody),
    Abort(AbortBody),
    AbortAck(AbortAckBody),
}

impl Record {
    pub const TAG_ROLL_CALL: u8 = 0x01;
    pub const TAG_ROLL_CALL_ACK: u8 = 0x02;
    pub const TAG_OPEN_FILE: u8 = 0x03;
    pub const TAG_OPEN_FILE_ACK: u8 = 0x04;
    pub const TAG_WRITE_BLOCK: u8 = 0x05;
    pub const TAG_COMMIT_REQUEST: u8 = 0x06;
    pub const TAG_READY_TO_COMMIT: u8 = 0x07;
    pub const TAG_COMMIT: u8 = 0x08;
    pub const TAG_COMMIT_ACK: u8 = 0x09;
    pub const TAG_WRITE_RESEND_REQUEST: u8 = 0x0A;
    pub const TAG_ABORT: u8 = 0x0B;
    pub const TAG_ABORT_ACK: u8 = 0x0C;

    pub fn tag(&self) -> u8 {
        match self {
            Record::RollCall => Self::TAG_ROLL_CALL,
            Record::RollCallAck(_) => Self::TAG_ROLL_CALL_ACK,
            Record::OpenFile(_) => Self::TAG_OPEN_FILE,
            Record::OpenFileAck(_) => Self::TAG_OPEN_FILE_ACK,
            Record::WriteBlock(_) => Self::TAG_WRITE_BLOCK,
            Record::CommitRequest(_) => Self::TAG_COMMIT_REQUEST,
            Record::ReadyToCommit(_) => Self::TAG_READY_TO_COMMIT,
            Record::Commit(_) => Self::TAG_COMMIT,
            Record::CommitAck(_) => Self::TAG_COMMIT_ACK,
            Record::WriteResendRequest(_) => Self::TAG_WRITE_RESEND_REQUEST,
            Record::Abort(_) => Self::TAG_ABORT,
            Record::AbortAck(_) => Self::TAG_ABORT_ACK,
        }
    }

    /// Exact body size (excluding the tag byte) for each tag. No
    /// fallthrough between cases - each tag names its own exact size,
    /// resolving the open question in `spec.md` §9.
    pub fn body_len(tag: u8) -> Option<usize> {
        Some(match tag {
            Self::TAG_ROLL_CALL => 0,
            Self::TAG_ROLL_CALL_ACK => 4,
            Self::TAG_OPEN_FILE => 4 + MAX_FILENAME_SIZE,
            Self::TAG_OPEN_FILE_ACK => 4 + 4,
            Self::TAG_WRITE_BLOCK => 4 + 4 + 1 + 4 + 4 + MAX_WRITE_SIZE,
            Self::TAG_COMMIT_REQUEST => 4 + 4 + 1,
            Self::TAG_READY_TO_COMMIT => 4 + 4 + 4,
            Self::TAG_COMMIT => 4 + 4 + 1,
            Self::TAG_COMMIT_ACK => 4 + 4 + 4,
            Self::TAG_WRITE_RESEND_REQUEST => 4 + 4 + 4 + 16,
            Self::TAG_ABORT => 4 + 4 + 1,
            Self::TAG_ABORT_ACK => 4 + 4 + 4,
            _ => return None,
        })
    }

    /// Total on-wire size (tag byte plus body) for a packet of this record.
    pub fn wire_len(&self) -> usize {
        1 + Self::body_len(self.tag()).expect("tag always has a known size")
    }

    /// Encode the full datagram: one tag byte followed by the body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.push(self.tag());
        let mut cursor = Cursor::new(Vec::new());
        match self {
            Record::RollCall => {}
            Record::RollCallAck(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::OpenFile(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::OpenFileAck(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::WriteBlock(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::CommitRequest(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::ReadyToCommit(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::Commit(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::CommitAck(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::WriteResendRequest(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::Abort(b) => b.write(&mut cursor).expect("fixed-size write"),
            Record::AbortAck(b) => b.write(&mut cursor).expect("fixed-size write"),
        }
        out.extend_from_slice(&cursor.into_inner());
        out
    }

    /// Decode a full datagram (tag byte + body) into a `Record`.
    ///
    /// Unknown tags are reported as an error so the transport can decide
    /// to ignore the datagram (`spec.md` §4.1's rejection rule); this
    /// function itself does not swallow anything.
    pub fn decode(datagram: &[u8]) -> Result<Record, WireError> {
        let (&tag, body) = datagram.split_first().ok_or(WireError::Truncated {
            tag: 0,
            got: 0,
            want: 1,
        })?;
        let want = Self::body_len(tag).ok_or(WireError::UnknownTag(tag))?;
        if body.len() < want {
            return Err(WireError::Truncated {
                tag,
                got: body.len(),
                want,
            });
        }
        if body.len() > want {
            return Err(WireError::Oversized {
                tag,
                got: body.len(),
                want,
            });
        }
        let mut cursor = Cursor::new(body);
        let map_err = |source| WireError::Malformed { tag, source };
        Ok(match tag {
            Self::TAG_ROLL_CALL => Record::RollCall,
            Self::TAG_ROLL_CALL_ACK => {
                Record::RollCallAck(RollCallAckBody::read(&mut cursor).map_err(map_err)?)
            }
            Self::TAG_OPEN_FILE => {
                Record::OpenFile(OpenFileBody::read(&mut cursor).map_err(map_err)?)
            }
            Self::TAG_OPEN_FILE_ACK => {
                Record::OpenFileAck(OpenFileAckBody::read(&mut cursor).map_err(map_err)?)
            }
            Self::TAG_WRITE_BLOCK => {
                Record::WriteBlock(WriteBlockBody::read(&mut cursor).map_err(map_err)?)
            }
            Self::TAG_COMMIT_REQUEST => {
                Record::CommitRequest(CommitRequestBody::read(&mut cursor).map_err(map_err)?)
            }
            Self::TAG_READY_TO_COMMIT => {
                Record::ReadyToCommit(ReadyToCommitBody::read(&mut cursor).map_err(map_err)?)
            }
            Self::TAG_COMMIT => Record::Commit(CommitBody::read(&mut cursor).map_err(map_err)?),
            Self::TAG_COMMIT_ACK => {
                Record::CommitAck(CommitAckBody::read(&mut cursor).map_err(map_err)?)
            }
            Self::TAG_WRITE_RESEND_REQUEST => Record::WriteResendRequest(
                WriteResendRequestBody::read(&mut cursor).map_err(map_err)?,
            ),
            Self::TAG_ABORT => Record::Abort(AbortBody::read(&mut cursor).map_err(map_err)?),
            Self::TAG_ABORT_ACK => {
                Record::AbortAck(AbortAckBody::read(&mut cursor).map_err(map_err)?)
            }
            _ => unreachable!("body_len already rejected unknown tags"),
        })
    }
}

impl WriteResendRequestBody {
    pub fn bitmap(&self) -> Bitset128 {
        Bitset128::from_bytes(self.requested_writes)
    }

    pub fn with_bitmap(server_id: u32, file_id: u32, commit_num: u32, bitmap: Bitset128) -> Self {
        Self {
            server_id,
            file_id,
            commit_num,
            requested_writes: bitmap.to_bytes(),
        }
    }
}

/// Builds a null-terminated, zero-padded 128-byte filename field.
pub fn encode_filename(name: &str) -> [u8; MAX_FILENAME_SIZE] {
    let mut out = [0u8; MAX_FILENAME_SIZE];
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_FILENAME_SIZE - 1);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Reads a NUL-terminated filename field back into a `String`, lossily
/// (the wire format carries raw bytes, not guaranteed UTF-8).
pub fn decode_filename(field: &[u8; MAX_FILENAME_SIZE]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roll_call_has_empty_body() {
        let record = Record::RollCall;
        assert_eq!(record.encode(), vec![Record::TAG_ROLL_CALL]);
        assert_eq!(Record::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn open_file_roundtrips_name() {
        let body = OpenFileBody {
            file_id: 7,
            file_name: encode_filename("hello.txt"),
        };
        let record = Record::OpenFile(body);
        let bytes = record.encode();
        assert_eq!(bytes.len(), record.wire_len());
        let decoded = Record::decode(&bytes).unwrap();
        match decoded {
            Record::OpenFile(b) => {
                assert_eq!(b.file_id, 7);
                assert_eq!(decode_filename(&b.file_name), "hello.txt");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn integers_are_big_endian_on_the_wire() {
        let record = Record::RollCallAck(RollCallAckBody { proposed_id: 0x01020304 });
        let bytes = record.encode();
        assert_eq!(&bytes[1..5], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn write_block_roundtrips_bitmap_bytes() {
        let mut data = [0u8; MAX_WRITE_SIZE];
        data[..5].copy_from_slice(b"hello");
        let body = WriteBlockBody {
            file_id: 1,
            commit_num: 2,
            write_num: 5,
            byte_offset: 17,
            block_size: 5,
            data,
        };
        let record = Record::WriteBlock(body.clone());
        let decoded = Record::decode(&record.encode()).unwrap();
        assert_eq!(decoded, Record::WriteBlock(body));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = Record::decode(&[0xFF]).unwrap_err();
        assert!(matches!(err, WireError::UnknownTag(0xFF)));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let err = Record::decode(&[Record::TAG_ROLL_CALL_ACK, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut bytes = vec![Record::TAG_COMMIT_REQUEST];
        bytes.extend_from_slice(&[0u8; 20]);
        let err = Record::decode(&bytes).unwrap_err();
        assert!(matches!(err, WireError::Oversized { .. }));
    }

    #[test]
    fn write_resend_request_carries_a_bitmap() {
        let mut bitmap = Bitset128::all_set();
        bitmap.clear(3);
        bitmap.clear(100);
        let body = WriteResendRequestBody::with_bitmap(1, 2, 3, bitmap);
        let record = Record::WriteResendRequest(body);
        let decoded = Record::decode(&record.encode()).unwrap();
        match decoded {
            Record::WriteResendRequest(b) => assert_eq!(b.bitmap(), bitmap),
            other => panic!("unexpected {other:?}"),
        }
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_commit_request(file_id: u32, commit_num: u32, final_write_num: u8) {
            let record = Record::CommitRequest(CommitRequestBody { file_id, commit_num, final_write_num });
            let decoded = Record::decode(&record.encode()).unwrap();
            prop_assert_eq!(decoded, record);
        }

        #[test]
        fn roundtrip_write_block(file_id: u32, commit_num: u32, write_num: u8, byte_offset: u32, block_size: u32, byte: u8) {
            let body = WriteBlockBody { file_id, commit_num, write_num, byte_offset, block_size, data: [byte; MAX_WRITE_SIZE] };
            let record = Record::WriteBlock(body);
            let decoded = Record::decode(&record.encode()).unwrap();
            prop_assert_eq!(decoded, record);
        }

        #[test]
        fn bitmap_bit_roundtrips(bit in 0u8..128) {
            let mut bm = Bitset128::empty();
            bm.set(bit);
            let decoded = Bitset128::from_bytes(bm.to_bytes());
            prop_assert!(decoded.is_set(bit));
        }
    }
}
