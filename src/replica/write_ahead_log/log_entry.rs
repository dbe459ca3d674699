use crate::commitlog;
use crate::replica::Term;
use bytes::{Buf, BufMut, Bytes};
use std::convert::TryFrom;
use std::io;

/// Byte representation:
///
/// ```text
/// |                                         1                               |
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 0 | 1 | 2 | ... | 26 | 27 | ... |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+-...-+----+----+-...-+
/// |Vrs|       Term (8 bytes)          |Knd| ClientId | CallId  |  Data ...  |
/// +---+-------------------------------+---+----------+---------+------------+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Term` - raft leadership term when this entry was created, little endian
/// * `Knd` - payload kind. A no-op entry ends after this byte.
/// * `ClientId`, `CallId` - 8 bytes each, little endian. Only present for commands.
/// * `Data` - app specific data payload. Only present for commands.
///
/// Not needed:
///
/// * Checksum is not needed, it's guaranteed by underlying commitlog.
/// * Size/length of `Data` is not needed; the underlying commitlog will give us the correctly allocated array.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WriteAheadLogEntry {
    pub(crate) term: Term,
    pub(crate) payload: EntryPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum EntryPayload {
    /// Appended by every new leader at the start of its term, so entries from previous terms
    /// become committable without waiting for a client command.
    NoOp,
    Command(CommandEntry),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CommandEntry {
    pub(crate) client_id: u64,
    pub(crate) call_id: u64,
    pub(crate) data: Bytes,
}

const RAFT_LOG_ENTRY_FORMAT_VERSION: u8 = 2;
const KIND_NO_OP: u8 = 0;
const KIND_COMMAND: u8 = 1;
const HEADER_LEN: usize = 1 + 8 + 1;
const COMMAND_HEADER_LEN: usize = 8 + 8;

impl commitlog::Entry for WriteAheadLogEntry {}

impl TryFrom<Vec<u8>> for WriteAheadLogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        let mut buf = Bytes::from(bytes);
        if buf.remaining() < HEADER_LEN {
            return Err(invalid_data(format!("log entry too short: {} bytes", buf.remaining())));
        }

        let version = buf.get_u8();
        if version != RAFT_LOG_ENTRY_FORMAT_VERSION {
            return Err(invalid_data(format!("unknown log entry format version {}", version)));
        }
        let term = Term::new(buf.get_u64_le());

        let payload = match buf.get_u8() {
            KIND_NO_OP => EntryPayload::NoOp,
            KIND_COMMAND => {
                if buf.remaining() < COMMAND_HEADER_LEN {
                    return Err(invalid_data("command log entry is missing client/call ID".into()));
                }
                let client_id = buf.get_u64_le();
                let call_id = buf.get_u64_le();
                EntryPayload::Command(CommandEntry {
                    client_id,
                    call_id,
                    // Whatever remains is the app's payload. No copy.
                    data: buf,
                })
            }
            kind => return Err(invalid_data(format!("unknown log entry kind {}", kind))),
        };

        Ok(WriteAheadLogEntry { term, payload })
    }
}

impl From<WriteAheadLogEntry> for Vec<u8> {
    fn from(entry: WriteAheadLogEntry) -> Self {
        let data_len = match &entry.payload {
            EntryPayload::NoOp => 0,
            EntryPayload::Command(command) => COMMAND_HEADER_LEN + command.data.len(),
        };
        let mut bytes = Vec::with_capacity(HEADER_LEN + data_len);

        bytes.put_u8(RAFT_LOG_ENTRY_FORMAT_VERSION);
        bytes.put_u64_le(entry.term.as_u64());
        match entry.payload {
            EntryPayload::NoOp => bytes.put_u8(KIND_NO_OP),
            EntryPayload::Command(command) => {
                bytes.put_u8(KIND_COMMAND);
                bytes.put_u64_le(command.client_id);
                bytes.put_u64_le(command.call_id);
                bytes.put_slice(&command.data);
            }
        }

        bytes
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
