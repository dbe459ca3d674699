//! Conversions between log entries and their wire form. Both the leader (building AppendEntries)
//! and the RPC server (decoding AppendEntries) need them.
use crate::grpc::{proto_log_entry, ProtoCommand, ProtoLogEntry, ProtoNoOp};
use crate::replica::{CommandEntry, EntryPayload, Term, WriteAheadLogEntry};
use bytes::Bytes;
use std::convert::TryFrom;

impl From<WriteAheadLogEntry> for ProtoLogEntry {
    fn from(entry: WriteAheadLogEntry) -> Self {
        let payload = match entry.payload {
            EntryPayload::NoOp => proto_log_entry::Payload::NoOp(ProtoNoOp {}),
            EntryPayload::Command(command) => proto_log_entry::Payload::Command(ProtoCommand {
                client_id: command.client_id,
                call_id: command.call_id,
                data: command.data.to_vec(),
            }),
        };

        ProtoLogEntry {
            term: entry.term.as_u64(),
            payload: Some(payload),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum MalformedLogEntry {
    #[error("log entry has term 0")]
    ZeroTerm,
    #[error("log entry has no payload")]
    MissingPayload,
}

impl TryFrom<ProtoLogEntry> for WriteAheadLogEntry {
    type Error = MalformedLogEntry;

    fn try_from(proto_entry: ProtoLogEntry) -> Result<Self, Self::Error> {
        if proto_entry.term == 0 {
            return Err(MalformedLogEntry::ZeroTerm);
        }

        let payload = match proto_entry.payload {
            Some(proto_log_entry::Payload::NoOp(_)) => EntryPayload::NoOp,
            Some(proto_log_entry::Payload::Command(command)) => EntryPayload::Command(CommandEntry {
                client_id: command.client_id,
                call_id: command.call_id,
                data: Bytes::from(command.data),
            }),
            None => return Err(MalformedLogEntry::MissingPayload),
        };

        Ok(WriteAheadLogEntry {
            term: Term::new(proto_entry.term),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_entry_survives_the_wire() {
        let entry = WriteAheadLogEntry {
            term: Term::new(3),
            payload: EntryPayload::Command(CommandEntry {
                client_id: 42,
                call_id: 7,
                data: Bytes::from_static(b"set x=1"),
            }),
        };

        let proto_entry = ProtoLogEntry::from(entry.clone());
        assert_eq!(proto_entry.term, 3);
        assert_eq!(WriteAheadLogEntry::try_from(proto_entry).unwrap(), entry);
    }

    #[test]
    fn malformed_wire_entries_are_rejected() {
        let no_payload = ProtoLogEntry {
            term: 1,
            payload: None,
        };
        assert!(matches!(
            WriteAheadLogEntry::try_from(no_payload),
            Err(MalformedLogEntry::MissingPayload)
        ));

        let zero_term = ProtoLogEntry {
            term: 0,
            payload: Some(proto_log_entry::Payload::NoOp(ProtoNoOp {})),
        };
        assert!(matches!(
            WriteAheadLogEntry::try_from(zero_term),
            Err(MalformedLogEntry::ZeroTerm)
        ));
    }
}
