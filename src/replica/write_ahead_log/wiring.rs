use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::write_ahead_log::{commit_stream, WriteAheadLog};
use crate::replica::{CommitStream, WriteAheadLogEntry};
use std::io;

pub(in super::super) fn wired<L>(
    logger: slog::Logger,
    log: L,
    applied_checkpoint: Option<Index>,
) -> Result<(WriteAheadLog<L>, CommitStream), io::Error>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    let (publisher, stream) = commit_stream::new();

    let wal = WriteAheadLog::new(logger, log, publisher, applied_checkpoint)?;

    Ok((wal, stream))
}
