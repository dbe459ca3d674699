use std::convert::TryFrom;
use std::{fmt, io};

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
struct U64NonZero(u64);

impl U64NonZero {
    fn new(val: u64) -> Self {
        assert_ne!(val, 0);
        U64NonZero(val)
    }
}

/// Index is an index of an entry in the log; i.e. a log entry's index.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(U64NonZero);

impl Index {
    pub fn new(index: u64) -> Self {
        Index(U64NonZero::new(index))
    }

    pub fn new_usize(index: usize) -> Self {
        Self::new(index as u64)
    }

    /// Returns None for 0, which is how "no index" is spelled on the wire and in storage.
    pub fn from_u64(index: u64) -> Option<Self> {
        if index == 0 {
            None
        } else {
            Some(Self::new(index))
        }
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0 .0
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.as_u64() + delta)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        match self.as_u64().checked_sub(delta) {
            Some(new_value) if new_value > 0 => Some(Index::new(new_value)),
            _ => None,
        }
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 .0)
    }
}

/// Log is an append only log intended for use as a replicated commit log in a database.
///
/// Log indexes entries starting from 1. There will be no entry existing at index 0. The first
/// entry is written at index 1.
///
/// Besides the entries, a Log durably stores the highest index known to be committed, so a
/// restarted replica doesn't have to re-learn it from the leader before applying.
pub trait Log<E: Entry> {
    /// append() appends a log entry to the log at the next log entry index, then returns
    /// the log entry index that was just used to append the entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// Read log entry at specified index.
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Read up to `max_entries` consecutive entries starting at `start`. Stops early at the end of
    /// the log.
    fn read_range(&self, start: Index, max_entries: usize) -> Result<Vec<E>, io::Error> {
        let mut entries = Vec::with_capacity(max_entries);
        let mut index = start;
        while entries.len() < max_entries {
            match self.read(index)? {
                Some(entry) => entries.push(entry),
                None => break,
            }
            index = index.plus(1);
        }

        Ok(entries)
    }

    /// Deletes anything starting at `index` and later.
    fn truncate(&mut self, index: Index) -> Result<(), io::Error>;

    /// next_index returns the next index that will be used to append an entry.
    fn next_index(&self) -> Index;

    fn persist_commit_index(&mut self, index: Index) -> Result<(), io::Error>;

    fn persisted_commit_index(&self) -> Option<Index>;
}

// Choice of Vec<u8> vs Bytes will depend on whats easier for disk to use.
pub trait Entry: Clone + TryFrom<Vec<u8>, Error = io::Error> + Into<Vec<u8>> {}
