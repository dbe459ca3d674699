use crate::commitlog::{Entry, Index, Log};
use std::io;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

// I am focusing on raft's consensus algorithm, not on exactly how to persist the data durably. The
// "disk" is modeled as shared memory: clones of an InMemoryLog see the same entries, so a replica
// that is stopped and re-created from a clone behaves like a process restarting on the same disk.
pub struct InMemoryLog<E: Entry> {
    disk: Arc<Mutex<Disk>>,
    _pd: PhantomData<fn() -> E>,
}

#[derive(Default)]
struct Disk {
    // We don't *need* to convert these to bytes. We could just hold the original entry in memory,
    // but we want to exercise the conversion logic.
    entries: Vec<Vec<u8>>,
    commit_index: Option<Index>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Self {
        InMemoryLog {
            disk: Arc::new(Mutex::new(Disk::default())),
            _pd: PhantomData,
        }
    }

    fn vec_index(index: Index) -> usize {
        // Log API states that Index starts from 1.
        (index.as_u64() - 1) as usize
    }

    fn with_disk<T>(&self, f: impl FnOnce(&mut Disk) -> T) -> T {
        let mut disk = self.disk.lock().expect("InMemoryLog mutex guard poison");
        f(&mut disk)
    }
}

impl<E: Entry> Clone for InMemoryLog<E> {
    fn clone(&self) -> Self {
        InMemoryLog {
            disk: self.disk.clone(),
            _pd: PhantomData,
        }
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let bytes: Vec<u8> = entry.into();
        let new_len = self.with_disk(|disk| {
            disk.entries.push(bytes);
            disk.entries.len()
        });

        Ok(Index::new_usize(new_len))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        let vec_index = Self::vec_index(index);
        let opt_bytes = self.with_disk(|disk| disk.entries.get(vec_index).cloned());

        opt_bytes.map(E::try_from).transpose()
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        let vec_index = Self::vec_index(index);
        self.with_disk(|disk| disk.entries.truncate(vec_index));

        Ok(())
    }

    fn next_index(&self) -> Index {
        let len = self.with_disk(|disk| disk.entries.len());
        Index::new_usize(len + 1)
    }

    fn persist_commit_index(&mut self, index: Index) -> Result<(), io::Error> {
        self.with_disk(|disk| disk.commit_index.replace(index));

        Ok(())
    }

    fn persisted_commit_index(&self) -> Option<Index> {
        self.with_disk(|disk| disk.commit_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[derive(Clone, Debug, PartialEq)]
    struct TestEntry(String);

    impl Entry for TestEntry {}

    impl TryFrom<Vec<u8>> for TestEntry {
        type Error = io::Error;

        fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
            String::from_utf8(bytes)
                .map(TestEntry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
    }

    impl From<TestEntry> for Vec<u8> {
        fn from(entry: TestEntry) -> Self {
            entry.0.into_bytes()
        }
    }

    fn entry(s: &str) -> TestEntry {
        TestEntry(s.to_string())
    }

    #[test]
    fn append_read_truncate() {
        let mut log: InMemoryLog<TestEntry> = InMemoryLog::create();
        assert_eq!(log.next_index(), Index::start_index());
        assert_eq!(log.read(Index::new(1)).unwrap(), None);

        assert_eq!(log.append(entry("a")).unwrap(), Index::new(1));
        assert_eq!(log.append(entry("b")).unwrap(), Index::new(2));
        assert_eq!(log.append(entry("c")).unwrap(), Index::new(3));
        assert_eq!(log.next_index(), Index::new(4));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(entry("b")));

        log.truncate(Index::new(2)).unwrap();
        assert_eq!(log.next_index(), Index::new(2));
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
        assert_eq!(log.append(entry("d")).unwrap(), Index::new(2));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(entry("d")));
    }

    #[test]
    fn read_range_stops_at_end_of_log() {
        let mut log: InMemoryLog<TestEntry> = InMemoryLog::create();
        for s in &["a", "b", "c"] {
            log.append(entry(s)).unwrap();
        }

        assert_eq!(log.read_range(Index::new(2), 10).unwrap(), vec![entry("b"), entry("c")]);
        assert_eq!(log.read_range(Index::new(1), 2).unwrap(), vec![entry("a"), entry("b")]);
        assert!(log.read_range(Index::new(4), 10).unwrap().is_empty());
    }

    #[test]
    fn clones_share_the_same_disk() {
        let mut log: InMemoryLog<TestEntry> = InMemoryLog::create();
        let restarted = log.clone();

        log.append(entry("a")).unwrap();
        log.persist_commit_index(Index::new(1)).unwrap();

        assert_eq!(restarted.read(Index::new(1)).unwrap(), Some(entry("a")));
        assert_eq!(restarted.persisted_commit_index(), Some(Index::new(1)));
    }
}
