use bytes::Bytes;

/// StateMachine is the application specific view of applying the replicated log in sequentially
/// consistent order.
pub trait StateMachine {
    /// apply_committed_entry is called only when it's guaranteed that the provided entry has been
    /// committed (i.e. replicated to a majority). Because of this guarantee, you will never need
    /// to reverse an entry once you've been asked to apply it. Entries arrive strictly in index
    /// order, and each index at most once per node incarnation.
    ///
    /// The leader will not reply to the client's request until this method call completes. The
    /// output is handed back to the client that submitted the command. Use
    /// `StateMachineOutput::Failure` for commands your application rejects; the entry is still
    /// committed, it just had no effect.
    fn apply_committed_entry(&mut self, entry: RaftCommittedEntry) -> StateMachineOutput;

    /// Index of the last entry this state machine has durably applied, or 0 if none. Entries at or
    /// below it are never handed to `apply_committed_entry` again after a restart.
    fn last_applied_index(&self) -> u64;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftCommittedEntry {
    pub term: u64,
    pub index: u64,
    pub client_id: u64,
    pub call_id: u64,
    pub data: Bytes,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateMachineOutput {
    Data(Bytes),
    NoData,
    Failure(String),
}
