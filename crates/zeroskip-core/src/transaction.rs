//! A transaction is a pure marker bracketing a batch of add/remove calls.
//! Grounded on `zeroskip-transaction.c`: `zs_transaction_begin` allocates a
//! handle associated with the db, `zs_transaction_end` releases it, and
//! neither buffers any records in memory. The actual durability boundary
//! is [`crate::engine::DbEngine::commit`].

/// An opaque handle bracketing a sequence of add/remove calls.
///
/// Transactions buffer nothing: every `add`/`remove` call through the
/// engine is applied immediately to the active file and in-memory index.
/// What a transaction actually brackets is *when a commit is legal to
/// call* — it exists so callers have a handle to pass to `commit`, not so
/// operations can be staged and rolled back in memory (spec §4.8, §9 open
/// question (b)).
#[derive(Debug)]
pub struct Transaction {
    pub(crate) id: u64,
}

impl Transaction {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    /// An opaque identifier, unique within the lifetime of the owning
    /// [`crate::engine::DbEngine`], useful only for logging/diagnostics.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}
