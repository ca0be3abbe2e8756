//! Bookkeeping for chunked file transfers, shared by both transports.
//!
//! The serial download path can be asked to retransmit a whole fragment
//! group, so the state keeps a committed watermark to roll back to. USB
//! never rolls back but uses the same progress accounting.

/// What a download request asks for. The discriminants are the request
/// byte both transports send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Image = 0x00,
    Thumbnail = 0x01,
}

/// Called after every chunk with `(bytes_done, bytes_total)`.
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

#[derive(Default)]
pub struct ProgressReporter {
    callback: Option<ProgressFn>,
}

impl ProgressReporter {
    pub fn set(&mut self, callback: Option<ProgressFn>) {
        self.callback = callback;
    }

    pub fn report(&mut self, done: u64, total: u64) {
        if let Some(cb) = self.callback.as_mut() {
            cb(done, total);
        }
    }
}

/// Position tracking for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    total: u64,
    received: u64,
    committed: u64,
}

impl TransferState {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            received: 0,
            committed: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Size of the next chunk for a fixed-chunk transfer, zero when done.
    pub fn next_chunk(&self, chunk_size: u64) -> u64 {
        (self.total - self.received).min(chunk_size)
    }

    pub fn advance(&mut self, n: u64) {
        self.received += n;
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.total
    }

    /// Marks everything received so far as safely delivered.
    pub fn commit(&mut self) {
        self.committed = self.received;
    }

    /// Discards uncommitted progress and returns the offset to resume at.
    pub fn rollback(&mut self) -> u64 {
        self.received = self.committed;
        self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fixed_chunk_progress_sequence() {
        let mut state = TransferState::new(10_000);
        let mut reporter = ProgressReporter::default();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        reporter.set(Some(Box::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        })));

        while !state.is_complete() {
            let n = state.next_chunk(0x1000);
            state.advance(n);
            reporter.report(state.received(), state.total());
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(4096, 10_000), (8192, 10_000), (10_000, 10_000)]
        );
    }

    #[test]
    fn rollback_restores_committed_offset() {
        let mut state = TransferState::new(5000);
        state.advance(1000);
        state.commit();
        state.advance(700);
        assert_eq!(state.received(), 1700);

        assert_eq!(state.rollback(), 1000);
        assert_eq!(state.received(), 1000);
        assert!(!state.is_complete());

        state.advance(4000);
        state.commit();
        assert!(state.is_complete());
    }

    #[test]
    fn unset_reporter_is_a_no_op() {
        let mut reporter = ProgressReporter::default();
        reporter.report(1, 2);
    }
}
