use crate::types::{EdgeStatement, PendingTransaction};

/// Single-owner accumulator deciding when a pending transaction is committed.
///
/// The flush check is strictly-greater-than, so a batch can hold
/// `threshold + 1` statements by the time the worker next asks. A threshold of
/// one commits after every second statement; zero commits every statement.
#[derive(Debug)]
pub struct TransactionBatcher {
    threshold: usize,
    pending: PendingTransaction,
}

impl TransactionBatcher {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            pending: PendingTransaction::with_capacity(threshold.saturating_add(1).min(4096)),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn append(&mut self, stmt: EdgeStatement) {
        self.pending.push(stmt);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn should_flush(&self, force: bool) -> bool {
        force || self.pending.len() > self.threshold
    }

    pub fn take_and_reset(&mut self) -> PendingTransaction {
        let capacity = self.threshold.saturating_add(1).min(4096);
        std::mem::replace(&mut self.pending, PendingTransaction::with_capacity(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use proptest::prelude::*;

    fn stmt(i: usize) -> EdgeStatement {
        EdgeStatement::related_through(NodeId(format!("s{i}")), NodeId(format!("o{i}")))
    }

    #[test]
    fn flushes_only_past_threshold() {
        let mut b = TransactionBatcher::new(3);
        for i in 0..3 {
            b.append(stmt(i));
        }
        assert!(!b.should_flush(false));
        b.append(stmt(3));
        assert!(b.should_flush(false));
    }

    #[test]
    fn force_flushes_empty_batch() {
        let mut b = TransactionBatcher::new(15);
        assert!(b.should_flush(true));
        assert!(b.take_and_reset().is_empty());
    }

    #[test]
    fn preserves_append_order() {
        let mut b = TransactionBatcher::new(10);
        for i in 0..4 {
            b.append(stmt(i));
        }
        let tx = b.take_and_reset();
        let subjects: Vec<_> = tx.iter().map(|s| s.subject.0.clone()).collect();
        assert_eq!(subjects, vec!["s0", "s1", "s2", "s3"]);
    }

    proptest! {
        #[test]
        fn take_and_reset_hands_off_everything(m in 0usize..200, threshold in 0usize..64) {
            let mut b = TransactionBatcher::new(threshold);
            for i in 0..m {
                b.append(stmt(i));
            }
            prop_assert_eq!(b.pending_len(), m);
            let tx = b.take_and_reset();
            prop_assert_eq!(tx.len(), m);
            prop_assert_eq!(b.pending_len(), 0);
        }
    }
}
