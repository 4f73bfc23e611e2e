//! Fetch backpressure.
//!
//! The next chunk is fetched only when extraction is starved *and* the
//! decoder is idle, which keeps roughly one chunk and one batch in flight.

use std::time::Duration;

use tokio::time::Instant;

/// Fetch policy: the demuxer cannot fill another batch from what it holds
/// (extraction is starved) and the decoder has no pending work.
pub fn should_fetch(demux_pending: usize, batch_size: usize, decode_queue: usize) -> bool {
    demux_pending < batch_size && decode_queue == 0
}

/// Flow-control state for one pipeline, with a coalescing timer.
///
/// The first [`schedule`](Self::schedule) arms a deadline `debounce` in the
/// future; further calls while armed fold into that same evaluation.
#[derive(Debug, Clone)]
pub struct FlowController {
    batch_size: usize,
    debounce: Duration,
    deadline: Option<Instant>,
    evaluations: u64,
}

impl FlowController {
    pub fn new(batch_size: usize, debounce: Duration) -> Self {
        Self {
            batch_size,
            debounce,
            deadline: None,
            evaluations: 0,
        }
    }

    /// Request an evaluation. Returns `true` if this call armed the timer.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.debounce);
        true
    }

    /// When the pending evaluation is due.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Run the due evaluation against both queue depths as they are now.
    pub fn evaluate(&mut self, demux_pending: usize, decode_queue: usize) -> bool {
        self.deadline = None;
        self.evaluations += 1;
        should_fetch(demux_pending, self.batch_size, decode_queue)
    }

    /// Evaluations run so far.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_policy_table() {
        // (demux pending, decode queue, fetch?)
        let cases = [
            (10, 3, false), // full batch waiting, busy decoder
            (10, 0, false), // full batch waiting, idle decoder
            (4, 3, false),  // starved, busy decoder
            (4, 0, true),   // starved, idle decoder
        ];
        for (pending, queue, expected) in cases {
            assert_eq!(
                should_fetch(pending, 10, queue),
                expected,
                "pending={pending} queue={queue}"
            );
        }
    }

    #[test]
    fn test_evaluation_reads_current_depths() {
        let mut flow = FlowController::new(10, Duration::from_millis(20));
        assert!(flow.evaluate(0, 0));
        assert!(!flow.evaluate(12, 0));
        assert!(flow.evaluate(9, 0));
        assert!(!flow.evaluate(9, 1));
        assert_eq!(flow.evaluations(), 4);
    }

    #[test]
    fn test_schedule_coalesces_until_evaluated() {
        let mut flow = FlowController::new(10, Duration::from_millis(20));
        let now = Instant::now();

        assert!(flow.schedule(now));
        let deadline = flow.deadline().unwrap();
        assert!(!flow.schedule(now + Duration::from_millis(5)));
        assert!(!flow.schedule(now + Duration::from_millis(15)));
        assert_eq!(flow.deadline(), Some(deadline));
        assert_eq!(deadline, now + Duration::from_millis(20));

        flow.evaluate(0, 0);
        assert_eq!(flow.evaluations(), 1);
        assert!(flow.deadline().is_none());
        assert!(flow.schedule(now + Duration::from_millis(30)));
    }

    proptest! {
        #[test]
        fn prop_full_batch_never_fetches(batch in 1usize..64, extra in 0usize..8, queue in 0usize..32) {
            prop_assert!(!should_fetch(batch + extra, batch, queue));
        }

        #[test]
        fn prop_busy_decoder_never_fetches(pending in 0usize..64, batch in 1usize..64, queue in 1usize..32) {
            prop_assert!(!should_fetch(pending, batch, queue));
        }
    }
}
