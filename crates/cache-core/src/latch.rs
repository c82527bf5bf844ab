//! Latch: a completion coordinator for a fan-out write with a configurable
//! success threshold (spec §3.5).

use tokio::sync::oneshot;

/// Declared success policy for a fan-out write (spec §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    None,
    One,
    Quorum,
    AllMinusOne,
    All,
}

impl Policy {
    /// Required successes given `n` participating write replicas
    /// (spec §3.5 table).
    pub fn required(self, n: usize) -> usize {
        match self {
            Policy::None => 0,
            Policy::One => {
                if n == 0 {
                    0
                } else {
                    1
                }
            }
            Policy::Quorum => match n {
                0 => 0,
                1 | 2 => n,
                _ => n / 2 + 1,
            },
            Policy::AllMinusOne => match n {
                0 => 0,
                1 | 2 => 1,
                _ => n - 1,
            },
            Policy::All => n,
        }
    }
}

/// One slot handed to a per-replica dispatch; the replica (or the
/// orchestrator, on its behalf) reports success/failure exactly once.
pub struct LatchSlot {
    tx: oneshot::Sender<bool>,
}

impl LatchSlot {
    pub fn report(self, success: bool) {
        // A dropped receiver (latch already satisfied and dropped) is not an
        // error here; the result is simply no longer observed.
        let _ = self.tx.send(success);
    }
}

/// Holds the declared policy, total participating replicas, required
/// success count, and the per-replica completion receivers (spec §3.5).
pub struct Latch {
    policy: Policy,
    total: usize,
    required: usize,
    receivers: Vec<oneshot::Receiver<bool>>,
}

impl Latch {
    /// Builds a latch with `total` participating write replicas under
    /// `policy`, returning it alongside one [`LatchSlot`] per replica in
    /// dispatch order.
    pub fn new(policy: Policy, total: usize) -> (Latch, Vec<LatchSlot>) {
        let required = policy.required(total);
        let mut receivers = Vec::with_capacity(total);
        let mut slots = Vec::with_capacity(total);
        for _ in 0..total {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            slots.push(LatchSlot { tx });
        }
        (
            Latch {
                policy,
                total,
                required,
                receivers,
            },
            slots,
        )
    }

    /// A latch with no participating replicas (spec §4.6 `NullClient`
    /// fast-fail path returns "a zero-width latch").
    pub fn empty(policy: Policy) -> Latch {
        Latch {
            policy,
            total: 0,
            required: 0,
            receivers: Vec::new(),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Awaits replica completions until either the required success count is
    /// met or every replica has reported (spec §4.6: "terminated when the
    /// latch meets its required-success count ... whichever comes first").
    pub async fn await_quorum(mut self) -> bool {
        if self.required == 0 {
            return true;
        }
        let mut successes = 0;
        while let Some(rx) = self.receivers.pop() {
            if let Ok(true) = rx.await {
                successes += 1;
                if successes >= self.required {
                    return true;
                }
            }
        }
        successes >= self.required
    }

    /// Awaits with a deadline; on timeout returns whatever quorum state had
    /// been reached so far (spec §5: "Write latches may be awaited by
    /// callers with a timeout").
    pub async fn await_quorum_with_timeout(self, timeout: std::time::Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.await_quorum()).await, Ok(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table_matches_spec() {
        assert_eq!(Policy::None.required(5), 0);
        assert_eq!(Policy::One.required(0), 0);
        assert_eq!(Policy::One.required(5), 1);
        assert_eq!(Policy::Quorum.required(0), 0);
        assert_eq!(Policy::Quorum.required(2), 2);
        assert_eq!(Policy::Quorum.required(3), 2);
        assert_eq!(Policy::Quorum.required(5), 3);
        assert_eq!(Policy::AllMinusOne.required(0), 0);
        assert_eq!(Policy::AllMinusOne.required(2), 1);
        assert_eq!(Policy::AllMinusOne.required(5), 4);
        assert_eq!(Policy::All.required(5), 5);
    }

    #[tokio::test]
    async fn quorum_met_returns_true_without_waiting_for_stragglers() {
        let (latch, slots) = Latch::new(Policy::One, 3);
        let mut slots = slots.into_iter();
        slots.next().unwrap().report(true);
        // leave the other two unreported (their senders are dropped here,
        // simulating in-flight replicas)
        drop(slots);
        assert!(latch.await_quorum().await);
    }

    #[tokio::test]
    async fn quorum_unmet_returns_false() {
        let (latch, slots) = Latch::new(Policy::All, 2);
        slots.into_iter().for_each(|s| s.report(false));
        assert!(!latch.await_quorum().await);
    }

    #[tokio::test]
    async fn empty_latch_for_null_client_path() {
        let latch = Latch::empty(Policy::Quorum);
        assert_eq!(latch.total(), 0);
        assert_eq!(latch.required(), 0);
        assert!(latch.await_quorum().await);
    }
}
