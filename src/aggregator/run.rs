use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::mem;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::message::{MessageDetail, MessageId};
use crate::domain::result::{AggregationResult, RunStats};
use crate::error::{AggregateError, FetchError};
use crate::receipts::{SenderFilter, amount};

type Delivery = Result<AggregationResult, AggregateError>;

/// What a single fold step did to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// Slot consumed, others still outstanding.
    Applied,
    /// Slot consumed and this call performed finalization.
    Finalized,
    /// The run was already over, or the id was not outstanding.
    Ignored,
}

#[derive(Debug, Default)]
struct Tally {
    /// Outstanding slots; shrinks by one per fold.
    pending: HashSet<MessageId>,
    /// Exact sum of accepted amounts; `None` until the first receipt.
    sum: Option<Decimal>,
    failures: Vec<(MessageId, FetchError)>,
    stats: RunStats,
}

impl Tally {
    /// Add one receipt to the sum. An amount that would overflow the total
    /// is counted as a soft skip instead.
    fn accept(&mut self, id: &MessageId, value: Decimal) {
        match self.sum.unwrap_or(Decimal::ZERO).checked_add(value) {
            Some(sum) => {
                self.sum = Some(sum);
                self.stats.receipts += 1;
            }
            None => {
                warn!("amount {value} in {id} overflows the total; skipped");
                self.stats.soft_skips += 1;
            }
        }
    }

    fn finish(self) -> AggregationResult {
        let mut stats = self.stats;
        stats.failures = self.failures.len();
        AggregationResult::from_sum(self.sum, stats)
    }
}

enum Phase {
    FanningOut { tally: Tally, deliver: Sender<Delivery> },
    Finalized,
    Abandoned,
}

/// Shared state of one fan-out. Every transition happens under `phase`.
pub struct AggregationRun {
    filter: SenderFilter,
    phase: Mutex<Phase>,
}

/// Receiving end of a run; yields the finalized result at most once.
pub struct Settlement(Receiver<Delivery>);

impl Settlement {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Delivery, RecvTimeoutError> {
        self.0.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<Delivery> {
        self.0.try_recv().ok()
    }
}

impl AggregationRun {
    /// One outstanding slot per distinct candidate. An empty candidate set
    /// finalizes immediately as no receipts.
    pub fn new(candidates: impl IntoIterator<Item = MessageId>, filter: SenderFilter) -> (Self, Settlement) {
        let (tx, rx) = mpsc::channel();
        let pending: HashSet<MessageId> = candidates.into_iter().collect();
        let tally = Tally {
            stats: RunStats {
                candidates: pending.len(),
                ..RunStats::default()
            },
            pending,
            ..Tally::default()
        };
        let empty = tally.pending.is_empty();
        let run = Self {
            filter,
            phase: Mutex::new(Phase::FanningOut { tally, deliver: tx }),
        };
        if empty {
            finalize(&mut run.lock(), |tally| Ok(tally.finish()));
        }
        (run, Settlement(rx))
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Still accepting completions.
    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), Phase::FanningOut { .. })
    }

    pub fn outstanding(&self) -> usize {
        match &*self.lock() {
            Phase::FanningOut { tally, .. } => tally.pending.len(),
            _ => 0,
        }
    }

    /// Fold one fetch completion into the run. Decrement, classification and
    /// the finalizing transition share one critical section.
    pub fn fold(&self, id: &MessageId, outcome: Result<MessageDetail, FetchError>) -> Fold {
        let mut phase = self.lock();
        let Phase::FanningOut { tally, .. } = &mut *phase else {
            debug!("late completion for {id} ignored");
            return Fold::Ignored;
        };
        if !tally.pending.remove(id) {
            warn!("completion for {id} does not match an outstanding slot");
            return Fold::Ignored;
        }

        match outcome {
            Err(err) => {
                let auth_expired = err.is_unauthorized();
                tally.failures.push((id.clone(), err));
                if auth_expired {
                    warn!("credential rejected while fetching {id}; aborting run");
                    finalize(&mut phase, |_| Err(AggregateError::AuthExpired));
                    return Fold::Finalized;
                }
            }
            Ok(detail) if !self.filter.matches(&detail.headers) => {
                tally.stats.filtered_out += 1;
            }
            Ok(detail) => match amount::extract(&detail.snippet) {
                Some(value) => tally.accept(id, value),
                None => {
                    debug!("no amount in snippet of {id}");
                    tally.stats.soft_skips += 1;
                }
            },
        }

        let settled = matches!(&*phase, Phase::FanningOut { tally, .. } if tally.pending.is_empty());
        if settled {
            finalize(&mut phase, |tally| Ok(tally.finish()));
            return Fold::Finalized;
        }
        Fold::Applied
    }

    /// Deadline expiry: finalize with what has arrived and count every
    /// outstanding slot as timed out. Returns true if this call finalized.
    pub fn expire(&self) -> bool {
        let mut phase = self.lock();
        let Phase::FanningOut { tally, .. } = &mut *phase else {
            return false;
        };
        warn!(
            "run deadline expired with {} fetches outstanding",
            tally.pending.len()
        );
        let stragglers: Vec<MessageId> = tally.pending.drain().collect();
        tally
            .failures
            .extend(stragglers.into_iter().map(|id| (id, FetchError::TimedOut)));

        finalize(&mut phase, |tally| Ok(tally.finish()));
        true
    }

    /// Caller went away: drop the run without emitting anything. Returns
    /// false if the run had already finalized.
    pub fn abandon(&self) -> bool {
        let mut phase = self.lock();
        if !matches!(*phase, Phase::FanningOut { .. }) {
            return false;
        }
        *phase = Phase::Abandoned;
        info!("run abandoned before finalization");
        true
    }
}

/// The only way out of `FanningOut` with a result. The sender is moved out
/// of the phase, so a second delivery cannot happen.
fn finalize(phase: &mut Phase, build: impl FnOnce(Tally) -> Delivery) {
    let Phase::FanningOut { tally, deliver } = mem::replace(phase, Phase::Finalized) else {
        return;
    };
    let failures = tally.failures.len();
    let result = build(tally);
    match &result {
        Ok(r) => info!(
            "run finalized: {} receipts, {} filtered out, {} skipped, {} failures",
            r.stats().receipts,
            r.stats().filtered_out,
            r.stats().soft_skips,
            failures
        ),
        Err(e) => warn!("run finalized with error: {e} ({failures} failures)"),
    }
    // The receiver is gone if the caller stopped waiting.
    let _ = deliver.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Header;
    use std::str::FromStr;

    fn detail(id: &str, from: &str, snippet: &str) -> MessageDetail {
        MessageDetail {
            id: MessageId::new(id),
            headers: vec![Header::new("From", from)],
            snippet: snippet.to_string(),
        }
    }

    fn ids(raw: &[&str]) -> Vec<MessageId> {
        raw.iter().copied().map(MessageId::new).collect()
    }

    fn filter() -> SenderFilter {
        SenderFilter::new("uber.us@uber.com")
    }

    #[test]
    fn zero_candidates_finalize_on_creation() {
        let (run, settlement) = AggregationRun::new(Vec::new(), filter());
        assert!(!run.is_open());
        let result = settlement.try_recv().unwrap().unwrap();
        assert!(matches!(result, AggregationResult::NoReceipts { .. }));
        assert!(settlement.try_recv().is_none());
    }

    #[test]
    fn last_fold_finalizes() {
        let ids = ids(&["a", "b"]);
        let (run, settlement) = AggregationRun::new(ids.clone(), filter());
        assert_eq!(
            run.fold(&ids[0], Ok(detail("a", "uber.us@uber.com", "$1.50 trip"))),
            Fold::Applied
        );
        assert_eq!(run.outstanding(), 1);
        assert!(settlement.try_recv().is_none());
        assert_eq!(
            run.fold(&ids[1], Ok(detail("b", "uber.us@uber.com", "$2.50 trip"))),
            Fold::Finalized
        );
        let result = settlement.try_recv().unwrap().unwrap();
        assert_eq!(result.amount(), Some(Decimal::from_str("4.00").unwrap()));
        assert_eq!(run.fold(&ids[1], Err(FetchError::TimedOut)), Fold::Ignored);
    }

    #[test]
    fn repeated_completion_does_not_consume_two_slots() {
        let ids = ids(&["a", "b"]);
        let (run, settlement) = AggregationRun::new(ids.clone(), filter());
        assert_eq!(run.fold(&ids[0], Err(FetchError::NotFound("a".into()))), Fold::Applied);
        assert_eq!(run.fold(&ids[0], Err(FetchError::NotFound("a".into()))), Fold::Ignored);
        assert!(settlement.try_recv().is_none());
        assert_eq!(run.outstanding(), 1);
    }

    #[test]
    fn unauthorized_aborts_the_run() {
        let ids = ids(&["x", "y", "z"]);
        let (run, settlement) = AggregationRun::new(ids.clone(), filter());
        assert_eq!(
            run.fold(&ids[0], Err(FetchError::Unauthorized("401".into()))),
            Fold::Finalized
        );
        assert_eq!(settlement.try_recv(), Some(Err(AggregateError::AuthExpired)));
        assert_eq!(run.fold(&ids[1], Err(FetchError::NotFound("y".into()))), Fold::Ignored);
    }

    #[test]
    fn expire_counts_outstanding_as_failures() {
        let ids = ids(&["a", "b", "c"]);
        let (run, settlement) = AggregationRun::new(ids.clone(), filter());
        run.fold(&ids[0], Ok(detail("a", "uber.us@uber.com", "$3.00 ride")));
        assert!(run.expire());
        let result = settlement.try_recv().unwrap().unwrap();
        assert_eq!(result.amount(), Some(Decimal::from_str("3.00").unwrap()));
        assert_eq!(result.failures(), 2);
        assert!(!run.expire());
        assert_eq!(run.fold(&ids[1], Err(FetchError::TimedOut)), Fold::Ignored);
    }

    #[test]
    fn overflowing_amount_is_skipped_not_summed() {
        let huge = "$79228162514264337593543950335 trip";
        let ids = ids(&["a", "b", "c"]);
        let (run, settlement) = AggregationRun::new(ids.clone(), filter());
        run.fold(&ids[0], Ok(detail("a", "uber.us@uber.com", huge)));
        run.fold(&ids[1], Ok(detail("b", "uber.us@uber.com", huge)));
        assert_eq!(
            run.fold(&ids[2], Ok(detail("c", "uber.us@uber.com", "$1.00 trip"))),
            Fold::Finalized
        );
        let result = settlement.try_recv().unwrap().unwrap();
        assert_eq!(result.amount(), Some(Decimal::MAX));
        assert_eq!(result.stats().receipts, 1);
        assert_eq!(result.stats().soft_skips, 2);
    }

    #[test]
    fn abandoned_run_emits_nothing() {
        let ids = ids(&["a"]);
        let (run, settlement) = AggregationRun::new(ids.clone(), filter());
        assert!(run.abandon());
        assert_eq!(
            run.fold(&ids[0], Ok(detail("a", "uber.us@uber.com", "$3.00"))),
            Fold::Ignored
        );
        assert!(matches!(
            settlement.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
