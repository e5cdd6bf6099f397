pub mod run;

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

use crate::domain::message::{Credential, MessageId};
use crate::domain::result::{AggregationResult, RunStats};
use crate::error::{AggregateError, Result};
use crate::mail::provider::MailProvider;
use crate::receipts::SenderFilter;

use run::AggregationRun;

const DEFAULT_WORKERS: usize = 8;
const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Upper bound on concurrent fetches.
    pub workers: usize,
    /// Bound on the whole run, listing included.
    pub deadline: Option<Duration>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            deadline: None,
        }
    }
}

/// Shared stop flag; the CLI flips it from the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Aggregator {
    provider: Arc<dyn MailProvider>,
    filter: SenderFilter,
    options: AggregatorOptions,
}

impl Aggregator {
    pub fn new(provider: Arc<dyn MailProvider>, filter: SenderFilter, options: AggregatorOptions) -> Self {
        Self {
            provider,
            filter,
            options,
        }
    }

    /// List, fan out one fetch per candidate, and block until finalized.
    pub fn aggregate(&self, credential: &Credential, query: &str) -> Result<AggregationResult> {
        self.aggregate_with_cancel(credential, query, &CancelToken::new())
    }

    pub fn aggregate_with_cancel(
        &self,
        credential: &Credential,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<AggregationResult> {
        let deadline = self.options.deadline.map(|d| Instant::now() + d);

        let ids = self
            .provider
            .list(credential, query)
            .map_err(AggregateError::ListingFailed)?;
        info!("{} candidate messages for query {query:?}", ids.len());

        if ids.is_empty() {
            return Ok(AggregationResult::NoReceipts {
                stats: RunStats::default(),
            });
        }
        if cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }

        let ids = Arc::new(ids);
        let (run, settlement) = AggregationRun::new(ids.iter().cloned(), self.filter.clone());
        let run = Arc::new(run);
        self.fan_out(credential, &ids, &run, cancel);

        loop {
            let wait = match deadline {
                Some(at) => at.saturating_duration_since(Instant::now()).min(POLL),
                None => POLL,
            };
            match settlement.recv_timeout(wait) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Disconnected) => return Err(AggregateError::Cancelled),
                Err(RecvTimeoutError::Timeout) => {}
            }
            if cancel.is_cancelled() && run.abandon() {
                return Err(AggregateError::Cancelled);
            }
            if deadline.is_some_and(|at| Instant::now() >= at) {
                run.expire();
            }
        }
    }

    fn fan_out(
        &self,
        credential: &Credential,
        ids: &Arc<Vec<MessageId>>,
        run: &Arc<AggregationRun>,
        cancel: &CancelToken,
    ) {
        let credential = Arc::new(credential.clone());
        let next = Arc::new(AtomicUsize::new(0));
        let workers = self.options.workers.clamp(1, ids.len());
        debug!("fanning out {} fetches over {workers} workers", ids.len());

        let mut spawned = 0;
        for n in 0..workers {
            let worker = Worker {
                provider: Arc::clone(&self.provider),
                credential: Arc::clone(&credential),
                ids: Arc::clone(ids),
                next: Arc::clone(&next),
                run: Arc::clone(run),
                cancel: cancel.clone(),
            };
            match thread::Builder::new()
                .name(format!("fetch-{n}"))
                .spawn(move || worker.drain())
            {
                Ok(_) => spawned += 1,
                Err(e) => warn!("could not spawn fetch worker {n}: {e}"),
            }
        }

        if spawned == 0 {
            warn!("no fetch workers available; fetching on the calling thread");
            Worker {
                provider: Arc::clone(&self.provider),
                credential,
                ids: Arc::clone(ids),
                next,
                run: Arc::clone(run),
                cancel: cancel.clone(),
            }
            .drain();
        }
    }
}

struct Worker {
    provider: Arc<dyn MailProvider>,
    credential: Arc<Credential>,
    ids: Arc<Vec<MessageId>>,
    next: Arc<AtomicUsize>,
    run: Arc<AggregationRun>,
    cancel: CancelToken,
}

impl Worker {
    /// Pull ids until the queue is empty or the run is over.
    fn drain(self) {
        while !self.cancel.is_cancelled() && self.run.is_open() {
            let i = self.next.fetch_add(1, Ordering::Relaxed);
            let Some(id) = self.ids.get(i) else {
                break;
            };
            let outcome = self.provider.fetch(&self.credential, id);
            if let Err(e) = &outcome {
                warn!("fetch {id} failed: {e}");
            }
            self.run.fold(id, outcome);
        }
    }
}
