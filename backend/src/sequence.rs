use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request {seq} for client {context} was superseded by a newer request")]
pub struct Superseded {
    pub context: String,
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub struct RequestTicket {
    pub context: String,
    pub seq: u64,
    token: CancellationToken,
}

impl RequestTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn superseded(&self) -> Superseded {
        Superseded {
            context: self.context.clone(),
            seq: self.seq,
        }
    }
}

struct Latest {
    seq: u64,
    token: CancellationToken,
}

/// Per-client "latest request wins" bookkeeping. Issuing a ticket cancels the
/// client's previous one; a response is only delivered for the latest ticket.
#[derive(Default)]
pub struct RequestSequencer {
    next_seq: AtomicU64,
    latest: Mutex<HashMap<String, Latest>>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Latest>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn issue(&self, context: &str) -> RequestTicket {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let previous = self.lock().insert(
            context.to_string(),
            Latest {
                seq,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(
                "client {} issued request {}, cancelling request {}",
                context,
                seq,
                previous.seq
            );
            previous.token.cancel();
        }
        RequestTicket {
            context: context.to_string(),
            seq,
            token,
        }
    }

    pub fn is_latest(&self, ticket: &RequestTicket) -> bool {
        !ticket.is_cancelled()
            && self
                .lock()
                .get(&ticket.context)
                .is_some_and(|latest| latest.seq == ticket.seq)
    }

    /// Drive `work` until it finishes or the ticket is superseded. Output of a
    /// superseded ticket is dropped.
    pub async fn run<F>(&self, ticket: &RequestTicket, work: F) -> Result<F::Output, Superseded>
    where
        F: Future,
    {
        let outcome = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => None,
            output = work => Some(output),
        };

        let result = match outcome {
            Some(output) if self.is_latest(ticket) => Ok(output),
            _ => {
                tracing::debug!("dropping superseded request {} for {}", ticket.seq, ticket.context);
                Err(ticket.superseded())
            }
        };
        self.finish(ticket);
        result
    }

    /// Forget the client once its latest ticket is done.
    pub fn finish(&self, ticket: &RequestTicket) {
        let mut latest = self.lock();
        if latest
            .get(&ticket.context)
            .is_some_and(|current| current.seq == ticket.seq)
        {
            latest.remove(&ticket.context);
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }
}
