use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::models::{Envelope, Source};

use super::DeliveryResult;

/// Watermark range covered by a submission from a polling monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    pub source: Source,
    pub since: i64,
    pub new_watermark: i64,
}

pub(crate) struct Submission {
    pub envelopes: Vec<Envelope>,
    pub cursor: Option<Cursor>,
    pub reply: oneshot::Sender<DeliveryResult>,
}

/// Submissions accepted since the last flush.
#[derive(Default)]
pub(crate) struct PendingBatch {
    submissions: Vec<Submission>,
    envelope_count: usize,
    opened_at: Option<Instant>,
}

impl PendingBatch {
    pub fn push(&mut self, submission: Submission, now: Instant) {
        if self.submissions.is_empty() {
            self.opened_at = Some(now);
        }
        self.envelope_count += submission.envelopes.len();
        self.submissions.push(submission);
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    pub fn envelope_count(&self) -> usize {
        self.envelope_count
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub fn take(&mut self) -> Vec<Submission> {
        self.envelope_count = 0;
        self.opened_at = None;
        std::mem::take(&mut self.submissions)
    }
}

/// One sink call worth of envelopes, with the submissions they came from.
pub(crate) struct Chunk {
    pub envelopes: Vec<Envelope>,
    pub owners: Vec<usize>,
}

/// Reply side of a submission, resolved once all its chunks are settled.
pub(crate) struct Settlement {
    pub cursor: Option<Cursor>,
    pub reply: oneshot::Sender<DeliveryResult>,
    pub failure: Option<(u32, String)>,
}

/// Splits submissions into chunks of at most `max_size` envelopes while
/// keeping submission order.
pub(crate) fn split(submissions: Vec<Submission>, max_size: usize) -> (Vec<Chunk>, Vec<Settlement>) {
    let max_size = max_size.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut settlements = Vec::with_capacity(submissions.len());

    for (index, submission) in submissions.into_iter().enumerate() {
        for envelope in submission.envelopes {
            let needs_new = chunks
                .last()
                .map_or(true, |chunk| chunk.envelopes.len() >= max_size);
            if needs_new {
                chunks.push(Chunk {
                    envelopes: Vec::with_capacity(max_size),
                    owners: Vec::new(),
                });
            }
            if let Some(chunk) = chunks.last_mut() {
                chunk.envelopes.push(envelope);
                if chunk.owners.last() != Some(&index) {
                    chunk.owners.push(index);
                }
            }
        }
        settlements.push(Settlement {
            cursor: submission.cursor,
            reply: submission.reply,
            failure: None,
        });
    }

    (chunks, settlements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, Payload};

    fn submission(count: usize) -> (Submission, oneshot::Receiver<DeliveryResult>) {
        let (reply, rx) = oneshot::channel();
        let envelopes = (0..count)
            .map(|i| {
                Envelope::from(Event::new(
                    Source::Message,
                    i as i64,
                    format!("message:a:{i}"),
                    Payload::new(),
                ))
            })
            .collect();
        (
            Submission {
                envelopes,
                cursor: None,
                reply,
            },
            rx,
        )
    }

    #[test]
    fn test_split_respects_max_size_and_owners() {
        let (a, _ra) = submission(2);
        let (b, _rb) = submission(3);
        let (c, _rc) = submission(0);

        let (chunks, settlements) = split(vec![a, b, c], 2);
        let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.envelopes.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks[0].owners, vec![0]);
        assert_eq!(chunks[1].owners, vec![1]);
        assert_eq!(chunks[2].owners, vec![1]);
        assert_eq!(settlements.len(), 3);
    }

    #[test]
    fn test_pending_batch_counts_envelopes() {
        let mut pending = PendingBatch::default();
        assert!(pending.opened_at().is_none());

        let (a, _ra) = submission(3);
        let (b, _rb) = submission(1);
        let now = Instant::now();
        pending.push(a, now);
        pending.push(b, now);
        assert_eq!(pending.envelope_count(), 4);
        assert_eq!(pending.opened_at(), Some(now));

        assert_eq!(pending.take().len(), 2);
        assert!(pending.is_empty());
        assert_eq!(pending.envelope_count(), 0);
    }
}
