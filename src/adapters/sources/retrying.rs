//! Retry wrapper for source adapters
//!
//! Transient errors from `open()` and `next()` are retried with the
//! source's backoff policy. Since an adapter only advances on success,
//! retrying is just calling it again. Once the budget is spent the error
//! becomes `SourceError::RetriesExhausted`.

use super::traits::SourceAdapter;
use crate::core::retry::{Backoff, RetryDecision, RetryPolicy};
use crate::domain::{ProvisionalRecord, RawChunk, SourceCursor, SourceError, SourceId};
use async_trait::async_trait;

pub struct RetryingSource {
    inner: Box<dyn SourceAdapter>,
    policy: RetryPolicy,
}

impl RetryingSource {
    pub fn new(inner: Box<dyn SourceAdapter>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

/// Classifies a failed attempt; `Ok` means try again
async fn retry_or_fail(
    backoff: &mut Backoff,
    operation: &str,
    error: SourceError,
) -> Result<(), SourceError> {
    if !error.is_transient() {
        return Err(error);
    }
    match backoff.on_failure() {
        RetryDecision::GiveUp { attempts } => Err(SourceError::RetriesExhausted {
            attempts,
            last_error: error.to_string(),
        }),
        RetryDecision::RetryAfter(delay) => {
            crate::log_retry_attempt!(
                operation,
                backoff.attempts() + 1,
                backoff.max_attempts(),
                error
            );
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

#[async_trait]
impl SourceAdapter for RetryingSource {
    fn source_id(&self) -> &SourceId {
        self.inner.source_id()
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let mut backoff = self.policy.backoff();
        loop {
            match self.inner.open().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let operation = format!("{} open", self.inner.source_id());
                    retry_or_fail(&mut backoff, &operation, e).await?
                }
            }
        }
    }

    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
        let mut backoff = self.policy.backoff();
        loop {
            match self.inner.next().await {
                Ok(chunk) => return Ok(chunk),
                Err(e) => {
                    let operation = format!("{} next", self.inner.source_id());
                    retry_or_fail(&mut backoff, &operation, e).await?
                }
            }
        }
    }

    fn checkpoint(&self) -> SourceCursor {
        self.inner.checkpoint()
    }

    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError> {
        self.inner.resume(cursor)
    }

    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord> {
        self.inner.decode(chunk)
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Fails with the scripted errors first, then yields `chunks` chunks
    struct Flaky {
        id: SourceId,
        errors: VecDeque<SourceError>,
        chunks: u64,
        position: u64,
    }

    #[async_trait]
    impl SourceAdapter for Flaky {
        fn source_id(&self) -> &SourceId {
            &self.id
        }
        fn kind(&self) -> &'static str {
            "flaky"
        }
        async fn open(&mut self) -> Result<(), SourceError> {
            Ok(())
        }
        async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
            if let Some(e) = self.errors.pop_front() {
                return Err(e);
            }
            if self.position == self.chunks {
                return Ok(None);
            }
            let start = SourceCursor::Page { offset: self.position };
            self.position += 1;
            Ok(Some(RawChunk::new(
                self.id.clone(),
                start,
                self.checkpoint(),
                Bytes::new(),
            )))
        }
        fn checkpoint(&self) -> SourceCursor {
            SourceCursor::Page { offset: self.position }
        }
        fn resume(&mut self, _cursor: SourceCursor) -> Result<(), SourceError> {
            Ok(())
        }
        fn decode(&self, _chunk: &RawChunk) -> Vec<ProvisionalRecord> {
            Vec::new()
        }
    }

    fn wrap(errors: Vec<SourceError>, max_attempts: u32) -> RetryingSource {
        let inner = Flaky {
            id: SourceId::new("flaky").unwrap(),
            errors: errors.into(),
            chunks: 1,
            position: 0,
        };
        RetryingSource::new(
            Box::new(inner),
            RetryPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
                jitter: false,
            },
        )
    }

    #[tokio::test]
    async fn test_transient_errors_within_budget() {
        let mut source = wrap(
            vec![SourceError::transient("503"), SourceError::transient("503")],
            3,
        );
        let chunk = source.next().await.unwrap().unwrap();
        assert_eq!(chunk.start, SourceCursor::Page { offset: 0 });
        assert_eq!(source.checkpoint(), SourceCursor::Page { offset: 1 });
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let mut source = wrap(vec![SourceError::transient("503"); 3], 3);
        match source.next().await {
            Err(SourceError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected {:?}", other.map(|c| c.map(|c| c.start))),
        }
        assert_eq!(source.checkpoint(), SourceCursor::Page { offset: 0 });
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let mut source = wrap(vec![SourceError::fatal("401"), SourceError::transient("x")], 5);
        assert_eq!(source.next().await.unwrap_err(), SourceError::fatal("401"));
    }
}
