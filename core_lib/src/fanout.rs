//! Concurrent execution of independent operations, joined in input order.
//!
//! Two aggregate contracts are offered and chosen per call site:
//! `gather_all` is fail-fast (first error wins, remaining work is dropped) and
//! suits prerequisites; `gather_outcomes` captures every item's result and
//! suits independent reachability probes.

use futures_util::future::{join_all, try_join_all};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Default)]
pub struct FanOut {
    gate: Option<Arc<Semaphore>>,
    limit: usize,
}

impl FanOut {
    pub fn unbounded() -> Self {
        Self {
            gate: None,
            limit: 0,
        }
    }

    /// At most `limit` operations in flight at once. A limit of 0 means unbounded.
    pub fn bounded(limit: usize) -> Self {
        if limit == 0 {
            return Self::unbounded();
        }
        Self {
            gate: Some(Arc::new(Semaphore::new(limit))),
            limit,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.gate.as_ref().map(|_| self.limit)
    }

    async fn gated<F: Future>(&self, op: F) -> F::Output {
        match &self.gate {
            Some(gate) => {
                let _permit = gate.acquire().await.ok();
                op.await
            }
            None => op.await,
        }
    }

    pub async fn gather_all<I, F, T, E>(&self, ops: I) -> Result<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        try_join_all(ops.into_iter().map(|op| self.gated(op))).await
    }

    pub async fn gather_outcomes<I, F, T, E>(&self, ops: I) -> Vec<Result<T, E>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        self.join(ops).await
    }

    /// Joins operations that cannot fail.
    pub async fn join<I, F>(&self, ops: I) -> Vec<F::Output>
    where
        I: IntoIterator<Item = F>,
        F: Future,
    {
        join_all(ops.into_iter().map(|op| self.gated(op))).await
    }
}

/// Fail-fast gather without a concurrency ceiling.
pub async fn gather_all<I, F, T, E>(ops: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    FanOut::unbounded().gather_all(ops).await
}

/// Collect-outcome gather without a concurrency ceiling.
pub async fn gather_outcomes<I, F, T, E>(ops: I) -> Vec<Result<T, E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    FanOut::unbounded().gather_outcomes(ops).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    async fn after(millis: u64, value: &'static str) -> Result<&'static str, String> {
        sleep(Duration::from_millis(millis)).await;
        Ok(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_input_order() {
        let results = gather_all(vec![
            Box::pin(after(30, "a")),
            Box::pin(after(5, "b")),
            Box::pin(after(20, "c")),
        ])
        .await
        .unwrap();

        assert_eq!(results, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_abandons_remaining() {
        let finished = Arc::new(AtomicUsize::new(0));

        let ops = (0..3u64).map(|i| {
            let finished = Arc::clone(&finished);
            async move {
                if i == 1 {
                    sleep(Duration::from_millis(10)).await;
                    return Err(format!("manifest {} unavailable", i));
                }
                sleep(Duration::from_millis(100)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(i)
            }
        });

        let result = gather_all(ops).await;
        assert_eq!(result.unwrap_err(), "manifest 1 unavailable");

        sleep(Duration::from_millis(500)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_outcomes_captures_each_item() {
        let ops = ["ok", "boom", "ok"].into_iter().enumerate().map(|(i, kind)| async move {
            sleep(Duration::from_millis(10 * (3 - i as u64))).await;
            if kind == "boom" {
                Err(i)
            } else {
                Ok(i)
            }
        });

        let outcomes = gather_outcomes(ops).await;
        assert_eq!(outcomes, vec![Ok(0), Err(1), Ok(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_gate_limits_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let fanout = FanOut::bounded(2);

        let ops = (0..6).map(|i| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(i)
            }
        });

        let results = fanout.gather_all(ops).await.unwrap();
        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        assert!(FanOut::bounded(0).limit().is_none());
        assert_eq!(FanOut::bounded(3).limit(), Some(3));
    }
}
