//! Fixed-size worker pool running blocking origin fetches.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::cache::ResponseCache;
use crate::dispatch::job::{Completion, FetchJob};
use crate::observability::metrics;
use crate::origin::{FetchError, OriginFetch};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The pool was closed for shutdown.
    #[error("dispatch pool is closed")]
    Closed(FetchJob),
}

/// Bounded set of worker threads pulling `FetchJob`s from a shared queue.
pub struct DispatchPool {
    jobs: Option<Sender<FetchJob>>,
    workers: Vec<JoinHandle<()>>,
    /// Submitted but not yet completed.
    in_flight: Arc<AtomicUsize>,
    size: usize,
}

struct Worker {
    jobs: Receiver<FetchJob>,
    fetcher: Arc<dyn OriginFetch>,
    cache: ResponseCache,
    completions: UnboundedSender<Completion>,
    in_flight: Arc<AtomicUsize>,
}

impl DispatchPool {
    /// Spawn `size` workers.
    pub fn spawn(
        size: usize,
        fetcher: Arc<dyn OriginFetch>,
        cache: ResponseCache,
        completions: UnboundedSender<Completion>,
    ) -> std::io::Result<Self> {
        let size = size.max(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let worker = Worker {
                jobs: rx.clone(),
                fetcher: Arc::clone(&fetcher),
                cache: cache.clone(),
                completions: completions.clone(),
                in_flight: Arc::clone(&in_flight),
            };
            let handle = thread::Builder::new()
                .name(format!("fetch-worker-{}", index))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        tracing::info!(workers = size, "Dispatch pool started");
        Ok(Self {
            jobs: Some(tx),
            workers,
            in_flight,
            size,
        })
    }

    /// Queue a job. Never blocks; a saturated pool just grows the queue.
    pub fn submit(&self, job: FetchJob) -> Result<(), DispatchError> {
        let Some(jobs) = &self.jobs else {
            return Err(DispatchError::Closed(job));
        };

        let busy = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if busy >= self.size {
            tracing::debug!(
                job_id = %job.job_id,
                in_flight = busy + 1,
                workers = self.size,
                "Pool saturated, job queued"
            );
            metrics::record_pool_saturated();
        }

        jobs.send(job).map_err(|e| {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            DispatchError::Closed(e.into_inner())
        })
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop accepting jobs. Already queued jobs still run.
    pub fn close(&mut self) {
        if self.jobs.take().is_some() {
            tracing::debug!(in_flight = self.in_flight(), "Dispatch pool closed");
        }
    }

    /// Close and wait for every worker to exit.
    pub fn join(mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Fetch worker exited abnormally");
            }
        }
        tracing::info!("Dispatch pool stopped");
    }
}

impl Worker {
    fn run(self) {
        for job in self.jobs.iter() {
            let start = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.fetcher.fetch(&job.target)))
                .unwrap_or_else(|payload| Err(FetchError::Panicked(panic_message(payload))));

            match &outcome {
                Ok(body) => {
                    tracing::debug!(
                        job_id = %job.job_id,
                        url = %job.key,
                        bytes = body.len(),
                        "Origin fetch complete"
                    );
                    self.cache.insert(job.key.clone(), body.clone());
                    metrics::record_fetch("success", start);
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.job_id,
                        url = %job.key,
                        error = %e,
                        "Origin fetch failed"
                    );
                    metrics::record_fetch(e.kind(), start);
                }
            }

            // Decrement before sending: once the loop sees zero in flight,
            // every result it still waits for is already on its way.
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let completion = Completion {
                job_id: job.job_id,
                connection: job.connection,
                key: job.key,
                outcome,
            };
            if self.completions.send(completion).is_err() {
                tracing::debug!("Event loop gone, dropping completion");
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::net::connection::ConnectionId;
    use crate::origin::OriginTarget;
    use bytes::Bytes;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;
    use url::Url;

    /// Answers by path: `/fail` errors, `/panic` panics, anything else echoes.
    struct ScriptedFetcher {
        calls: AtomicU32,
    }

    impl OriginFetch for ScriptedFetcher {
        fn fetch(&self, target: &OriginTarget) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match target.path.as_str() {
                "/fail" => Err(FetchError::EmptyResponse),
                "/panic" => panic!("origin exploded"),
                path => Ok(Bytes::from(format!("body of {}", path))),
            }
        }
    }

    fn job(path: &str) -> FetchJob {
        let url = Url::parse(&format!("http://origin.test{}", path)).unwrap();
        FetchJob::new(ConnectionId::new(), CacheKey::from_url("GET", &url).unwrap())
    }

    fn pool(size: usize) -> (DispatchPool, ResponseCache, mpsc::UnboundedReceiver<Completion>) {
        let cache = ResponseCache::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(ScriptedFetcher { calls: AtomicU32::new(0) });
        let pool = DispatchPool::spawn(size, fetcher, cache.clone(), tx).unwrap();
        (pool, cache, rx)
    }

    #[test]
    fn success_is_cached_and_reported() {
        let (pool, cache, mut rx) = pool(2);
        let job = job("/ok");
        let key = job.key.clone();
        let conn = job.connection;
        pool.submit(job).unwrap();

        let completion = rx.blocking_recv().unwrap();
        assert_eq!(completion.connection, conn);
        assert_eq!(&completion.outcome.unwrap()[..], b"body of /ok");
        assert!(cache.contains(&key));
        pool.join();
    }

    #[test]
    fn failure_is_not_cached() {
        let (pool, cache, mut rx) = pool(1);
        let job = job("/fail");
        let key = job.key.clone();
        pool.submit(job).unwrap();

        let completion = rx.blocking_recv().unwrap();
        assert!(matches!(completion.outcome, Err(FetchError::EmptyResponse)));
        assert!(!cache.contains(&key));
        pool.join();
    }

    #[test]
    fn panic_is_isolated_to_its_job() {
        let (pool, _cache, mut rx) = pool(1);
        pool.submit(job("/panic")).unwrap();
        pool.submit(job("/after")).unwrap();

        let first = rx.blocking_recv().unwrap();
        assert!(matches!(first.outcome, Err(FetchError::Panicked(ref m)) if m == "origin exploded"));
        let second = rx.blocking_recv().unwrap();
        assert!(second.outcome.is_ok());
        pool.join();
    }

    #[test]
    fn saturated_pool_queues_everything() {
        let (pool, cache, mut rx) = pool(1);
        for i in 0..10 {
            pool.submit(job(&format!("/{}", i))).unwrap();
        }
        for _ in 0..10 {
            assert!(rx.blocking_recv().unwrap().outcome.is_ok());
        }
        assert_eq!(cache.len(), 10);
        pool.join();
    }

    #[test]
    fn closed_pool_returns_the_job() {
        let (mut pool, _cache, _rx) = pool(1);
        pool.close();
        match pool.submit(job("/late")) {
            Err(DispatchError::Closed(returned)) => assert_eq!(returned.target.path, "/late"),
            Ok(()) => panic!("closed pool accepted a job"),
        }
        assert_eq!(pool.in_flight(), 0);
        pool.join();
    }

    #[test]
    fn queued_jobs_finish_after_close() {
        let (mut pool, cache, mut rx) = pool(1);
        for i in 0..3 {
            pool.submit(job(&format!("/q{}", i))).unwrap();
        }
        pool.close();
        pool.join();

        for _ in 0..3 {
            assert!(rx.blocking_recv().is_some());
        }
        assert_eq!(cache.len(), 3);
    }
}
