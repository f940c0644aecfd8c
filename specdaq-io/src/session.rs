//! Threaded acquisition session.
//!
//! A session owns one queue pair and three workers:
//!
//! ```text
//! SpillSource -> [producer] -> raw queue -> [parser] -> decoded queue -> [sink] -> Sinks
//! ```
//!
//! Stopping is cooperative: the producer checks the stop flag between
//! spills, the parser before each decode. Raw spills still queued when the
//! flag is raised are discarded, decoded ones are still delivered, and every
//! sink is flushed before the sink worker exits.

use crate::config::PipelineConfig;
use crate::queue::BoundedQueue;
use crate::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use specdaq_core::Spill;
use specdaq_pixie::{decode_spill, DecoderConfig};
use specdaq_sink::Sink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Supplier of raw or statistics spills, in acquisition order.
pub trait SpillSource: Send {
    /// Next spill, or `None` once the acquisition has ended.
    fn next_spill(&mut self) -> Option<Spill>;
}

impl SpillSource for std::vec::IntoIter<Spill> {
    fn next_spill(&mut self) -> Option<Spill> {
        self.next()
    }
}

/// Totals reported when a session ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionSummary {
    /// Spills the producer queued.
    pub produced: usize,
    /// Raw spills dropped after a stop request.
    pub discarded: usize,
    /// Spills delivered to the sinks.
    pub delivered: usize,
    /// Hits decoded.
    pub hits: usize,
    /// Wall time from start to join.
    pub elapsed: Duration,
    /// True when the session ended through [`Session::stop`].
    pub stopped: bool,
}

#[derive(Default)]
struct ParserCounts {
    hits: usize,
    discarded: usize,
}

/// A running acquisition.
///
/// Dropping a session that was not joined stops it and waits for the
/// workers.
pub struct Session {
    stop: Arc<AtomicBool>,
    raw: Arc<BoundedQueue<Spill>>,
    decoded: Arc<BoundedQueue<Spill>>,
    producer: Option<JoinHandle<usize>>,
    parser: Option<JoinHandle<ParserCounts>>,
    sink: Option<JoinHandle<usize>>,
    started: Instant,
}

impl Session {
    /// Validates `decoder` and starts the workers.
    ///
    /// Sinks must already be initialized; the session only feeds and
    /// flushes them.
    ///
    /// # Errors
    /// Returns an error if the decoder configuration is invalid or a worker
    /// thread cannot be spawned. Workers already running are stopped.
    pub fn start<S>(
        source: S,
        decoder: DecoderConfig,
        sinks: Vec<Arc<dyn Sink>>,
        config: &PipelineConfig,
    ) -> Result<Self>
    where
        S: SpillSource + 'static,
    {
        decoder.validate()?;
        let depth = config.effective_queue_depth();
        let mut session = Self {
            stop: Arc::new(AtomicBool::new(false)),
            raw: Arc::new(BoundedQueue::new(depth)),
            decoded: Arc::new(BoundedQueue::new(depth)),
            producer: None,
            parser: None,
            sink: None,
            started: Instant::now(),
        };
        let sink_count = sinks.len();

        session.sink = Some(spawn_sink(&session.decoded, sinks)?);
        session.parser = Some(spawn_parser(
            &session.raw,
            &session.decoded,
            &session.stop,
            decoder,
        )?);
        session.producer = Some(spawn_producer(&session.raw, &session.stop, source)?);

        log::info!("session started: {sink_count} sinks, queue depth {depth}");
        Ok(session)
    }

    /// Runs a session to completion.
    ///
    /// # Errors
    /// Returns an error if the session cannot start or a worker fails.
    pub fn run<S>(
        source: S,
        decoder: DecoderConfig,
        sinks: Vec<Arc<dyn Sink>>,
        config: &PipelineConfig,
    ) -> Result<SessionSummary>
    where
        S: SpillSource + 'static,
    {
        Self::start(source, decoder, sinks, config)?.join()
    }

    /// Requests a stop. Idempotent.
    ///
    /// Spills already decoded still reach the sinks; use [`Self::join`] to
    /// wait for them.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            log::info!("session stop requested");
        }
        self.raw.close();
    }

    /// True when a stop has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// True until every worker has exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sink.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spills waiting in the raw and decoded queues.
    #[must_use]
    pub fn backlog(&self) -> (usize, usize) {
        (self.raw.len(), self.decoded.len())
    }

    /// Waits for the workers and returns the totals.
    ///
    /// # Errors
    /// Returns [`Error::Worker`] if a worker panicked.
    pub fn join(mut self) -> Result<SessionSummary> {
        let summary = self.wait()?;
        log::info!(
            "session finished in {:.3}s: {} spills produced, {} delivered, {} discarded, {} hits",
            summary.elapsed.as_secs_f64(),
            summary.produced,
            summary.delivered,
            summary.discarded,
            summary.hits
        );
        Ok(summary)
    }

    fn wait(&mut self) -> Result<SessionSummary> {
        let produced = join_worker(self.producer.take(), "producer");
        // A producer that panicked never closed the raw queue.
        self.raw.close();
        let parsed = join_worker(self.parser.take(), "parser");
        self.decoded.close();
        let delivered = join_worker(self.sink.take(), "sink");

        let produced = produced?.unwrap_or(0);
        let parsed = parsed?.unwrap_or_default();
        let delivered = delivered?.unwrap_or(0);
        Ok(SessionSummary {
            produced,
            discarded: parsed.discarded,
            delivered,
            hits: parsed.hits,
            elapsed: self.started.elapsed(),
            stopped: self.is_stopping(),
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.producer.is_none() && self.parser.is_none() && self.sink.is_none() {
            return;
        }
        self.stop();
        if let Err(e) = self.wait() {
            log::warn!("session dropped with a failed worker: {e}");
        }
    }
}

fn join_worker<T>(handle: Option<JoinHandle<T>>, name: &'static str) -> Result<Option<T>> {
    match handle {
        Some(handle) => handle.join().map(Some).map_err(|_| Error::Worker(name)),
        None => Ok(None),
    }
}

fn spawn_producer<S>(
    raw: &Arc<BoundedQueue<Spill>>,
    stop: &Arc<AtomicBool>,
    mut source: S,
) -> Result<JoinHandle<usize>>
where
    S: SpillSource + 'static,
{
    let raw = Arc::clone(raw);
    let stop = Arc::clone(stop);
    let handle = thread::Builder::new()
        .name("specdaq-producer".to_string())
        .spawn(move || {
            let mut produced = 0;
            while !stop.load(Ordering::Acquire) {
                let Some(spill) = source.next_spill() else {
                    break;
                };
                if raw.enqueue(spill).is_err() {
                    break;
                }
                produced += 1;
            }
            raw.close();
            produced
        })?;
    Ok(handle)
}

fn spawn_parser(
    raw: &Arc<BoundedQueue<Spill>>,
    decoded: &Arc<BoundedQueue<Spill>>,
    stop: &Arc<AtomicBool>,
    decoder: DecoderConfig,
) -> Result<JoinHandle<ParserCounts>> {
    let raw = Arc::clone(raw);
    let decoded = Arc::clone(decoded);
    let stop = Arc::clone(stop);
    let handle = thread::Builder::new()
        .name("specdaq-parser".to_string())
        .spawn(move || {
            let mut counts = ParserCounts::default();
            while let Some(mut spill) = raw.dequeue() {
                if stop.load(Ordering::Acquire) {
                    counts.discarded += 1;
                    continue;
                }
                counts.hits += decode_spill(&mut spill, &decoder);
                if decoded.enqueue(spill).is_err() {
                    counts.discarded += 1;
                }
            }
            decoded.close();
            counts
        })?;
    Ok(handle)
}

fn spawn_sink(
    decoded: &Arc<BoundedQueue<Spill>>,
    sinks: Vec<Arc<dyn Sink>>,
) -> Result<JoinHandle<usize>> {
    let decoded = Arc::clone(decoded);
    let handle = thread::Builder::new()
        .name("specdaq-sink".to_string())
        .spawn(move || {
            let mut delivered = 0;
            while let Some(spill) = decoded.dequeue() {
                for sink in &sinks {
                    sink.push_spill(&spill);
                }
                delivered += 1;
            }
            for sink in &sinks {
                sink.flush();
            }
            delivered
        })?;
    Ok(handle)
}
