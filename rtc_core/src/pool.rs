//! Bounded asynchronous compression with FIFO completion.
//!
//! A pool owns a fixed arena of job slots and a worker thread pool. Every
//! submission copies the block into a free slot's private buffer and hands it
//! to a worker; completed jobs are written back strictly in submission order
//! by whoever drains the queue, which is always the writer thread.
//!
//! ```text
//! submit ─▶ [slot 2] [slot 0] [slot 1] ─▶ drain head ─▶ owning sink
//!            queue head ──────────────▶
//! ```
//!
//! The slot arena is the only state shared with workers. Its lock is taken
//! to hand a source buffer out and to publish a result, never around the
//! codec call itself.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::codec::{Codec, CodecClass, CodecParams};
use crate::error::{Error, Result};
use crate::options::WriterOptions;
use crate::sink::{JobOutcome, SharedSink};

enum SlotPhase {
    Idle,
    Running,
    /// Terminal state; failures are ready too.
    Ready(JobOutcome),
}

struct SlotState {
    phase: SlotPhase,
    /// Private source buffer, kept across jobs to reuse its allocation.
    source: Vec<u8>,
}

/// Slot states plus the pool-wide completion event.
struct SlotArena {
    slots: Mutex<Vec<SlotState>>,
    completed: Condvar,
}

impl SlotArena {
    fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|_| SlotState {
                phase: SlotPhase::Idle,
                source: Vec::new(),
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            completed: Condvar::new(),
        }
    }

    /// Mark `slot` running and lend out its source buffer.
    fn begin(&self, slot: usize) -> Vec<u8> {
        let mut slots = self.slots.lock();
        let state = &mut slots[slot];
        state.phase = SlotPhase::Running;
        std::mem::take(&mut state.source)
    }

    /// Called by workers: return the source buffer and publish the result.
    fn complete(&self, slot: usize, source: Vec<u8>, outcome: JobOutcome) {
        let mut slots = self.slots.lock();
        let state = &mut slots[slot];
        state.source = source;
        state.phase = SlotPhase::Ready(outcome);
        self.completed.notify_all();
    }

    /// Consume the result of `slot` if it is ready, leaving the slot idle.
    fn try_take_completed(&self, slot: usize) -> Option<JobOutcome> {
        let mut slots = self.slots.lock();
        Self::take_ready(&mut slots[slot])
    }

    /// Block until `slot` is ready, then consume its result.
    fn wait_completed(&self, slot: usize) -> JobOutcome {
        let mut slots = self.slots.lock();
        loop {
            if let Some(outcome) = Self::take_ready(&mut slots[slot]) {
                return outcome;
            }
            self.completed.wait(&mut slots);
        }
    }

    fn take_ready(state: &mut SlotState) -> Option<JobOutcome> {
        match std::mem::replace(&mut state.phase, SlotPhase::Idle) {
            SlotPhase::Ready(outcome) => Some(outcome),
            other => {
                state.phase = other;
                None
            }
        }
    }
}

/// Which dataset and block a busy slot belongs to.
struct Ticket {
    sink: SharedSink,
    block_id: u64,
}

/// Writer-side bookkeeping: the FIFO of busy slots and their owners.
struct Dispatch {
    queue: VecDeque<usize>,
    tickets: Vec<Option<Ticket>>,
}

struct PoolInner {
    workers: rayon::ThreadPool,
    arena: Arc<SlotArena>,
    dispatch: Mutex<Dispatch>,
}

/// One block handed to [`CompressionJobPool::submit`].
pub struct CompressionRequest<'a> {
    pub sink: &'a SharedSink,
    pub codec: &'a Arc<dyn Codec>,
    pub params: CodecParams,
    pub block_id: u64,
    pub raw: &'a [u8],
}

/// Shared handle to a compression pool. Clones refer to the same slots and
/// workers, which is how sibling datasets (an image and its mask) share one
/// FIFO.
#[derive(Clone)]
pub struct CompressionJobPool {
    inner: Arc<PoolInner>,
}

impl CompressionJobPool {
    /// Build a pool with `threads` workers and `slots` reusable job slots.
    pub fn new(threads: usize, slots: usize) -> Result<Self> {
        if threads == 0 || slots == 0 {
            return Err(Error::Pool(format!(
                "need at least one thread and one slot (got {threads} threads, {slots} slots)"
            )));
        }
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rtc-compress-{i}"))
            .build()
            .map_err(|e| Error::Pool(format!("failed to build worker pool: {e}")))?;
        debug!(threads, slots, "compression pool started");
        Ok(Self {
            inner: Arc::new(PoolInner {
                workers,
                arena: Arc::new(SlotArena::new(slots)),
                dispatch: Mutex::new(Dispatch {
                    queue: VecDeque::with_capacity(slots),
                    tickets: (0..slots).map(|_| None).collect(),
                }),
            }),
        })
    }

    /// Pool described by `options`, or `None` when encoding stays synchronous.
    pub fn from_options(options: &WriterOptions) -> Result<Option<Self>> {
        if options.num_threads == 0 {
            return Ok(None);
        }
        Self::new(options.num_threads, options.effective_job_slots()).map(Some)
    }

    /// Whether blocks for `codec` should go through a pool at all.
    ///
    /// Storing raw bytes gains nothing from a worker unless a layout claim
    /// has to see blocks in the same order as compressed ones.
    pub fn accepts(codec: &dyn Codec, layout_claims: bool) -> bool {
        if !codec.supports_async() {
            return false;
        }
        !(codec.class() == CodecClass::Store && !layout_claims)
    }

    pub fn slot_count(&self) -> usize {
        self.inner.dispatch.lock().tickets.len()
    }

    /// Jobs submitted but not yet drained.
    pub fn in_flight(&self) -> usize {
        self.inner.dispatch.lock().queue.len()
    }

    /// Copy `request.raw` into a free slot and start compressing it.
    ///
    /// Returns once the job is queued. When every slot is busy the oldest
    /// job is drained first, which may block on its worker.
    pub fn submit(&self, request: CompressionRequest<'_>) {
        let mut dispatch = self.inner.dispatch.lock();

        // Write back whatever is already finished at the head.
        while self.try_drain_front(&mut dispatch) {}

        let slot = loop {
            if let Some(free) = dispatch.tickets.iter().position(Option::is_none) {
                break free;
            }
            self.drain_front(&mut dispatch);
        };

        let mut source = self.inner.arena.begin(slot);
        source.clear();
        source.extend_from_slice(request.raw);

        dispatch.tickets[slot] = Some(Ticket {
            sink: Arc::clone(request.sink),
            block_id: request.block_id,
        });
        dispatch.queue.push_back(slot);

        let arena = Arc::clone(&self.inner.arena);
        let codec = Arc::clone(request.codec);
        let params = request.params;
        let block_id = request.block_id;
        debug!(block = block_id, slot, queued = dispatch.queue.len(), "submitted compression job");

        self.inner.workers.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| codec.encode_block(&source, &params)))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("codec panicked")));
            let outcome = match outcome {
                Ok(encoded) if encoded.is_empty() => Err(anyhow::anyhow!("codec produced no output")),
                other => other,
            };
            if let Err(e) = &outcome {
                error!(block = block_id, codec = codec.name(), error = %e, "compression job failed");
            }
            arena.complete(slot, source, outcome);
        });
    }

    /// Drain the queue head if it has already completed. Never blocks on a worker.
    pub fn try_drain_head(&self) -> bool {
        let mut dispatch = self.inner.dispatch.lock();
        self.try_drain_front(&mut dispatch)
    }

    /// Drain the queue head, waiting for it if needed. Returns `false` when
    /// nothing was queued.
    pub fn drain_head(&self) -> bool {
        let mut dispatch = self.inner.dispatch.lock();
        self.drain_front(&mut dispatch)
    }

    /// Drain every queued job, in FIFO order, whichever dataset owns it.
    pub fn drain_all(&self) -> usize {
        let mut dispatch = self.inner.dispatch.lock();
        let mut drained = 0;
        while self.drain_front(&mut dispatch) {
            drained += 1;
        }
        drained
    }

    /// Drain up to and including the most recent job for `block_id` of
    /// `sink`. Foreign jobs ahead of it are drained first to keep FIFO order.
    pub fn wait_for_block(&self, sink: &SharedSink, block_id: u64) -> usize {
        let mut dispatch = self.inner.dispatch.lock();
        let Some(pos) = Self::last_position(&dispatch, sink, block_id) else {
            return 0;
        };
        for _ in 0..=pos {
            self.drain_front(&mut dispatch);
        }
        pos + 1
    }

    /// Whether a job for `block_id` of `sink` is still queued.
    pub fn is_queued(&self, sink: &SharedSink, block_id: u64) -> bool {
        let dispatch = self.inner.dispatch.lock();
        Self::last_position(&dispatch, sink, block_id).is_some()
    }

    fn last_position(dispatch: &Dispatch, sink: &SharedSink, block_id: u64) -> Option<usize> {
        dispatch.queue.iter().rposition(|&slot| {
            dispatch.tickets[slot]
                .as_ref()
                .is_some_and(|t| t.block_id == block_id && Arc::ptr_eq(&t.sink, sink))
        })
    }

    fn try_drain_front(&self, dispatch: &mut Dispatch) -> bool {
        let Some(&slot) = dispatch.queue.front() else {
            return false;
        };
        match self.inner.arena.try_take_completed(slot) {
            Some(outcome) => {
                dispatch.queue.pop_front();
                Self::finish(dispatch, slot, outcome);
                true
            }
            None => false,
        }
    }

    fn drain_front(&self, dispatch: &mut Dispatch) -> bool {
        let Some(slot) = dispatch.queue.pop_front() else {
            return false;
        };
        let outcome = self.inner.arena.wait_completed(slot);
        Self::finish(dispatch, slot, outcome);
        true
    }

    /// Release `slot` and write its result to the owning dataset. The
    /// dispatch lock stays held so writes reach sinks in queue order.
    fn finish(dispatch: &mut Dispatch, slot: usize, outcome: JobOutcome) {
        let Some(ticket) = dispatch.tickets[slot].take() else {
            return;
        };
        let mut sink = ticket.sink.lock();
        if let Err(e) = sink.commit(ticket.block_id, outcome) {
            debug!(dataset = %sink.label(), block = ticket.block_id, error = %e, "drained job was not written");
        }
    }
}
