//! Asynchronous, sharded scheduling of disk requests.
//!
//! `DiskScheduler` accepts read/write requests and returns immediately;
//! the request carries a one-shot completion channel that resolves once the
//! I/O has been performed. Requests are routed by `page_id % num_workers`
//! to a fixed set of worker threads, so all I/O for a given page is
//! serialized in submission order while distinct pages proceed in parallel.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use tokio::sync::oneshot;

use super::DiskManager;
use crate::page::{PageData, PageId};

/// Depth of the ingress queue and of each per-worker queue. `schedule`
/// blocks only when a queue is full (backpressure).
const QUEUE_DEPTH: usize = 64;

/// Payload of a disk request.
pub enum DiskData {
    /// Owned snapshot of the page bytes to persist. Taken by the issuer
    /// under its frame lock, so workers never touch caller-side locks on
    /// the write path.
    Write(Box<[u8]>),
    /// Destination buffer for a read, shared with the issuing frame. The
    /// issuer guarantees the frame is reserved and unreferenced while the
    /// read is in flight.
    Read(Arc<RwLock<PageData>>),
}

/// A single read or write request submitted to the scheduler.
pub struct DiskRequest {
    /// The logical page being read or written.
    pub page_id: PageId,
    /// Request payload; also selects the direction of the transfer.
    pub data: DiskData,
    /// Completion signal, fulfilled exactly once with `true` on success.
    pub done: oneshot::Sender<bool>,
}

struct Shard {
    queue: SyncSender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

/// Sharded asynchronous submission surface over a [`DiskManager`].
///
/// One dispatcher thread drains the ingress queue and routes each request
/// to the shard owning its page; each shard's worker thread performs the
/// blocking I/O and fulfills the completion channel.
///
/// Dropping the scheduler enqueues shutdown sentinels behind any
/// outstanding requests, so in-flight work is drained before the threads
/// are joined.
pub struct DiskScheduler {
    ingress: SyncSender<Option<DiskRequest>>,
    dispatcher: Option<JoinHandle<()>>,
    shards: Vec<Shard>,
}

impl DiskScheduler {
    /// Spawns the dispatcher and `num_workers` worker threads over `disk`.
    ///
    /// # Panics
    ///
    /// Panics if `num_workers` is 0 or a thread cannot be spawned.
    pub fn new<D: DiskManager>(disk: Arc<D>, num_workers: usize) -> Self {
        assert!(num_workers >= 1, "disk scheduler needs at least one worker");

        let (ingress, ingress_rx) = mpsc::sync_channel(QUEUE_DEPTH);

        let mut shards = Vec::with_capacity(num_workers);
        let mut shard_queues = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let (queue, queue_rx) = mpsc::sync_channel(QUEUE_DEPTH);
            let disk = Arc::clone(&disk);
            let worker = thread::Builder::new()
                .name(format!("disk-worker-{}", i))
                .spawn(move || worker_loop(disk, queue_rx))
                .expect("failed to spawn disk worker thread");
            shard_queues.push(queue.clone());
            shards.push(Shard {
                queue,
                worker: Some(worker),
            });
        }

        let dispatcher = thread::Builder::new()
            .name("disk-dispatcher".to_string())
            .spawn(move || dispatcher_loop(ingress_rx, shard_queues))
            .expect("failed to spawn disk dispatcher thread");

        tracing::debug!(num_workers, "disk scheduler started");

        Self {
            ingress,
            dispatcher: Some(dispatcher),
            shards,
        }
    }

    /// Enqueues a request and returns immediately.
    ///
    /// The caller observes completion through the `done` channel of the
    /// request. Blocks only on queue backpressure.
    pub fn schedule(&self, request: DiskRequest) {
        self.ingress
            .send(Some(request))
            .expect("disk scheduler has shut down");
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // A sentinel behind the outstanding requests stops the dispatcher
        // once the ingress queue is drained, then each worker the same way.
        let _ = self.ingress.send(None);
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        for shard in &mut self.shards {
            let _ = shard.queue.send(None);
            if let Some(worker) = shard.worker.take() {
                let _ = worker.join();
            }
        }
        tracing::debug!("disk scheduler stopped");
    }
}

fn dispatcher_loop(
    ingress: Receiver<Option<DiskRequest>>,
    shard_queues: Vec<SyncSender<Option<DiskRequest>>>,
) {
    loop {
        match ingress.recv() {
            Ok(Some(request)) => {
                let shard = (request.page_id.page_num() as usize) % shard_queues.len();
                let _ = shard_queues[shard].send(Some(request));
            }
            Ok(None) | Err(_) => break,
        }
    }
}

fn worker_loop<D: DiskManager>(disk: Arc<D>, queue: Receiver<Option<DiskRequest>>) {
    loop {
        match queue.recv() {
            Ok(Some(request)) => {
                let result = match request.data {
                    DiskData::Write(buf) => disk.write_page(request.page_id, &buf),
                    DiskData::Read(dest) => {
                        let mut dest = dest.write();
                        disk.read_page(request.page_id, dest.as_mut_slice())
                    }
                };
                if let Err(error) = &result {
                    tracing::error!(
                        page_id = request.page_id.page_num(),
                        %error,
                        "disk request failed"
                    );
                }
                // The issuer may have given up waiting; that is its choice.
                let _ = request.done.send(result.is_ok());
            }
            Ok(None) | Err(_) => break,
        }
    }
}
