//! # Disk Scheduler
//!
//! Serializes page I/O onto a single background worker. Callers enqueue
//! read/write requests over an MPSC channel; the worker executes them in
//! FIFO order against the [`DiskManager`] and fulfills each request's
//! completion exactly once.
//!
//! ```text
//! Thread 1 ──┐
//! Thread 2 ──┼──► mpsc channel ──► worker ──► DiskManager ──► completion
//! Thread 3 ──┘
//! ```
//!
//! ## Completion Protocol
//!
//! Every request carries a rendezvous sender; [`Completion::wait`] blocks
//! until the worker has performed the I/O. Read completions transfer an
//! owned [`PageBuf`] so the caller can move the bytes into a frame without
//! copying; write requests hand their buffer to the worker and get only a
//! result back.
//!
//! ## Shutdown
//!
//! Dropping the scheduler enqueues a `None` sentinel and joins the worker.
//! Requests enqueued before the drop are still executed; the channel
//! disconnecting without a sentinel (worker panic) surfaces as an error on
//! `schedule`.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::JoinHandle;

use eyre::{eyre, Result};

use super::disk_manager::{zeroed_page, DiskManager, PageBuf};
use crate::config::PageId;

/// A page I/O request for the background worker.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        done: SyncSender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        done: SyncSender<Result<()>>,
    },
}

/// Handle to an in-flight request. Awaiting is independent of submission
/// order; dropping a completion without waiting leaks nothing, but callers
/// that abandon an operation still owe a `wait` if they need pin counts to
/// settle (see the buffer pool).
pub struct Completion<T>(Receiver<Result<T>>);

impl<T> Completion<T> {
    /// Blocks until the worker has executed the request.
    pub fn wait(self) -> Result<T> {
        self.0
            .recv()
            .map_err(|_| eyre!("disk worker exited before completing request"))?
    }
}

pub struct DiskScheduler {
    queue: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk: DiskManager) -> Self {
        let (queue, requests) = mpsc::channel::<Option<DiskRequest>>();
        let worker = std::thread::Builder::new()
            .name("coraldb-disk".into())
            .spawn(move || Self::worker_loop(disk, requests))
            .expect("failed to spawn disk worker thread");

        Self {
            queue,
            worker: Some(worker),
        }
    }

    /// Enqueues a raw request. Prefer [`DiskScheduler::read`] and
    /// [`DiskScheduler::write`].
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.queue
            .send(Some(request))
            .map_err(|_| eyre!("disk worker is gone; request dropped"))
    }

    /// Schedules a read of `page_id`; the completion yields the page bytes.
    pub fn read(&self, page_id: PageId) -> Result<Completion<PageBuf>> {
        let (done, recv) = mpsc::sync_channel(1);
        self.schedule(DiskRequest::Read { page_id, done })?;
        Ok(Completion(recv))
    }

    /// Schedules a write of `data` to `page_id`.
    pub fn write(&self, page_id: PageId, data: PageBuf) -> Result<Completion<()>> {
        let (done, recv) = mpsc::sync_channel(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            done,
        })?;
        Ok(Completion(recv))
    }

    fn worker_loop(mut disk: DiskManager, requests: Receiver<Option<DiskRequest>>) {
        while let Ok(Some(request)) = requests.recv() {
            match request {
                DiskRequest::Read { page_id, done } => {
                    let mut buf = zeroed_page();
                    let result = disk.read_page(page_id, buf.as_mut_slice()).map(|_| buf);
                    // The receiver may have been dropped by an abandoning
                    // caller; that is not the worker's problem.
                    let _ = done.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    done,
                } => {
                    let result = disk.write_page(page_id, data.as_slice());
                    let _ = done.send(result);
                }
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.queue.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
