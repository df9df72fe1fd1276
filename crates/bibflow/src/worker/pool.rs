use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;

type Handler<J, R> = Arc<dyn Fn(J) -> R + Send + Sync>;

/// Fixed-size pool of threads applying one handler to sequenced jobs.
pub struct WorkerPool<J, R> {
    job_sender: Sender<(usize, J)>,
    result_receiver: Receiver<(usize, R)>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static, R: Send + 'static> WorkerPool<J, R> {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new<F>(worker_count: usize, handler: F) -> Self
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<(usize, J)>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<(usize, R)>(worker_count * 2);
        let handler: Handler<J, R> = Arc::new(handler);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let worker_handler = Arc::clone(&handler);
            workers.push(thread::spawn(move || {
                run_worker(worker_id, job_rx, result_tx, worker_handler)
            }));
        }

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
        }
    }

    pub fn submit(&self, sequence: usize, job: J) -> Result<(), WorkerError> {
        self.job_sender
            .send((sequence, job))
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn recv_result(&self) -> Option<(usize, R)> {
        self.result_receiver.recv().ok()
    }

    /// Closes the job queue and joins every worker.
    pub fn wait(self) -> Result<(), WorkerError> {
        drop(self.job_sender);
        join_all(self.workers)
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) -> Result<(), WorkerError> {
    let mut result = Ok(());
    for (i, worker) in workers.into_iter().enumerate() {
        if let Err(e) = worker.join() {
            error!("Worker {} panicked: {:?}", i, e);
            result = Err(WorkerError::Panicked(i));
        } else {
            debug!("Worker {} finished", i);
        }
    }
    result
}

fn run_worker<J, R>(
    worker_id: usize,
    job_receiver: Receiver<(usize, J)>,
    result_sender: Sender<(usize, R)>,
    handler: Handler<J, R>,
) {
    debug!("Worker {} started", worker_id);

    for (sequence, job) in job_receiver.iter() {
        let result = handler(job);
        if result_sender.send((sequence, result)).is_err() {
            error!("Worker {} failed to send result", worker_id);
            break;
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs `jobs` on `worker_count` threads and hands results to `on_result`
/// in job order, whatever order they complete in.
pub fn run_ordered<J, R, F, S>(
    worker_count: usize,
    jobs: Vec<J>,
    handler: F,
    mut on_result: S,
) -> Result<(), WorkerError>
where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> R + Send + Sync + 'static,
    S: FnMut(R),
{
    let total = jobs.len();
    let WorkerPool {
        job_sender,
        result_receiver,
        workers,
    } = WorkerPool::new(worker_count, handler);

    // Feed from a separate thread so a full result queue cannot block submission.
    let feeder = thread::spawn(move || {
        for (sequence, job) in jobs.into_iter().enumerate() {
            if job_sender.send((sequence, job)).is_err() {
                break;
            }
        }
    });

    let mut buffered = BTreeMap::new();
    let mut next = 0;
    let mut delivered = 0;
    for (sequence, result) in result_receiver.iter() {
        buffered.insert(sequence, result);
        while let Some(result) = buffered.remove(&next) {
            on_result(result);
            next += 1;
            delivered += 1;
        }
    }
    // A job lost to a panicked worker leaves a gap; later results still count.
    for (_, result) in std::mem::take(&mut buffered) {
        on_result(result);
        delivered += 1;
    }

    feeder.join().map_err(|_| WorkerError::ChannelClosed)?;
    join_all(workers)?;

    if delivered < total {
        return Err(WorkerError::ChannelClosed);
    }
    Ok(())
}
