// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Submission queue and dispatcher
//!
//! Client connections are not safe for concurrent use, so every blocking call
//! of one client runs on a single dispatcher thread.
//!
//! - The queue is an unbounded channel with one consumer.
//! - The thread is spawned lazily on the first enqueue and exits when the
//!   sender is dropped (`stop`).
//! - A flush pass adds everything queued so far to the connection and then
//!   calls `run_tasks` once, which flushes all added tasks. Tasks enqueued
//!   while a pass is pending ride along with it.
//!
//! ```text
//!     enqueue ──▶ [ t1 t2 t3 ] ──recv──▶ pass: add t1, add t2, add t3
//!                                              run_tasks
//! ```
//!
//! The status of `run_tasks` is not propagated: every task learns its own
//! outcome through its callbacks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use async_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::client::{SharedConnection, TaskContext};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::log_limit::LogOnce;
use crate::marshal;

static NEXT_DISPATCHER: AtomicUsize = AtomicUsize::new(1);

/// What `enqueue` did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The task scheduled a new flush pass.
    NewPass,
    /// A pass was already pending and will pick the task up.
    Batched,
}

struct Shared {
    connection: SharedConnection,
    // held across the send in `enqueue` and across the drain of a pass
    flush_scheduled: Mutex<bool>,
    stopped: AtomicBool,
    passes: AtomicUsize,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    tx: Mutex<Option<Sender<Arc<TaskContext>>>>,
    rx: Receiver<Arc<TaskContext>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    start_error: LogOnce,
    config: BridgeConfig,
}

impl Dispatcher {
    pub fn new(connection: SharedConnection, config: &BridgeConfig) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                connection,
                flush_scheduled: Mutex::new(false),
                stopped: AtomicBool::new(false),
                passes: AtomicUsize::new(0),
            }),
            tx: Mutex::new(Some(tx)),
            rx,
            thread: Mutex::new(None),
            start_error: LogOnce::new(),
            config: config.clone(),
        }
    }

    pub fn enqueue(&self, task: Arc<TaskContext>) -> Result<Enqueued> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return Err(BridgeError::DispatcherStopped);
        };
        self.ensure_thread()?;

        let mut scheduled = self
            .shared
            .flush_scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tx.try_send(task).map_err(|_| BridgeError::DispatcherStopped)?;
        let new_pass = !*scheduled;
        *scheduled = true;
        drop(scheduled);
        Ok(if new_pass {
            Enqueued::NewPass
        } else {
            Enqueued::Batched
        })
    }

    fn ensure_thread(&self) -> Result<()> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() {
            return Ok(());
        }

        let n = NEXT_DISPATCHER.fetch_add(1, Ordering::Relaxed);
        let builder = self
            .config
            .thread_builder("dispatch", n, self.config.dispatcher_stack_size);
        let shared = self.shared.clone();
        let rx = self.rx.clone();
        match builder.spawn(move || dispatch_loop(shared, rx)) {
            Ok(handle) => {
                *thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.start_error
                    .error(format_args!("unable to start dispatcher thread: {}", e));
                Err(BridgeError::ThreadStart {
                    what: "dispatcher",
                    source: e,
                })
            }
        }
    }

    /// Number of flush passes run so far.
    pub fn passes(&self) -> usize {
        self.shared.passes.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Closes the queue. Does not wait for a running pass; tasks still queued
    /// are abandoned.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if tx.is_some() {
            debug!("dispatcher stopped");
        }
        drop(tx);
        self.start_error.reset();
        abandon(drain(&self.rx));
    }

    /// Stops the dispatcher and joins its thread.
    pub fn wait_until_finished(&self) {
        self.stop();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }
}

fn drain(rx: &Receiver<Arc<TaskContext>>) -> Vec<Arc<TaskContext>> {
    let mut batch = Vec::new();
    while let Ok(task) = rx.try_recv() {
        batch.push(task);
    }
    batch
}

fn abandon(batch: Vec<Arc<TaskContext>>) {
    if !batch.is_empty() {
        debug!("abandoning {} queued tasks of a closed client", batch.len());
    }
    for task in batch {
        task.abandon();
    }
}

fn dispatch_loop(shared: Arc<Shared>, rx: Receiver<Arc<TaskContext>>) {
    info!("dispatcher thread running");
    while let Ok(first) = rx.recv_blocking() {
        let mut batch = vec![first];
        {
            // a task sent after this drain schedules the next pass
            let mut scheduled = shared
                .flush_scheduled
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            batch.extend(drain(&rx));
            *scheduled = false;
        }
        flush(&shared, batch);
    }

    // channel closed: the client is gone, drop its connection
    let connection = shared
        .connection
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    drop(connection);
    info!("dispatcher thread ended");
}

fn flush(shared: &Shared, batch: Vec<Arc<TaskContext>>) {
    let mut guard = shared
        .connection
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if guard.is_none() || shared.stopped.load(Ordering::Acquire) {
        drop(guard);
        abandon(batch);
        return;
    }
    let Some(connection) = guard.as_mut() else {
        return;
    };

    let mut added = 0;
    for task in batch {
        if task.is_abandoned() {
            continue;
        }
        match task.add_to(connection.as_mut()) {
            Ok(_) => added += 1,
            Err(code) => {
                warn!("task {} rejected: {}", task.handle(), code);
                marshal::reject_task(&task, code);
            }
        }
    }

    let status = connection.run_tasks();
    shared.passes.fetch_add(1, Ordering::AcqRel);
    debug!("flush pass over {} tasks returned {}", added, status);
}

#[cfg(test)]
mod tests;
