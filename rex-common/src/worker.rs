//  Copyright 2025 Rex Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::warn;

/// Wakes a [`Worker`] ahead of its next interval tick.
#[derive(Debug, Clone)]
pub struct Waker {
    tx: Sender<()>,
}

impl Waker {
    /// Request an early tick. Coalesces with a pending wake; never blocks.
    pub fn wake(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => {}
        }
    }
}

/// A named background thread ticking on an interval.
///
/// The thread runs `tick` once per interval, or earlier when woken, and
/// observes the stop flag at the head of every loop iteration. Panics from
/// `tick` are caught at the loop boundary and logged, so one bad sweep does
/// not kill the worker.
pub struct Worker {
    stop: Arc<AtomicBool>,
    waker: Waker,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: &str, interval: Duration, tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let name = name.to_owned();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || run(&name, interval, rx, stop, tick))
                .expect("spawn background worker thread")
        };
        Self {
            stop,
            waker: Waker { tx },
            handle: Some(handle),
        }
    }

    pub fn waker(&self) -> Waker {
        self.waker.clone()
    }

    /// Signal the thread to exit and wait for it.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.waker.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<F>(name: &str, interval: Duration, rx: Receiver<()>, stop: Arc<AtomicBool>, mut tick: F)
where
    F: FnMut(),
{
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
        if stop.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = catch_unwind(AssertUnwindSafe(&mut tick)) {
            let msg = err
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| err.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("background worker {} tick panicked: {}", name, msg);
        }
    }
}
