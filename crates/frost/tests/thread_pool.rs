// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread pool dispatch seen from handlers and submitting threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use frost::thread_pool::{
    AsyncCompletion, AsyncStart, EventHandler, SocketOperation, ThreadPool, ThreadPoolConfig,
    ThreadPoolCurrent,
};
use frost::Result;

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Handler whose waits complete on demand and whose `message` can be held
/// open until the test releases it.
struct TestHandler {
    waiting: Mutex<Vec<AsyncCompletion>>,
    gate: Option<Receiver<()>>,
    signal_io_completed: bool,
    serviced: Mutex<Vec<SocketOperation>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
    pool_name: Mutex<String>,
}

impl TestHandler {
    fn new(gate: Option<Receiver<()>>, signal_io_completed: bool) -> Arc<Self> {
        Arc::new(Self {
            waiting: Mutex::new(Vec::new()),
            gate,
            signal_io_completed,
            serviced: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            pool_name: Mutex::new(String::new()),
        })
    }

    fn waiting_for(&self, op: SocketOperation) -> usize {
        self.waiting.lock().iter().filter(|c| c.operation() == op).count()
    }

    /// Complete the most recent wait for `op`.
    fn complete(&self, op: SocketOperation) -> bool {
        let completion = {
            let mut waiting = self.waiting.lock();
            let index = waiting.iter().rposition(|c| c.operation() == op);
            index.map(|i| waiting.remove(i))
        };
        match completion {
            Some(c) => {
                c.complete();
                true
            }
            None => false,
        }
    }

    fn serviced(&self, op: SocketOperation) -> usize {
        self.serviced.lock().iter().filter(|&&o| o == op).count()
    }
}

impl EventHandler for TestHandler {
    fn message(&self, current: &mut ThreadPoolCurrent<'_>) {
        if let Some(op) = current.operation() {
            self.serviced.lock().push(op);
        }
        *self.pool_name.lock() = current.pool_name().to_owned();
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if self.signal_io_completed {
            current.io_completed();
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(WAIT);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn finished(&self, _current: &mut ThreadPoolCurrent<'_>) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn start_async(&self, _op: SocketOperation, completion: AsyncCompletion) -> Result<AsyncStart> {
        self.waiting.lock().push(completion);
        Ok(AsyncStart::Pending)
    }

    fn finish_async(&self, _op: SocketOperation) -> Result<bool> {
        Ok(true)
    }

    fn description(&self) -> String {
        "test handler".to_owned()
    }
}

fn as_handler(handler: &Arc<TestHandler>) -> Arc<dyn EventHandler> {
    handler.clone()
}

#[test]
fn test_io_completed_lets_next_event_run_concurrently() {
    init_logging();
    let config = ThreadPoolConfig::new("concurrent").with_size(1).with_size_max(4);
    let pool = ThreadPool::new(config).expect("pool");
    let (release, gate) = unbounded();
    let test = TestHandler::new(Some(gate), true);
    let handler = as_handler(&test);

    pool.register(&handler, SocketOperation::Read).expect("register");
    assert!(wait_until(|| test.waiting_for(SocketOperation::Read) == 1));

    assert!(test.complete(SocketOperation::Read));
    // The first message is still running, yet the next wait is armed.
    assert!(wait_until(|| test.active.load(Ordering::SeqCst) == 1));
    assert!(wait_until(|| test.waiting_for(SocketOperation::Read) == 1));

    assert!(test.complete(SocketOperation::Read));
    assert!(wait_until(|| test.active.load(Ordering::SeqCst) == 2));
    assert_eq!(test.peak.load(Ordering::SeqCst), 2);
    assert!(pool.thread_count() >= 2);
    assert_eq!(*test.pool_name.lock(), "concurrent");

    drop(release);
    assert!(wait_until(|| test.active.load(Ordering::SeqCst) == 0));
    pool.finish(&handler).expect("finish");
    assert!(wait_until(|| test.finished.load(Ordering::SeqCst) == 1));
    assert_eq!(test.serviced(SocketOperation::Read), 2);
}

#[test]
fn test_serialized_pool_waits_for_message_to_return() {
    init_logging();
    let config = ThreadPoolConfig::new("serial")
        .with_size(2)
        .with_size_max(4)
        .with_serialize(true);
    let pool = ThreadPool::new(config).expect("pool");
    let (release, gate) = unbounded::<()>();
    let test = TestHandler::new(Some(gate), true);
    let handler = as_handler(&test);

    pool.register(&handler, SocketOperation::Read).expect("register");
    assert!(wait_until(|| test.waiting_for(SocketOperation::Read) == 1));

    for round in 1..=3 {
        assert!(test.complete(SocketOperation::Read));
        assert!(wait_until(|| test.serviced(SocketOperation::Read) == round));
        // io_completed does not re-arm the wait while message runs.
        thread::sleep(Duration::from_millis(30));
        assert_eq!(test.waiting_for(SocketOperation::Read), 0);

        release.send(()).expect("release");
        assert!(wait_until(|| test.waiting_for(SocketOperation::Read) == 1));
    }
    assert_eq!(test.peak.load(Ordering::SeqCst), 1);

    pool.finish(&handler).expect("finish");
    assert!(wait_until(|| test.finished.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_read_and_write_are_dispatched_independently() {
    init_logging();
    let pool = ThreadPool::new(ThreadPoolConfig::new("duplex").with_size_max(2)).expect("pool");
    let test = TestHandler::new(None, false);
    let handler = as_handler(&test);

    pool.register(&handler, SocketOperation::Read).expect("read");
    pool.register(&handler, SocketOperation::Write).expect("write");
    assert!(wait_until(|| {
        test.waiting_for(SocketOperation::Read) == 1 && test.waiting_for(SocketOperation::Write) == 1
    }));

    assert!(test.complete(SocketOperation::Write));
    assert!(wait_until(|| test.serviced(SocketOperation::Write) == 1));
    assert_eq!(test.serviced(SocketOperation::Read), 0);
    assert!(wait_until(|| test.waiting_for(SocketOperation::Write) == 1));

    // Dropping interest in writes leaves reads running; the abandoned
    // write wait completing late is ignored.
    pool.unregister(&handler, SocketOperation::Write);
    assert!(test.complete(SocketOperation::Write));
    assert!(test.complete(SocketOperation::Read));
    assert!(wait_until(|| test.serviced(SocketOperation::Read) == 1));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(test.serviced(SocketOperation::Write), 1);
    assert_eq!(test.finished.load(Ordering::SeqCst), 0);

    pool.finish(&handler).expect("finish");
    assert!(wait_until(|| test.finished.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_work_submitted_from_many_threads() {
    init_logging();
    let config = ThreadPoolConfig::new("fan-in").with_size(2).with_size_max(6);
    let pool = ThreadPool::new(config).expect("pool");
    let done = Arc::new(AtomicUsize::new(0));
    let (tx, rx): (Sender<usize>, Receiver<usize>) = unbounded();

    let submitters: Vec<_> = (0..8)
        .map(|t| {
            let handle = pool.handle();
            let done = Arc::clone(&done);
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    let done = Arc::clone(&done);
                    let tx = tx.clone();
                    handle
                        .execute(move || {
                            done.fetch_add(1, Ordering::SeqCst);
                            let _ = tx.send(t * 100 + i);
                        })
                        .expect("submit");
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().expect("submitter");
    }
    drop(tx);

    let mut seen: Vec<usize> = (0..800).map(|_| rx.recv_timeout(WAIT).expect("work ran")).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..800).collect::<Vec<_>>());
    assert_eq!(done.load(Ordering::SeqCst), 800);
    assert!(pool.thread_count() <= 6);

    pool.destroy();
    assert!(pool.handle().execute(|| {}).is_err());
}
