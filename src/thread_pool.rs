use std::thread;

/// Abstraction over a threadpool that can spawn tasks. The translation
/// dispatcher (C3) submits one task per paragraph template; bounded
/// parallelism falls naturally out of a fixed-size worker pool rather than
/// any submission-side limiting.
use flume::{Receiver, Sender};

pub trait ThreadPool: Send + Sync + 'static {
    fn spawn(&self, task: impl FnOnce() + Send + 'static);
}

trait FnBox: Send + 'static {
    fn call(self: Box<Self>);
}

impl<T> FnBox for T
where
    T: FnOnce() + Send + 'static,
{
    fn call(self: Box<Self>) {
        (*self)()
    }
}

/// A basic thread pool: `num_threads` persistent OS threads pulling from a
/// shared unbounded queue. Concurrency is capped by the number of workers,
/// not by any gate on submission.
pub struct BasicThreadPool {
    tasks: Sender<Box<dyn FnBox>>,
}

impl BasicThreadPool {
    pub fn new(num_threads: usize) -> Self {
        let (sender, receiver) = flume::unbounded::<Box<dyn FnBox>>();

        for _ in 0..num_threads {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name("pagetranslate-worker".into())
                .spawn(move || {
                    for task in receiver {
                        task.call();
                    }
                })
                .expect("failed to spawn worker thread");
        }

        Self { tasks: sender }
    }
}

impl ThreadPool for BasicThreadPool {
    fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks
            .send(Box::new(task))
            .expect("thread pool has shut down")
    }
}
