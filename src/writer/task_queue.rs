use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, warn};
use crate::core::error::{Error, ErrorKind, Result};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run { name: String, job: Job<S> },
    Pause { parked: Sender<()>, resume: Receiver<()> },
    Shutdown,
}

/// Runs every mutation on one executor thread that owns the writer state.
///
/// Tasks run in submission order, one at a time. A pause is itself a task:
/// the executor parks on it until the returned guard is dropped, so work
/// queued before the pause finishes first.
pub struct TaskQueue<S: Send + 'static> {
    name: String,
    sender: Sender<Message<S>>,
    handle: Option<JoinHandle<S>>,
}

/// Holds the executor parked. Dropping it lets queued tasks run again.
pub struct PauseGuard {
    _resume: Sender<()>,
}

impl<S: Send + 'static> TaskQueue<S> {
    pub fn new(name: &str, state: S) -> Result<Self> {
        let (sender, receiver) = unbounded::<Message<S>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::executor(receiver, state))?;

        Ok(TaskQueue {
            name: name.to_string(),
            sender,
            handle: Some(handle),
        })
    }

    fn executor(receiver: Receiver<Message<S>>, mut state: S) -> S {
        while let Ok(message) = receiver.recv() {
            match message {
                Message::Run { name, job } => {
                    debug!("Running task: {}", name);
                    job(&mut state);
                }
                Message::Pause { parked, resume } => {
                    if parked.send(()).is_ok() {
                        // Returns once the guard (the only sender) is dropped.
                        let _ = resume.recv();
                    }
                }
                Message::Shutdown => break,
            }
        }
        state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a task; the receiver yields its result once it has run.
    pub fn submit<R, F>(&self, name: &str, task: F) -> Result<Receiver<Result<R>>>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> Result<R> + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        let task_name = name.to_string();
        let job: Job<S> = Box::new(move |state: &mut S| {
            let outcome = catch_unwind(AssertUnwindSafe(|| task(state))).unwrap_or_else(|_| {
                warn!("Task {} panicked", task_name);
                Err(Error::new(ErrorKind::Internal, format!("Task {} panicked", task_name)))
            });
            let _ = result_tx.send(outcome);
        });

        self.sender
            .send(Message::Run { name: name.to_string(), job })
            .map_err(|_| self.stopped())?;
        Ok(result_rx)
    }

    /// Queue a task and wait for its result.
    pub fn run<R, F>(&self, name: &str, task: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> Result<R> + Send + 'static,
    {
        self.submit(name, task)?
            .recv()
            .map_err(|_| self.stopped())?
    }

    /// Wait for everything queued so far, then park the executor.
    pub fn pause(&self) -> Result<PauseGuard> {
        let (parked_tx, parked_rx) = bounded(1);
        let (resume_tx, resume_rx) = bounded(1);
        self.sender
            .send(Message::Pause { parked: parked_tx, resume: resume_rx })
            .map_err(|_| self.stopped())?;
        parked_rx.recv().map_err(|_| self.stopped())?;
        Ok(PauseGuard { _resume: resume_tx })
    }

    /// Run what is already queued, stop the executor and hand back the state.
    pub fn shutdown(mut self) -> Result<S> {
        let _ = self.sender.send(Message::Shutdown);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                Error::new(ErrorKind::Internal, format!("{} executor panicked", self.name))
            }),
            None => Err(self.stopped()),
        }
    }

    fn stopped(&self) -> Error {
        Error::new(ErrorKind::InvalidState, format!("{} is not running", self.name))
    }
}

impl<S: Send + 'static> Drop for TaskQueue<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(Message::Shutdown);
            let _ = handle.join();
        }
    }
}
