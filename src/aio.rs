use std::fs::File;
use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Raw pointer into an output buffer, shipped to the writer thread for the
/// duration of one write.
struct WritePtr(*const u8);

// The submitting engine keeps the buffer alive and untouched until the
// write completes; ownership transfers back at poll/wait.
unsafe impl Send for WritePtr {}

struct WriteJob {
    file: Arc<File>,
    buffer: WritePtr,
    len: usize,
}

/// One-deep asynchronous write queue backed by a dedicated writer thread.
///
/// The abstraction mirrors POSIX AIO usage: `submit` starts a write,
/// `poll` checks for completion without blocking, `wait` suspends until it
/// finishes. At most one write may be outstanding at a time; `submit`
/// asserts this.
pub(crate) struct AsyncWriter {
    jobs: Option<Sender<WriteJob>>,
    results: Receiver<io::Result<usize>>,
    worker: Option<JoinHandle<()>>,
    outstanding: bool,
}

impl AsyncWriter {
    pub fn spawn() -> Self {
        let (job_tx, job_rx) = mpsc::channel::<WriteJob>();
        let (result_tx, result_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("log-output-writer".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let slice = unsafe { std::slice::from_raw_parts(job.buffer.0, job.len) };
                    let result = (&*job.file).write_all(slice).map(|_| job.len);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn log output writer thread");

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            worker: Some(worker),
            outstanding: false,
        }
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding
    }

    /// Submits one write of `len` bytes at `buffer` to `file`. The caller
    /// must keep the buffer alive and unmodified until completion.
    pub fn submit(&mut self, file: Arc<File>, buffer: *const u8, len: usize) -> io::Result<()> {
        assert!(
            !self.outstanding,
            "async write submitted while one is outstanding"
        );
        let job = WriteJob {
            file,
            buffer: WritePtr(buffer),
            len,
        };
        self.jobs
            .as_ref()
            .expect("writer thread already shut down")
            .send(job)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer thread exited"))?;
        self.outstanding = true;
        Ok(())
    }

    /// Non-blocking completion check. `None` while the write is still in
    /// progress.
    pub fn poll(&mut self) -> Option<io::Result<usize>> {
        if !self.outstanding {
            return None;
        }
        match self.results.try_recv() {
            Ok(result) => {
                self.outstanding = false;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.outstanding = false;
                Some(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "writer thread exited",
                )))
            }
        }
    }

    /// Blocks until the outstanding write completes. `None` if nothing was
    /// outstanding.
    pub fn wait(&mut self) -> Option<io::Result<usize>> {
        if !self.outstanding {
            return None;
        }
        self.outstanding = false;
        match self.results.recv() {
            Ok(result) => Some(result),
            Err(_) => Some(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer thread exited",
            ))),
        }
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_submit_poll_wait_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aio.bin");
        let file = Arc::new(File::create(&path).unwrap());

        let data = b"hello from the writer thread".to_vec();
        let mut writer = AsyncWriter::spawn();
        writer
            .submit(file.clone(), data.as_ptr(), data.len())
            .unwrap();
        assert!(writer.has_outstanding());

        let written = writer.wait().unwrap().unwrap();
        assert_eq!(written, data.len());
        assert!(!writer.has_outstanding());
        assert!(writer.wait().is_none());

        drop(writer);
        let mut contents = Vec::new();
        File::open(&path)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, data);
    }
}
