use crate::sync::Cancellation;
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    io::{self, ErrorKind, Read},
    os::unix::process::CommandExt,
    process::{Child, Command, ExitStatus},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};
use wait_timeout::ChildExt;

/// upper bound for a single wait, also the sampling rate for memory and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SPAWN_ATTEMPTS: usize = 3;
const CHUNK_SIZE: usize = 8192;

#[derive(Debug)]
pub enum Exit {
    /// the solver terminated by itself
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct Supervised {
    pub exit: Exit,
    pub elapsed: Duration,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub peak_rss_kb: Option<u64>,
}

/// A child running in its own process group. The whole group is killed if the guard is
/// dropped before the child was reaped.
#[derive(Debug)]
pub struct ProcessGuard {
    child: Child,
    group: Pid,
    reaped: bool,
    stdout: Option<Receiver<Vec<u8>>>,
    stderr: Option<Receiver<Vec<u8>>>,
}

impl ProcessGuard {
    pub fn spawn(command: &mut Command) -> io::Result<Self> {
        command.process_group(0);

        let mut attempt = 1;
        let child = loop {
            match command.spawn() {
                Ok(child) => break child,
                // a concurrently forked process may still hold a write handle on a freshly
                // written executable
                Err(error)
                    if error.raw_os_error() == Some(Errno::ETXTBSY as i32)
                        && attempt < SPAWN_ATTEMPTS =>
                {
                    trace!(attempt = attempt, "Executable is busy, retrying");
                    attempt += 1;
                    thread::sleep(POLL_INTERVAL);
                }
                Err(error) => return Err(error),
            }
        };

        let mut guard = Self {
            group: Pid::from_raw(child.id() as i32),
            child,
            reaped: false,
            stdout: None,
            stderr: None,
        };

        // stdout and stderr are drained while waiting, a full pipe would block the solver
        guard.stdout = guard.child.stdout.take().map(drain).transpose()?;
        guard.stderr = guard.child.stderr.take().map(drain).transpose()?;

        Ok(guard)
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Wait until the child exits, `timeout` elapses or the suite is cancelled, whatever
    /// comes first. Returns at the latest after `timeout + grace + POLL_INTERVAL`, also
    /// if a descendant that escaped the process group keeps the output pipes open.
    pub fn supervise(
        mut self,
        timeout: Duration,
        grace: Duration,
        cancellation: &Cancellation,
    ) -> io::Result<Supervised> {
        let start = Instant::now();
        let mut peak_rss_kb = None;

        let exit = loop {
            peak_rss_kb = peak_rss_kb.max(peak_rss(self.id()));
            let elapsed = start.elapsed();

            if cancellation.is_cancelled() {
                debug!(pid = self.id(), "Suite cancelled, terminating solver");
                self.terminate(grace)?;

                break Exit::Cancelled;
            }

            if elapsed >= timeout {
                debug!(pid = self.id(), "Deadline reached, terminating solver");
                self.terminate(grace)?;

                break Exit::TimedOut;
            }

            if let Some(status) = self
                .child
                .wait_timeout(POLL_INTERVAL.min(timeout - elapsed))?
            {
                self.reaped = true;

                break Exit::Exited(status);
            }
        };
        let elapsed = start.elapsed();

        // descendants left behind by the solver may still hold the output pipes open
        self.signal(Signal::SIGKILL);

        // a terminated solver already used up its grace period
        let budget = match exit {
            Exit::Exited(_) => grace,
            Exit::TimedOut | Exit::Cancelled => POLL_INTERVAL,
        };
        let deadline = Instant::now() + budget;

        Ok(Supervised {
            exit,
            elapsed,
            stdout: collect(self.stdout.take(), deadline),
            stderr: collect(self.stderr.take(), deadline),
            peak_rss_kb,
        })
    }

    /// SIGTERM to the group, SIGKILL once `grace` passed without the child exiting
    fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        self.signal(Signal::SIGTERM);

        if let Some(status) = self.child.wait_timeout(grace)? {
            self.reaped = true;

            return Ok(status);
        }

        debug!(pid = self.id(), "Solver ignored SIGTERM, sending SIGKILL");
        self.signal(Signal::SIGKILL);

        let status = self.child.wait()?;
        self.reaped = true;

        Ok(status)
    }

    fn signal(&self, signal: Signal) {
        match killpg(self.group, signal) {
            // the group is already gone
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => warn!(
                group = self.group.as_raw(),
                errno = %errno,
                "Failed to send {signal} to process group"
            ),
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.signal(Signal::SIGKILL);

            match self.child.wait() {
                Ok(status) => debug!(status = ?status, "Reaped abandoned solver"),
                Err(error) => error!(error = ?error, "Failed to reap abandoned solver"),
            }
        }
    }
}

/// Forward a pipe chunk by chunk, the channel disconnects at end of file
fn drain<R: Read + Send + 'static>(mut reader: R) -> io::Result<Receiver<Vec<u8>>> {
    let (sender, receiver) = mpsc::channel();

    thread::Builder::new()
        .name("twbench-drain".to_owned())
        .spawn(move || {
            let mut chunk = [0; CHUNK_SIZE];

            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => {
                        // the supervisor stopped listening
                        if sender.send(chunk[..read].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                    Err(error) => {
                        debug!(error = %error, "Failed to read solver output");
                        break;
                    }
                }
            }
        })?;

    Ok(receiver)
}

/// Everything a pipe delivered until it closed or `deadline` passed. A reader still
/// blocked at the deadline is abandoned together with its thread.
fn collect(receiver: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Vec<u8> {
    let mut buffer = Vec::new();

    let Some(receiver) = receiver else {
        return buffer;
    };

    loop {
        match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(chunk) => buffer.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                debug!("Output pipe is held open by an escaped descendant, abandoning it");
                break;
            }
        }
    }

    buffer
}

/// peak resident set size in KiB, `None` once the process is gone
#[cfg(target_os = "linux")]
fn peak_rss(pid: u32) -> Option<u64> {
    let process = procfs::process::Process::new(i32::try_from(pid).ok()?).ok()?;

    process.status().ok()?.vmhwm
}

#[cfg(not(target_os = "linux"))]
fn peak_rss(_pid: u32) -> Option<u64> {
    None
}
