//! Process-backed worker: drives the `backend` binary over stdio with one
//! JSON object per line. Same protocol and ordering guarantees as the
//! thread variant, with a real OS failure domain: a crashing kernel kills
//! the child, not the caller.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::debug;

use super::{Task, WorkerError, WorkerMessage};

pub struct ProcessWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ProcessWorker {
    pub fn spawn(program: &Path) -> Result<Self, WorkerError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Spawn("worker stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Spawn("worker stdout not captured".to_string()))?;
        debug!(program = %program.display(), pid = child.id(), "worker process started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    pub fn submit(&mut self, task: &Task) -> Result<(), WorkerError> {
        let line =
            serde_json::to_string(task).map_err(|e| WorkerError::Protocol(e.to_string()))?;
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Block for the next message line from the child.
    pub fn recv(&mut self) -> Result<WorkerMessage, WorkerError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(WorkerError::Disconnected);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map_err(|e| WorkerError::Protocol(format!("{e}: {trimmed}")));
        }
    }

    /// Drain messages until the terminal one for the current task.
    pub fn recv_until_done(&mut self) -> Result<WorkerMessage, WorkerError> {
        loop {
            match self.recv()? {
                WorkerMessage::Progress(_) => continue,
                terminal => return Ok(terminal),
            }
        }
    }

    /// Send the termination sentinel and wait for the child to exit.
    pub fn shutdown(mut self) -> Result<(), WorkerError> {
        let _ = self.submit(&Task::Shutdown);
        drop(self.stdin);
        self.child.wait()?;
        Ok(())
    }
}
