//! Invocation of external command-line tools with checked exit status.

use log::debug;
use std::{
    error::Error,
    ffi::{OsStr, OsString},
    fmt,
    fs::File,
    io::Read,
    path::Path,
    process::{ChildStderr, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};

/// A program and its arguments, run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: OsString,
    args:    Vec<OsString>,
}

/// The captured result of a successful command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

#[non_exhaustive]
#[derive(Debug)]
pub enum CommandError {
    /// The program could not be started.
    Spawn { command: String, source: std::io::Error },
    /// Waiting on the program or redirecting its streams failed.
    Io { command: String, source: std::io::Error },
    /// The program ran but exited unsuccessfully.
    Failed {
        command: String,
        status:  ExitStatus,
        stderr:  String,
    },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommandError::Spawn { command, source } => write!(f, "Failed to start `{command}`:\n{source}"),
            CommandError::Io { command, source } => write!(f, "Failed while running `{command}`:\n{source}"),
            CommandError::Failed { command, status, stderr } => {
                write!(f, "`{command}` exited with {status}")?;
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    write!(f, ":\n{stderr}")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for CommandError {
    #[inline]
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommandError::Spawn { source, .. } | CommandError::Io { source, .. } => Some(source),
            CommandError::Failed { .. } => None,
        }
    }
}

impl ExternalCommand {
    #[inline]
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args:    Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    #[inline]
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>, {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    /// Runs the command to completion with stdin and stdout discarded,
    /// capturing stderr.
    ///
    /// ## Errors
    ///
    /// A spawn failure or a non-zero exit status is returned as a
    /// [`CommandError`].
    pub fn run(&self) -> Result<CommandOutput, CommandError> {
        let output = self
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| CommandError::Spawn {
                command: self.to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        check_status(self, output.status, stderr)
    }

    /// Runs `self` with its stdout piped into `consumer`, and writes the
    /// consumer's stdout to `output`, creating or truncating it.
    ///
    /// Both processes must exit successfully. If the producer fails its error
    /// is reported, since a consumer failure is then usually a consequence.
    ///
    /// ## Errors
    ///
    /// Failing to create `output`, to start either process, or either process
    /// exiting unsuccessfully.
    pub fn run_piped(&self, consumer: &ExternalCommand, output: &Path) -> Result<CommandOutput, CommandError> {
        let out_file = File::create(output).map_err(|source| CommandError::Io {
            command: consumer.to_string(),
            source,
        })?;

        let mut producer = self
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: self.to_string(),
                source,
            })?;

        let producer_stdout = match producer.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = producer.kill();
                let _ = producer.wait();
                return Err(CommandError::Io {
                    command: self.to_string(),
                    source:  std::io::Error::other("the standard output was not captured"),
                });
            }
        };

        let mut consumer_child = match consumer
            .to_command()
            .stdin(Stdio::from(producer_stdout))
            .stdout(Stdio::from(out_file))
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                let _ = producer.kill();
                let _ = producer.wait();
                return Err(CommandError::Spawn {
                    command: consumer.to_string(),
                    source,
                });
            }
        };

        let producer_stderr = drain(producer.stderr.take());
        let consumer_stderr = drain(consumer_child.stderr.take());

        let consumer_status = consumer_child.wait().map_err(|source| CommandError::Io {
            command: consumer.to_string(),
            source,
        })?;
        let producer_status = producer.wait().map_err(|source| CommandError::Io {
            command: self.to_string(),
            source,
        })?;

        let producer_stderr = join_drain(producer_stderr);
        let consumer_stderr = join_drain(consumer_stderr);

        check_status(self, producer_status, producer_stderr)?;
        check_status(consumer, consumer_status, consumer_stderr)
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

fn check_status(command: &ExternalCommand, status: ExitStatus, stderr: String) -> Result<CommandOutput, CommandError> {
    if status.success() {
        Ok(CommandOutput { status, stderr })
    } else {
        Err(CommandError::Failed {
            command: command.to_string(),
            status,
            stderr,
        })
    }
}

/// Reads a child's stderr on a separate thread so that neither pipe can fill
/// up and stall the pipeline.
fn drain(stderr: Option<ChildStderr>) -> Option<JoinHandle<String>> {
    stderr.map(|stderr| thread::spawn(move || read_stderr(stderr)))
}

/// Reads a stream to its end, keeping whatever was read before an error.
fn read_stderr<R: Read>(mut stderr: R) -> String {
    let mut buffer = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buffer) {
        debug!("Stopped reading the standard error of a child process: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[inline]
fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn test_run_checks_status() {
        assert!(ExternalCommand::new("true").run().is_ok());

        let failed = ExternalCommand::new("sh").args(["-c", "echo broken index >&2; exit 3"]).run();
        match failed {
            Err(CommandError::Failed { status, stderr, .. }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr.trim(), "broken index");
            }
            other => panic!("expected a failed status, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let result = ExternalCommand::new("seqstage-no-such-program").arg("index").run();
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }

    #[test]
    fn test_run_piped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        let output = dir.path().join("out.txt");
        fs::write(&input, "@r1\nACGT\n+\nIIII\n").unwrap();

        ExternalCommand::new("cat")
            .arg(&input)
            .run_piped(&ExternalCommand::new("tr").args(["a-z", "A-Z"]), &output)
            .unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "@R1\nACGT\n+\nIIII\n");

        let result = ExternalCommand::new("cat")
            .arg(&input)
            .run_piped(&ExternalCommand::new("false"), &output);
        assert!(result.is_err());

        let result = ExternalCommand::new("sh")
            .args(["-c", "exit 1"])
            .run_piped(&ExternalCommand::new("cat"), &output);
        assert!(matches!(result, Err(CommandError::Failed { .. })));
    }

    #[test]
    fn test_display() {
        let command = ExternalCommand::new("bwa").args(["mem", "reference.fasta", "reads.fastq"]);
        assert_eq!(command.to_string(), "bwa mem reference.fasta reads.fastq");
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_read_stderr_keeps_partial_output() {
        assert_eq!(read_stderr("[main] done\n".as_bytes()), "[main] done\n");
        assert_eq!(read_stderr("[bwa_index] partial".as_bytes().chain(BrokenPipe)), "[bwa_index] partial");
    }
}
