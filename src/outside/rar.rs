use std::{
    ffi::{OsStr, OsString},
    fmt::Debug,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use miette::{miette, Context, IntoDiagnostic};
use tracing::{debug, warn};

use crate::result::Result;

pub const RAR: &str = "rar";

/// Volumes just under 4 GiB, the file size limit of FAT32 and of many transfer tools
const MAX_VOLUME_SIZE: &str = "-v4095M";
/// Store without compression, the archive is only used to split the file
const STORE_MODE: &str = "-m0";
const ASSUME_YES: &str = "-y";

/// Lines printed by a running archiver, stdout and stderr merged
pub type OutputLines = Receiver<String>;

pub trait Archiver: Send + Sync + Debug {
    /// Start archiving the media file and its companions into `<media>.rar`
    /// volumes next to it.
    ///
    /// The process runs in the media file directory and only receives
    /// file names, so no absolute path ends up in the archive.
    fn spawn(&self, media: &Path, companions: &[PathBuf]) -> Result<(ArchiveProcess, OutputLines)>;
}

/// Interface for the [rar](https://www.rarlab.com) program
#[derive(Debug, Clone)]
pub struct Rar {
    program: String,
    leading_args: Vec<String>,
}

impl Rar {
    /// Build from a command line: the program followed by arguments that are
    /// put before the archiving ones (e.g. `nice -n 19 rar`).
    pub fn from_command<I, S>(command: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = command.into_iter().map(Into::into);
        let program = command
            .next()
            .ok_or_else(|| miette!("The archiver command is empty"))?;

        Ok(Self {
            program,
            leading_args: command.collect(),
        })
    }

    /// Arguments creating `<media>.rar` from the media and companion file names
    pub fn build_args(media_name: &OsStr, companion_names: &[&OsStr]) -> Vec<OsString> {
        let mut archive_name = media_name.to_os_string();
        archive_name.push(".rar");

        let mut args: Vec<OsString> = ["a", MAX_VOLUME_SIZE, STORE_MODE, ASSUME_YES]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(archive_name);
        args.push(media_name.to_os_string());
        args.extend(companion_names.iter().map(|name| name.to_os_string()));
        args
    }
}

impl Default for Rar {
    fn default() -> Self {
        Self {
            program: RAR.to_owned(),
            leading_args: vec![],
        }
    }
}

impl Archiver for Rar {
    fn spawn(&self, media: &Path, companions: &[PathBuf]) -> Result<(ArchiveProcess, OutputLines)> {
        let (Some(dir), Some(media_name)) = (media.parent(), media.file_name()) else {
            return Err(miette!("Invalid media path {}", media.display()).into());
        };

        let companion_names = companions
            .iter()
            .map(|c| {
                c.file_name()
                    .ok_or_else(|| miette!("Invalid companion path {}", c.display()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(Self::build_args(media_name, &companion_names))
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Executing command: {cmd:?} in {}", dir.display());
        let mut child = cmd
            .spawn()
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not run {} command", self.program))?;

        let (send, receive) = unbounded();
        let forwarded = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => forward_output(stdout, send.clone(), "rar-stdout")
                .and_then(|_| forward_output(stderr, send, "rar-stderr")),
            _ => Err(miette!("Archiver output is not captured").into()),
        };

        let mut process = ArchiveProcess {
            child,
            media: media.to_path_buf(),
        };
        if let Err(err) = forwarded {
            process.kill_and_reap();
            return Err(err);
        }

        Ok((process, receive))
    }
}

/// Handle on one running archiver process
#[derive(Debug)]
pub struct ArchiveProcess {
    child: Child,
    media: PathBuf,
}

impl ArchiveProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Kill the process right away, without giving it a chance to finish
    /// the volume it is writing
    pub fn kill(&mut self) {
        match self.child.kill() {
            Ok(()) => debug!(
                "Killed archiver process {} of {}",
                self.child.id(),
                self.media.display()
            ),
            Err(err) if err.kind() == ErrorKind::InvalidInput => {
                debug!("Archiver process {} already exited", self.child.id())
            }
            Err(err) => warn!("Could not kill archiver process {}: {err}", self.child.id()),
        }
    }

    /// Kill the process and wait for it so that no zombie is left behind
    pub fn kill_and_reap(&mut self) {
        self.kill();
        if let Err(err) = self.child.wait() {
            warn!("Could not reap archiver process {}: {err}", self.child.id());
        }
    }

    /// Non-blocking check of the process exit
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self
            .child
            .try_wait()
            .into_diagnostic()
            .wrap_err("Could not check the archiver process status")?)
    }
}

/// Forward the lines read from `reader` to `sink` from a dedicated thread.
/// The thread stops at the end of the stream or once the receiver is dropped.
fn forward_output<R>(mut reader: R, sink: Sender<String>, name: &str) -> Result<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            let mut splitter = LineSplitter::default();
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in splitter.feed(&buf[..n]) {
                            if sink.send(line).is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!("Stopped reading archiver output: {err}");
                        break;
                    }
                }
            }

            if let Some(line) = splitter.finish() {
                let _ = sink.send(line);
            }
        })
        .into_diagnostic()
        .wrap_err("Could not spawn archiver output reader")?;

    Ok(())
}

/// Cut a raw output stream into trimmed, non-empty lines.
///
/// `\r` ends a line like `\n` does, and `\b` erases the previous byte: rar
/// redraws its percentage in place with backspaces. A pending line ending in
/// `%` is published as it is so the progress shows before the line ends.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = vec![];
        for &byte in bytes {
            match byte {
                b'\n' | b'\r' => lines.extend(self.take()),
                0x08 => {
                    self.pending.pop();
                }
                _ => self.pending.push(byte),
            }
        }

        if self.pending.last() == Some(&b'%') {
            lines.extend(clean(&self.pending));
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let line = clean(&self.pending);
        self.pending.clear();
        line
    }
}

fn clean(bytes: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(bytes);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_owned())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::{LineSplitter, Rar};

    #[test]
    fn fixed_invocation_shape() {
        let args = Rar::build_args(
            OsStr::new("movie.mkv"),
            &[OsStr::new("movie.srt"), OsStr::new("movie.en.srt")],
        );

        assert_eq!(
            args,
            [
                "a",
                "-v4095M",
                "-m0",
                "-y",
                "movie.mkv.rar",
                "movie.mkv",
                "movie.srt",
                "movie.en.srt"
            ]
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(Rar::from_command(Vec::<String>::new()).is_err());
        assert!(Rar::from_command(["nice", "-n", "19", "rar"]).is_ok());
    }

    #[test]
    fn splits_on_newlines_and_carriage_returns() {
        let mut splitter = LineSplitter::default();

        let mut lines = splitter.feed(b"RAR 7.01\r\n\nCreating archive a.rar\nAdd");
        lines.extend(splitter.feed(b"ing  a.mkv   \n  "));
        lines.extend(splitter.finish());

        assert_eq!(lines, ["RAR 7.01", "Creating archive a.rar", "Adding  a.mkv"]);
    }

    #[test]
    fn backspaced_percentages_are_published() {
        let mut splitter = LineSplitter::default();

        assert_eq!(splitter.feed(b"Adding  a.mkv    "), Vec::<String>::new());
        assert_eq!(splitter.feed(b"  5%"), ["Adding  a.mkv      5%"]);
        assert_eq!(
            splitter.feed(b"\x08\x08\x08\x08 42%"),
            ["Adding  a.mkv     42%"]
        );
        assert_eq!(
            splitter.feed(b"\x08\x08\x08\x08  OK \n"),
            ["Adding  a.mkv      OK"]
        );
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.feed(b"caf\xe9\n"), ["caf\u{fffd}"]);
    }
}
