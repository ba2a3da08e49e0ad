//! Log tailer.
//!
//! Follows an application log file, extracts tagged command lines from the
//! bytes appended since the last read, and hands each one to the
//! dispatcher. A single actor task owns the read loop. It is woken by a poll
//! timer or by file-system notifications and always re-reads from the cursor
//! to the current end of file, so overlapping wakeups are harmless.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("no log file configured for tail mode")]
    NotConfigured,

    #[error("log file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to watch log directory: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid tag pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("tailer has stopped")]
    Stopped,
}

/// Extracts the command payload from lines carrying the tag marker.
#[derive(Debug, Clone)]
pub struct TagMatcher {
    pattern: Regex,
}

impl TagMatcher {
    /// Matches `[<tag>]` anywhere in a line, followed by the payload.
    pub fn new(tag: &str) -> Result<Self, TailError> {
        let pattern = Regex::new(&format!(r"\[{}\]\s*(.*)", regex::escape(tag)))?;
        Ok(Self { pattern })
    }

    /// Returns the payload with leading separators removed, or `None` if the
    /// line is not tagged.
    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        let captures = self.pattern.captures(line)?;
        let payload = captures.get(1)?.as_str();
        Some(payload.trim_start_matches([',', ' ', '\t']))
    }
}

/// Byte offset into the tailed file, shared between the actor and observers.
#[derive(Debug, Clone, Default)]
pub struct TailCursor(Arc<Mutex<u64>>);

impl TailCursor {
    pub fn new(position: u64) -> Self {
        Self(Arc::new(Mutex::new(position)))
    }

    pub fn position(&self) -> u64 {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        self.set(0);
    }

    pub fn set(&self, position: u64) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }

    /// Reads every complete line appended since the cursor and advances the
    /// cursor past them. An incomplete trailing line is left for the next
    /// read. A file shorter than the cursor is treated as truncated and read
    /// from the start.
    pub fn read_new_lines(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut position = self.0.lock().unwrap_or_else(PoisonError::into_inner);

        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < *position {
            info!(path = %path.display(), "Log file truncated, reading from start");
            *position = 0;
        }
        if len == *position {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(*position))?;
        let mut bytes = Vec::new();
        file.take(len - *position).read_to_end(&mut bytes)?;

        let Some(last_newline) = bytes.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &bytes[..=last_newline];
        *position += complete.len() as u64;

        Ok(complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect())
    }
}

/// Settings for one tailer instance.
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub path: Option<PathBuf>,
    pub tag: String,
    pub poll_interval: Duration,
}

#[derive(Debug)]
enum TailCommand {
    SwitchTo(PathBuf),
}

/// Control handle for a running tailer.
#[derive(Debug)]
pub struct TailHandle {
    commands: mpsc::UnboundedSender<TailCommand>,
    cursor: TailCursor,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TailHandle {
    /// Re-points the tailer at another file, starting at its current end.
    pub fn switch_to(&self, path: impl Into<PathBuf>) -> Result<(), TailError> {
        let path = path.into();
        if !path.is_file() {
            return Err(TailError::NotFound(path));
        }
        self.commands
            .send(TailCommand::SwitchTo(path))
            .map_err(|_| TailError::Stopped)
    }

    pub fn cursor(&self) -> &TailCursor {
        &self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the tailer and waits for its task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "Tailer task ended abnormally");
        }
    }
}

/// Starts tailing. The cursor begins at the file's current length, so only
/// lines appended after this call are dispatched.
pub fn spawn_tailer(
    options: TailOptions,
    dispatcher: Dispatcher,
    cancel: &CancellationToken,
) -> Result<TailHandle, TailError> {
    let path = options.path.ok_or(TailError::NotConfigured)?;
    let matcher = TagMatcher::new(&options.tag)?;
    let cursor = TailCursor::new(file_len(&path)?);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                if event_tx.send(event).is_err() {
                    trace!("Tailer stopped, dropping file event");
                }
            }
            Err(err) => warn!(error = %err, "Log directory watch error"),
        }
    })?;
    watcher.watch(watch_dir(&path), RecursiveMode::NonRecursive)?;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let cancel = cancel.child_token();
    info!(path = %path.display(), position = cursor.position(), "Tailing log file");

    let actor = TailActor {
        path,
        cursor: cursor.clone(),
        matcher,
        dispatcher,
        watcher,
        polling: true,
    };
    let task = tokio::spawn(actor.run(
        options.poll_interval,
        event_rx,
        command_rx,
        cancel.clone(),
    ));

    Ok(TailHandle {
        commands: command_tx,
        cursor,
        cancel,
        task,
    })
}

fn file_len(path: &Path) -> Result<u64, TailError> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(TailError::NotFound(path.to_path_buf()))
        }
        Err(source) => Err(TailError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn watch_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// What a file-system event means for the tailed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Modified,
    Reset,
    Removed,
}

fn classify(event: &Event, target: &Path) -> Option<Wake> {
    let name = target.file_name()?;
    if !event.paths.iter().any(|p| p.file_name() == Some(name)) {
        return None;
    }
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => Some(Wake::Reset),
        EventKind::Modify(_) => Some(Wake::Modified),
        EventKind::Remove(_) => Some(Wake::Removed),
        _ => None,
    }
}

struct TailActor {
    path: PathBuf,
    cursor: TailCursor,
    matcher: TagMatcher,
    dispatcher: Dispatcher,
    watcher: RecommendedWatcher,
    polling: bool,
}

impl TailActor {
    async fn run(
        mut self,
        poll_interval: Duration,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut commands: mpsc::UnboundedReceiver<TailCommand>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick(), if self.polling => self.pump(),
                Some(event) = events.recv() => self.on_event(&event),
                Some(command) = commands.recv() => self.on_command(command),
            }
        }
        debug!(path = %self.path.display(), "Tailer stopped");
    }

    fn on_event(&mut self, event: &Event) {
        match classify(event, &self.path) {
            Some(Wake::Modified) => self.pump(),
            Some(Wake::Reset) => {
                info!(path = %self.path.display(), "Log file rotated or created, reading from start");
                self.cursor.reset();
                self.polling = true;
                self.pump();
            }
            Some(Wake::Removed) => {
                warn!(path = %self.path.display(), "Log file removed, waiting for it to reappear");
                self.polling = false;
            }
            None => {}
        }
    }

    fn on_command(&mut self, command: TailCommand) {
        match command {
            TailCommand::SwitchTo(path) => {
                let position = match file_len(&path) {
                    Ok(len) => len,
                    Err(err) => {
                        warn!(error = %err, "Cannot switch log file");
                        return;
                    }
                };
                let old_dir = watch_dir(&self.path).to_path_buf();
                let new_dir = watch_dir(&path).to_path_buf();
                if old_dir != new_dir {
                    if let Err(err) = self.watcher.unwatch(&old_dir) {
                        debug!(error = %err, "Failed to unwatch previous log directory");
                    }
                    if let Err(err) = self.watcher.watch(&new_dir, RecursiveMode::NonRecursive) {
                        warn!(error = %err, dir = %new_dir.display(), "Failed to watch log directory");
                    }
                }
                info!(from = %self.path.display(), to = %path.display(), position, "Switched log file");
                self.path = path;
                self.cursor.set(position);
                self.polling = true;
            }
        }
    }

    fn pump(&self) {
        let lines = match self.cursor.read_new_lines(&self.path) {
            Ok(lines) => lines,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Log file not present yet");
                return;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Failed to read log file");
                return;
            }
        };

        for line in &lines {
            if let Some(payload) = self.matcher.extract(line) {
                debug!(payload, "Tagged log line");
                self.dispatcher.dispatch(payload, None);
            }
        }
    }
}
