///
/// Stock Router Outputs
///
/// Ready-made `RouterOutput` implementations:
/// - `FileOutput` - truncating file sink, flushed after every write
/// - `ConsoleOutput` - stdout/stderr, delivered synchronously
/// - `CaptureOutput` - in-memory byte collector
///
/// Each one serializes its own writes, since several inputs may deliver
/// to it at once.
///

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::errors::RouterError;
use crate::output::RouterOutput;
use crate::sink::report_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Line endings follow the platform convention
    Text,
    /// Bytes are written untouched
    Binary,
}

#[derive(Debug)]
pub struct FileOutput {
    path: PathBuf,
    mode: FileMode,
    file: Mutex<File>,
}

impl FileOutput {
    /// Create (or truncate) the file at `path`
    pub fn create(path: impl AsRef<Path>, mode: FileMode) -> Result<Self, RouterError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| RouterError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            mode,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    fn write_through(&self, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        match self.mode {
            FileMode::Binary => file.write_all(data)?,
            FileMode::Text => file.write_all(&to_platform_newlines(data))?,
        }
        file.flush()
    }
}

#[cfg(windows)]
fn to_platform_newlines(data: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    if !data.contains(&b'\n') {
        return std::borrow::Cow::Borrowed(data);
    }
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut prev = 0u8;
    for &byte in data {
        if byte == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        prev = byte;
    }
    std::borrow::Cow::Owned(out)
}

#[cfg(not(windows))]
fn to_platform_newlines(data: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Borrowed(data)
}

impl RouterOutput for FileOutput {
    fn output(&self, data: &[u8]) {
        if let Err(err) = self.write_through(data) {
            report_error(format_args!("write to {} failed: {}", self.path.display(), err));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Console output. Never buffered: console text should appear in the
/// order it was produced relative to the rest of the program's output.
#[derive(Debug)]
pub struct ConsoleOutput {
    stream: Stream,
}

impl ConsoleOutput {
    pub fn stdout() -> Self {
        Self { stream: Stream::Stdout }
    }

    pub fn stderr() -> Self {
        Self { stream: Stream::Stderr }
    }
}

impl RouterOutput for ConsoleOutput {
    fn output(&self, data: &[u8]) {
        // nowhere left to report a console failure
        let _ = match self.stream {
            Stream::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(data).and_then(|_| out.flush())
            }
            Stream::Stderr => io::stderr().lock().write_all(data),
        };
    }

    fn is_buffer_processing(&self) -> bool {
        false
    }
}

/// Collects every byte delivered to it
#[derive(Debug, Default)]
pub struct CaptureOutput {
    bytes: Mutex<Vec<u8>>,
    grew: Condvar,
    unbuffered: bool,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capture that asks to be delivered to synchronously
    pub fn unbuffered() -> Self {
        Self {
            unbuffered: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return everything captured so far
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    /// Block until at least `len` bytes have arrived. False on timeout.
    pub fn wait_for_len(&self, len: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut bytes = self.lock();
        while bytes.len() < len {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            bytes = self
                .grew
                .wait_timeout(bytes, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl RouterOutput for CaptureOutput {
    fn output(&self, data: &[u8]) {
        self.lock().extend_from_slice(data);
        self.grew.notify_all();
    }

    fn is_buffer_processing(&self) -> bool {
        !self.unbuffered
    }
}
