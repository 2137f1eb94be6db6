//! Parent-side endpoints of a child's standard streams.
//!
//! Each stream is claimed exactly once, either by the first caller read (or write) or by the
//! monitor when the child terminates first. A stream the monitor claims is drained into an
//! in-memory tail and its descriptor released, so later reads are served from memory.
//!
//! Three locks guard a stream and are always taken in the order claim, reading, state. The
//! state lock is only held for field updates, so [`PipeReader::available`] and
//! [`PipeReader::close`] never wait behind a blocked read.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::encoding::TextEncoding;
use crate::error::{Error, StreamError};
use crate::locks::lock;
use crate::sys;
use crate::trace_categories;

/// How often a blocked read re-checks whether the stream was closed or may be released.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Claim {
    Unclaimed,
    Caller,
    Drained,
}

/// Facts about the owning process that a stream needs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StreamContext {
    pub name: &'static str,
    pub pid: sys::process::ProcessId,
    pub encoding: TextEncoding,
    /// Release blocked reads once the process has terminated.
    pub auto_close: bool,
    /// With `auto_close`, also wait for this process group to empty.
    pub group: Option<sys::process::ProcessId>,
}

/// The three parent-side streams of one child.
#[derive(Debug)]
pub(crate) struct Streams {
    pub stdin: PipeWriter,
    pub stdout: PipeReader,
    pub stderr: PipeReader,
}

impl Streams {
    /// Finalizes every stream after the process terminated.
    pub(crate) fn on_process_exit(&self) {
        self.stdout.on_process_exit();
        self.stderr.on_process_exit();
        self.stdin.on_process_exit();
    }
}

#[derive(Debug)]
struct ReadState {
    pipe: Option<Arc<os_pipe::PipeReader>>,
    tail: VecDeque<u8>,
    closed: bool,
}

impl ReadState {
    fn take_tail(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.tail.len());
        for (slot, byte) in buf.iter_mut().zip(self.tail.drain(..count)) {
            *slot = byte;
        }
        count
    }
}

#[derive(Debug)]
struct ReadEnd {
    context: StreamContext,
    claim: Mutex<Claim>,
    reading: Mutex<()>,
    state: Mutex<ReadState>,
    terminated: AtomicBool,
}

/// Readable end of a child's stdout or stderr. Clones share the same stream.
#[derive(Clone, Debug)]
pub struct PipeReader {
    inner: Arc<ReadEnd>,
}

impl PipeReader {
    pub(crate) fn new(pipe: os_pipe::PipeReader, context: StreamContext) -> Self {
        Self::with_state(
            context,
            ReadState {
                pipe: Some(Arc::new(pipe)),
                tail: VecDeque::new(),
                closed: false,
            },
        )
    }

    /// A stream whose child side was never connected to a pipe.
    pub(crate) fn closed(context: StreamContext) -> Self {
        Self::with_state(
            context,
            ReadState {
                pipe: None,
                tail: VecDeque::new(),
                closed: true,
            },
        )
    }

    fn with_state(context: StreamContext, state: ReadState) -> Self {
        Self {
            inner: Arc::new(ReadEnd {
                context,
                claim: Mutex::new(Claim::Unclaimed),
                reading: Mutex::new(()),
                state: Mutex::new(state),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Reads a single byte; `None` at end of stream.
    pub fn read_byte(&self) -> Result<Option<u8>, Error> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Reads up to `buf.len()` bytes, blocking until data, end of stream, close, or release.
    /// Returns 0 at end of stream.
    ///
    /// Buffered tail bytes are served first. After [`Self::close`] and once the tail is
    /// empty, reads fail with [`StreamError::Closed`]; a read already blocked when the
    /// stream is closed fails the same way.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.claim_for_caller();
        let _reading = lock(&self.inner.reading);

        let pipe = {
            let mut state = lock(&self.inner.state);
            if !state.tail.is_empty() {
                return Ok(state.take_tail(buf));
            }
            if state.closed {
                return Err(StreamError::Closed.into());
            }
            match &state.pipe {
                Some(pipe) => Arc::clone(pipe),
                None => return Ok(0),
            }
        };

        let count = self.read_live(&pipe, buf)?;
        if count == 0 {
            self.release_descriptor();
        }

        Ok(count)
    }

    /// Reads into `buf[offset..offset + length]`.
    pub fn read_into(&self, buf: &mut [u8], offset: usize, length: usize) -> Result<usize, Error> {
        let capacity = buf.len();
        let invalid = StreamError::InvalidBufferArguments {
            offset,
            length,
            capacity,
        };

        let end = offset.checked_add(length).ok_or(invalid)?;
        let window = buf.get_mut(offset..end).ok_or(invalid)?;
        self.read(window)
    }

    /// Reads until end of stream.
    pub fn read_to_end(&self) -> Result<Vec<u8>, Error> {
        let mut content = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match self.read(&mut chunk)? {
                0 => return Ok(content),
                n => content.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Reads until end of stream and decodes the content with the process's text encoding.
    pub fn read_text(&self) -> Result<String, Error> {
        let bytes = self.read_to_end()?;
        Ok(self.inner.context.encoding.decode(&bytes))
    }

    /// Number of bytes that can be read without blocking. Always 0 once closed.
    pub fn available(&self) -> Result<usize, Error> {
        let state = lock(&self.inner.state);
        if state.closed {
            return Ok(0);
        }
        if !state.tail.is_empty() {
            return Ok(state.tail.len());
        }
        match &state.pipe {
            Some(pipe) => Ok(sys::fd::bytes_available(pipe)?),
            None => Ok(0),
        }
    }

    /// Whether a read may still produce data: the stream is open, or buffered bytes remain.
    pub fn ready(&self) -> bool {
        let state = lock(&self.inner.state);
        !state.closed || !state.tail.is_empty()
    }

    /// Closes the stream. Idempotent. Bytes already drained into the tail stay readable, and
    /// a blocked reader is released within one poll interval.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        if !state.closed {
            state.closed = true;
            state.pipe = None;
            tracing::debug!(
                target: trace_categories::PIPES,
                pid = self.inner.context.pid,
                "closed {}",
                self.inner.context.name
            );
        }
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    fn claim_for_caller(&self) {
        let mut claim = lock(&self.inner.claim);
        if *claim == Claim::Unclaimed {
            *claim = Claim::Caller;
        }
    }

    fn read_live(&self, pipe: &os_pipe::PipeReader, buf: &mut [u8]) -> Result<usize, Error> {
        while !sys::fd::wait_readable(pipe, POLL_INTERVAL)? {
            if self.is_closed() {
                return Err(StreamError::Closed.into());
            }
            if self.inner.context.auto_close && self.may_release(pipe) {
                tracing::debug!(
                    target: trace_categories::PIPES,
                    pid = self.inner.context.pid,
                    "releasing blocked read on {} after termination",
                    self.inner.context.name
                );
                return Ok(0);
            }
        }
        if self.is_closed() {
            return Err(StreamError::Closed.into());
        }

        let mut reader = pipe;
        loop {
            match std::io::Read::read(&mut reader, buf) {
                Ok(count) => return Ok(count),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// An auto-closing read gives up once the process is gone, nothing is pending, and no
    /// member of its group remains to write more.
    fn may_release(&self, pipe: &os_pipe::PipeReader) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
            && sys::fd::bytes_available(pipe).unwrap_or(0) == 0
            && self
                .inner
                .context
                .group
                .is_none_or(|pgid| !sys::signal::group_exists(pgid))
    }

    fn release_descriptor(&self) {
        lock(&self.inner.state).pipe = None;
    }

    /// Called by the monitor once the process has terminated. Drains the stream into the
    /// tail unless a caller already claimed it.
    pub(crate) fn on_process_exit(&self) {
        self.inner.terminated.store(true, Ordering::Release);

        let mut claim = lock(&self.inner.claim);
        if *claim != Claim::Unclaimed {
            return;
        }
        *claim = Claim::Drained;

        let Some(pipe) = lock(&self.inner.state).pipe.take() else {
            return;
        };

        let mut drained = Vec::new();
        if let Err(e) = sys::fd::drain_available(&pipe, &mut drained) {
            tracing::warn!(
                target: trace_categories::PIPES,
                pid = self.inner.context.pid,
                "failed to drain {}: {e}",
                self.inner.context.name
            );
        }

        tracing::debug!(
            target: trace_categories::PIPES,
            pid = self.inner.context.pid,
            "drained {} bytes from unclaimed {}",
            drained.len(),
            self.inner.context.name
        );

        lock(&self.inner.state).tail.extend(drained);
    }
}

impl std::io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(Self::read(self, buf)?)
    }
}

impl std::io::Read for &PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(PipeReader::read(*self, buf)?)
    }
}

#[derive(Debug)]
struct WriteState {
    pipe: Option<Arc<os_pipe::PipeWriter>>,
    closed: bool,
}

#[derive(Debug)]
struct WriteEnd {
    context: StreamContext,
    claimed: Mutex<bool>,
    writing: Mutex<()>,
    state: Mutex<WriteState>,
}

/// Writable end of a child's stdin. Clones share the same stream.
#[derive(Clone, Debug)]
pub struct PipeWriter {
    inner: Arc<WriteEnd>,
}

impl PipeWriter {
    pub(crate) fn new(pipe: os_pipe::PipeWriter, context: StreamContext) -> Self {
        Self::with_state(
            context,
            WriteState {
                pipe: Some(Arc::new(pipe)),
                closed: false,
            },
        )
    }

    pub(crate) fn closed(context: StreamContext) -> Self {
        Self::with_state(
            context,
            WriteState {
                pipe: None,
                closed: true,
            },
        )
    }

    fn with_state(context: StreamContext, state: WriteState) -> Self {
        Self {
            inner: Arc::new(WriteEnd {
                context,
                claimed: Mutex::new(false),
                writing: Mutex::new(()),
                state: Mutex::new(state),
            }),
        }
    }

    /// Writes some bytes, returning how many were accepted.
    pub fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        *lock(&self.inner.claimed) = true;
        let _writing = lock(&self.inner.writing);
        let pipe = self.live_pipe()?;

        let mut writer = &*pipe;
        loop {
            match std::io::Write::write(&mut writer, buf) {
                Ok(count) => return Ok(count),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes all of `buf`.
    pub fn write_all(&self, buf: &[u8]) -> Result<(), Error> {
        *lock(&self.inner.claimed) = true;
        let _writing = lock(&self.inner.writing);
        let pipe = self.live_pipe()?;

        let mut writer = &*pipe;
        std::io::Write::write_all(&mut writer, buf)?;
        Ok(())
    }

    /// Encodes `text` with the process's text encoding and writes it.
    pub fn write_text(&self, text: &str) -> Result<(), Error> {
        self.write_all(&self.inner.context.encoding.encode(text))
    }

    /// Pipes are unbuffered; fails only if the stream is closed.
    pub fn flush(&self) -> Result<(), Error> {
        let pipe = self.live_pipe()?;
        let mut writer = &*pipe;
        std::io::Write::flush(&mut writer)?;
        Ok(())
    }

    /// Closes the stream, delivering end-of-file to the child. Idempotent.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        if !state.closed {
            state.closed = true;
            state.pipe = None;
            tracing::debug!(
                target: trace_categories::PIPES,
                pid = self.inner.context.pid,
                "closed {}",
                self.inner.context.name
            );
        }
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    fn live_pipe(&self) -> Result<Arc<os_pipe::PipeWriter>, Error> {
        let state = lock(&self.inner.state);
        match (&state.pipe, state.closed) {
            (Some(pipe), false) => Ok(Arc::clone(pipe)),
            _ => Err(StreamError::Closed.into()),
        }
    }

    /// Called by the monitor once the process has terminated. A stdin nobody wrote to is
    /// closed; one a caller claimed is left for the caller to close.
    pub(crate) fn on_process_exit(&self) {
        if !*lock(&self.inner.claimed) {
            self.close();
        }
    }
}

impl std::io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(Self::write(self, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(Self::flush(self)?)
    }
}

impl std::io::Write for &PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(PipeWriter::write(*self, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(PipeWriter::flush(*self)?)
    }
}
