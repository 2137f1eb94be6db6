//! Descriptor-level helpers for the parent side of child pipes.

use std::io::Read;
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;
use std::time::Duration;

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

const NULL_DEVICE: &str = "/dev/null";

/// Opens the null device for reading and writing.
pub(crate) fn open_null() -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(Path::new(NULL_DEVICE))
}

/// Returns the number of bytes readable from the pipe without blocking.
///
/// N.B. nix only offers macros for generating ioctl wrappers, not a `FIONREAD` call, so the
/// ioctl is issued directly.
pub(crate) fn bytes_available(pipe: &os_pipe::PipeReader) -> std::io::Result<usize> {
    let mut count: nix::libc::c_int = 0;

    // SAFETY: FIONREAD stores a single c_int through the pointer, which is valid for the
    // duration of the call.
    let rc = unsafe { nix::libc::ioctl(pipe.as_raw_fd(), nix::libc::FIONREAD, &raw mut count) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(usize::try_from(count).unwrap_or(0))
}

/// Waits up to `timeout` for the pipe to become readable. End-of-file and errors count as
/// readable, so the caller's next read reports them.
pub(crate) fn wait_readable(
    pipe: &os_pipe::PipeReader,
    timeout: Duration,
) -> std::io::Result<bool> {
    let mut poll_fds = [PollFd::new(pipe.as_fd(), PollFlags::POLLIN)];
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let poll_timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX);

    match poll(&mut poll_fds, poll_timeout) {
        Ok(0) | Err(nix::errno::Errno::EINTR) => Ok(false),
        Ok(_) => {
            let revents = poll_fds[0].revents().unwrap_or(PollFlags::empty());
            Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
        }
        Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
    }
}

/// Switches the pipe to non-blocking mode and appends everything currently buffered in it to
/// `out`. Stops at end-of-file or when no more data is ready. Bytes read before an error are
/// kept in `out`.
pub(crate) fn drain_available(
    pipe: &os_pipe::PipeReader,
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    set_nonblocking(pipe)?;

    let mut chunk = [0u8; 4096];
    let mut reader = pipe;
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e),
        }
    }
}

fn set_nonblocking(pipe: &os_pipe::PipeReader) -> std::io::Result<()> {
    let flags = OFlag::from_bits_retain(fcntl(pipe, FcntlArg::F_GETFL)?);
    fcntl(pipe, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn available_counts_buffered_bytes() -> anyhow::Result<()> {
        let (reader, mut writer) = os_pipe::pipe()?;
        assert_eq!(bytes_available(&reader)?, 0);

        writer.write_all(b"abc")?;
        assert_eq!(bytes_available(&reader)?, 3);
        Ok(())
    }

    #[test]
    fn drain_stops_without_blocking() -> anyhow::Result<()> {
        let (reader, mut writer) = os_pipe::pipe()?;
        writer.write_all(b"pending")?;

        let mut out = Vec::new();
        drain_available(&reader, &mut out)?;
        assert_eq!(out, b"pending");

        // Writer still open: nothing further, but no block either.
        drain_available(&reader, &mut out)?;
        assert_eq!(out, b"pending");
        Ok(())
    }

    #[test]
    fn closed_writer_makes_pipe_readable() -> anyhow::Result<()> {
        let (reader, writer) = os_pipe::pipe()?;
        assert!(!wait_readable(&reader, Duration::from_millis(10))?);

        drop(writer);
        assert!(wait_readable(&reader, Duration::from_millis(10))?);
        Ok(())
    }
}
