use std::time::Duration;

pub(crate) fn open_null() -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().read(true).write(true).open("NUL")
}

pub(crate) fn bytes_available(_pipe: &os_pipe::PipeReader) -> std::io::Result<usize> {
    Ok(0)
}

/// Without readiness polling, callers fall back to a blocking read.
pub(crate) fn wait_readable(
    _pipe: &os_pipe::PipeReader,
    _timeout: Duration,
) -> std::io::Result<bool> {
    Ok(true)
}

pub(crate) fn drain_available(
    _pipe: &os_pipe::PipeReader,
    _out: &mut Vec<u8>,
) -> std::io::Result<()> {
    Ok(())
}
