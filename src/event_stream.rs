use crate::error::KeymasterError;
use crate::KeymasterResult;
use futures::ready;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, ReadBuf};

/// The event stream of an input device (e.g. `/dev/input/event3`).
///
/// The device file is opened read-only and in non-blocking mode. Dropping the stream
/// closes the file.
#[derive(Debug)]
pub struct EventStream {
    path: PathBuf,
    async_fd: AsyncFd<File>,
}

impl EventStream {
    /// Open the event stream at `path`.
    ///
    /// This must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>) -> KeymasterResult<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| KeymasterError::Open {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).map_err(open_err)?;
        set_nonblocking(&file).map_err(open_err)?;
        let async_fd = AsyncFd::new(file).map_err(open_err)?;

        Ok(Self { path, async_fd })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsyncRead for EventStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            let mut guard = ready!(this.async_fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();

            match guard.try_io(|inner| read(inner.as_raw_fd(), unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Set the `O_NONBLOCK` flag for the specified file.
fn set_nonblocking(f: &File) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(f.as_raw_fd(), libc::F_GETFL) };

    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let res = unsafe { libc::fcntl(f.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };

    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(n as usize)
}
