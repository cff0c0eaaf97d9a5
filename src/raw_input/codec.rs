//! The fixed-width record layout of the event stream.
//!
//! ```text
//!  0       8       16  18  20   24
//!  | sec   | usec  |ty |cd |val |
//! ```
//!
//! `sec`, `usec`, `ty` and `cd` are in native byte order, the way the kernel writes
//! `struct input_event`. `val` is stored byte-swapped: its four bytes are reversed
//! before being read as big-endian.

use crate::raw_input::{RawInput, TimeVal};
use futures::future::poll_fn;
use futures::ready;
use pin_project::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// The size of a single record.
pub const RECORD_SIZE: usize = 24;

/// The result of a single read from an event stream.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A full record was read.
    Record(RawInput),
    /// Fewer than [`RECORD_SIZE`] bytes were read. The partial record is discarded.
    Short(usize),
    /// A full record was read, but it decodes to [`RawInput::SENTINEL`].
    Reserved,
    /// The stream reached its end or was closed while reading.
    EndOfStream,
    /// The stream failed.
    Failed(io::Error),
}

/// Decode a single record.
pub fn decode(buf: &[u8; RECORD_SIZE]) -> RawInput {
    let mut value = field::<4>(buf, 20);
    value.reverse();

    RawInput {
        time: TimeVal {
            sec: i64::from_ne_bytes(field(buf, 0)),
            usec: i64::from_ne_bytes(field(buf, 8)),
        },
        kind: i16::from_ne_bytes(field(buf, 16)),
        code: i16::from_ne_bytes(field(buf, 18)),
        value: i32::from_be_bytes(value),
    }
}

/// Encode `input` using the layout understood by [`decode`].
pub fn encode(input: &RawInput) -> [u8; RECORD_SIZE] {
    let mut buf = [0; RECORD_SIZE];
    let mut value = input.value.to_be_bytes();
    value.reverse();

    buf[0..8].copy_from_slice(&input.time.sec.to_ne_bytes());
    buf[8..16].copy_from_slice(&input.time.usec.to_ne_bytes());
    buf[16..18].copy_from_slice(&input.kind.to_ne_bytes());
    buf[18..20].copy_from_slice(&input.code.to_ne_bytes());
    buf[20..24].copy_from_slice(&value);

    buf
}

fn field<const N: usize>(buf: &[u8; RECORD_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

/// Reads one record at a time from an event stream.
#[pin_project]
#[derive(Debug)]
pub struct RecordReader<R> {
    #[pin]
    inner: R,
    buf: [u8; RECORD_SIZE],
}

impl<R> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: [0; RECORD_SIZE],
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> RecordReader<R> {
    /// Attempt a single read of [`RECORD_SIZE`] bytes.
    pub fn poll_read_record(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ReadOutcome> {
        let this = self.project();

        let mut buf = ReadBuf::new(&mut this.buf[..]);
        let res = ready!(this.inner.poll_read(cx, &mut buf));
        let n = buf.filled().len();

        let outcome = match res {
            Err(e) if is_abrupt_close(&e) => ReadOutcome::EndOfStream,
            Err(e) => ReadOutcome::Failed(e),
            Ok(()) if n == 0 => ReadOutcome::EndOfStream,
            Ok(()) if n == RECORD_SIZE => {
                let input = decode(this.buf);

                if input.is_sentinel() {
                    ReadOutcome::Reserved
                } else {
                    ReadOutcome::Record(input)
                }
            }
            Ok(()) => ReadOutcome::Short(n),
        };

        Poll::Ready(outcome)
    }
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Read a single record.
    pub async fn read_record(&mut self) -> ReadOutcome {
        poll_fn(|cx| Pin::new(&mut *self).poll_read_record(cx)).await
    }
}

/// Check whether `err` means the stream was closed under a pending read.
fn is_abrupt_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    ) || err.raw_os_error() == Some(libc::EBADF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn key_press() -> RawInput {
        RawInput::new(TimeVal::new(1000, 2000), 1, 30, 1)
    }

    #[test]
    fn round_trip() {
        let decoded = decode(&encode(&key_press()));

        assert_eq!(decoded.time.sec, 1000);
        assert_eq!(decoded.time.usec, 2000);
        assert_eq!(decoded.kind, 1);
        assert_eq!(decoded.code, 30);
        assert_eq!(decoded.value, 1);
    }

    #[test]
    fn value_is_byte_swapped() {
        let buf = encode(&key_press());

        assert_eq!(&buf[0..8], &1000i64.to_ne_bytes());
        assert_eq!(&buf[16..18], &1i16.to_ne_bytes());
        assert_eq!(&buf[18..20], &30i16.to_ne_bytes());
        assert_eq!(&buf[20..24], &[1, 0, 0, 0]);
    }

    #[cfg(all(target_endian = "little", target_pointer_width = "64"))]
    #[test]
    fn decodes_kernel_records() {
        let event = libc::input_event {
            time: libc::timeval {
                tv_sec: 1000,
                tv_usec: 2000,
            },
            type_: crate::input_type::InputType::Key.code(),
            code: 30,
            value: 1,
        };
        // SAFETY: `input_event` is a plain C struct without padding on this target.
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &event as *const libc::input_event as *const u8,
                std::mem::size_of::<libc::input_event>(),
            )
        };
        let mut buf = [0; RECORD_SIZE];
        buf.copy_from_slice(bytes);

        let input = decode(&buf);

        assert_eq!(input, key_press());
        assert!(crate::monitor::EventFilter::default().accepts(&input));
    }

    #[test]
    fn decodes_negative_fields() {
        let input = RawInput::new(TimeVal::new(-5, 999_999), -2, i16::MAX, i32::MIN);

        assert_eq!(decode(&encode(&input)), input);
    }

    #[tokio::test]
    async fn reads_full_records() {
        let first = encode(&key_press());
        let second = encode(&RawInput::new(TimeVal::new(1001, 0), 1, 30, 0));
        let mut reader = RecordReader::new(Builder::new().read(&first).read(&second).build());

        assert!(matches!(reader.read_record().await, ReadOutcome::Record(r) if r == key_press()));
        assert!(matches!(reader.read_record().await, ReadOutcome::Record(r) if r.value == 0));
        assert!(matches!(reader.read_record().await, ReadOutcome::EndOfStream));
    }

    #[tokio::test]
    async fn short_reads_are_discarded() {
        let record = encode(&key_press());
        let mut reader =
            RecordReader::new(Builder::new().read(&record[..10]).read(&record).build());

        assert!(matches!(reader.read_record().await, ReadOutcome::Short(10)));
        assert!(matches!(reader.read_record().await, ReadOutcome::Record(r) if r == key_press()));
    }

    #[tokio::test]
    async fn sentinel_records_are_never_yielded() {
        let mut reader = RecordReader::new(Builder::new().read(&[0xff; RECORD_SIZE]).build());

        assert!(matches!(reader.read_record().await, ReadOutcome::Reserved));
    }

    #[tokio::test]
    async fn abrupt_close_ends_the_stream() {
        let mut reader = RecordReader::new(
            Builder::new()
                .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
                .build(),
        );

        assert!(matches!(reader.read_record().await, ReadOutcome::EndOfStream));
    }

    #[tokio::test]
    async fn other_errors_are_reported() {
        let mut reader = RecordReader::new(
            Builder::new()
                .read_error(io::Error::from_raw_os_error(libc::ENODEV))
                .build(),
        );

        assert!(matches!(reader.read_record().await, ReadOutcome::Failed(_)));
    }
}
