use crate::config::Config;
use crate::input_type::InputType;
use crate::raw_input::{RawInput, ReadOutcome, RecordReader};
use crate::KeymasterResult;
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

/// Selects the events a [`Monitor`] forwards, by event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kinds: Vec<u16>,
}

impl EventFilter {
    /// Accept events of type `ty` only.
    pub fn only(ty: InputType) -> Self {
        Self::any_of([ty])
    }

    /// Accept events of any of the specified types.
    pub fn any_of(types: impl IntoIterator<Item = InputType>) -> Self {
        Self {
            kinds: types.into_iter().map(InputType::code).collect(),
        }
    }

    pub fn accepts(&self, input: &RawInput) -> bool {
        self.kinds.contains(&(input.kind as u16))
    }
}

impl Default for EventFilter {
    /// Key events (EV_KEY).
    fn default() -> Self {
        Self::only(InputType::Key)
    }
}

/// The destination of the events accepted by a [`Monitor`].
#[async_trait]
pub trait EventSink: Send {
    /// Deliver a single event. An error stops the monitor.
    async fn forward(&mut self, input: RawInput) -> KeymasterResult<()>;
}

/// Why a [`Monitor`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The device stream reached its end.
    EndOfStream,
    /// The monitor was shut down through its [`MonitorHandle`].
    Shutdown,
    /// Reading from the device failed.
    Failed,
    /// The sink refused an event.
    SinkFailed,
}

/// Reads the events of a single device and forwards the ones accepted by its filter.
///
/// The monitor owns the device stream: the stream is closed when [`Monitor::run`]
/// returns.
pub struct Monitor<R, S> {
    name: String,
    reader: RecordReader<R>,
    filter: EventFilter,
    sink: S,
    closed: watch::Receiver<bool>,
    config: Config,
}

/// Shuts a [`Monitor`] down. Dropping the handle shuts the monitor down too.
#[derive(Debug)]
pub struct MonitorHandle {
    name: String,
    closed: watch::Sender<bool>,
}

impl MonitorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the monitor, interrupting any pending read. Calling this more than once has
    /// no effect.
    pub fn shutdown(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.closed.borrow()
    }
}

impl<R, S> Monitor<R, S>
where
    R: AsyncRead + Unpin + Send,
    S: EventSink,
{
    pub fn new(
        name: impl Into<String>,
        source: R,
        filter: EventFilter,
        sink: S,
        config: &Config,
    ) -> (Self, MonitorHandle) {
        let name = name.into();
        let (tx, rx) = watch::channel(false);

        let monitor = Self {
            name: name.clone(),
            reader: RecordReader::new(source),
            filter,
            sink,
            closed: rx,
            config: config.clone(),
        };

        (monitor, MonitorHandle { name, closed: tx })
    }

    /// Read events until the stream ends, fails, or the monitor is shut down.
    pub async fn run(self) -> MonitorExit {
        let Monitor {
            name,
            mut reader,
            filter,
            mut sink,
            mut closed,
            config,
        } = self;

        let exit = loop {
            let outcome = tokio::select! {
                biased;
                _ = shut_down(&mut closed) => None,
                outcome = reader.read_record() => Some(outcome),
            };

            let Some(outcome) = outcome else {
                break MonitorExit::Shutdown;
            };

            let input = match outcome {
                ReadOutcome::Record(input) => input,
                ReadOutcome::Short(n) => {
                    if config.trace_events {
                        trace!(device = %name, "discarding partial record ({n} bytes)");
                    }
                    continue;
                }
                ReadOutcome::Reserved => continue,
                ReadOutcome::EndOfStream => break MonitorExit::EndOfStream,
                ReadOutcome::Failed(e) => {
                    if config.print_failures {
                        error!(device = %name, "failed to read event: {e}");
                    }
                    break MonitorExit::Failed;
                }
            };

            if !filter.accepts(&input) {
                continue;
            }

            if config.trace_events {
                trace!(device = %name, "{input}");
            }

            let forwarded = tokio::select! {
                biased;
                _ = shut_down(&mut closed) => None,
                res = sink.forward(input) => Some(res),
            };

            match forwarded {
                None => break MonitorExit::Shutdown,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    if config.print_failures {
                        warn!(device = %name, "failed to forward event: {e}");
                    }
                    break MonitorExit::SinkFailed;
                }
            }
        };

        if config.trace_events {
            debug!(device = %name, ?exit, "monitor over");
        }

        exit
    }
}

/// Resolves once the monitor is shut down or its handle is dropped.
async fn shut_down(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeymasterError;
    use crate::raw_input::{encode, TimeVal};
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<RawInput>>>);

    impl Collect {
        fn events(&self) -> Vec<RawInput> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSink for Collect {
        async fn forward(&mut self, input: RawInput) -> KeymasterResult<()> {
            self.0.lock().unwrap().push(input);
            Ok(())
        }
    }

    struct Refuse;

    #[async_trait]
    impl EventSink for Refuse {
        async fn forward(&mut self, _input: RawInput) -> KeymasterResult<()> {
            Err(KeymasterError::QueueFull)
        }
    }

    fn event(kind: InputType, code: i16, value: i32) -> [u8; 24] {
        encode(&RawInput::new(TimeVal::new(10, 20), kind.code() as i16, code, value))
    }

    #[tokio::test]
    async fn forwards_key_events_only() {
        let source = Builder::new()
            .read(&event(InputType::Msc, 4, 30))
            .read(&event(InputType::Key, 30, 1))
            .read(&event(InputType::Syn, 0, 0))
            .read(&event(InputType::Rel, 0, -3))
            .read(&event(InputType::Key, 30, 0))
            .build();
        let sink = Collect::default();
        let (monitor, _handle) =
            Monitor::new("kbd", source, EventFilter::default(), sink.clone(), &Config::default());

        assert_eq!(monitor.run().await, MonitorExit::EndOfStream);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].code, events[0].value), (30, 1));
        assert_eq!((events[1].code, events[1].value), (30, 0));
    }

    #[tokio::test]
    async fn custom_filter() {
        let source = Builder::new()
            .read(&event(InputType::Key, 272, 1))
            .read(&event(InputType::Rel, 0, -3))
            .build();
        let sink = Collect::default();
        let (monitor, _handle) = Monitor::new(
            "mouse",
            source,
            EventFilter::only(InputType::Rel),
            sink.clone(),
            &Config::default(),
        );

        monitor.run().await;

        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].value, -3);
    }

    #[tokio::test]
    async fn short_reads_do_not_stop_the_monitor() {
        let key = event(InputType::Key, 30, 1);
        let source = Builder::new().read(&key[..7]).read(&key).build();
        let sink = Collect::default();
        let (monitor, _handle) =
            Monitor::new("kbd", source, EventFilter::default(), sink.clone(), &Config::default());

        assert_eq!(monitor.run().await, MonitorExit::EndOfStream);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn read_failure_is_terminal() {
        let source = Builder::new()
            .read_error(io::Error::from_raw_os_error(libc::ENODEV))
            .build();
        let (monitor, _handle) = Monitor::new(
            "kbd",
            source,
            EventFilter::default(),
            Collect::default(),
            &Config::default(),
        );

        assert_eq!(monitor.run().await, MonitorExit::Failed);
    }

    #[tokio::test]
    async fn sink_failure_is_terminal() {
        let source = Builder::new().read(&event(InputType::Key, 30, 1)).build();
        let (monitor, _handle) =
            Monitor::new("kbd", source, EventFilter::default(), Refuse, &Config::default());

        assert_eq!(monitor.run().await, MonitorExit::SinkFailed);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_pending_read() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let sink = Collect::default();
        let (monitor, handle) =
            Monitor::new("kbd", reader, EventFilter::default(), sink.clone(), &Config::default());
        let task = tokio::spawn(monitor.run());

        writer.write_all(&event(InputType::Key, 30, 1)).await.unwrap();
        while sink.events().is_empty() {
            tokio::task::yield_now().await;
        }

        handle.shutdown();
        handle.shutdown();

        assert!(handle.is_shut_down());
        assert_eq!(task.await.unwrap(), MonitorExit::Shutdown);
        assert_eq!(sink.events().len(), 1);
        // The stream was closed along with the monitor.
        assert!(writer.write_all(&[0; 24]).await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_monitor() {
        let (_writer, reader) = tokio::io::duplex(64);
        let (monitor, handle) = Monitor::new(
            "kbd",
            reader,
            EventFilter::default(),
            Collect::default(),
            &Config::default(),
        );
        let task = tokio::spawn(monitor.run());

        drop(handle);

        assert_eq!(task.await.unwrap(), MonitorExit::Shutdown);
    }
}
