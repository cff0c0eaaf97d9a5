use crate::config::{Config, QueuePolicy};
use crate::device::Device;
use crate::error::KeymasterError;
use crate::event_stream::EventStream;
use crate::monitor::{EventFilter, EventSink, Monitor, MonitorExit, MonitorHandle};
use crate::raw_input::RawInput;
use crate::KeymasterResult;
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::mem;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncRead;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A callback invoked with every event read from the monitored devices.
///
/// Clones of a `Listener` are the same listener: registering a clone of an already
/// registered listener has no effect.
///
/// Listeners run on the dispatcher thread, one after the other. A slow listener delays
/// all the others. Listeners must not register or unregister listeners themselves.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&RawInput) + Send + Sync>);

impl Listener {
    pub fn new(f: impl Fn(&RawInput) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn call(&self, input: &RawInput) {
        (self.0)(input)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener")
            .field(&(Arc::as_ptr(&self.0) as *const ()))
            .finish()
    }
}

/// An entry of the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Message {
    Input(RawInput),
    /// Stop the dispatcher once the events queued before this one are delivered.
    Close,
}

impl From<RawInput> for Message {
    /// The sentinel is the legacy shutdown marker: it closes the queue.
    fn from(input: RawInput) -> Self {
        if input.is_sentinel() {
            Message::Close
        } else {
            Message::Input(input)
        }
    }
}

/// Forwards the events of a monitor to the event queue.
struct QueueSink {
    queue: mpsc::Sender<Message>,
    policy: QueuePolicy,
}

#[async_trait]
impl EventSink for QueueSink {
    async fn forward(&mut self, input: RawInput) -> KeymasterResult<()> {
        match self.policy {
            QueuePolicy::Block => self
                .queue
                .send(Message::from(input))
                .await
                .map_err(|_| KeymasterError::QueueClosed),
            QueuePolicy::Reject => {
                self.queue
                    .try_send(Message::from(input))
                    .map_err(|e| match e {
                        TrySendError::Full(_) => KeymasterError::QueueFull,
                        TrySendError::Closed(_) => KeymasterError::QueueClosed,
                    })
            }
        }
    }
}

enum State {
    /// Created, waiting for `start`.
    Idle(mpsc::Receiver<Message>),
    Running { dispatcher: JoinHandle<()> },
    Stopped,
}

struct RunningMonitor {
    handle: MonitorHandle,
    task: JoinHandle<MonitorExit>,
}

/// Monitors input devices and dispatches their events to the registered listeners.
///
/// Every monitored device is read by its own task. The events accepted by a monitor go
/// through a bounded queue to a single dispatcher thread, which hands them to the
/// listeners in the order they were queued.
///
/// ```no_run
/// use keymaster::{find_keyboards, Config, KeyMaster, Listener};
///
/// # async fn run() -> keymaster::KeymasterResult<()> {
/// let keymaster = KeyMaster::new(Config::default())?;
/// keymaster.start()?;
/// keymaster.register_listener(&Listener::new(|ev| println!("{ev}")));
///
/// for keyboard in find_keyboards()? {
///     keymaster.monitor_device(&keyboard)?;
/// }
///
/// tokio::time::sleep(std::time::Duration::from_secs(10)).await;
/// keymaster.stop().await
/// # }
/// ```
pub struct KeyMaster {
    config: Config,
    queue: mpsc::Sender<Message>,
    listeners: Arc<Mutex<Vec<Listener>>>,
    state: Mutex<State>,
    monitors: Mutex<Vec<RunningMonitor>>,
}

impl KeyMaster {
    pub fn new(config: Config) -> KeymasterResult<Self> {
        config.validate()?;

        let (queue, rx) = mpsc::channel(config.queue_capacity);

        Ok(Self {
            config,
            queue,
            listeners: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(State::Idle(rx)),
            monitors: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the dispatcher. This must be called once, before any device is monitored.
    pub fn start(&self) -> KeymasterResult<()> {
        let mut state = lock(&self.state);

        match mem::replace(&mut *state, State::Stopped) {
            State::Idle(rx) => {
                let listeners = Arc::clone(&self.listeners);
                let dispatcher = tokio::task::spawn_blocking(move || dispatch(rx, &listeners));

                *state = State::Running { dispatcher };
                info!("dispatcher started");

                Ok(())
            }
            running @ State::Running { .. } => {
                *state = running;
                Err(KeymasterError::AlreadyStarted)
            }
            State::Stopped => Err(KeymasterError::Stopped),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.state), State::Running { .. })
    }

    /// Start monitoring the key events of the device whose event stream is at `path`.
    ///
    /// Fails with [`KeymasterError::Open`] if the stream can't be opened (typically
    /// because the user is not allowed to read it).
    pub fn monitor(&self, name: &str, path: impl AsRef<Path>) -> KeymasterResult<()> {
        self.ensure_running()?;

        let stream = EventStream::open(path).map_err(|e| {
            if self.config.print_failures {
                error!(device = %name, "{e}");
            }
            e
        })?;

        self.monitor_source(name, stream, EventFilter::default())
    }

    /// Start monitoring the key events of `device`.
    pub fn monitor_device(&self, device: &Device) -> KeymasterResult<()> {
        let path = device
            .event_stream_path()
            .ok_or_else(|| KeymasterError::NoEventHandler(device.name().to_string()))?;

        self.monitor(device.name(), path)
    }

    /// Start monitoring an already opened event stream, forwarding the events accepted
    /// by `filter`.
    pub fn monitor_source<R>(
        &self,
        name: impl Into<String>,
        source: R,
        filter: EventFilter,
    ) -> KeymasterResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        // Holding the state until the monitor is registered keeps `stop` from missing it.
        let state = lock(&self.state);
        check_running(&state)?;

        let name = name.into();
        let sink = QueueSink {
            queue: self.queue.clone(),
            policy: self.config.queue_policy,
        };
        let (monitor, handle) = Monitor::new(name.as_str(), source, filter, sink, &self.config);

        info!(device = %name, "creating monitor");
        let task = tokio::spawn(monitor.run());

        let mut monitors = lock(&self.monitors);
        monitors.retain(|m| !m.task.is_finished());
        monitors.push(RunningMonitor { handle, task });

        Ok(())
    }

    /// The names of the monitors that are still reading.
    pub fn monitored(&self) -> Vec<String> {
        lock(&self.monitors)
            .iter()
            .filter(|m| !m.task.is_finished())
            .map(|m| m.handle.name().to_string())
            .collect()
    }

    /// Register `listener`. Returns `false` if it was already registered.
    ///
    /// The listener receives the events dispatched after the current one.
    pub fn register_listener(&self, listener: &Listener) -> bool {
        let mut listeners = lock(&self.listeners);

        if listeners.contains(listener) {
            return false;
        }

        listeners.push(listener.clone());
        true
    }

    /// Unregister `listener`. Returns `false` if it wasn't registered.
    pub fn unregister_listener(&self, listener: &Listener) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();

        listeners.retain(|l| l != listener);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Stop the dispatcher and all the monitors.
    ///
    /// The events queued so far are delivered first. The background tasks get
    /// [`Config::shutdown_grace`] to finish, after which the monitors are aborted.
    pub async fn stop(&self) -> KeymasterResult<()> {
        let dispatcher = match mem::replace(&mut *lock(&self.state), State::Stopped) {
            State::Running { dispatcher } => Some(dispatcher),
            State::Idle(_) => None,
            State::Stopped => return Err(KeymasterError::Stopped),
        };

        let grace = self.config.shutdown_grace();

        if dispatcher.is_some() && timeout(grace, self.queue.send(Message::Close)).await.is_err() {
            warn!("event queue still full after {grace:?}");
        }

        let monitors = mem::take(&mut *lock(&self.monitors));
        let mut tasks = Vec::with_capacity(monitors.len());

        for monitor in monitors {
            monitor.handle.shutdown();
            tasks.push(monitor.task);
        }

        let aborts = tasks.iter().map(JoinHandle::abort_handle).collect::<Vec<_>>();
        let print_failures = self.config.print_failures;

        let finished = timeout(grace, async move {
            join_all(tasks).await;

            if let Some(dispatcher) = dispatcher {
                if let Err(e) = dispatcher.await {
                    if print_failures {
                        error!("dispatcher failed: {e}");
                    }
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!("background tasks still running after {grace:?}, aborting");

            for abort in aborts {
                abort.abort();
            }
        }

        info!("stopped");

        Ok(())
    }

    fn ensure_running(&self) -> KeymasterResult<()> {
        check_running(&lock(&self.state))
    }
}

fn check_running(state: &State) -> KeymasterResult<()> {
    match state {
        State::Running { .. } => Ok(()),
        State::Idle(_) => Err(KeymasterError::NotStarted),
        State::Stopped => Err(KeymasterError::Stopped),
    }
}

impl fmt::Debug for KeyMaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaster")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("monitored", &self.monitored())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Deliver the queued events until the queue is closed.
fn dispatch(mut queue: mpsc::Receiver<Message>, listeners: &Mutex<Vec<Listener>>) {
    loop {
        let input = match queue.blocking_recv() {
            Some(Message::Input(input)) => input,
            _ => break,
        };

        for listener in lock(listeners).iter() {
            listener.call(&input);
        }
    }

    debug!("dispatcher over");
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
