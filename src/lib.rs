//! This crate discovers the keyboards of a Linux machine and streams their key events to
//! registered listeners.
//!
//! The input devices are listed by [`read_devices`], which parses the kernel's device
//! registry (`/proc/bus/input/devices`). [`find_keyboards`] keeps the devices that look
//! like keyboards. A [`KeyMaster`] reads the event stream of each monitored device on its
//! own task and hands every key event to the registered [`Listener`]s, in arrival order.
//!
//! # Example
//!
//! A simple example that prints the captured key events to stdout. Note the event
//! streams are usually only readable by root or by the members of the `input` group.
//!
//! ```no_run
//! use keymaster::{find_keyboards, Config, KeyMaster, KeymasterError, Listener};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), KeymasterError> {
//!     let keymaster = KeyMaster::new(Config::default())?;
//!     keymaster.start()?;
//!     keymaster.register_listener(&Listener::new(|ev| println!("{ev}")));
//!
//!     for keyboard in find_keyboards()? {
//!         keymaster.monitor_device(&keyboard)?;
//!     }
//!
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!     keymaster.stop().await
//! }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("This crate only works on Linux");

mod config;
mod device;
mod error;
mod event_stream;
mod input_type;
mod keymaster;
mod monitor;
mod raw_input;

pub use config::{Config, QueuePolicy};
pub use device::{
    find_keyboards, parse_devices, read_devices, read_devices_from, Device, DeviceId,
    DEVICE_REGISTRY, INPUT_DIR,
};
pub use error::KeymasterError;
pub use event_stream::EventStream;
pub use input_type::InputType;
pub use keymaster::{KeyMaster, Listener};
pub use monitor::{EventFilter, EventSink, Monitor, MonitorExit, MonitorHandle};
pub use raw_input::{
    decode, encode, KeyAction, KeyEvent, RawInput, ReadOutcome, RecordReader, TimeVal,
    RECORD_SIZE,
};

pub type KeymasterResult<T> = Result<T, KeymasterError>;
