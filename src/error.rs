use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeymasterError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid {field} in device id: {value:?}")]
    InvalidDeviceId {
        field: &'static str,
        value: String,
        #[source]
        source: Option<ParseIntError>,
    },
    #[error("cannot open '{}': {source} (is the user a member of the input group?)", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("device {0:?} has no event handler")]
    NoEventHandler(String),
    #[error("unknown input category: {0:#04x}")]
    UnknownCategory(u16),
    #[error("invalid key event: {0}")]
    InvalidKeyEvent(String),
    #[error("event queue is full")]
    QueueFull,
    #[error("event queue is closed")]
    QueueClosed,
    #[error("dispatcher has not been started")]
    NotStarted,
    #[error("dispatcher is already running")]
    AlreadyStarted,
    #[error("dispatcher has been stopped")]
    Stopped,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    ConfigFormat(#[from] toml::de::Error),
}
