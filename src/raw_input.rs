pub(crate) mod codec;

use crate::error::KeymasterError;
use crate::input_type::InputType;
use chrono::{DateTime, Utc};
use std::convert::TryFrom;
use std::fmt;

pub use codec::{decode, encode, ReadOutcome, RecordReader, RECORD_SIZE};

/// The `value` of an EV_KEY caused by a key being released.
const EV_KEY_RELEASE: i32 = 0;
/// The `value` of an EV_KEY caused by a key press.
const EV_KEY_PRESS: i32 = 1;
/// The `value` of an EV_KEY caused by autorepeat.
const EV_KEY_REPEAT: i32 = 2;

/// The timestamp of an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i64,
}

impl TimeVal {
    pub fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }

    /// Convert the timestamp to a date, if it is representable.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let nsec = self.usec.checked_mul(1000)?.try_into().ok()?;

        DateTime::<Utc>::from_timestamp(self.sec, nsec)
    }
}

/// A single event read from an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawInput {
    pub time: TimeVal,
    /// The event type (see [`InputType`]).
    pub kind: i16,
    /// The event code (e.g. the key code of an EV_KEY).
    pub code: i16,
    pub value: i32,
}

impl RawInput {
    /// A value no device produces. Used to stop the dispatcher.
    pub const SENTINEL: RawInput = RawInput {
        time: TimeVal { sec: -1, usec: -1 },
        kind: -1,
        code: -1,
        value: -1,
    };

    pub fn new(time: TimeVal, kind: i16, code: i16, value: i32) -> Self {
        Self {
            time,
            kind,
            code,
            value,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    /// Resolve the type of the event.
    pub fn input_type(&self) -> Result<InputType, KeymasterError> {
        InputType::from_code(self.kind as u16)
    }

    /// Interpret the event as a key event.
    pub fn to_key_event(&self) -> Result<KeyEvent, KeymasterError> {
        KeyEvent::try_from(self)
    }
}

impl fmt::Display for RawInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = InputType::from_code(self.kind as u16)
            .map(InputType::name)
            .unwrap_or("EV_?");

        write!(
            f,
            "{}.{:06} {kind}({:#04x}) code={} value={}",
            self.time.sec, self.time.usec, self.kind, self.code, self.value
        )
    }
}

/// A key event (EV_KEY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// The timestamp of the event.
    pub ts: Option<DateTime<Utc>>,
    /// The action that triggered the event.
    pub action: KeyAction,
    /// The key code of the key that triggered the event.
    pub code: u16,
}

/// The reason a `KeyEvent` fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// The key was released.
    Release,
    /// The key was pressed.
    Press,
    /// The key is being held down.
    Repeat,
}

impl TryFrom<&RawInput> for KeyEvent {
    type Error = KeymasterError;

    fn try_from(ev: &RawInput) -> Result<Self, Self::Error> {
        if ev.kind as u16 != InputType::Key.code() {
            return Err(KeymasterError::InvalidKeyEvent(format!(
                "not an EV_KEY: {:#04x}",
                ev.kind
            )));
        }

        let action = match ev.value {
            EV_KEY_RELEASE => KeyAction::Release,
            EV_KEY_PRESS => KeyAction::Press,
            EV_KEY_REPEAT => KeyAction::Repeat,
            n => {
                return Err(KeymasterError::InvalidKeyEvent(format!(
                    "invalid value for EV_KEY: {n}"
                )))
            }
        };

        Ok(Self {
            ts: ev.time.to_datetime(),
            action,
            code: ev.code as u16,
        })
    }
}
