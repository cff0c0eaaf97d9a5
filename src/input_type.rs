use crate::error::KeymasterError;
use std::convert::TryFrom;
use std::fmt;

/// Event types understood by the input subsystem (see [input-event-codes.h] and the
/// [kernel docs]).
///
/// [input-event-codes.h]: https://elixir.bootlin.com/linux/v5.19.17/source/include/uapi/linux/input-event-codes.h#L38
/// [kernel docs]: https://www.kernel.org/doc/html/latest/input/event-codes.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    Syn = 0x00,
    Key = 0x01,
    Rel = 0x02,
    Abs = 0x03,
    Msc = 0x04,
    Sw = 0x05,
    Led = 0x11,
    Snd = 0x12,
    Rep = 0x14,
    Ff = 0x15,
    Pwr = 0x16,
    FfStatus = 0x17,
    Max = 0x1f,
    Cnt = 0x20,
}

impl InputType {
    /// The raw category code.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// The mask of this category within an `EV` capability bitmap.
    pub const fn bit(self) -> u64 {
        1 << self.code()
    }

    /// The kernel's name for this category.
    pub fn name(self) -> &'static str {
        match self {
            InputType::Syn => "EV_SYN",
            InputType::Key => "EV_KEY",
            InputType::Rel => "EV_REL",
            InputType::Abs => "EV_ABS",
            InputType::Msc => "EV_MSC",
            InputType::Sw => "EV_SW",
            InputType::Led => "EV_LED",
            InputType::Snd => "EV_SND",
            InputType::Rep => "EV_REP",
            InputType::Ff => "EV_FF",
            InputType::Pwr => "EV_PWR",
            InputType::FfStatus => "EV_FF_STATUS",
            InputType::Max => "EV_MAX",
            InputType::Cnt => "EV_CNT",
        }
    }

    /// Resolve a raw category code.
    pub fn from_code(code: u16) -> Result<Self, KeymasterError> {
        let ty = match code {
            0x00 => InputType::Syn,
            0x01 => InputType::Key,
            0x02 => InputType::Rel,
            0x03 => InputType::Abs,
            0x04 => InputType::Msc,
            0x05 => InputType::Sw,
            0x11 => InputType::Led,
            0x12 => InputType::Snd,
            0x14 => InputType::Rep,
            0x15 => InputType::Ff,
            0x16 => InputType::Pwr,
            0x17 => InputType::FfStatus,
            0x1f => InputType::Max,
            0x20 => InputType::Cnt,
            n => return Err(KeymasterError::UnknownCategory(n)),
        };

        Ok(ty)
    }
}

impl TryFrom<u16> for InputType {
    type Error = KeymasterError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
