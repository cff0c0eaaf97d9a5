mod parser;

use crate::input_type::InputType;
use crate::KeymasterResult;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub use parser::parse_devices;

/// The registry of input devices exposed by the kernel.
pub const DEVICE_REGISTRY: &str = "/proc/bus/input/devices";

/// The directory holding the event character devices.
pub const INPUT_DIR: &str = "/dev/input";

/// The prefix of the handlers that expose an event stream.
const EVENT_HANDLER_PREFIX: &str = "event";

/// The identity of an input device (the `I:` line of the registry).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// An input device, as described by the device registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub(crate) id: DeviceId,
    pub(crate) name: String,
    pub(crate) phys: String,
    pub(crate) sysfs: String,
    pub(crate) uniq: String,
    pub(crate) handlers: BTreeSet<String>,
    pub(crate) bitmaps: HashMap<String, Vec<String>>,
}

impl Device {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// The display name of the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The physical path of the device (e.g. `isa0060/serio0/input0`).
    pub fn phys(&self) -> &str {
        &self.phys
    }

    /// The sysfs path of the device (e.g. `/devices/platform/i8042/serio0/input/input3`).
    pub fn sysfs(&self) -> &str {
        &self.sysfs
    }

    pub fn uniq(&self) -> &str {
        &self.uniq
    }

    /// The names of the handlers bound to the device (e.g. `kbd`, `event3`).
    pub fn handlers(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(String::as_str)
    }

    /// The hexadecimal words of the bitmap named `category` (e.g. `EV`, `KEY`).
    pub fn bitmap(&self, category: &str) -> Option<&[String]> {
        self.bitmaps.get(category).map(Vec::as_slice)
    }

    /// Only records with a sysfs path describe a real device.
    pub(crate) fn is_valid(&self) -> bool {
        !self.sysfs.is_empty()
    }

    /// The event types supported by the device, decoded from the first word of its `EV`
    /// bitmap.
    ///
    /// Returns `None` if the bitmap is missing, empty or not valid hexadecimal.
    pub fn ev_bitmap(&self) -> Option<u64> {
        let word = self.bitmap("EV")?.first()?;

        u64::from_str_radix(word, 16).ok()
    }

    /// Check whether the device emits events of type `ty`.
    pub fn supports(&self, ty: InputType) -> bool {
        self.ev_bitmap().map_or(false, |flags| flags & ty.bit() != 0)
    }

    /// Check whether the device is a keyboard.
    ///
    /// Keyboards report synchronization, key, miscellaneous and autorepeat events.
    pub fn is_keyboard(&self) -> bool {
        const KEYBOARD_FLAGS: u64 = InputType::Syn.bit()
            | InputType::Key.bit()
            | InputType::Msc.bit()
            | InputType::Rep.bit();

        self.ev_bitmap()
            .map_or(false, |flags| flags & KEYBOARD_FLAGS == KEYBOARD_FLAGS)
    }

    /// The path of the character device streaming the events of this device (e.g.
    /// `/dev/input/event3`).
    ///
    /// Returns `None` if none of the handlers exposes an event stream.
    pub fn event_stream_path(&self) -> Option<PathBuf> {
        self.handlers
            .iter()
            .find(|h| h.starts_with(EVENT_HANDLER_PREFIX))
            .map(|h| Path::new(INPUT_DIR).join(h))
    }
}

/// Read all the devices listed in the kernel's device registry.
pub fn read_devices() -> KeymasterResult<Vec<Device>> {
    read_devices_from(DEVICE_REGISTRY)
}

/// Read all the devices listed in the device registry at `path`.
pub fn read_devices_from(path: impl AsRef<Path>) -> KeymasterResult<Vec<Device>> {
    let registry = fs::read_to_string(path)?;

    parse_devices(&registry)
}

/// Find the keyboards that can be monitored.
pub fn find_keyboards() -> KeymasterResult<Vec<Device>> {
    Ok(read_devices()?
        .into_iter()
        .filter(|d| d.is_keyboard() && d.event_stream_path().is_some())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(ev: Option<&str>, handlers: &[&str]) -> Device {
        let mut bitmaps = HashMap::new();
        if let Some(ev) = ev {
            bitmaps.insert("EV".to_string(), vec![ev.to_string()]);
        }

        Device {
            sysfs: "/devices/virtual/input/input0".into(),
            handlers: handlers.iter().map(|h| h.to_string()).collect(),
            bitmaps,
            ..Default::default()
        }
    }

    #[test]
    fn detects_keyboards() {
        // A typical AT keyboard: SYN, KEY, MSC, LED and REP.
        assert!(device(Some("120013"), &[]).is_keyboard());
        // Exactly the four required bits.
        assert!(device(Some("100013"), &[]).is_keyboard());
    }

    #[test]
    fn rejects_non_keyboards() {
        // A mouse: SYN, KEY, REL, MSC but no REP.
        assert!(!device(Some("17"), &[]).is_keyboard());
        // A power button: SYN and KEY only.
        assert!(!device(Some("3"), &[]).is_keyboard());
        assert!(!device(Some("0"), &[]).is_keyboard());
        assert!(!device(None, &[]).is_keyboard());
        assert!(!device(Some("not-hex"), &[]).is_keyboard());
    }

    #[test]
    fn ev_bitmap_absent() {
        assert_eq!(device(None, &[]).ev_bitmap(), None);

        let mut empty = device(None, &[]);
        empty.bitmaps.insert("EV".into(), Vec::new());
        assert_eq!(empty.ev_bitmap(), None);
    }

    #[test]
    fn supports_individual_types() {
        let mouse = device(Some("17"), &[]);

        assert!(mouse.supports(InputType::Rel));
        assert!(mouse.supports(InputType::Msc));
        assert!(!mouse.supports(InputType::Abs));
        assert!(!mouse.supports(InputType::Rep));
    }

    #[test]
    fn resolves_event_stream_path() {
        let kbd = device(Some("120013"), &["kbd", "event3", "mouse0"]);

        assert_eq!(
            kbd.event_stream_path(),
            Some(PathBuf::from("/dev/input/event3"))
        );
    }

    #[test]
    fn no_event_handler() {
        assert_eq!(device(None, &["kbd", "mouse0"]).event_stream_path(), None);
        assert_eq!(device(None, &[]).event_stream_path(), None);
    }

    #[test]
    fn reads_registry_from_file() {
        let path = std::env::temp_dir().join(format!("keymaster-{}", std::process::id()));
        fs::write(
            &path,
            "I: Bus=0011 Vendor=0001 Product=0001 Version=ab41\n\
             N: Name=\"AT Translated Set 2 keyboard\"\n\
             S: Sysfs=/devices/platform/i8042/serio0/input/input3\n\
             H: Handlers=sysrq kbd event3 leds\n\
             B: EV=120013\n\n",
        )
        .unwrap();

        let devices = read_devices_from(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_keyboard());
        assert_eq!(devices[0].name(), "AT Translated Set 2 keyboard");
    }

    #[test]
    fn missing_registry_is_an_io_error() {
        assert!(matches!(
            read_devices_from("/nonexistent/keymaster/devices"),
            Err(crate::KeymasterError::Io(_))
        ));
    }
}
