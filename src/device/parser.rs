//! Parser for the device registry (`/proc/bus/input/devices`).
//!
//! The registry lists one block of lines per device, separated by blank lines:
//!
//! ```text
//! I: Bus=0011 Vendor=0001 Product=0001 Version=ab41
//! N: Name="AT Translated Set 2 keyboard"
//! P: Phys=isa0060/serio0/input0
//! S: Sysfs=/devices/platform/i8042/serio0/input/input3
//! U: Uniq=
//! H: Handlers=sysrq kbd event3 leds
//! B: PROP=0
//! B: EV=120013
//! B: KEY=402000000 3803078f800d001 feffffdfffefffff fffffffffffffffe
//! ```

use crate::device::{Device, DeviceId};
use crate::error::KeymasterError;
use crate::KeymasterResult;
use std::collections::{BTreeSet, HashMap};

/// Width of the `X: ` prefix of each line.
const TAG_WIDTH: usize = 3;

/// Parse the contents of the device registry.
///
/// Blocks without a sysfs path are dropped. A malformed device id fails the whole call.
pub fn parse_devices(registry: &str) -> KeymasterResult<Vec<Device>> {
    let mut devices = Vec::new();
    let mut block = Vec::new();

    for line in registry.lines() {
        if line.trim().is_empty() {
            if !block.is_empty() {
                devices.extend(parse_device(&block)?);
                block.clear();
            }
        } else {
            block.push(line);
        }
    }

    if !block.is_empty() {
        devices.extend(parse_device(&block)?);
    }

    Ok(devices)
}

/// Parse a single block. Returns `None` if the block doesn't describe a valid device.
fn parse_device(lines: &[&str]) -> KeymasterResult<Option<Device>> {
    let mut device = Device::default();

    for line in lines {
        let (Some(tag), Some(value)) = (line.chars().next(), line.get(TAG_WIDTH..)) else {
            continue;
        };

        match tag {
            'I' => device.id = parse_id(value)?,
            'N' => device.name = parse_name(value),
            'P' => device.phys = strip_key(value, "Phys=").to_string(),
            'S' => device.sysfs = strip_key(value, "Sysfs=").to_string(),
            'U' => device.uniq = strip_key(value, "Uniq=").to_string(),
            'H' => device.handlers = parse_handlers(value),
            'B' => {
                if let Some((category, words)) = parse_bitmap(value) {
                    device.bitmaps.insert(category, words);
                }
            }
            _ => {}
        }
    }

    Ok(device.is_valid().then_some(device))
}

/// Parse `Bus=0011 Vendor=0001 Product=0001 Version=ab41`. Missing fields default to 0.
fn parse_id(value: &str) -> KeymasterResult<DeviceId> {
    let mut fields: HashMap<&str, &str> = HashMap::new();

    for part in value.split(' ') {
        let (key, hex) = part.split_once('=').unwrap_or((part, ""));
        fields.insert(key, hex);
    }

    let parse = |field: &'static str| -> KeymasterResult<u16> {
        let hex = fields.get(field).copied().unwrap_or("0000");
        let invalid = |source| KeymasterError::InvalidDeviceId {
            field,
            value: hex.to_string(),
            source,
        };

        // `from_str_radix` would also take a sign.
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid(None));
        }

        u16::from_str_radix(hex, 16).map_err(|e| invalid(Some(e)))
    };

    Ok(DeviceId {
        bus: parse("Bus")?,
        vendor: parse("Vendor")?,
        product: parse("Product")?,
        version: parse("Version")?,
    })
}

/// Parse `Name="..."`.
fn parse_name(value: &str) -> String {
    let name = strip_key(value, "Name=");
    let name = name.strip_prefix('"').unwrap_or(name);

    name.strip_suffix('"').unwrap_or(name).to_string()
}

/// Parse `Handlers=sysrq kbd event3 leds `.
fn parse_handlers(value: &str) -> BTreeSet<String> {
    strip_key(value, "Handlers=")
        .split(' ')
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `KEY=402000000 3803078f800d001 ...` into the category and its words.
fn parse_bitmap(value: &str) -> Option<(String, Vec<String>)> {
    let (category, words) = value.split_once('=')?;

    Some((
        category.to_string(),
        words.split_whitespace().map(str::to_string).collect(),
    ))
}

fn strip_key<'a>(value: &'a str, key: &str) -> &'a str {
    value.strip_prefix(key).unwrap_or(value)
}
