//! GATT Template Database (§4.1).
//!
//! Translates BLE service/characteristic UUIDs into logical template and
//! property definitions, with optional typed encoders/decoders. Registration
//! is append-only and happens once at startup (`seed`); lookups are called
//! from the BLE Object Tracker on every characteristic resolve.

use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{Error, ErrorKind},
    ident::Uuid,
    node::{Node, DEFAULT_SUBDEVICE},
    value::{Direction, GattValue, Value, ValueType},
};

/// A value produced by decoding bytes read from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Value(Value),
    /// The bytes did not produce a logical change (e.g. malformed payload).
    Ignored,
}

/// A value produced by encoding a logical value for writing to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    Bytes(GattValue),
    /// Cross-property consistency rule vetoed the write; see the bulb
    /// interlock example (§4.1): this is not an error, just a no-op.
    NoChange,
}

pub type ValSendFn = Arc<dyn Fn(&Node, &PropDef, &GattValue) -> SendOutcome + Send + Sync>;
pub type ValSetFn = Arc<dyn Fn(&Node, &PropDef, &Value) -> SetOutcome + Send + Sync>;

/// One logical property definition produced by a characteristic.
#[derive(Clone)]
pub struct PropDef {
    pub subdevice: String,
    pub name: String,
    pub value_type: ValueType,
    pub direction: Direction,
    pub val_send: Option<ValSendFn>,
    pub val_set: Option<ValSetFn>,
}

impl PropDef {
    /// Decodes bytes per the property's declared type, the default send
    /// behavior for single-value characteristics (§4.1): little-endian
    /// int32/float/double/UTF-8/bool.
    pub fn default_send(&self, raw: &GattValue) -> SendOutcome {
        match self.value_type {
            ValueType::Integer => raw.get_i32_le().map(Value::Integer),
            ValueType::Boolean => raw.get_bool().map(Value::Boolean),
            ValueType::Decimal => raw.get_f64_le().map(Value::Decimal),
            ValueType::String => raw.get_string().map(Value::String),
            ValueType::Blob => Some(Value::Blob(raw.as_bytes().to_vec())),
            ValueType::Message => Some(Value::Message(raw.as_bytes().to_vec())),
            ValueType::File => None,
        }
        .map(SendOutcome::Value)
        .unwrap_or(SendOutcome::Ignored)
    }

    /// Mirrors [`Self::default_send`] for the write direction.
    pub fn default_set(&self, value: &Value) -> SetOutcome {
        let bytes = match value {
            Value::Integer(v) => GattValue::from_i32_le(*v),
            Value::Boolean(v) => GattValue::from_bool(*v),
            Value::Decimal(v) => GattValue::from_f64_le(*v),
            Value::String(v) => GattValue::from_bytes(v.as_bytes().to_vec()),
            Value::Blob(v) => GattValue::from_bytes(v.clone()),
            Value::Message(v) => GattValue::from_bytes(v.clone()),
            Value::File(_) => return SetOutcome::NoChange,
        };
        SetOutcome::Bytes(bytes)
    }

    pub fn send(&self, node: &Node, raw: &GattValue) -> SendOutcome {
        match &self.val_send {
            Some(f) => f(node, self, raw),
            None => self.default_send(raw),
        }
    }

    pub fn set(&self, node: &Node, value: &Value) -> SetOutcome {
        match &self.val_set {
            Some(f) => f(node, self, value),
            None => self.default_set(value),
        }
    }
}

/// A service-level template binding.
#[derive(Clone, Debug)]
pub struct TemplateDef {
    pub key: String,
    pub version: Option<u32>,
}

/// The GATT Template Database.
#[derive(Default)]
pub struct Gdb {
    templates: HashMap<Uuid, TemplateDef>,
    props: HashMap<Uuid, Vec<PropDef>>,
}

impl Gdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&mut self, service_uuid: Uuid, key: impl Into<String>, version: Option<u32>) -> Result<(), Error> {
        if self.templates.contains_key(&service_uuid) {
            return Err(Error::new(ErrorKind::DuplicateTemplate(service_uuid)));
        }
        self.templates.insert(service_uuid, TemplateDef { key: key.into(), version });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_prop(
        &mut self, characteristic_uuid: Uuid, subdevice: Option<&str>, name: impl Into<String>,
        value_type: ValueType, direction: Direction, val_set: Option<ValSetFn>, val_send: Option<ValSendFn>,
    ) {
        self.props.entry(characteristic_uuid).or_default().push(PropDef {
            subdevice: subdevice.unwrap_or(DEFAULT_SUBDEVICE).to_string(),
            name: name.into(),
            value_type,
            direction,
            val_send,
            val_set,
        });
    }

    pub fn lookup_template(&self, service_uuid: Uuid) -> Option<&TemplateDef> {
        self.templates.get(&service_uuid)
    }

    /// Returns an empty list (not an error) for an unmanaged characteristic.
    pub fn lookup_props(&self, characteristic_uuid: Uuid) -> &[PropDef] {
        self.props.get(&characteristic_uuid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Registers the fixed set of well-known services/characteristics
    /// described in §4.1: Device Information, Battery, Heart Rate, a
    /// thermostat profile, an RGB-bulb profile, and a BBQ-thermometer
    /// profile.
    pub fn seed(&mut self) {
        seed_device_information(self);
        seed_battery(self);
        seed_heart_rate(self);
        seed_thermostat(self);
        seed_bulb(self);
        seed_bbq(self);
    }
}

fn uuid16(v: u16) -> Uuid {
    Uuid::from_u16(v)
}

fn seed_device_information(gdb: &mut Gdb) {
    gdb.add_template(uuid16(0x180a), "device_info", Some(1)).unwrap();
    gdb.add_prop(uuid16(0x2a29), None, "manufacturer", ValueType::String, Direction::FromDevice, None, None);
    gdb.add_prop(uuid16(0x2a24), None, "model", ValueType::String, Direction::FromDevice, None, None);
    gdb.add_prop(uuid16(0x2a26), None, "fw_version", ValueType::String, Direction::FromDevice, None, None);
}

fn seed_battery(gdb: &mut Gdb) {
    gdb.add_template(uuid16(0x180f), "battery", Some(1)).unwrap();
    gdb.add_prop(uuid16(0x2a19), None, "battery_level", ValueType::Integer, Direction::FromDevice, None, None);
}

fn seed_heart_rate(gdb: &mut Gdb) {
    gdb.add_template(uuid16(0x180d), "heart_rate", Some(1)).unwrap();
    let send: ValSendFn = Arc::new(|_node, _prop, raw| {
        let bytes = raw.as_bytes();
        match bytes.first() {
            // Heart Rate Measurement: bit0 of the flags byte selects 8-bit
            // or 16-bit bpm encoding.
            Some(flags) if flags & 0x01 == 0 => bytes.get(1).map(|v| SendOutcome::Value(Value::Integer(*v as i32))),
            Some(_) => {
                if bytes.len() >= 3 {
                    let bpm = u16::from_le_bytes([bytes[1], bytes[2]]);
                    Some(SendOutcome::Value(Value::Integer(bpm as i32)))
                } else {
                    None
                }
            }
            None => None,
        }
        .unwrap_or(SendOutcome::Ignored)
    });
    gdb.add_prop(uuid16(0x2a37), None, "heart_rate_bpm", ValueType::Integer, Direction::FromDevice, None, Some(send));
}

const THERMOSTAT_SERVICE: &str = "f0001000-0451-4000-b000-000000000000";
const THERMOSTAT_SETPOINT_CHAR: &str = "f0001001-0451-4000-b000-000000000000";
const THERMOSTAT_AMBIENT_CHAR: &str = "f0001002-0451-4000-b000-000000000000";

fn seed_thermostat(gdb: &mut Gdb) {
    let svc: Uuid = THERMOSTAT_SERVICE.parse().unwrap();
    gdb.add_template(svc, "thermostat", Some(1)).unwrap();
    let setpoint: Uuid = THERMOSTAT_SETPOINT_CHAR.parse().unwrap();
    gdb.add_prop(setpoint, None, "setpoint", ValueType::Decimal, Direction::ToDevice, None, None);
    let ambient: Uuid = THERMOSTAT_AMBIENT_CHAR.parse().unwrap();
    gdb.add_prop(ambient, None, "ambient_temp", ValueType::Decimal, Direction::FromDevice, None, None);
}

/// MagicBlue-style RGB bulb, as referenced literally in §8 S1-S3.
pub const BULB_SERVICE: &str = "0000ffe5-0000-1000-8000-00805f9b34fb";
pub const BULB_COMMAND_CHAR: &str = "0000ffe9-0000-1000-8000-00805f9b34fb";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum BulbMode {
    Off = 0,
    Rgb = 1,
    White = 2,
    Fade = 3,
}

fn seed_bulb(gdb: &mut Gdb) {
    let svc: Uuid = BULB_SERVICE.parse().unwrap();
    gdb.add_template(svc, "bulb", Some(1)).unwrap();
    let cmd: Uuid = BULB_COMMAND_CHAR.parse().unwrap();

    let onoff_set: ValSetFn = Arc::new(|_node, _prop, value| match value {
        Value::Boolean(true) => SetOutcome::Bytes(GattValue::from_bytes(vec![0xCC, 0x23, 0x33])),
        Value::Boolean(false) => SetOutcome::Bytes(GattValue::from_bytes(vec![0xCC, 0x24, 0x33])),
        _ => SetOutcome::NoChange,
    });
    gdb.add_prop(cmd, None, "onoff", ValueType::Boolean, Direction::ToDevice, Some(onoff_set), None);

    let mode_set: ValSetFn = Arc::new(|_node, _prop, value| match value {
        Value::Integer(m) => SetOutcome::Bytes(GattValue::from_bytes(vec![0xBB, *m as u8, 0x44])),
        _ => SetOutcome::NoChange,
    });
    gdb.add_prop(cmd, None, "mode", ValueType::Integer, Direction::ToDevice, Some(mode_set), None);

    // Setting `rgb` while `mode != RGB` is a no-op, not an error (§4.1, S3).
    let rgb_set: ValSetFn = Arc::new(|node, _prop, value| {
        let mode = node
            .property(DEFAULT_SUBDEVICE, "bulb", "mode")
            .and_then(|p| p.value.clone());
        if mode != Some(Value::Integer(BulbMode::Rgb as i32)) {
            return SetOutcome::NoChange;
        }
        match value {
            Value::Integer(rgb) => {
                let [r, g, b] = [(*rgb >> 16) as u8, (*rgb >> 8) as u8, *rgb as u8];
                SetOutcome::Bytes(GattValue::from_bytes(vec![0x56, r, g, b, 0x00, 0xF0, 0xAA]))
            }
            _ => SetOutcome::NoChange,
        }
    });
    gdb.add_prop(cmd, None, "rgb", ValueType::Integer, Direction::ToDevice, Some(rgb_set), None);

    let white_set: ValSetFn = Arc::new(|node, _prop, value| {
        let mode = node
            .property(DEFAULT_SUBDEVICE, "bulb", "mode")
            .and_then(|p| p.value.clone());
        if mode != Some(Value::Integer(BulbMode::White as i32)) {
            return SetOutcome::NoChange;
        }
        match value {
            Value::Integer(level) => {
                SetOutcome::Bytes(GattValue::from_bytes(vec![0x56, 0x00, 0x00, 0x00, *level as u8, 0x0F, 0xAA]))
            }
            _ => SetOutcome::NoChange,
        }
    });
    gdb.add_prop(cmd, None, "white", ValueType::Integer, Direction::ToDevice, Some(white_set), None);
}

/// BBQ thermometer profile: a single 16-byte little-endian sensor payload
/// packs flags, meat code, doneness, a countdown timer, target and current
/// temperature, and percent done.
pub const BBQ_SERVICE: &str = "0000fff0-0000-1000-8000-00805f9b34fb";
pub const BBQ_SENSOR_CHAR: &str = "0000fff4-0000-1000-8000-00805f9b34fb";

fn seed_bbq(gdb: &mut Gdb) {
    let svc: Uuid = BBQ_SERVICE.parse().unwrap();
    gdb.add_template(svc, "bbq", Some(1)).unwrap();
    let sensor: Uuid = BBQ_SENSOR_CHAR.parse().unwrap();

    macro_rules! bbq_decoder {
        ($extract:expr) => {
            Some(Arc::new(move |_node: &Node, _prop: &PropDef, raw: &GattValue| -> SendOutcome {
                let b = raw.as_bytes();
                if b.len() < 16 {
                    return SendOutcome::Ignored;
                }
                ($extract)(b)
            }) as ValSendFn)
        };
    }

    gdb.add_prop(
        sensor,
        None,
        "meat_code",
        ValueType::Integer,
        Direction::FromDevice,
        None,
        bbq_decoder!(|b: &[u8]| SendOutcome::Value(Value::Integer(b[1] as i32))),
    );
    gdb.add_prop(
        sensor,
        None,
        "doneness",
        ValueType::Integer,
        Direction::FromDevice,
        None,
        bbq_decoder!(|b: &[u8]| SendOutcome::Value(Value::Integer(b[2] as i32))),
    );
    gdb.add_prop(
        sensor,
        None,
        "countdown_seconds",
        ValueType::Integer,
        Direction::FromDevice,
        None,
        bbq_decoder!(|b: &[u8]| {
            let secs = b[3] as i32 * 3600 + b[4] as i32 * 60 + b[5] as i32;
            SendOutcome::Value(Value::Integer(secs))
        }),
    );
    gdb.add_prop(
        sensor,
        None,
        "target_temp",
        ValueType::Decimal,
        Direction::FromDevice,
        None,
        bbq_decoder!(|b: &[u8]| {
            let raw = u16::from_le_bytes([b[6], b[7]]);
            SendOutcome::Value(Value::Decimal(raw as f64 / 10.0))
        }),
    );
    gdb.add_prop(
        sensor,
        None,
        "current_temp",
        ValueType::Decimal,
        Direction::FromDevice,
        None,
        bbq_decoder!(|b: &[u8]| {
            let raw = u16::from_le_bytes([b[8], b[9]]);
            SendOutcome::Value(Value::Decimal(raw as f64 / 10.0))
        }),
    );
    gdb.add_prop(
        sensor,
        None,
        "percent_done",
        ValueType::Integer,
        Direction::FromDevice,
        None,
        bbq_decoder!(|b: &[u8]| SendOutcome::Value(Value::Integer(b[10] as i32))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NetworkKind, PowerKind};

    fn node() -> Node {
        Node::new("AA:BB:CC:DD:EE:FF", NetworkKind::Ble, PowerKind::Battery)
    }

    #[test]
    fn duplicate_service_uuid_is_rejected() {
        let mut gdb = Gdb::new();
        gdb.seed();
        let err = gdb.add_template(uuid16(0x180a), "dup", None).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateTemplate(_)));
    }

    #[test]
    fn unknown_characteristic_lookup_is_empty() {
        let gdb = Gdb::new();
        assert!(gdb.lookup_props(uuid16(0xdead)).is_empty());
    }

    #[test]
    fn bulb_onoff_true_encodes_expected_frame() {
        let mut gdb = Gdb::new();
        gdb.seed();
        let cmd: Uuid = BULB_COMMAND_CHAR.parse().unwrap();
        let props = gdb.lookup_props(cmd);
        let onoff = props.iter().find(|p| p.name == "onoff").unwrap();
        let n = node();
        match onoff.set(&n, &Value::Boolean(true)) {
            SetOutcome::Bytes(b) => assert_eq!(b.as_bytes(), &[0xCC, 0x23, 0x33]),
            SetOutcome::NoChange => panic!("expected bytes"),
        }
    }

    #[test]
    fn bulb_rgb_is_noop_outside_rgb_mode() {
        let mut gdb = Gdb::new();
        gdb.seed();
        let cmd: Uuid = BULB_COMMAND_CHAR.parse().unwrap();
        let props = gdb.lookup_props(cmd);
        let rgb = props.iter().find(|p| p.name == "rgb").unwrap();
        let mut n = node();
        n.prop_add(DEFAULT_SUBDEVICE, "bulb", Some(1), "mode", ValueType::Integer, Direction::ToDevice).unwrap();
        n.prop_set(DEFAULT_SUBDEVICE, "bulb", "mode", Value::Integer(BulbMode::White as i32), None).unwrap();
        assert_eq!(rgb.set(&n, &Value::Integer(0x00FF00)), SetOutcome::NoChange);
    }

    #[test]
    fn bulb_rgb_emits_frame_in_rgb_mode() {
        let mut gdb = Gdb::new();
        gdb.seed();
        let cmd: Uuid = BULB_COMMAND_CHAR.parse().unwrap();
        let props = gdb.lookup_props(cmd);
        let rgb = props.iter().find(|p| p.name == "rgb").unwrap();
        let mut n = node();
        n.prop_add(DEFAULT_SUBDEVICE, "bulb", Some(1), "mode", ValueType::Integer, Direction::ToDevice).unwrap();
        n.prop_set(DEFAULT_SUBDEVICE, "bulb", "mode", Value::Integer(BulbMode::Rgb as i32), None).unwrap();
        match rgb.set(&n, &Value::Integer(0x00FF00)) {
            SetOutcome::Bytes(b) => assert_eq!(b.as_bytes(), &[0x56, 0x00, 0xFF, 0x00, 0x00, 0xF0, 0xAA]),
            SetOutcome::NoChange => panic!("expected bytes"),
        }
    }

    #[test]
    fn bbq_decodes_16_byte_payload() {
        let mut gdb = Gdb::new();
        gdb.seed();
        let sensor: Uuid = BBQ_SENSOR_CHAR.parse().unwrap();
        let props = gdb.lookup_props(sensor);
        let current = props.iter().find(|p| p.name == "current_temp").unwrap();
        let mut payload = vec![0u8; 16];
        payload[8..10].copy_from_slice(&250u16.to_le_bytes());
        let n = node();
        match current.send(&n, &GattValue::from_bytes(payload)) {
            SendOutcome::Value(Value::Decimal(t)) => assert!((t - 25.0).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn default_send_decodes_le_integer() {
        let prop = PropDef {
            subdevice: DEFAULT_SUBDEVICE.to_string(),
            name: "x".into(),
            value_type: ValueType::Integer,
            direction: Direction::FromDevice,
            val_send: None,
            val_set: None,
        };
        let raw = GattValue::from_i32_le(99);
        assert_eq!(prop.default_send(&raw), SendOutcome::Value(Value::Integer(99)));
    }
}
