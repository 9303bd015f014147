//! `org.bluez.Device1` mirror and its pairing state machine (§4.2.4).

use crate::bot::{action::DbusAction, PropMap};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PairingSupport {
    Unknown,
    Supported,
    Unsupported,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PairingState {
    Ready,
    InProgress,
    AuthRequired,
    AuthDisplay,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PairError {
    AuthenticationFailed,
    AlreadyExists,
    AlreadyConnected,
    Other,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectOutcome {
    Success,
    Retry,
    Failed,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanResult {
    pub address: String,
    pub inferred_type: &'static str,
}

/// Properties derived while applying an update, surfaced to the caller so
/// it can drive NM (§4.2.4: "translate object events into Node-Manager
/// calls").
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeviceEvents {
    pub schedule_monitor: bool,
    pub node_online_changed: Option<bool>,
}

#[derive(Debug, Default)]
pub struct DeviceState {
    pub address: Option<String>,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub rssi: Option<i16>,
    pub paired: bool,
    pub connected: bool,
    pub services_resolved: bool,
    pub legacy_pairing: bool,
    pub uuids: Vec<String>,
    pub adapter_path: Option<String>,
    pub pairing_support: PairingSupport,
    pub pairing_state: PairingState,
    pub node_online: bool,
}

impl Default for PairingSupport {
    fn default() -> Self {
        PairingSupport::Unknown
    }
}

impl Default for PairingState {
    fn default() -> Self {
        PairingState::Ready
    }
}

// Ordered single-UUID match rules, checked before the multi-UUID rules
// (§4.2.4: "first match wins"). These are device type/OEM model strings,
// matching `bt_device_get_type`/`bt_device_get_model`'s literal output --
// distinct from the GDB template key ("bulb") registered for the same
// service UUID.
const SINGLE_UUID_TYPES: &[(&str, &str)] = &[
    (crate::gdb::BULB_SERVICE, "MagicBlue"),
    (crate::gdb::BBQ_SERVICE, "bbq"),
];

// Multi-UUID "match all" rules.
const MULTI_UUID_TYPES: &[(&[&str], &str)] = &[];

fn infer_type(uuids: &[String]) -> Option<&'static str> {
    for (uuid, ty) in SINGLE_UUID_TYPES {
        if uuids.iter().any(|u| u.eq_ignore_ascii_case(uuid)) {
            return Some(ty);
        }
    }
    for (set, ty) in MULTI_UUID_TYPES {
        if set.iter().all(|u| uuids.iter().any(|x| x.eq_ignore_ascii_case(u))) {
            return Some(ty);
        }
    }
    None
}

impl DeviceState {
    /// Applies an update/properties-changed dict. Returns `None` if the
    /// device has no `Address` yet and this update doesn't supply one --
    /// per §4.2.4 it is ignored entirely in that case.
    pub fn apply_props(&mut self, props: &PropMap) -> Option<DeviceEvents> {
        if self.address.is_none() {
            match props.get("Address").and_then(|v| v.as_str()) {
                Some(addr) => self.address = Some(addr.to_string()),
                None => return None,
            }
        }

        let mut events = DeviceEvents::default();
        let was_connected = self.connected;

        if let Some(v) = props.get("Name").and_then(|v| v.as_str()) {
            self.name = Some(v.to_string());
        }
        if let Some(v) = props.get("Alias").and_then(|v| v.as_str()) {
            self.alias = Some(v.to_string());
        }
        if let Some(v) = props.get("RSSI").and_then(|v| v.as_i64()) {
            self.rssi = Some(v as i16);
        }
        if let Some(v) = props.get("Paired").and_then(|v| v.as_bool()) {
            self.paired = v;
            if v {
                self.pairing_support = PairingSupport::Supported;
            }
        }
        if let Some(v) = props.get("Connected").and_then(|v| v.as_bool()) {
            self.connected = v;
        }
        if let Some(v) = props.get("ServicesResolved").and_then(|v| v.as_bool()) {
            self.services_resolved = v;
        }
        if let Some(v) = props.get("LegacyPairing").and_then(|v| v.as_bool()) {
            self.legacy_pairing = v;
        }
        if let Some(v) = props.get("UUIDs").and_then(|v| v.as_array()) {
            self.uuids = v.iter().filter_map(|u| u.as_str().map(str::to_string)).collect();
        }
        if let Some(v) = props.get("Adapter").and_then(|v| v.as_str()) {
            self.adapter_path = Some(v.to_string());
        }

        if !self.connected && (was_connected || props.contains_key("Connected")) {
            events.schedule_monitor = true;
        }

        let online = self.services_resolved && self.connected;
        if online != self.node_online {
            self.node_online = online;
            events.node_online_changed = Some(online);
        }

        Some(events)
    }

    /// Which D-Bus method to issue for the next connect attempt (§4.2.4).
    pub fn connect_method(&self) -> &'static str {
        match (self.pairing_support, self.paired, self.connected) {
            (PairingSupport::Unknown, _, _) => "Pair",
            (PairingSupport::Supported, false, _) => "Pair",
            (PairingSupport::Unsupported, _, _) => "Connect",
            (PairingSupport::Supported, true, _) => "Connect",
        }
    }

    pub fn begin_connect(&mut self, path: &str, actions: &mut Vec<DbusAction>) {
        self.pairing_state = PairingState::InProgress;
        match self.connect_method() {
            "Pair" => actions.push(DbusAction::Pair { path: path.to_string() }),
            _ => actions.push(DbusAction::Connect { path: path.to_string() }),
        }
    }

    /// Result of a `Pair`/`Connect` attempt (§4.2.4).
    pub fn on_pair_result(&mut self, err: Option<PairError>, path: &str, actions: &mut Vec<DbusAction>) -> ConnectOutcome {
        match err {
            None | Some(PairError::AlreadyExists) | Some(PairError::AlreadyConnected) => {
                self.pairing_state = PairingState::Ready;
                ConnectOutcome::Success
            }
            Some(PairError::AuthenticationFailed) if self.pairing_support == PairingSupport::Unknown => {
                self.pairing_support = PairingSupport::Unsupported;
                self.pairing_state = PairingState::Ready;
                actions.push(DbusAction::Connect { path: path.to_string() });
                ConnectOutcome::Retry
            }
            Some(_) => {
                self.pairing_state = PairingState::Ready;
                if let Some(adapter) = self.adapter_path.clone() {
                    actions.push(DbusAction::RemoveDevice { adapter_path: adapter, device_path: path.to_string() });
                }
                ConnectOutcome::Failed
            }
        }
    }

    /// Scan result to publish to NM, or `None` if suppressed (§4.2.4).
    pub fn scan_result(&self) -> Option<ScanResult> {
        if self.paired || self.legacy_pairing {
            return None;
        }
        let inferred_type = infer_type(&self.uuids)?;
        Some(ScanResult { address: self.address.clone()?, inferred_type })
    }
}
