//! BLE Object Tracker (§4.2): a live mirror of the BLE service's managed
//! object graph, driving per-object state machines and translating object
//! events into Node-Manager calls.

pub mod action;
pub mod adapter;
pub mod agent;
pub mod device;
pub mod gatt;
pub mod monitor;
pub mod object;

use std::collections::HashMap;

use crate::{
    gdb,
    gdb::Gdb,
    nm::{CloudLayer, NetworkLayer, NodeManager, PropKey},
    node::{NetworkKind, PowerKind},
};

use action::DbusAction;
use adapter::AdapterState;
use agent::AgentState;
use device::DeviceState;
use gatt::{CharacteristicState, ServiceState};
use object::{BleObject, Interface, InterfaceKind};

/// An already-extracted D-Bus property dict. Real wiring decodes
/// `dbus::arg::PropMap` into this before calling into BOT, keeping every
/// dispatch rule below exercisable against plain JSON in tests.
pub type PropMap = HashMap<String, serde_json::Value>;

fn parent_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    }
}

#[derive(Default)]
pub struct Bot {
    objects: HashMap<String, BleObject>,
    discovery_enabled: bool,
}

impl Bot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, path: &str) -> Option<&BleObject> {
        self.objects.get(path)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// §4.2.2 UPDATE dispatch (and §4.2.1's bootstrap synthesizes one of
    /// these per returned path+interface-dict).
    pub fn handle_update(
        &mut self, path: &str, interfaces: &[(String, PropMap)], allow_add: bool, gdb: &Gdb, nm: &mut NodeManager,
    ) -> Vec<DbusAction> {
        let mut actions = Vec::new();
        {
            let obj = self.objects.entry(path.to_string()).or_insert_with(|| BleObject::new(path));
            if !obj.subscribed {
                actions.push(DbusAction::SubscribePropertiesChanged { path: path.to_string() });
                obj.subscribed = true;
            }
        }

        for (iface_name, props) in interfaces {
            let Some(kind) = InterfaceKind::from_dbus_name(iface_name) else { continue };
            if allow_add {
                let needs_create = !self.objects.get(path).unwrap().interfaces.contains_key(&kind);
                if needs_create {
                    let interface = self.create_interface(kind, path, props);
                    self.objects.get_mut(path).unwrap().interfaces.insert(kind, interface);
                    self.on_added(path, kind, &mut actions);
                }
            }
            self.props_changed(path, kind, props, gdb, nm, &mut actions);
        }
        actions
    }

    /// §4.2.2 REMOVE dispatch.
    pub fn handle_remove(&mut self, path: &str, interfaces: &[String]) {
        if let Some(obj) = self.objects.get_mut(path) {
            for name in interfaces {
                if let Some(kind) = InterfaceKind::from_dbus_name(name) {
                    obj.interfaces.remove(&kind);
                }
            }
            if obj.is_empty() {
                self.objects.remove(path);
            }
        }
    }

    fn create_interface(&self, kind: InterfaceKind, path: &str, props: &PropMap) -> Interface {
        match kind {
            InterfaceKind::Adapter => Interface::Adapter(AdapterState::default()),
            InterfaceKind::Device => Interface::Device(DeviceState::default()),
            InterfaceKind::GattService => {
                let uuid = props
                    .get("UUID")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| crate::ident::Uuid::from_u16(0));
                let device_path = props.get("Device").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| parent_path(path));
                Interface::GattService(ServiceState::new(uuid, device_path))
            }
            InterfaceKind::GattCharacteristic => {
                let mut c = CharacteristicState::default();
                c.service_path = props.get("Service").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| parent_path(path));
                Interface::GattCharacteristic(c)
            }
            InterfaceKind::GattDescriptor => Interface::GattDescriptor,
            InterfaceKind::AgentManager => Interface::AgentManager(AgentState::default()),
            InterfaceKind::Agent => Interface::Agent,
        }
    }

    fn on_added(&mut self, path: &str, kind: InterfaceKind, actions: &mut Vec<DbusAction>) {
        match kind {
            InterfaceKind::Adapter => {
                if let Some(obj) = self.objects.get_mut(path) {
                    if let Some(a) = obj.adapter_mut() {
                        a.added(path, actions);
                    }
                }
            }
            InterfaceKind::AgentManager => {
                let agent_path = format!("{path}/agent0");
                if let Some(obj) = self.objects.get_mut(path) {
                    if let Some(Interface::AgentManager(a)) = obj.interfaces.get_mut(&InterfaceKind::AgentManager) {
                        a.added(&agent_path, path, actions);
                    }
                }
            }
            _ => {}
        }
    }

    fn props_changed(
        &mut self, path: &str, kind: InterfaceKind, props: &PropMap, gdb: &Gdb, nm: &mut NodeManager,
        actions: &mut Vec<DbusAction>,
    ) {
        match kind {
            InterfaceKind::Adapter => {
                if let Some(obj) = self.objects.get_mut(path) {
                    if let Some(a) = obj.adapter_mut() {
                        a.apply_props(props);
                    }
                }
            }
            InterfaceKind::Device => self.device_props_changed(path, props, nm, actions),
            InterfaceKind::GattService => {
                if let Some(obj) = self.objects.get_mut(path) {
                    if let Some(Interface::GattService(s)) = obj.interfaces.get_mut(&InterfaceKind::GattService) {
                        if s.template_key.is_none() {
                            s.template_key = gdb.lookup_template(s.uuid).map(|t| t.key.clone());
                        }
                    }
                }
            }
            InterfaceKind::GattCharacteristic => self.characteristic_props_changed(path, props, gdb, nm, actions),
            _ => {}
        }
    }

    fn device_props_changed(&mut self, path: &str, props: &PropMap, nm: &mut NodeManager, actions: &mut Vec<DbusAction>) {
        let Some(obj) = self.objects.get_mut(path) else { return };
        let Some(device) = obj.device_mut() else { return };
        let Some(events) = device.apply_props(props) else { return };

        // events.schedule_monitor: the glue's 60s monitor timer is advanced
        // by the caller, not by BOT itself.
        if events.node_online_changed.is_some() {
            if let Some(address) = device.address.clone() {
                if nm.node(&address).is_none() {
                    nm.node_joined(&address, NetworkKind::Ble, PowerKind::Battery, &mut NoopNetwork, &mut NoopCloud);
                }
            }
        }

        // §4.2.4: scan results are published to NM on every devices update,
        // not just at join -- a device's advertised service UUIDs can
        // resolve to a type/model before (or after) it is actually paired.
        if let Some(scan) = device.scan_result() {
            log::debug!("scan result {} inferred type {}", scan.address, scan.inferred_type);
            nm.node_info_changed(&scan.address, None, Some(scan.inferred_type.to_string()));
        }
        let _ = actions;
    }

    fn characteristic_props_changed(
        &mut self, path: &str, props: &PropMap, gdb: &Gdb, nm: &mut NodeManager, actions: &mut Vec<DbusAction>,
    ) {
        // Step 1: first-time GDB lookup and prop registration.
        let (already_looked_up, char_uuid, service_path) = {
            let Some(obj) = self.objects.get_mut(path) else { return };
            let Some(c) = obj.characteristic_mut() else { return };
            if let Some(uuid) = props.get("UUID").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()) {
                c.uuid = Some(uuid);
            }
            if let Some(flags) = props.get("Flags").and_then(|v| v.as_array()) {
                let strs: Vec<String> = flags.iter().filter_map(|f| f.as_str().map(str::to_string)).collect();
                c.flags = gatt::CharFlags::from_strings(&strs);
            }
            if let Some(n) = props.get("Notifying").and_then(|v| v.as_bool()) {
                c.notifying = n;
            }
            (c.props_looked_up, c.uuid, c.service_path.clone())
        };

        if !already_looked_up {
            if let Some(uuid) = char_uuid {
                let prop_defs = gdb.lookup_props(uuid);
                if !prop_defs.is_empty() {
                    let template_key = self.objects.get(&service_path).and_then(|s| s.service().and_then(|s| s.template_key.clone()));
                    let device_path = self.objects.get(&service_path).and_then(|s| s.service().map(|s| s.device_path.clone()));
                    let address = device_path.and_then(|dp| self.objects.get(&dp)).and_then(|d| d.device()).and_then(|d| d.address.clone());

                    if let (Some(address), Some(template_key)) = (address, template_key) {
                        if let Some(node) = nm.node_mut(&address) {
                            let mut registered_names = Vec::new();
                            for def in prop_defs {
                                if node
                                    .prop_add(&def.subdevice, &template_key, None, &def.name, def.value_type, def.direction)
                                    .is_ok()
                                {
                                    registered_names.push(def.name.clone());
                                }
                            }
                            if let Some(obj) = self.objects.get_mut(path) {
                                if let Some(c) = obj.characteristic_mut() {
                                    c.props_looked_up = true;
                                    c.managed_props = registered_names;
                                    c.pending_prop_add = false;
                                    if c.flags.contains(gatt::CharFlags::READ) {
                                        c.pending_read = true;
                                    }
                                }
                            }
                        } else {
                            // No Node yet for this device: retry later (§4.2.6).
                            if let Some(obj) = self.objects.get_mut(path) {
                                if let Some(c) = obj.characteristic_mut() {
                                    c.pending_prop_add = true;
                                }
                            }
                        }
                    } else if let Some(obj) = self.objects.get_mut(path) {
                        if let Some(c) = obj.characteristic_mut() {
                            c.pending_prop_add = true;
                        }
                    }
                } else if let Some(obj) = self.objects.get_mut(path) {
                    if let Some(c) = obj.characteristic_mut() {
                        c.props_looked_up = true;
                    }
                }
            }
        }

        // Steps 2/3: notify bit vs managed-ness.
        if let Some(obj) = self.objects.get(path) {
            if let Some(c) = obj.characteristic() {
                if let Some(action) = c.notify_action(path) {
                    actions.push(action);
                }
            }
        }

        // Step 4: a `Value` update feeds every associated logical property.
        if let Some(value_bytes) = props.get("Value").and_then(|v| v.as_array()) {
            let raw = crate::value::GattValue::from_bytes(
                value_bytes.iter().filter_map(|b| b.as_u64().map(|n| n as u8)).collect::<Vec<u8>>(),
            );
            self.apply_characteristic_value(path, &service_path, &raw, gdb, nm);
        }
    }

    fn apply_characteristic_value(
        &mut self, path: &str, service_path: &str, raw: &crate::value::GattValue, gdb: &Gdb, nm: &mut NodeManager,
    ) {
        let Some((uuid, managed_props)) = self.objects.get_mut(path).and_then(|obj| {
            obj.characteristic_mut().map(|c| {
                c.pending_read = false;
                (c.uuid, c.managed_props.clone())
            })
        }) else {
            return;
        };
        let Some(uuid) = uuid else { return };
        let device_path = self.objects.get(service_path).and_then(|s| s.service().map(|s| s.device_path.clone()));
        let Some(address) = device_path.and_then(|dp| self.objects.get(&dp)).and_then(|d| d.device()).and_then(|d| d.address.clone())
        else {
            return;
        };
        let template_key = self.objects.get(service_path).and_then(|s| s.service().and_then(|s| s.template_key.clone()));
        let Some(template_key) = template_key else { return };

        let prop_defs = gdb.lookup_props(uuid);
        let mut sends = Vec::new();
        {
            let Some(node) = nm.node(&address) else { return };
            for def in prop_defs {
                if !managed_props.contains(&def.name) {
                    continue;
                }
                if let gdb::SendOutcome::Value(value) = def.send(node, raw) {
                    sends.push((PropKey::new(def.subdevice.clone(), template_key.clone(), def.name.clone()), value));
                }
            }
        }
        let mut cloud = NoopCloud;
        for (key, value) in sends {
            nm.node_prop_send(&address, &key, value, &mut cloud);
        }
    }

    /// §4.2.9: drives discovery on every tracked adapter whose state
    /// differs from the request.
    pub fn discover(&mut self, enable: bool) -> Vec<DbusAction> {
        let mut actions = Vec::new();
        let mut any_succeeded = false;
        for obj in self.objects.values() {
            if let Some(a) = obj.adapter() {
                if a.discovering != enable {
                    any_succeeded = true;
                    actions.push(if enable {
                        DbusAction::StartDiscovery { path: obj.path.clone() }
                    } else {
                        DbusAction::StopDiscovery { path: obj.path.clone() }
                    });
                }
            }
        }
        if any_succeeded {
            self.discovery_enabled = enable;
        }
        actions
    }

    pub fn discovery_enabled(&self) -> bool {
        self.discovery_enabled
    }

    /// §4.2.8 periodic monitor tick.
    pub fn monitor_tick(&mut self) -> Vec<DbusAction> {
        monitor::tick(&mut self.objects)
    }
}

/// A `NetworkLayer`/`CloudLayer` pair used where BOT only needs to nudge
/// NM's bookkeeping (e.g. registering a join) without an active transport
/// call of its own; the real collaborators are owned by the gateway-app
/// glue and passed in for every op that actually needs one.
struct NoopNetwork;
impl NetworkLayer for NoopNetwork {
    fn query_info(&mut self, _address: &str) {}
    fn configure(&mut self, _address: &str) {}
    fn factory_reset(&mut self, _address: &str) {}
    fn leave(&mut self, _address: &str) {}
    fn prop_set(&mut self, _address: &str, _prop: &PropKey, _value: &crate::value::Value) {}
    fn ota_update(&mut self, _address: &str, _version: &str, _path: &str) {}
    fn conf_save(&mut self, _address: &str) -> serde_json::Value {
        serde_json::json!({})
    }
    fn conf_loaded(&mut self, _address: &str, _blob: serde_json::Value) {}
}

struct NoopCloud;
impl CloudLayer for NoopCloud {
    fn node_add(&mut self, _address: &str) {}
    fn node_update_info(&mut self, _address: &str) {}
    fn node_remove(&mut self, _address: &str) {}
    fn node_conn_status(&mut self, _address: &str, _online: bool) {}
    fn node_prop_send(&mut self, _address: &str, _prop: &PropKey, _value: &crate::value::Value, _batch: bool) {}
    fn node_prop_batch_send(&mut self, _address: &str) {}
    fn conf_save(&mut self, _address: &str) -> serde_json::Value {
        serde_json::json!({})
    }
    fn conf_loaded(&mut self, _address: &str, _blob: serde_json::Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Direction, ValueType};

    fn props(pairs: &[(&str, serde_json::Value)]) -> PropMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn update_creates_object_and_subscribes_once() {
        let mut bot = Bot::new();
        let gdb = Gdb::new();
        let mut nm = NodeManager::new();
        let actions = bot.handle_update(
            "/org/bluez/hci0",
            &[("org.bluez.Adapter1".to_string(), props(&[("Powered".into(), serde_json::json!(false))]))],
            true,
            &gdb,
            &mut nm,
        );
        assert!(actions.iter().any(|a| matches!(a, DbusAction::SubscribePropertiesChanged { .. })));
        assert_eq!(bot.object_count(), 1);
    }

    #[test]
    fn remove_all_interfaces_deletes_object() {
        let mut bot = Bot::new();
        let gdb = Gdb::new();
        let mut nm = NodeManager::new();
        bot.handle_update("/dev/AA", &[("org.bluez.Device1".to_string(), props(&[]))], true, &gdb, &mut nm);
        bot.handle_remove("/dev/AA", &["org.bluez.Device1".to_string()]);
        assert_eq!(bot.object_count(), 0);
    }

    #[test]
    fn properties_changed_does_not_create_new_interfaces() {
        let mut bot = Bot::new();
        let gdb = Gdb::new();
        let mut nm = NodeManager::new();
        bot.handle_update(
            "/dev/AA",
            &[("org.bluez.Device1".to_string(), props(&[("Address".into(), serde_json::json!("AA"))]))],
            false,
            &gdb,
            &mut nm,
        );
        // allow_add=false and the object didn't exist: nothing created.
        assert_eq!(bot.object_count(), 0);
    }

    #[test]
    fn characteristic_registers_props_once_device_has_a_node() {
        let mut bot = Bot::new();
        let mut gdb = Gdb::new();
        gdb.seed();
        let mut nm = NodeManager::new();

        bot.handle_update(
            "/org/bluez/hci0/dev_AA",
            &[("org.bluez.Device1".to_string(), props(&[("Address".into(), serde_json::json!("AA"))]))],
            true,
            &gdb,
            &mut nm,
        );
        nm.node_joined("AA", NetworkKind::Ble, PowerKind::Battery, &mut NoopNetwork, &mut NoopCloud);

        bot.handle_update(
            "/org/bluez/hci0/dev_AA/service0",
            &[("org.bluez.GattService1".to_string(), props(&[("UUID".into(), serde_json::json!("180f"))]))],
            true,
            &gdb,
            &mut nm,
        );
        bot.handle_update(
            "/org/bluez/hci0/dev_AA/service0/char0",
            &[(
                "org.bluez.GattCharacteristic1".to_string(),
                props(&[
                    ("UUID".into(), serde_json::json!("2a19")),
                    ("Flags".into(), serde_json::json!(["read"])),
                ]),
            )],
            true,
            &gdb,
            &mut nm,
        );

        let node = nm.node("AA").unwrap();
        assert!(node.property("00", "battery", "battery_level").is_some());
        let _ = (Direction::FromDevice, ValueType::Integer);
    }

    #[test]
    fn magic_blue_service_uuid_resolves_node_oem_model() {
        let mut bot = Bot::new();
        let gdb = Gdb::new();
        let mut nm = NodeManager::new();

        bot.handle_update(
            "/org/bluez/hci0/dev_BB",
            &[(
                "org.bluez.Device1".to_string(),
                props(&[
                    ("Address".into(), serde_json::json!("BB")),
                    ("Connected".into(), serde_json::json!(true)),
                    ("ServicesResolved".into(), serde_json::json!(true)),
                    ("UUIDs".into(), serde_json::json!([gdb::BULB_SERVICE])),
                ]),
            )],
            true,
            &gdb,
            &mut nm,
        );

        let node = nm.node("BB").unwrap();
        assert_eq!(node.oem_model.as_deref(), Some("MagicBlue"));
    }
}
