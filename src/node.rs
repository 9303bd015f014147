//! Logical cloud-node tree (§3.2) and node lifecycle state (§3.3).

use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
};

use crate::{
    error::{Error, ErrorKind},
    value::{Direction, Value, ValueType},
};

/// Network-interface tag carried by a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NetworkKind {
    Wifi,
    ZigBee,
    ZWave,
    Ble,
}

/// Power tag carried by a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PowerKind {
    Mains,
    Battery,
}

/// One property: a typed, directional value within a template.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub value_type: ValueType,
    pub direction: Direction,
    pub value: Option<Value>,
    /// Set once a `FROM_DEVICE` write or `TO_DEVICE` set has been echoed by
    /// the cloud; see §4.3.5.
    pub val_synced: bool,
    /// Set when an outbound send to ADS failed with a connection error
    /// (§4.4.4); cleared once resent.
    pub ads_failure: bool,
    /// Deferred because the node was offline when last sent (§4.3.3).
    pub retry_send: bool,
    /// Deferred network `set` because the node was offline (§4.3.3).
    pub retry_set: bool,
    /// Whether a JSON `null` value is accepted for this property (§9).
    pub reject_null: bool,
}

impl Property {
    fn new(name: impl Into<String>, value_type: ValueType, direction: Direction) -> Self {
        Self {
            name: name.into(),
            value_type,
            direction,
            value: None,
            val_synced: false,
            ads_failure: false,
            retry_send: false,
            retry_set: false,
            reject_null: true,
        }
    }
}

/// One template instance bound into a subdevice.
#[derive(Debug, Default)]
pub struct Template {
    pub version: Option<u32>,
    properties: BTreeMap<String, Property>,
}

impl Template {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.get_mut(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }
}

/// One subdevice: an ordered collection of templates keyed by template key.
#[derive(Debug, Default)]
pub struct Subdevice {
    templates: BTreeMap<String, Template>,
}

impl Subdevice {
    pub fn template(&self, key: &str) -> Option<&Template> {
        self.templates.get(key)
    }

    pub fn template_mut(&mut self, key: &str) -> Option<&mut Template> {
        self.templates.get_mut(key)
    }

    pub fn template_keys(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }
}

/// Reserved literal used when a property definition does not name a
/// subdevice explicitly (§4.1).
pub const DEFAULT_SUBDEVICE: &str = "00";

/// Per-layer opaque state slot with a cleanup hook invoked on node deletion
/// (§3.3). Modeled the same way `bluer`'s registered-interface handles carry
/// a type-erased payload plus a drop-time callback.
#[derive(Default)]
pub struct StateSlot {
    data: Option<Box<dyn Any + Send>>,
    cleanup: Option<Box<dyn FnOnce(Box<dyn Any + Send>) + Send>>,
}

impl StateSlot {
    pub fn set(&mut self, data: Box<dyn Any + Send>, cleanup: impl FnOnce(Box<dyn Any + Send>) + Send + 'static) {
        self.clear();
        self.data = Some(data);
        self.cleanup = Some(Box::new(cleanup));
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.data.as_mut().and_then(|d| d.downcast_mut())
    }

    pub fn clear(&mut self) {
        if let (Some(data), Some(cleanup)) = (self.data.take(), self.cleanup.take()) {
            cleanup(data);
        }
    }
}

impl Drop for StateSlot {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for StateSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StateSlot {{ set: {} }}", self.data.is_some())
    }
}

/// Node lifecycle state (§3.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeState {
    Joined,
    NetQuery,
    NetConfigure,
    NetFactoryReset,
    NetRemove,
    CloudAdd,
    CloudUpdate,
    CloudRemove,
    Ready,
    Removed,
}

/// Per-node flags driving the state machine (§3.3).
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeFlags {
    pub update: bool,
    pub remove: bool,
    pub factory_reset: bool,
    pub reconfigure: bool,
    pub left: bool,
    pub retry_send_conn_status: bool,
    pub retry_send_props: bool,
    pub retry_set_props: bool,
    pub op_pending: bool,
    pub batch_prop_sends: u32,
}

/// A managed node: identity, property tree, lifecycle state, and the two
/// layer-private state slots.
pub struct Node {
    pub address: String,
    pub sw_version: Option<String>,
    pub oem_model: Option<String>,
    pub network: NetworkKind,
    pub power: PowerKind,
    pub online: bool,
    /// Whether `online` has been synced to the cloud at least once (§3.2).
    pub online_synced: bool,
    pub state: NodeState,
    pub flags: NodeFlags,
    pub network_slot: StateSlot,
    pub cloud_slot: StateSlot,
    subdevices: BTreeMap<String, Subdevice>,
}

impl Node {
    pub fn new(address: impl Into<String>, network: NetworkKind, power: PowerKind) -> Self {
        Self {
            address: address.into(),
            sw_version: None,
            oem_model: None,
            network,
            power,
            online: false,
            online_synced: false,
            state: NodeState::Joined,
            flags: NodeFlags::default(),
            network_slot: StateSlot::default(),
            cloud_slot: StateSlot::default(),
            subdevices: BTreeMap::new(),
        }
    }

    pub fn subdevice(&self, key: &str) -> Option<&Subdevice> {
        self.subdevices.get(key)
    }

    pub fn subdevice_mut(&mut self, key: &str) -> &mut Subdevice {
        self.subdevices.entry(key.to_string()).or_default()
    }

    pub fn subdevices(&self) -> impl Iterator<Item = (&String, &Subdevice)> {
        self.subdevices.iter()
    }

    pub fn property(&self, subdevice: &str, template: &str, name: &str) -> Option<&Property> {
        self.subdevices.get(subdevice)?.template(template)?.property(name)
    }

    pub fn property_mut(&mut self, subdevice: &str, template: &str, name: &str) -> Option<&mut Property> {
        self.subdevices.get_mut(subdevice)?.template_mut(template)?.property_mut(name)
    }

    /// Adds (or re-adds) a property definition under `subdevice/template`.
    ///
    /// Rejects redefinition with a different type or direction (§3.2). A
    /// changed template version overrides the prior one with a warning.
    pub fn prop_add(
        &mut self, subdevice: &str, template_key: &str, template_version: Option<u32>, name: &str,
        value_type: ValueType, direction: Direction,
    ) -> Result<(), Error> {
        let sub = self.subdevices.entry(subdevice.to_string()).or_default();
        let tmpl = sub.templates.entry(template_key.to_string()).or_default();

        if let Some(version) = template_version {
            if tmpl.version.is_some() && tmpl.version != Some(version) {
                log::warn!(
                    "template {}/{} version changed {:?} -> {}",
                    subdevice,
                    template_key,
                    tmpl.version,
                    version
                );
            }
            tmpl.version = Some(version);
        }

        match tmpl.properties.get(name) {
            Some(existing) if existing.value_type != value_type || existing.direction != direction => {
                return Err(Error::new(ErrorKind::PropertyRedefined(
                    subdevice.to_string(),
                    template_key.to_string(),
                    name.to_string(),
                )));
            }
            Some(_) => {}
            None => {
                tmpl.properties.insert(name.to_string(), Property::new(name, value_type, direction));
            }
        }
        Ok(())
    }

    /// Sets a `TO_DEVICE` property's cached value, enforcing §4.3.5's
    /// direction and size invariants.
    pub fn prop_set(
        &mut self, subdevice: &str, template: &str, name: &str, value: Value, max_len: Option<usize>,
    ) -> Result<(), Error> {
        let prop = self
            .property_mut(subdevice, template, name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownNode(name.to_string())))?;
        if prop.direction != Direction::ToDevice {
            return Err(Error::new(ErrorKind::WrongDirection));
        }
        if let Some(max_len) = max_len {
            let size = match &value {
                Value::String(s) => s.len() + 1, // §3.2: string size checks include the terminator.
                Value::Blob(b) => b.len(),
                Value::Message(b) => b.len(),
                _ => 0,
            };
            if size > max_len {
                return Err(Error::new(ErrorKind::ValueTooLarge));
            }
        }
        prop.value = Some(value);
        prop.val_synced = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new("AA:BB:CC:DD:EE:FF", NetworkKind::Ble, PowerKind::Battery)
    }

    #[test]
    fn prop_add_is_idempotent_for_same_type() {
        let mut n = node();
        n.prop_add("00", "thermostat", Some(1), "setpoint", ValueType::Decimal, Direction::ToDevice).unwrap();
        n.prop_add("00", "thermostat", Some(1), "setpoint", ValueType::Decimal, Direction::ToDevice).unwrap();
        assert!(n.property("00", "thermostat", "setpoint").is_some());
    }

    #[test]
    fn prop_add_rejects_type_change() {
        let mut n = node();
        n.prop_add("00", "thermostat", Some(1), "setpoint", ValueType::Decimal, Direction::ToDevice).unwrap();
        let err = n
            .prop_add("00", "thermostat", Some(1), "setpoint", ValueType::Integer, Direction::ToDevice)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::PropertyRedefined(..)));
    }

    #[test]
    fn template_version_override_warns_but_succeeds() {
        let mut n = node();
        n.prop_add("00", "thermostat", Some(1), "setpoint", ValueType::Decimal, Direction::ToDevice).unwrap();
        n.prop_add("00", "thermostat", Some(2), "setpoint", ValueType::Decimal, Direction::ToDevice).unwrap();
        assert_eq!(n.subdevice("00").unwrap().template("thermostat").unwrap().version, Some(2));
    }

    #[test]
    fn string_set_boundary_len_cap_minus_one_succeeds_cap_fails() {
        let mut n = node();
        n.prop_add("00", "info", None, "name", ValueType::String, Direction::ToDevice).unwrap();
        // cap = 4 means the stored string (len + NUL) must be <= 4, so a 3-char string fits.
        n.prop_set("00", "info", "name", Value::String("abc".into()), Some(4)).unwrap();
        let err = n.prop_set("00", "info", "name", Value::String("abcd".into()), Some(4)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ValueTooLarge));
    }

    #[test]
    fn prop_set_rejects_wrong_direction() {
        let mut n = node();
        n.prop_add("00", "info", None, "temp", ValueType::Decimal, Direction::FromDevice).unwrap();
        let err = n.prop_set("00", "info", "temp", Value::Decimal(1.0), None).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::WrongDirection));
    }

    #[test]
    fn state_slot_runs_cleanup_on_clear() {
        use std::sync::{Arc, Mutex};
        let ran = Arc::new(Mutex::new(false));
        let ran2 = ran.clone();
        let mut slot = StateSlot::default();
        slot.set(Box::new(42u32), move |_| *ran2.lock().unwrap() = true);
        slot.clear();
        assert!(*ran.lock().unwrap());
    }
}
