//! Live mirror of one BLE managed object and its attached interfaces
//! (§3.4, §4.2.2).

use std::collections::HashMap;

use crate::bot::{adapter::AdapterState, agent::AgentState, device::DeviceState, gatt::{CharacteristicState, ServiceState}};

/// The seven D-Bus interfaces BOT understands, in the order §4.2.2 lists
/// them. `AgentManager` objects carry no persistent state of their own --
/// the manager's existence is the event BOT reacts to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, strum::Display)]
pub enum InterfaceKind {
    Adapter,
    Device,
    GattService,
    GattCharacteristic,
    GattDescriptor,
    AgentManager,
    Agent,
}

impl InterfaceKind {
    /// Parses one of BlueZ's `org.bluez.*` interface strings. Unknown
    /// interfaces are not an error -- the object simply ignores them.
    pub fn from_dbus_name(name: &str) -> Option<Self> {
        match name {
            "org.bluez.Adapter1" => Some(Self::Adapter),
            "org.bluez.Device1" => Some(Self::Device),
            "org.bluez.GattService1" => Some(Self::GattService),
            "org.bluez.GattCharacteristic1" => Some(Self::GattCharacteristic),
            "org.bluez.GattDescriptor1" => Some(Self::GattDescriptor),
            "org.bluez.AgentManager1" => Some(Self::AgentManager),
            "org.bluez.Agent1" => Some(Self::Agent),
            _ => None,
        }
    }
}

/// Per-interface state. `GattDescriptor` and bare `Agent` objects carry no
/// logic of their own in this core and are tracked only so removal counts
/// down to zero interfaces correctly.
pub enum Interface {
    Adapter(AdapterState),
    Device(DeviceState),
    GattService(ServiceState),
    GattCharacteristic(CharacteristicState),
    GattDescriptor,
    AgentManager(AgentState),
    Agent,
}

impl Interface {
    pub fn kind(&self) -> InterfaceKind {
        match self {
            Interface::Adapter(_) => InterfaceKind::Adapter,
            Interface::Device(_) => InterfaceKind::Device,
            Interface::GattService(_) => InterfaceKind::GattService,
            Interface::GattCharacteristic(_) => InterfaceKind::GattCharacteristic,
            Interface::GattDescriptor => InterfaceKind::GattDescriptor,
            Interface::AgentManager(_) => InterfaceKind::AgentManager,
            Interface::Agent => InterfaceKind::Agent,
        }
    }
}

/// One tracked D-Bus object: a path plus whichever of the seven interfaces
/// it currently exposes.
#[derive(Default)]
pub struct BleObject {
    pub path: String,
    pub interfaces: HashMap<InterfaceKind, Interface>,
    /// Set once this object's own `PropertiesChanged` signal has been
    /// subscribed to (§4.2.2: "once per object").
    pub subscribed: bool,
}

impl BleObject {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), interfaces: HashMap::new(), subscribed: false }
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn adapter(&self) -> Option<&AdapterState> {
        match self.interfaces.get(&InterfaceKind::Adapter) {
            Some(Interface::Adapter(a)) => Some(a),
            _ => None,
        }
    }

    pub fn adapter_mut(&mut self) -> Option<&mut AdapterState> {
        match self.interfaces.get_mut(&InterfaceKind::Adapter) {
            Some(Interface::Adapter(a)) => Some(a),
            _ => None,
        }
    }

    pub fn device(&self) -> Option<&DeviceState> {
        match self.interfaces.get(&InterfaceKind::Device) {
            Some(Interface::Device(d)) => Some(d),
            _ => None,
        }
    }

    pub fn device_mut(&mut self) -> Option<&mut DeviceState> {
        match self.interfaces.get_mut(&InterfaceKind::Device) {
            Some(Interface::Device(d)) => Some(d),
            _ => None,
        }
    }

    pub fn service(&self) -> Option<&ServiceState> {
        match self.interfaces.get(&InterfaceKind::GattService) {
            Some(Interface::GattService(s)) => Some(s),
            _ => None,
        }
    }

    pub fn characteristic_mut(&mut self) -> Option<&mut CharacteristicState> {
        match self.interfaces.get_mut(&InterfaceKind::GattCharacteristic) {
            Some(Interface::GattCharacteristic(c)) => Some(c),
            _ => None,
        }
    }

    pub fn characteristic(&self) -> Option<&CharacteristicState> {
        match self.interfaces.get(&InterfaceKind::GattCharacteristic) {
            Some(Interface::GattCharacteristic(c)) => Some(c),
            _ => None,
        }
    }
}
