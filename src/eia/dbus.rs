//! D-Bus surface constants consumed from BlueZ (§4.5, §6).
//!
//! Kept as plain `&str` constants rather than an enum: every consumer of
//! this module already has the interface name as a `String` off the wire
//! (from `GetManagedObjects` / `InterfacesAdded`) and wants to compare it,
//! not construct one. [`crate::bot::object::InterfaceKind`] is the typed
//! side of this same closed set.

/// Fixed D-Bus service name the core talks to.
pub const SERVICE_NAME: &str = "org.bluez";

pub const IFACE_ADAPTER: &str = "org.bluez.Adapter1";
pub const IFACE_DEVICE: &str = "org.bluez.Device1";
pub const IFACE_GATT_SERVICE: &str = "org.bluez.GattService1";
pub const IFACE_GATT_CHARACTERISTIC: &str = "org.bluez.GattCharacteristic1";
pub const IFACE_GATT_DESCRIPTOR: &str = "org.bluez.GattDescriptor1";
pub const IFACE_AGENT_MANAGER: &str = "org.bluez.AgentManager1";
pub const IFACE_AGENT: &str = "org.bluez.Agent1";

/// All seven interfaces the core ever creates an [`crate::bot::object::Interface`] for.
pub const MANAGED_INTERFACES: &[&str] =
    &[IFACE_ADAPTER, IFACE_DEVICE, IFACE_GATT_SERVICE, IFACE_GATT_CHARACTERISTIC, IFACE_GATT_DESCRIPTOR, IFACE_AGENT_MANAGER, IFACE_AGENT];

pub mod method {
    pub const CONNECT: &str = "Connect";
    pub const PAIR: &str = "Pair";
    pub const CANCEL_PAIRING: &str = "CancelPairing";
    pub const REMOVE_DEVICE: &str = "RemoveDevice";
    pub const READ_VALUE: &str = "ReadValue";
    pub const WRITE_VALUE: &str = "WriteValue";
    pub const START_NOTIFY: &str = "StartNotify";
    pub const STOP_NOTIFY: &str = "StopNotify";
    pub const START_DISCOVERY: &str = "StartDiscovery";
    pub const STOP_DISCOVERY: &str = "StopDiscovery";
    pub const REGISTER_AGENT: &str = "RegisterAgent";
    pub const REQUEST_DEFAULT_AGENT: &str = "RequestDefaultAgent";
    pub const GET_MANAGED_OBJECTS: &str = "GetManagedObjects";
    pub const SET: &str = "Set";
    pub const GET_ALL: &str = "GetAll";
}

pub mod agent_method {
    pub const REQUEST_PIN_CODE: &str = "RequestPinCode";
    pub const DISPLAY_PIN_CODE: &str = "DisplayPinCode";
    pub const REQUEST_PASSKEY: &str = "RequestPasskey";
    pub const DISPLAY_PASSKEY: &str = "DisplayPasskey";
    pub const REQUEST_CONFIRMATION: &str = "RequestConfirmation";
    pub const REQUEST_AUTHORIZATION: &str = "RequestAuthorization";
    pub const AUTHORIZE_SERVICE: &str = "AuthorizeService";
    pub const CANCEL: &str = "Cancel";
    pub const RELEASE: &str = "Release";
}

pub mod property {
    pub const ADDRESS: &str = "Address";
    pub const NAME: &str = "Name";
    pub const ALIAS: &str = "Alias";
    pub const RSSI: &str = "RSSI";
    pub const PAIRED: &str = "Paired";
    pub const CONNECTED: &str = "Connected";
    pub const SERVICES_RESOLVED: &str = "ServicesResolved";
    pub const LEGACY_PAIRING: &str = "LegacyPairing";
    pub const ADAPTER: &str = "Adapter";
    pub const UUIDS: &str = "UUIDs";
    pub const POWERED: &str = "Powered";
    pub const DISCOVERABLE: &str = "Discoverable";
    pub const PAIRABLE: &str = "Pairable";
    pub const DISCOVERING: &str = "Discovering";
    pub const UUID: &str = "UUID";
    pub const DEVICE: &str = "Device";
    pub const SERVICE: &str = "Service";
    pub const VALUE: &str = "Value";
    pub const NOTIFYING: &str = "Notifying";
    pub const FLAGS: &str = "Flags";
}
