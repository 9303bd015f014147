//! D-Bus calls BOT's pure event-dispatch logic asks the glue layer to make.
//!
//! Keeping these as data instead of live `dbus::nonblock::Proxy` calls is
//! what lets §4.2's dispatch rules run against synthetic update/remove
//! batches in tests, with no live daemon required.

use crate::value::GattValue;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DbusAction {
    SetPowered { path: String, powered: bool },
    Connect { path: String },
    Pair { path: String },
    CancelPairing { path: String },
    RemoveDevice { adapter_path: String, device_path: String },
    ReadValue { path: String },
    WriteValue { path: String, value: GattValue },
    StartNotify { path: String },
    StopNotify { path: String },
    StartDiscovery { path: String },
    StopDiscovery { path: String },
    RegisterAgent { path: String, capability: &'static str },
    RequestDefaultAgent { path: String },
    SubscribePropertiesChanged { path: String },
}
