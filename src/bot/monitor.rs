//! Periodic 60 s tick (§4.2.8): retries connects and pending GATT I/O.

use std::collections::HashMap;

use crate::bot::{
    action::DbusAction,
    device::PairingSupport,
    object::{BleObject, InterfaceKind, Interface},
};

/// Runs one monitor tick over the object map, returning the D-Bus actions
/// it wants issued.
pub fn tick(objects: &mut HashMap<String, BleObject>) -> Vec<DbusAction> {
    let mut actions = Vec::new();
    for obj in objects.values_mut() {
        if let Some(device) = obj.device_mut() {
            if !device.connected && device.pairing_support != PairingSupport::Unsupported {
                device.begin_connect(&obj.path, &mut actions);
            }
        }
        if let Some(Interface::GattCharacteristic(c)) = obj.interfaces.get_mut(&InterfaceKind::GattCharacteristic) {
            if c.pending_prop_add {
                // Retried by the caller's GDB-lookup pass; nothing to do
                // at the D-Bus layer itself.
                continue;
            }
            if let Some(value) = c.pending_write.take() {
                if let Some(action) = c.request_write(&obj.path, value) {
                    actions.push(action);
                }
            } else if c.pending_read {
                c.pending_read = false;
                if let Some(action) = c.request_read(&obj.path) {
                    actions.push(action);
                }
            }
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{device::DeviceState, gatt::CharacteristicState, object::Interface};

    #[test]
    fn tick_retries_disconnected_known_device() {
        let mut objects = HashMap::new();
        let mut obj = BleObject::new("/dev/AA");
        let mut device = DeviceState::default();
        device.address = Some("AA".into());
        obj.interfaces.insert(InterfaceKind::Device, Interface::Device(device));
        objects.insert("/dev/AA".to_string(), obj);

        let actions = tick(&mut objects);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn tick_skips_unsupported_device() {
        let mut objects = HashMap::new();
        let mut obj = BleObject::new("/dev/AA");
        let mut device = DeviceState::default();
        device.address = Some("AA".into());
        device.pairing_support = crate::bot::device::PairingSupport::Unsupported;
        obj.interfaces.insert(InterfaceKind::Device, Interface::Device(device));
        objects.insert("/dev/AA".to_string(), obj);

        let actions = tick(&mut objects);
        assert!(actions.is_empty());
    }

    #[test]
    fn tick_retries_pending_read() {
        let mut objects = HashMap::new();
        let mut obj = BleObject::new("/char/1");
        let mut c = CharacteristicState::default();
        c.pending_read = true;
        obj.interfaces.insert(InterfaceKind::GattCharacteristic, Interface::GattCharacteristic(c));
        objects.insert("/char/1".to_string(), obj);

        let actions = tick(&mut objects);
        assert_eq!(actions, vec![DbusAction::ReadValue { path: "/char/1".into() }]);
    }
}
