//! `org.bluez.GattService1` / `org.bluez.GattCharacteristic1` mirrors
//! (§4.2.5, §4.2.6).

use crate::{bot::action::DbusAction, ident::Uuid, value::GattValue};

#[derive(Debug)]
pub struct ServiceState {
    pub uuid: Uuid,
    pub device_path: String,
    pub template_key: Option<String>,
}

impl ServiceState {
    pub fn new(uuid: Uuid, device_path: impl Into<String>) -> Self {
        Self { uuid, device_path: device_path.into(), template_key: None }
    }
}

bitflags::bitflags! {
    /// A bit per named GATT characteristic capability (§3.4).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct CharFlags: u16 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const WRITE_WITHOUT_RESPONSE = 0b0000_0100;
        const NOTIFY = 0b0000_1000;
        const INDICATE = 0b0001_0000;
    }
}

impl CharFlags {
    /// Parses BlueZ's `Flags` string array. Unrecognized flags are ignored.
    pub fn from_strings(flags: &[String]) -> Self {
        let mut out = Self::empty();
        for f in flags {
            match f.as_str() {
                "read" => out |= Self::READ,
                "write" => out |= Self::WRITE,
                "write-without-response" => out |= Self::WRITE_WITHOUT_RESPONSE,
                "notify" => out |= Self::NOTIFY,
                "indicate" => out |= Self::INDICATE,
                _ => {}
            }
        }
        out
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoState {
    Ready,
    Read,
    Write,
}

impl Default for IoState {
    fn default() -> Self {
        IoState::Ready
    }
}

#[derive(Debug, Default)]
pub struct CharacteristicState {
    pub uuid: Option<Uuid>,
    pub service_path: String,
    pub flags: CharFlags,
    pub notifying: bool,
    pub io_state: IoState,
    pub pending_read: bool,
    pub pending_write: Option<GattValue>,
    pub pending_prop_add: bool,
    /// Set once GDB has been consulted for this characteristic's UUID,
    /// successfully or not (§4.2.6 step 1).
    pub props_looked_up: bool,
    /// Names of the logical properties this characteristic feeds, once
    /// registered into a node.
    pub managed_props: Vec<String>,
}

impl Default for CharFlags {
    fn default() -> Self {
        CharFlags::empty()
    }
}

impl CharacteristicState {
    pub fn is_managed(&self) -> bool {
        !self.managed_props.is_empty()
    }

    /// Step 2/3 of §4.2.6: start/stop notify as managed-ness and the
    /// notify flag dictate.
    pub fn notify_action(&self, path: &str) -> Option<DbusAction> {
        if self.is_managed() && self.flags.contains(CharFlags::NOTIFY) && !self.notifying {
            Some(DbusAction::StartNotify { path: path.to_string() })
        } else if !self.is_managed() && self.notifying {
            Some(DbusAction::StopNotify { path: path.to_string() })
        } else {
            None
        }
    }

    /// Requests a read, respecting the single-op-in-flight gate
    /// (§4.2.6: "Read/write serialization").
    pub fn request_read(&mut self, path: &str) -> Option<DbusAction> {
        if self.io_state != IoState::Ready {
            self.pending_read = true;
            return None;
        }
        self.io_state = IoState::Read;
        Some(DbusAction::ReadValue { path: path.to_string() })
    }

    pub fn request_write(&mut self, path: &str, value: GattValue) -> Option<DbusAction> {
        if self.io_state != IoState::Ready {
            self.pending_write = Some(value);
            return None;
        }
        self.io_state = IoState::Write;
        Some(DbusAction::WriteValue { path: path.to_string(), value })
    }

    /// Called when BlueZ completes the in-flight read/write, clearing the
    /// gate so a retried pending request can proceed.
    pub fn io_complete(&mut self) {
        self.io_state = IoState::Ready;
    }
}
