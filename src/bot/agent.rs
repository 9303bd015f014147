//! `org.bluez.AgentManager1` / `org.bluez.Agent1` handling (§4.2.7).

use crate::bot::action::DbusAction;

pub const CAPABILITY: &str = "NoInputNoOutput";

/// Local agent bookkeeping: whether a connect attempt is active (passkey
/// requests are only honored while one is) and any passkey currently on
/// display for host confirmation.
#[derive(Debug, Default)]
pub struct AgentState {
    pub registered: bool,
    pub connect_active: bool,
    pub displayed_passkey: Option<String>,
}

/// What the agent host (NM / UI glue) should do in response to an agent
/// method call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AgentResponse {
    /// Return this passkey/PIN to BlueZ.
    ReturnPasskey(String),
    /// Publish to the host for user verification, then auto-confirm.
    DisplayAndConfirm(String),
    Reject,
    Accept,
    /// Clear the displayed passkey; no D-Bus reply beyond normal completion.
    Clear,
}

impl AgentState {
    pub fn added(&mut self, agent_path: &str, manager_path: &str, actions: &mut Vec<DbusAction>) {
        if !self.registered {
            actions.push(DbusAction::RegisterAgent { path: agent_path.to_string(), capability: CAPABILITY });
            actions.push(DbusAction::RequestDefaultAgent { path: manager_path.to_string() });
            self.registered = true;
        }
    }

    /// `RequestPinCode` / `RequestPasskey`: valid only during an active
    /// connect attempt (§4.2.7 Policy).
    pub fn request_passkey(&self, passkey: Option<&str>) -> AgentResponse {
        if !self.connect_active {
            return AgentResponse::Reject;
        }
        match passkey {
            Some(p) => AgentResponse::ReturnPasskey(format!("{p:0>6}")),
            None => AgentResponse::Reject,
        }
    }

    pub fn display_passkey(&mut self, passkey: impl Into<String>) -> AgentResponse {
        let passkey = passkey.into();
        self.displayed_passkey = Some(passkey.clone());
        AgentResponse::DisplayAndConfirm(passkey)
    }

    pub fn request_authorization(&self) -> AgentResponse {
        AgentResponse::Reject
    }

    pub fn authorize_service(&self) -> AgentResponse {
        AgentResponse::Accept
    }

    pub fn cancel_or_release(&mut self) -> AgentResponse {
        self.displayed_passkey = None;
        AgentResponse::Clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_happens_once() {
        let mut a = AgentState::default();
        let mut actions = Vec::new();
        a.added("/agent", "/org/bluez", &mut actions);
        assert_eq!(actions.len(), 2);
        actions.clear();
        a.added("/agent", "/org/bluez", &mut actions);
        assert!(actions.is_empty());
    }

    #[test]
    fn passkey_rejected_without_active_connect() {
        let a = AgentState::default();
        assert_eq!(a.request_passkey(Some("42")), AgentResponse::Reject);
    }

    #[test]
    fn passkey_formatted_as_six_digits() {
        let mut a = AgentState::default();
        a.connect_active = true;
        assert_eq!(a.request_passkey(Some("42")), AgentResponse::ReturnPasskey("000042".into()));
    }

    #[test]
    fn cancel_clears_displayed_passkey() {
        let mut a = AgentState::default();
        a.display_passkey("123456");
        assert!(a.displayed_passkey.is_some());
        a.cancel_or_release();
        assert!(a.displayed_passkey.is_none());
    }
}
