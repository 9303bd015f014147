//! `org.bluez.Adapter1` mirror (§4.2.3).

use crate::bot::action::DbusAction;

/// Property mirror for one adapter object.
#[derive(Debug, Default)]
pub struct AdapterState {
    pub powered: bool,
    pub discoverable: bool,
    pub pairable: bool,
    pub discovering: bool,
    pub initialized: bool,
}

impl AdapterState {
    /// First-seen hook: the powered-off-then-on workaround for adapters
    /// that come up stuck (§4.2.3).
    pub fn added(&mut self, path: &str, actions: &mut Vec<DbusAction>) {
        if !self.initialized {
            actions.push(DbusAction::SetPowered { path: path.to_string(), powered: false });
            actions.push(DbusAction::SetPowered { path: path.to_string(), powered: true });
            self.initialized = true;
        }
    }

    /// Applies a properties-changed/added dict. Unknown keys are ignored.
    pub fn apply_props(&mut self, props: &crate::bot::PropMap) {
        if let Some(v) = props.get("Powered").and_then(|v| v.as_bool()) {
            self.powered = v;
        }
        if let Some(v) = props.get("Discoverable").and_then(|v| v.as_bool()) {
            self.discoverable = v;
        }
        if let Some(v) = props.get("Pairable").and_then(|v| v.as_bool()) {
            self.pairable = v;
        }
        if let Some(v) = props.get("Discovering").and_then(|v| v.as_bool()) {
            self.discovering = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_props_toggles_power_once() {
        let mut a = AdapterState::default();
        let mut actions = Vec::new();
        a.added("/org/bluez/hci0", &mut actions);
        assert_eq!(
            actions,
            vec![
                DbusAction::SetPowered { path: "/org/bluez/hci0".into(), powered: false },
                DbusAction::SetPowered { path: "/org/bluez/hci0".into(), powered: true },
            ]
        );
        actions.clear();
        a.added("/org/bluez/hci0", &mut actions);
        assert!(actions.is_empty());
    }

    #[test]
    fn apply_props_tracks_discovering() {
        let mut a = AdapterState::default();
        let props = crate::bot::PropMap::from([("Discovering".to_string(), serde_json::json!(true))]);
        a.apply_props(&props);
        assert!(a.discovering);
    }
}
