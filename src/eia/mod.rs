//! Edge IoT Adapter: the cloud-facing link and the D-Bus/BlueZ link share
//! this module because both are, at bottom, the same kind of thing --
//! framed I/O translated into [`crate::nm::NodeManager`] and
//! [`crate::poq::Poq`] calls. [`Eia`] is the one struct gateway-app glue
//! constructs; everything else here is a piece it owns.

pub mod cloud_client;
pub mod cloud_socket;
pub mod config;
pub mod dbus;
pub mod schedule;
mod sock;

use std::path::Path;

use cloud_client::{CloudClient, GatewayRoute, IncomingCmd, MsgSocket, Proto};
use config::{ConfigStore, GatewayPaths};
use schedule::{Schedule, ScheduleAction, ScheduleSet};

use crate::error::{Error, ErrorKind};
use crate::nm::{CloudLayer, NetworkLayer, NodeManager, PropKey};
use crate::value::Value;

/// Ties the cloud-client link, the secondary msg socket, and the two
/// persisted schedule sets together (§4.5, §6).
pub struct Eia {
    pub cloud: CloudClient,
    pub msg: MsgSocket,
    pub prop_schedules: ScheduleSet,
    pub gateway_schedules: ScheduleSet,
    paths: GatewayPaths,
}

impl Eia {
    pub fn new(paths: GatewayPaths, socket_dir: &Path, peer: &str) -> Self {
        let cloud = CloudClient::new(cloud_socket::socket_path(socket_dir, peer, "data_sock"));
        let msg = MsgSocket::new(cloud_socket::socket_path(socket_dir, peer, "msg_sock"));
        Self { cloud, msg, prop_schedules: ScheduleSet::new(), gateway_schedules: ScheduleSet::new(), paths }
    }

    pub fn paths(&self) -> &GatewayPaths {
        &self.paths
    }

    /// Loads the node tree and both schedule sets from `store` (§4.3.4, §6).
    pub fn load(
        &mut self, store: &dyn ConfigStore, nm: &mut NodeManager, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer,
    ) -> crate::error::Result<()> {
        let doc = store.load()?;
        if let Some(nodes) = doc.get("nodes") {
            nm.conf_load_all(nodes, net, cloud);
        }
        if let Some(arr) = doc.get("prop_schedules").and_then(|v| v.as_array()) {
            self.prop_schedules = schedules_from_json(arr);
        }
        if let Some(arr) = doc.get("gateway_schedules").and_then(|v| v.as_array()) {
            self.gateway_schedules = schedules_from_json(arr);
        }
        Ok(())
    }

    /// Serializes the node tree and both schedule sets back to `store`.
    pub fn save(
        &mut self, store: &dyn ConfigStore, nm: &mut NodeManager, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer,
    ) -> crate::error::Result<()> {
        let doc = serde_json::json!({
            "nodes": nm.conf_save_all(net, cloud),
            "prop_schedules": self.prop_schedules.to_json(),
            "gateway_schedules": self.gateway_schedules.to_json(),
        });
        store.save(&doc)
    }

    /// Fires every due gateway-node schedule and applies it as a
    /// cloud-originated `TO_DEVICE` set (§4.5/S6). A fired schedule whose
    /// `arg` does not carry an `address` is dropped silently -- it has
    /// nothing to target.
    pub fn run_gateway_schedules(&mut self, now: chrono::DateTime<chrono::Utc>, nm: &mut NodeManager, net: &mut dyn NetworkLayer) {
        let addresses: std::collections::HashMap<String, Option<String>> = self
            .gateway_schedules
            .iter()
            .map(|(name, sched)| (name.to_string(), sched.arg.as_ref().and_then(|a| a.get("address")).and_then(|v| v.as_str()).map(str::to_string)))
            .collect();
        for (name, action) in self.gateway_schedules.run_all(now) {
            let Some(Some(address)) = addresses.get(&name) else { continue };
            apply_schedule_action(address, &action, nm, net);
        }
    }

    /// Like [`Self::run_gateway_schedules`] but for the `prop_schedules` set
    /// (local, gateway-resident properties rather than node properties);
    /// returns the fired actions so the caller's own property model applies
    /// them, since this crate does not own a gateway-local property tree.
    pub fn run_prop_schedules(&mut self, now: chrono::DateTime<chrono::Utc>) -> Vec<(String, ScheduleAction)> {
        self.prop_schedules.run_all(now)
    }

    /// Dispatches one parsed inbound command into [`NodeManager`]/[`Poq`]
    /// calls (§4.5). Only the ops with a concrete mapping onto this crate's
    /// state machine are handled here: `confirm_true`/`confirm_false`/`nak`
    /// correlate against [`crate::poq::Poq`]'s awaiting-confirm table one
    /// level up, since [`Eia`] itself does not own a `Poq`.
    pub fn dispatch(&mut self, cmd: &IncomingCmd, nm: &mut NodeManager, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) -> crate::error::Result<()> {
        match cmd.op.as_str() {
            "property_update" | "property_response" => self.dispatch_property_update(cmd, nm, net),
            "node_conn_status" => {
                let address = route_address(cmd)?;
                let online = cmd.args.first().and_then(|v| v.as_bool()).ok_or_else(bad_args)?;
                nm.node_conn_status_changed(&address, online, net, cloud);
                Ok(())
            }
            "node_remove" => {
                let address = route_address(cmd)?;
                nm.request_remove(&address);
                Ok(())
            }
            "schedule_update" => self.dispatch_schedule_update(cmd),
            _ => Ok(()),
        }
    }

    fn dispatch_property_update(&self, cmd: &IncomingCmd, nm: &mut NodeManager, net: &mut dyn NetworkLayer) -> crate::error::Result<()> {
        let address = route_address(cmd)?;
        let route = cmd.route.as_ref().ok_or_else(bad_args)?;
        let prop = PropKey::new(
            route.subdevice_key.clone().ok_or_else(bad_args)?,
            route.template_key.clone().ok_or_else(bad_args)?,
            route.name.clone().ok_or_else(bad_args)?,
        );
        let node = nm.node(&address).ok_or_else(|| Error::new(ErrorKind::UnknownNode(address.clone())))?;
        let value_type = node
            .property(&prop.subdevice, &prop.template, &prop.name)
            .ok_or_else(|| Error::new(ErrorKind::Ipc(crate::error::IpcErrorKind::UnknownProperty)))?
            .value_type;
        let raw = cmd.args.first().ok_or_else(bad_args)?;
        let value = Value::from_json(value_type, raw)?;
        nm.node_prop_set_from_cloud(&address, &prop, value, net)
    }

    fn dispatch_schedule_update(&mut self, cmd: &IncomingCmd) -> crate::error::Result<()> {
        let name = cmd.args.first().and_then(|v| v.as_str()).ok_or_else(bad_args)?;
        let b64 = cmd.opts.get("value").and_then(|v| v.as_str()).ok_or_else(bad_args)?;
        // The whole opts object (routing included) rides along as `arg` so a
        // fired gateway schedule can recover which node it targets.
        let arg = Some(cmd.opts.clone());
        let is_gateway = cmd.route.is_some();
        let sched = Schedule::decode(name, b64, arg)?;
        if is_gateway {
            self.gateway_schedules.add(sched);
        } else {
            self.prop_schedules.add(sched);
        }
        Ok(())
    }
}

fn schedules_from_json(entries: &[serde_json::Value]) -> ScheduleSet {
    let mut set = ScheduleSet::new();
    for entry in entries {
        let (Some(name), Some(val)) = (entry.get("name").and_then(|v| v.as_str()), entry.get("value").and_then(|v| v.as_str())) else {
            continue;
        };
        if let Ok(sched) = Schedule::decode(name, val, entry.get("arg").cloned()) {
            set.add(sched);
        }
    }
    set
}

fn apply_schedule_action(address: &str, action: &ScheduleAction, nm: &mut NodeManager, net: &mut dyn NetworkLayer) {
    let node = match nm.node(address) {
        Some(n) => n,
        None => return,
    };
    let Some((subdevice, template)) = node.subdevices().find_map(|(sub_key, sub)| {
        sub.template_keys()
            .into_iter()
            .find(|t| sub.template(t).and_then(|tmpl| tmpl.property(&action.prop_name)).is_some())
            .map(|t| (sub_key.clone(), t))
    }) else {
        return;
    };
    let prop = PropKey::new(subdevice, template, action.prop_name.clone());
    let _ = nm.node_prop_set_from_cloud(address, &prop, action.value.clone(), net);
}

fn route_address(cmd: &IncomingCmd) -> crate::error::Result<String> {
    cmd.route.as_ref().and_then(|r: &GatewayRoute| r.address.clone()).ok_or_else(bad_args)
}

fn bad_args() -> Error {
    Error::new(ErrorKind::Ipc(crate::error::IpcErrorKind::InvalidArgs))
}

/// Builds an outbound `property_update`/`confirm`/etc. frame on the `data`
/// protocol -- the mirror image of [`cloud_client::parse_frame`], used when
/// EIA itself needs to push rather than relay a command built elsewhere
/// (e.g. forwarding a from-device property send queued by [`crate::poq::Poq`]).
pub fn encode_data_cmd(op: &str, id: u64, args: Vec<serde_json::Value>, opts: serde_json::Value) -> Vec<u8> {
    cloud_client::encode_cmd(Proto::Data, op, id, args, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NetworkKind, PowerKind};
    use crate::value::{Direction, ValueType};

    struct NoopNet;
    impl NetworkLayer for NoopNet {
        fn query_info(&mut self, _address: &str) {}
        fn configure(&mut self, _address: &str) {}
        fn factory_reset(&mut self, _address: &str) {}
        fn leave(&mut self, _address: &str) {}
        fn prop_set(&mut self, _address: &str, _prop: &PropKey, _value: &Value) {}
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
        fn node_prop_send(&mut self, _address: &str, _prop: &PropKey, _value: &Value, _batch_append: bool) {}
        fn node_prop_batch_send(&mut self, _address: &str) {}
        fn conf_save(&mut self, _address: &str) -> serde_json::Value {
            serde_json::json!({})
        }
        fn conf_loaded(&mut self, _address: &str, _blob: serde_json::Value) {}
    }

    fn route_opts(address: &str, subdevice: &str, template: &str, name: &str) -> serde_json::Value {
        serde_json::json!({ "address": address, "subdevice_key": subdevice, "template_key": template, "name": name })
    }

    #[test]
    fn dispatch_property_update_sets_ready_node_immediately() {
        let mut nm = NodeManager::new();
        let mut net = NoopNet;
        let mut cloud = NoopCloud;
        nm.node_joined("AA:BB", NetworkKind::Ble, PowerKind::Battery, &mut net, &mut cloud);
        nm.node_mut("AA:BB").unwrap().prop_add("00", "batt", Some(1), "onoff", ValueType::Boolean, Direction::ToDevice).unwrap();
        nm.node_mut("AA:BB").unwrap().online = true;

        let mut eia = Eia::new(GatewayPaths::new("/tmp/factory.json", "/tmp"), Path::new("/tmp"), "peer");
        let bytes = cloud_client::encode_cmd(
            Proto::Gateway,
            "property_update",
            1,
            vec![serde_json::json!(true)],
            route_opts("AA:BB", "00", "batt", "onoff"),
        );
        let cmd = cloud_client::parse_frame(&bytes).unwrap();
        eia.dispatch(&cmd, &mut nm, &mut net, &mut cloud).unwrap();

        let prop = nm.node("AA:BB").unwrap().property("00", "batt", "onoff").unwrap();
        assert_eq!(prop.value, Some(Value::Boolean(true)));
    }

    #[test]
    fn dispatch_property_update_on_unknown_node_errors() {
        let mut nm = NodeManager::new();
        let mut net = NoopNet;
        let mut eia = Eia::new(GatewayPaths::new("/tmp/factory.json", "/tmp"), Path::new("/tmp"), "peer");
        let bytes =
            cloud_client::encode_cmd(Proto::Gateway, "property_update", 1, vec![serde_json::json!(true)], route_opts("none", "00", "batt", "onoff"));
        let cmd = cloud_client::parse_frame(&bytes).unwrap();
        let mut cloud = NoopCloud;
        assert!(eia.dispatch(&cmd, &mut nm, &mut net, &mut cloud).is_err());
    }

    #[test]
    fn dispatch_node_conn_status_updates_node_online() {
        let mut nm = NodeManager::new();
        let mut net = NoopNet;
        let mut cloud = NoopCloud;
        nm.node_joined("AA:BB", NetworkKind::Ble, PowerKind::Battery, &mut net, &mut cloud);

        let mut eia = Eia::new(GatewayPaths::new("/tmp/factory.json", "/tmp"), Path::new("/tmp"), "peer");
        let bytes = cloud_client::encode_cmd(Proto::Gateway, "node_conn_status", 2, vec![serde_json::json!(true)], route_opts("AA:BB", "", "", ""));
        let cmd = cloud_client::parse_frame(&bytes).unwrap();
        eia.dispatch(&cmd, &mut nm, &mut net, &mut cloud).unwrap();
        assert!(nm.node("AA:BB").unwrap().online);
    }

    #[test]
    fn dispatch_schedule_update_adds_to_gateway_set() {
        let mut nm = NodeManager::new();
        let mut net = NoopNet;
        let mut cloud = NoopCloud;
        let mut eia = Eia::new(GatewayPaths::new("/tmp/factory.json", "/tmp"), Path::new("/tmp"), "peer");

        let b64 = schedule::encode_one_shot_int(chrono::Utc::now(), "onoff", 1);
        let opts = serde_json::json!({ "value": b64, "address": "AA:BB" });
        let bytes = cloud_client::encode_cmd(Proto::Gateway, "schedule_update", 3, vec![serde_json::json!("sched1")], opts);
        let cmd = cloud_client::parse_frame(&bytes).unwrap();
        eia.dispatch(&cmd, &mut nm, &mut net, &mut cloud).unwrap();
        assert!(eia.gateway_schedules.get("sched1").is_some());
    }

    #[test]
    fn run_gateway_schedules_applies_fired_action_to_its_node() {
        let mut nm = NodeManager::new();
        let mut net = NoopNet;
        let mut cloud = NoopCloud;
        nm.node_joined("AA:BB", NetworkKind::Ble, PowerKind::Battery, &mut net, &mut cloud);
        nm.node_mut("AA:BB").unwrap().prop_add("00", "batt", Some(1), "onoff", ValueType::Integer, Direction::ToDevice).unwrap();
        nm.node_mut("AA:BB").unwrap().online = true;

        let mut eia = Eia::new(GatewayPaths::new("/tmp/factory.json", "/tmp"), Path::new("/tmp"), "peer");
        let past = chrono::DateTime::<chrono::Utc>::from_timestamp(1_000, 0).unwrap();
        let b64 = schedule::encode_one_shot_int(past, "onoff", 42);
        let opts = serde_json::json!({ "value": b64, "address": "AA:BB" });
        let bytes = cloud_client::encode_cmd(Proto::Gateway, "schedule_update", 3, vec![serde_json::json!("sched1")], opts);
        let cmd = cloud_client::parse_frame(&bytes).unwrap();
        eia.dispatch(&cmd, &mut nm, &mut net, &mut cloud).unwrap();

        eia.run_gateway_schedules(chrono::Utc::now(), &mut nm, &mut net);
        let prop = nm.node("AA:BB").unwrap().property("00", "batt", "onoff").unwrap();
        assert_eq!(prop.value, Some(Value::Integer(42)));
        assert!(eia.gateway_schedules.get("sched1").is_none());
    }

    #[test]
    fn save_then_load_roundtrips_through_store() {
        struct MemStore(std::cell::RefCell<serde_json::Value>);
        impl ConfigStore for MemStore {
            fn load(&self) -> crate::error::Result<serde_json::Value> {
                Ok(self.0.borrow().clone())
            }
            fn save(&self, doc: &serde_json::Value) -> crate::error::Result<()> {
                *self.0.borrow_mut() = doc.clone();
                Ok(())
            }
        }

        let mut nm = NodeManager::new();
        let mut net = NoopNet;
        let mut cloud = NoopCloud;
        nm.node_joined("AA:BB", NetworkKind::Ble, PowerKind::Battery, &mut net, &mut cloud);

        let mut eia = Eia::new(GatewayPaths::new("/tmp/factory.json", "/tmp"), Path::new("/tmp"), "peer");
        let store = MemStore(std::cell::RefCell::new(config::empty_document()));
        eia.save(&store, &mut nm, &mut net, &mut cloud).unwrap();

        let mut nm2 = NodeManager::new();
        eia.load(&store, &mut nm2, &mut net, &mut cloud).unwrap();
        assert!(nm2.node("AA:BB").is_some());
    }
}
