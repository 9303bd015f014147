//! Node Manager (§4.3): the network-agnostic per-node lifecycle state
//! machine, property storage, retry accounting, batching and persistence.
//!
//! §4.3.1 describes the network/cloud collaborators as "callback"
//! interfaces (`query_info(node, cb)`, `node_add(node, cb)`, ...). Rather
//! than storing a boxed closure per in-flight op (which the §4.3.2
//! "at most one op in flight per node" invariant makes unnecessary -- there
//! is never more than one outstanding call to correlate), this module models
//! them as fire-and-forget trait methods ([`NetworkLayer`], [`CloudLayer`])
//! paired with explicit result-injection entry points
//! ([`NodeManager::on_network_result`], [`NodeManager::on_cloud_result`]).
//! This is the same "(op, awaiting-reply) correlated by id/timer, not by
//! stored closure or thread" shape the design notes (§9) call for, applied
//! at the one-op-per-node granularity NM actually needs.

use std::{collections::HashMap, time::Duration};

use crate::{
    node::{NetworkKind, Node, NodeState, PowerKind},
    poq::Dests,
    value::Value,
};

/// Node-op retry delay (§5).
pub const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Network-layer result (§4.3.1, §7).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkStatus {
    Success,
    Offline,
    Unknown,
    Unsupported,
}

/// Cloud-layer result (§4.3.1, §7).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloudStatus {
    None,
    Conn,
    App,
    Unknown,
}

/// Confirmation record handed back for cloud-facing calls (§4.3.1).
#[derive(Clone, Debug)]
pub struct CloudConfirm {
    pub status: CloudStatus,
    pub err: Option<String>,
    pub dests: Dests,
}

/// A property reference within a node (matches [`crate::poq::PropRef`]
/// minus the address, which is implicit -- the node a given call concerns).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PropKey {
    pub subdevice: String,
    pub template: String,
    pub name: String,
}

impl PropKey {
    pub fn new(subdevice: impl Into<String>, template: impl Into<String>, name: impl Into<String>) -> Self {
        Self { subdevice: subdevice.into(), template: template.into(), name: name.into() }
    }
}

/// The network-facing collaborator (BLE/ZigBee/simulator) NM drives.
pub trait NetworkLayer {
    fn query_info(&mut self, address: &str);
    fn configure(&mut self, address: &str);
    fn factory_reset(&mut self, address: &str);
    fn leave(&mut self, address: &str);
    fn prop_set(&mut self, address: &str, prop: &PropKey, value: &Value);
    fn ota_update(&mut self, address: &str, version: &str, path: &str);
    fn conf_save(&mut self, address: &str) -> serde_json::Value;
    fn conf_loaded(&mut self, address: &str, blob: serde_json::Value);
}

/// The cloud-facing collaborator (POQ/EIA) NM drives.
pub trait CloudLayer {
    fn node_add(&mut self, address: &str);
    fn node_update_info(&mut self, address: &str);
    fn node_remove(&mut self, address: &str);
    fn node_conn_status(&mut self, address: &str, online: bool);
    fn node_prop_send(&mut self, address: &str, prop: &PropKey, value: &Value, batch_append: bool);
    fn node_prop_batch_send(&mut self, address: &str);
    fn conf_save(&mut self, address: &str) -> serde_json::Value;
    fn conf_loaded(&mut self, address: &str, blob: serde_json::Value);
}

fn map_network(status: NetworkStatus) -> (bool /* advance */, bool /* retry */, bool /* mark_left */) {
    match status {
        NetworkStatus::Success | NetworkStatus::Unsupported => (true, false, false),
        NetworkStatus::Offline => (false, true, false),
        NetworkStatus::Unknown => (true, false, true),
    }
}

fn map_cloud(status: CloudStatus) -> (bool /* advance */, bool /* retry */, bool /* mark_unknown */) {
    match status {
        CloudStatus::None => (true, false, false),
        CloudStatus::Conn => (false, true, false),
        CloudStatus::App => (true, false, false),
        CloudStatus::Unknown => (true, false, true),
    }
}

/// Network-agnostic per-node lifecycle manager.
#[derive(Default)]
pub struct NodeManager {
    nodes: HashMap<String, Node>,
    store: Option<std::sync::Arc<dyn crate::eia::config::ConfigStore>>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, address: &str) -> Option<&Node> {
        self.nodes.get(address)
    }

    pub fn node_mut(&mut self, address: &str) -> Option<&mut Node> {
        self.nodes.get_mut(address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// §4.3.1 entry point: a node joined the physical network.
    pub fn node_joined(
        &mut self, address: &str, network: NetworkKind, power: PowerKind, net: &mut dyn NetworkLayer,
        cloud: &mut dyn CloudLayer,
    ) {
        self.nodes.entry(address.to_string()).or_insert_with(|| Node::new(address, network, power));
        self.evaluate(address, net, cloud);
    }

    /// §4.3.1 entry point: the node has left the physical network.
    pub fn node_left(&mut self, address: &str, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) {
        if let Some(node) = self.nodes.get_mut(address) {
            node.flags.left = true;
        }
        self.evaluate(address, net, cloud);
    }

    pub fn node_conn_status_changed(
        &mut self, address: &str, online: bool, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer,
    ) {
        let was_offline_going_online = {
            let Some(node) = self.nodes.get_mut(address) else { return };
            let was_offline = !node.online;
            node.online = online;
            was_offline && online
        };

        // Request a status send; deferred while the node is not READY (§4.3.3).
        self.send_conn_status(address, cloud);

        if was_offline_going_online {
            // A pending op may now succeed; resubmit retried property writes.
            self.retry_set_props(address, net);
            if !self.nodes.get(address).map(|n| n.flags.op_pending).unwrap_or(true) {
                self.evaluate(address, net, cloud);
            }
        }
    }

    fn send_conn_status(&mut self, address: &str, cloud: &mut dyn CloudLayer) {
        let Some(node) = self.nodes.get_mut(address) else { return };
        if node.state != NodeState::Ready {
            node.flags.retry_send_conn_status = true;
            return;
        }
        node.flags.retry_send_conn_status = false;
        let online = node.online;
        cloud.node_conn_status(address, online);
    }

    /// §4.3.1: result of an earlier `node_conn_status` cloud send.
    pub fn on_conn_status_result(&mut self, address: &str, confirm: &CloudConfirm) {
        if confirm.status == CloudStatus::Conn {
            if let Some(node) = self.nodes.get_mut(address) {
                node.flags.retry_send_conn_status = true;
            }
        }
    }

    fn retry_set_props(&mut self, address: &str, net: &mut dyn NetworkLayer) {
        let Some(node) = self.nodes.get_mut(address) else { return };
        if !node.flags.retry_set_props {
            return;
        }
        node.flags.retry_set_props = false;
        let mut to_retry = Vec::new();
        // Walk the tree read-only to collect flagged properties, then issue
        // the retries without holding a borrow of `node`.
        for (sub_key, sub) in node.subdevices() {
            for tmpl_key in sub_template_keys(sub) {
                if let Some(tmpl) = sub.template(&tmpl_key) {
                    for prop in tmpl.properties() {
                        if prop.retry_set {
                            if let Some(value) = &prop.value {
                                to_retry.push((
                                    PropKey::new(sub_key.clone(), tmpl_key.clone(), prop.name.clone()),
                                    value.clone(),
                                ));
                            }
                        }
                    }
                }
            }
        }
        for (key, value) in &to_retry {
            net.prop_set(address, key, value);
        }
        if let Some(node) = self.nodes.get_mut(address) {
            for (sub_key, tmpl_key, name) in to_retry.iter().map(|(k, _)| (k.subdevice.clone(), k.template.clone(), k.name.clone())) {
                if let Some(p) = node.property_mut(&sub_key, &tmpl_key, &name) {
                    p.retry_set = false;
                }
            }
        }
    }

    /// §4.3.1 entry point: a network-layer `prop_set` result for an
    /// offline node. Marks the property (and the node) for retry.
    pub fn on_network_prop_set_result(&mut self, address: &str, prop: &PropKey, status: NetworkStatus) {
        if status != NetworkStatus::Offline {
            return;
        }
        let Some(node) = self.nodes.get_mut(address) else { return };
        node.flags.retry_set_props = true;
        if let Some(p) = node.property_mut(&prop.subdevice, &prop.template, &prop.name) {
            p.retry_set = true;
        }
    }

    /// §4.5/§6 entry point: a `TO_DEVICE` property set arrived from the
    /// cloud. Caches the value on the node regardless of online state
    /// (§8 invariant 4); if the node is online the set goes out to the
    /// network layer immediately, otherwise it is marked `retry_set` so
    /// [`Self::retry_set_props`] resends it exactly once on the next
    /// online transition.
    pub fn node_prop_set_from_cloud(&mut self, address: &str, prop: &PropKey, value: Value, net: &mut dyn NetworkLayer) -> crate::error::Result<()> {
        let node = self.nodes.get_mut(address).ok_or_else(|| crate::error::Error::new(crate::error::ErrorKind::UnknownNode(address.to_string())))?;
        node.prop_set(&prop.subdevice, &prop.template, &prop.name, value.clone(), None)?;
        if node.online {
            net.prop_set(address, prop, &value);
        } else {
            node.flags.retry_set_props = true;
            if let Some(p) = node.property_mut(&prop.subdevice, &prop.template, &prop.name) {
                p.retry_set = true;
            }
        }
        Ok(())
    }

    /// §4.3.1 entry point: a from-device property value arrived (generic
    /// path underneath the typed `node_prop_{integer,string,boolean,
    /// decimal}_send` helpers). No-ops when the value hasn't changed and
    /// the property is already synced (§4.3.5).
    pub fn node_prop_send(
        &mut self, address: &str, prop: &PropKey, value: Value, cloud: &mut dyn CloudLayer,
    ) {
        let Some(node) = self.nodes.get_mut(address) else { return };
        if let Some(p) = node.property(&prop.subdevice, &prop.template, &prop.name) {
            if p.value.as_ref() == Some(&value) && p.val_synced {
                return;
            }
        }
        if let Some(p) = node.property_mut(&prop.subdevice, &prop.template, &prop.name) {
            p.value = Some(value.clone());
        }
        if node.state != NodeState::Ready {
            node.flags.retry_send_props = true;
            if let Some(p) = node.property_mut(&prop.subdevice, &prop.template, &prop.name) {
                p.retry_send = true;
            }
            return;
        }
        let batch_append = node.flags.batch_prop_sends > 0;
        cloud.node_prop_send(address, prop, &value, batch_append);
    }

    /// §4.3.3: resend every property flagged `retry_send` as one batch once
    /// the node reaches READY.
    fn resend_deferred_props(&mut self, address: &str, cloud: &mut dyn CloudLayer) {
        let Some(node) = self.nodes.get_mut(address) else { return };
        if !node.flags.retry_send_props {
            return;
        }
        node.flags.retry_send_props = false;
        let mut flagged = Vec::new();
        for (sub_key, sub) in node.subdevices() {
            for tmpl_key in sub_template_keys(sub) {
                if let Some(tmpl) = sub.template(&tmpl_key) {
                    for prop in tmpl.properties() {
                        if prop.retry_send {
                            if let Some(value) = &prop.value {
                                flagged.push((
                                    PropKey::new(sub_key.clone(), tmpl_key.clone(), prop.name.clone()),
                                    value.clone(),
                                ));
                            }
                        }
                    }
                }
            }
        }
        for (key, value) in &flagged {
            cloud.node_prop_send(address, key, value, true);
        }
        cloud.node_prop_batch_send(address);
        if let Some(node) = self.nodes.get_mut(address) {
            for key in flagged.iter().map(|(k, _)| k) {
                if let Some(p) = node.property_mut(&key.subdevice, &key.template, &key.name) {
                    p.retry_send = false;
                }
            }
        }
    }

    /// §4.3.3: `batch_begin`/`batch_end` maintain a per-node counter; only
    /// the outermost `end` issues the batch.
    pub fn node_prop_batch_begin(&mut self, address: &str) {
        if let Some(node) = self.nodes.get_mut(address) {
            node.flags.batch_prop_sends += 1;
        }
    }

    pub fn node_prop_batch_end(&mut self, address: &str, cloud: &mut dyn CloudLayer) {
        let Some(node) = self.nodes.get_mut(address) else { return };
        if node.flags.batch_prop_sends == 0 {
            return;
        }
        node.flags.batch_prop_sends -= 1;
        if node.flags.batch_prop_sends == 0 {
            cloud.node_prop_batch_send(address);
        }
    }

    /// Flags requested for the next time the node is READY.
    pub fn request_update(&mut self, address: &str) {
        self.set_flag(address, |f| f.update = true);
    }
    pub fn request_factory_reset(&mut self, address: &str) {
        self.set_flag(address, |f| f.factory_reset = true);
    }
    pub fn request_remove(&mut self, address: &str) {
        self.set_flag(address, |f| f.remove = true);
    }
    pub fn request_reconfigure(&mut self, address: &str) {
        self.set_flag(address, |f| f.reconfigure = true);
    }

    /// §4.3.1 entry point: the physical layer learned or refreshed the
    /// node's software version and/or OEM model (scan-result inference,
    /// GATT discovery, ...). Updates whichever field actually changed and,
    /// if anything did, flags the node for a cloud `node_update_info` the
    /// next time it is READY.
    pub fn node_info_changed(&mut self, address: &str, sw_version: Option<String>, oem_model: Option<String>) {
        let Some(node) = self.nodes.get_mut(address) else { return };
        let mut changed = false;
        if sw_version.is_some() && node.sw_version != sw_version {
            node.sw_version = sw_version;
            changed = true;
        }
        if oem_model.is_some() && node.oem_model != oem_model {
            node.oem_model = oem_model;
            changed = true;
        }
        if changed {
            node.flags.update = true;
        }
    }

    fn set_flag(&mut self, address: &str, f: impl FnOnce(&mut crate::node::NodeFlags)) {
        if let Some(node) = self.nodes.get_mut(address) {
            f(&mut node.flags);
        }
    }

    /// Advances the state machine as far as it can go without an op in
    /// flight (§4.3.2, §5: "no interleaving, an op cannot begin until
    /// op_pending is clear").
    fn evaluate(&mut self, address: &str, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) {
        let Some(node) = self.nodes.get(address) else { return };
        if node.flags.op_pending {
            return;
        }
        match node.state {
            NodeState::Joined => {
                if node.flags.left {
                    self.enter_state(address, NodeState::Removed, net, cloud);
                } else {
                    self.persist(address, net, cloud);
                    self.enter_state(address, NodeState::NetQuery, net, cloud);
                }
            }
            NodeState::Ready => {
                let flags = node.flags;
                if flags.left {
                    self.enter_state(address, NodeState::CloudRemove, net, cloud);
                } else if flags.factory_reset {
                    self.enter_state(address, NodeState::NetFactoryReset, net, cloud);
                } else if flags.remove {
                    self.enter_state(address, NodeState::NetRemove, net, cloud);
                } else if flags.update {
                    self.enter_state(address, NodeState::CloudUpdate, net, cloud);
                } else if flags.reconfigure {
                    self.enter_state(address, NodeState::NetConfigure, net, cloud);
                } else {
                    self.resend_deferred_props(address, cloud);
                }
            }
            NodeState::Removed => {
                self.nodes.remove(address);
                self.persist(address, net, cloud);
            }
            _ => {}
        }
    }

    /// Sets `state` and, for the states that own an op, issues it and sets
    /// `op_pending`.
    fn enter_state(&mut self, address: &str, state: NodeState, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) {
        let Some(node) = self.nodes.get_mut(address) else { return };
        node.state = state;
        match state {
            NodeState::NetQuery => {
                node.flags.op_pending = true;
                net.query_info(address);
            }
            NodeState::NetConfigure => {
                node.flags.reconfigure = false;
                node.flags.op_pending = true;
                net.configure(address);
            }
            NodeState::NetFactoryReset => {
                node.flags.factory_reset = false;
                node.flags.op_pending = true;
                net.factory_reset(address);
            }
            NodeState::NetRemove => {
                node.flags.remove = false;
                node.flags.op_pending = true;
                net.leave(address);
            }
            NodeState::CloudAdd => {
                node.flags.op_pending = true;
                cloud.node_add(address);
            }
            NodeState::CloudUpdate => {
                node.flags.update = false;
                node.flags.op_pending = true;
                cloud.node_update_info(address);
            }
            NodeState::CloudRemove => {
                node.flags.op_pending = true;
                cloud.node_remove(address);
            }
            NodeState::Joined | NodeState::Ready | NodeState::Removed => {
                self.evaluate(address, net, cloud);
            }
        }
    }

    /// §4.3.1: result of the network-layer op issued for the node's
    /// current state.
    pub fn on_network_result(
        &mut self, address: &str, status: NetworkStatus, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer,
    ) {
        let (advance, retry) = {
            let Some(node) = self.nodes.get_mut(address) else { return };
            node.flags.op_pending = false;
            let (advance, retry, mark_left) = map_network(status);
            if mark_left {
                node.flags.left = true;
            }
            (advance, retry)
        };
        // §4.3.4: save triggered on each op_complete, not just the named
        // state-entry transitions `evaluate` already saves around.
        self.persist(address, net, cloud);
        if retry || !advance {
            return;
        }
        let Some(node) = self.nodes.get(address) else { return };
        match node.state {
            NodeState::NetQuery => {
                if node.flags.left {
                    self.enter_state(address, NodeState::Removed, net, cloud);
                } else {
                    self.enter_state(address, NodeState::CloudAdd, net, cloud);
                }
            }
            NodeState::NetConfigure | NodeState::NetFactoryReset => {
                self.enter_state(address, NodeState::Ready, net, cloud);
            }
            NodeState::NetRemove => {
                self.enter_state(address, NodeState::Removed, net, cloud);
            }
            _ => {}
        }
    }

    /// §4.3.1: result of the cloud-layer op issued for the node's current
    /// state.
    pub fn on_cloud_result(
        &mut self, address: &str, status: CloudStatus, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer,
    ) {
        let (advance, retry) = {
            let Some(node) = self.nodes.get_mut(address) else { return };
            node.flags.op_pending = false;
            let (advance, retry, mark_unknown) = map_cloud(status);
            if mark_unknown && node.state == NodeState::CloudAdd {
                // A cloud add that fails unrecoverably leaves the node
                // non-functional; schedule its removal (§4.3.2).
                node.flags.remove = true;
            }
            (advance, retry)
        };
        // §4.3.4: save triggered on each op_complete.
        self.persist(address, net, cloud);
        if retry || !advance {
            return;
        }
        let Some(node) = self.nodes.get(address) else { return };
        match node.state {
            NodeState::CloudAdd => {
                if node.flags.left {
                    self.enter_state(address, NodeState::CloudRemove, net, cloud);
                } else {
                    self.enter_state(address, NodeState::NetConfigure, net, cloud);
                }
            }
            NodeState::CloudUpdate => {
                self.enter_state(address, NodeState::Ready, net, cloud);
            }
            NodeState::CloudRemove => {
                self.enter_state(address, NodeState::Removed, net, cloud);
            }
            _ => {}
        }
    }

    /// Called by the main loop's 60s node-op retry timer (§5): re-issues
    /// the op for the node's current state if one is not already pending.
    pub fn retry_tick(&mut self, address: &str, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) {
        let Some(node) = self.nodes.get(address) else { return };
        if node.flags.op_pending {
            return;
        }
        let state = node.state;
        self.enter_state(address, state, net, cloud);
    }

    /// §4.3.4: writes the `nodes` config key through to the configured
    /// store, read-modify-write so `prop_schedules`/`gateway_schedules`
    /// (owned by EIA) are left untouched. A no-op when no store is set, but
    /// the per-node collaborators still get a chance to flush their own
    /// local state.
    fn persist(&mut self, address: &str, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) {
        let Some(store) = self.store.clone() else {
            let _ = net.conf_save(address);
            let _ = cloud.conf_save(address);
            return;
        };
        let nodes = self.conf_save_all(net, cloud);
        let mut doc = store.load().unwrap_or_else(|_| crate::eia::config::empty_document());
        doc["nodes"] = nodes;
        let _ = store.save(&doc);
    }

    /// Wires a [`ConfigStore`](crate::eia::config::ConfigStore) so `persist`
    /// actually writes through on each state transition and op completion,
    /// instead of only on the explicit bulk [`Self::conf_save_all`]/
    /// [`Self::conf_load_all`] round trip an owner drives directly.
    pub fn set_config_store(&mut self, store: std::sync::Arc<dyn crate::eia::config::ConfigStore>) {
        self.store = Some(store);
    }

    /// §4.3.4: serializes the full node tree for the `nodes` config key.
    pub fn conf_save_all(&mut self, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) -> serde_json::Value {
        let addrs: Vec<String> = self.nodes.keys().cloned().collect();
        let mut out = Vec::new();
        for addr in addrs {
            let Some(node) = self.nodes.get(&addr) else { continue };
            let entry = serde_json::json!({
                "address": node.address,
                "version": node.sw_version,
                "oem_model": node.oem_model,
                "interface": node.network,
                "power": node.power,
                "management_state": node.state,
                "network": net.conf_save(&addr),
                "cloud": cloud.conf_save(&addr),
            });
            out.push(entry);
        }
        serde_json::Value::Array(out)
    }

    /// §4.3.4: reconstructs the tree on load. Nodes with an unrecognized
    /// `management_state` resume at READY.
    pub fn conf_load_all(&mut self, value: &serde_json::Value, net: &mut dyn NetworkLayer, cloud: &mut dyn CloudLayer) {
        let Some(entries) = value.as_array() else { return };
        for entry in entries {
            let Some(address) = entry.get("address").and_then(|v| v.as_str()) else { continue };
            let network: NetworkKind =
                entry.get("interface").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or(NetworkKind::Ble);
            let power: PowerKind =
                entry.get("power").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or(PowerKind::Mains);
            let mut node = Node::new(address, network, power);
            node.sw_version = entry.get("version").and_then(|v| v.as_str()).map(str::to_string);
            node.oem_model = entry.get("oem_model").and_then(|v| v.as_str()).map(str::to_string);
            node.state = entry
                .get("management_state")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(NodeState::Ready);
            self.nodes.insert(address.to_string(), node);
            if let Some(blob) = entry.get("network") {
                net.conf_loaded(address, blob.clone());
            }
            if let Some(blob) = entry.get("cloud") {
                cloud.conf_loaded(address, blob.clone());
            }
        }
    }
}

fn sub_template_keys(sub: &crate::node::Subdevice) -> Vec<String> {
    // `Subdevice` intentionally does not expose its template map directly;
    // callers that need every key (persistence, batch resend) go through
    // this helper instead of widening the public surface.
    sub.template_keys()
}
