//! Cloud-client JSON framing, op recognition, and the two independent
//! reconnect loops (§4.5, §6): the main `data`/`gateway` socket, and the
//! secondary `msg_sock` amsg dialect (`msg_client.c`'s own connect/
//! disconnect events, reconnecting on its own 1 s timer independent of the
//! main socket).

use std::time::Duration;

use crate::eia::cloud_socket::CloudSocket;
use crate::error::{Error, IpcErrorKind};

/// Protocol named in the `cmd.proto` field (§4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Proto {
    Data,
    Gateway,
}

impl Proto {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "data" => Some(Proto::Data),
            "gateway" => Some(Proto::Gateway),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Proto::Data => "data",
            Proto::Gateway => "gateway",
        }
    }
}

/// Node-centric routing carried by ops on the `gateway` protocol (§4.5).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GatewayRoute {
    pub address: Option<String>,
    pub subdevice_key: Option<String>,
    pub template_key: Option<String>,
    pub name: Option<String>,
}

impl GatewayRoute {
    fn from_opts(opts: &serde_json::Value) -> Self {
        Self {
            address: opts.get("address").and_then(|v| v.as_str()).map(str::to_string),
            subdevice_key: opts.get("subdevice_key").and_then(|v| v.as_str()).map(str::to_string),
            template_key: opts.get("template_key").and_then(|v| v.as_str()).map(str::to_string),
            name: opts.get("name").and_then(|v| v.as_str()).map(str::to_string),
        }
    }
}

/// One parsed inbound command (§4.5's `{"cmd": {...}}` envelope).
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingCmd {
    pub proto: Proto,
    pub op: String,
    pub id: i64,
    pub args: Vec<serde_json::Value>,
    pub opts: serde_json::Value,
    pub route: Option<GatewayRoute>,
}

/// Data-protocol ops recognized per §4.5.
pub const DATA_OPS: &[&str] = &[
    "property_update",
    "property_response",
    "property_request",
    "property_ack",
    "schedule_update",
    "datapoint_location",
    "datapoint_request",
    "confirm_true",
    "confirm_false",
    "nak",
    "echo_failure",
    "message_get",
];

/// Gateway-protocol ops extend the data set with node-centric operations
/// (§4.5); the routing fields distinguish them, not a disjoint op set.
pub const GATEWAY_OPS: &[&str] = &[
    "node_add",
    "node_update",
    "node_remove",
    "node_conn_status",
    "property_update",
    "property_response",
    "property_request",
    "property_ack",
    "confirm_true",
    "confirm_false",
    "nak",
];

/// Parses one received packet into a command, or an IPC error kind plus
/// whatever request id could be salvaged for the NAK (§7).
pub fn parse_frame(bytes: &[u8]) -> std::result::Result<IncomingCmd, (IpcErrorKind, Option<i64>)> {
    let doc: serde_json::Value = serde_json::from_slice(bytes).map_err(|_| (IpcErrorKind::InvalidJson, None))?;
    let cmd = doc.get("cmd").ok_or((IpcErrorKind::InvalidJson, None))?;
    let id = cmd.get("id").and_then(|v| v.as_i64());

    let proto_str = cmd.get("proto").and_then(|v| v.as_str()).ok_or((IpcErrorKind::InvalidJson, id))?;
    let proto = Proto::parse(proto_str).ok_or((IpcErrorKind::UnknownProtocol, id))?;

    let op = cmd.get("op").and_then(|v| v.as_str()).ok_or((IpcErrorKind::MissingOp, id))?.to_string();
    let id = id.ok_or((IpcErrorKind::InvalidJson, None))?;

    let args = cmd.get("args").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let opts = cmd.get("opts").cloned().unwrap_or_else(|| serde_json::json!({}));

    let known = match proto {
        Proto::Data => DATA_OPS.contains(&op.as_str()),
        Proto::Gateway => GATEWAY_OPS.contains(&op.as_str()),
    };
    if !known {
        return Err((IpcErrorKind::MissingOp, Some(id)));
    }

    let route = matches!(proto, Proto::Gateway).then(|| GatewayRoute::from_opts(&opts));

    Ok(IncomingCmd { proto, op, id, args, opts, route })
}

/// Builds an outbound `{"cmd": {...}}` frame.
pub fn encode_cmd(proto: Proto, op: &str, id: u64, args: Vec<serde_json::Value>, opts: serde_json::Value) -> Vec<u8> {
    let frame = serde_json::json!({
        "cmd": { "proto": proto.as_str(), "op": op, "id": id, "args": args, "opts": opts }
    });
    serde_json::to_vec(&frame).expect("json serialization of a constructed value cannot fail")
}

/// Builds a `nak` reply correlated by request id (§7, §4.5).
pub fn encode_nak(id: i64, code: &str) -> Vec<u8> {
    let frame = serde_json::json!({
        "cmd": { "proto": "data", "op": "nak", "id": id, "args": [], "opts": { "err": code } }
    });
    serde_json::to_vec(&frame).expect("json serialization of a constructed value cannot fail")
}

/// How often the main data socket and the msg socket each retry (§5): 1 s,
/// on independent timers.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// The main cloud-client link: owns the socket, decodes frames, and NAKs
/// framing failures (§4.5, §7). Correlation of our own outbound ops'
/// replies (`confirm_true`/`confirm_false`/`nak`) against
/// [`crate::poq::Poq`]'s awaiting-confirm table happens one level up, in
/// the glue that drives both; this struct only does the wire protocol.
pub struct CloudClient {
    socket: CloudSocket,
}

impl CloudClient {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { socket: CloudSocket::new(path) }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub async fn connect(&mut self) -> std::io::Result<()> {
        self.socket.connect().await
    }

    pub async fn send_cmd(&self, proto: Proto, op: &str, id: u64, args: Vec<serde_json::Value>, opts: serde_json::Value) -> crate::error::Result<()> {
        self.socket.send(&encode_cmd(proto, op, id, args, opts)).await.map_err(Error::from)
    }

    /// Receives one frame, parsing it. On a framing failure, sends the
    /// NAK itself (so the caller only ever sees successfully parsed
    /// commands) and returns `Ok(None)`. Returns `Err` only on a transport
    /// failure (peer gone, reconnect needed).
    pub async fn recv_cmd(&mut self) -> crate::error::Result<Option<IncomingCmd>> {
        let bytes = self.socket.recv().await.map_err(Error::from)?;
        if bytes.len() >= crate::eia::cloud_socket::MAX_RECV_BUF {
            let _ = self.socket.send(&encode_nak(0, IpcErrorKind::OversizedPacket.wire_code())).await;
            return Ok(None);
        }
        match parse_frame(&bytes) {
            Ok(cmd) => Ok(Some(cmd)),
            Err((kind, id)) => {
                let _ = self.socket.send(&encode_nak(id.unwrap_or(0), kind.wire_code())).await;
                Ok(None)
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.socket.disconnect();
    }
}

/// Connect/disconnect events the msg socket surfaces (`msg_client.c`'s
/// endpoint events), distinct from the structured amsg payloads it
/// carries once connected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MsgEvent {
    Connected,
    Disconnected,
}

/// amsg sub-protocol endpoints pushed over the msg socket once connected
/// (§ SUPPLEMENTED FEATURES): listen-enable, destination push, time push,
/// registration push, factory-reset push, setup-info push.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MsgOp {
    ListenEnable,
    DestinationPush,
    TimePush,
    RegistrationPush,
    FactoryResetPush,
    SetupInfoPush,
}

impl MsgOp {
    pub fn wire_name(self) -> &'static str {
        match self {
            MsgOp::ListenEnable => "listen_enable",
            MsgOp::DestinationPush => "dests_push",
            MsgOp::TimePush => "time_push",
            MsgOp::RegistrationPush => "reg_push",
            MsgOp::FactoryResetPush => "factory_reset_push",
            MsgOp::SetupInfoPush => "setup_info_push",
        }
    }
}

/// The secondary `client/msg_sock` link. Its own socket, own connected
/// flag, own 1 s reconnect timer -- entirely independent of the main
/// [`CloudClient`] (§ SUPPLEMENTED FEATURES).
pub struct MsgSocket {
    socket: CloudSocket,
    connected: bool,
}

impl MsgSocket {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { socket: CloudSocket::new(path), connected: false }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Attempts to (re)connect, returning the endpoint event on a state
    /// change. `Ok(None)` means no change (already connected, or the
    /// attempt failed and the caller should wait [`RECONNECT_DELAY`]
    /// before calling again).
    pub async fn reconnect(&mut self) -> std::io::Result<Option<MsgEvent>> {
        if self.connected {
            return Ok(None);
        }
        self.socket.connect().await?;
        self.connected = true;
        Ok(Some(MsgEvent::Connected))
    }

    pub fn note_disconnected(&mut self) -> Option<MsgEvent> {
        if self.connected {
            self.connected = false;
            self.socket.disconnect();
            Some(MsgEvent::Disconnected)
        } else {
            None
        }
    }

    pub async fn push(&self, op: MsgOp, payload: serde_json::Value) -> crate::error::Result<()> {
        self.socket.send(&encode_cmd(Proto::Data, op.wire_name(), 0, Vec::new(), payload)).await.map_err(Error::from)
    }
}
