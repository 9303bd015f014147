//! # gwcore — edge gateway core
//!
//! The network-agnostic, transport-agnostic core of an edge IoT gateway
//! daemon: it tracks BLE peripherals through BlueZ's D-Bus object graph,
//! maps them onto a logical cloud-node tree, and exchanges property
//! updates with a cloud service over a sequenced-packet Unix socket.
//!
//! The following pieces are provided.
//!
//! * [GATT template database](gdb) -- UUID-to-property definitions, seeded
//!   once at startup
//! * [logical node tree](node) and [node lifecycle manager](nm)
//! * [BLE object tracker](bot) -- mirrors BlueZ's managed-object graph and
//!   drives [`nm::NodeManager`] from D-Bus events
//! * [property/op queue](poq) -- the outbound cloud op FIFO with
//!   confirm/nak correlation
//! * [edge IoT adapter](eia) -- cloud-client framing, the independent msg
//!   socket, schedule evaluation, and persisted config
//!
//! This crate owns no event loop of its own: a gateway-app binary wires
//! [`bot::Bot`], [`nm::NodeManager`], [`poq::Poq`], and [`eia::Eia`]
//! together around its own D-Bus connection and async runtime.

pub mod bot;
pub mod eia;
pub mod error;
pub mod gdb;
pub mod ident;
pub mod nm;
pub mod node;
pub mod poq;
pub mod value;

pub use error::{Error, ErrorKind, Result};
