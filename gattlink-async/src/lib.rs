//! An asynchronous GATT request/response correlation engine for the `gattlink` crate.
//!
//! A GATT link only handles one outstanding operation at a time and reports every outcome
//! through a single stream of events. [`GattClient`] turns that into `async` functions: it
//! serializes callers through an [`OperationMutex`] and hands each event back to the caller
//! or node waiting for it. [`GattServer`] does the same for the local side, answering read,
//! write and prepared-write requests for every connected client.
//!
//! Both types are created together with an event loop future that must be spawned on an
//! executor. See the `examples` directory for a complete loopback session.

mod client;
pub mod error;
mod mtu;
mod mutex;
mod server;
mod server_services;
mod services;
mod util;

pub use client::*;
pub use gattlink::{
    BleDevice, BondState, BluetoothUuid, ConnectOptions, ConnectionState,
    ConnectionStateWithStatus, GattStatus, Phy, PhyInfo, PhyOption, WriteType,
};
pub use mtu::*;
pub use mutex::*;
pub use server::*;
pub use server_services::{
    CharacteristicConfig, DescriptorConfig, ServerCharacteristic, ServerDescriptor,
    ServerService, ServerServices, ServiceConfig,
};
pub use services::{ClientCharacteristic, ClientDescriptor, ClientService, ClientServices};
pub use util::BroadcastReceiver;
