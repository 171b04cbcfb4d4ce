//! The link-facing vocabulary of an asynchronous Bluetooth LE GATT engine.
//!
//! This crate describes what a GATT link driver has to offer: the commands a client or a
//! server can issue ([`GattClientLink`], [`GattServerLink`]), the events the driver reports
//! back ([`ClientEvent`], [`ServerEvent`]), and the attribute tree those events refer to.
//! It performs no I/O itself. The [`mock`] module provides loopback links for running
//! without a radio.

mod characteristic;
mod client;
mod connection;
mod descriptor;
mod device;
pub mod error;
pub mod mock;
mod server;
mod service;

pub use characteristic::*;
pub use client::*;
pub use connection::*;
pub use descriptor::*;
pub use device::*;
pub use error::{Error, GattStatus, Result};
pub use server::*;
pub use service::*;

pub use btuuid::BluetoothUuid;
