//! The server (peripheral) side of a GATT link.

use crate::characteristic::CharacteristicId;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::descriptor::DescriptorId;
use crate::device::BleDevice;
use crate::error::{GattStatus, Result};
use crate::service::Service;

/// Commands a local GATT server can issue over a link.
pub trait GattServerLink: Send + Sync + 'static {
    /// Publishes a local service so that clients can discover it.
    fn add_service(&self, service: &Service) -> Result<()>;

    /// Answers a request previously received as a [`ServerEvent`].
    fn send_response(
        &self,
        device: &BleDevice,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: Option<&[u8]>,
    ) -> Result<()>;

    /// Pushes a characteristic value to a client, as an indication if `confirm` is set and
    /// as a notification otherwise.
    fn notify_characteristic_changed(
        &self,
        device: &BleDevice,
        characteristic: &CharacteristicId,
        confirm: bool,
        value: &[u8],
    ) -> Result<()>;

    fn cancel_connection(&self, device: &BleDevice) -> Result<()>;

    fn close(&self);
}

/// An event reported by a server link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ConnectionStateChanged {
        device: BleDevice,
        status: ConnectionStatus,
        new_state: ConnectionState,
    },
    MtuChanged {
        device: BleDevice,
        mtu: u16,
    },
    NotificationSent {
        device: BleDevice,
        status: GattStatus,
    },
    /// Commits (`execute == true`) or aborts all prepared writes of a client.
    ExecuteWrite {
        device: BleDevice,
        request_id: u32,
        execute: bool,
    },
    Attribute(ServerAttributeEvent),
}

/// A request from a client scoped to a single local characteristic or descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAttributeEvent {
    CharacteristicReadRequest {
        device: BleDevice,
        request_id: u32,
        characteristic: CharacteristicId,
        offset: u16,
    },
    CharacteristicWriteRequest {
        device: BleDevice,
        request_id: u32,
        characteristic: CharacteristicId,
        request: WriteRequest,
    },
    DescriptorReadRequest {
        device: BleDevice,
        request_id: u32,
        descriptor: DescriptorId,
        offset: u16,
    },
    DescriptorWriteRequest {
        device: BleDevice,
        request_id: u32,
        descriptor: DescriptorId,
        request: WriteRequest,
    },
}

impl ServerAttributeEvent {
    pub fn device(&self) -> &BleDevice {
        match self {
            ServerAttributeEvent::CharacteristicReadRequest { device, .. }
            | ServerAttributeEvent::CharacteristicWriteRequest { device, .. }
            | ServerAttributeEvent::DescriptorReadRequest { device, .. }
            | ServerAttributeEvent::DescriptorWriteRequest { device, .. } => device,
        }
    }

    pub fn request_id(&self) -> u32 {
        match self {
            ServerAttributeEvent::CharacteristicReadRequest { request_id, .. }
            | ServerAttributeEvent::CharacteristicWriteRequest { request_id, .. }
            | ServerAttributeEvent::DescriptorReadRequest { request_id, .. }
            | ServerAttributeEvent::DescriptorWriteRequest { request_id, .. } => *request_id,
        }
    }
}

/// The payload of a write request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteRequest {
    /// Whether the write is part of a queued (reliable) write transaction.
    pub prepared_write: bool,
    pub response_needed: bool,
    pub offset: u16,
    pub value: Vec<u8>,
}

impl From<ServerAttributeEvent> for ServerEvent {
    fn from(event: ServerAttributeEvent) -> Self {
        ServerEvent::Attribute(event)
    }
}
