//! The client (central) side of a GATT link.

use crate::characteristic::{CharacteristicId, WriteType};
use crate::connection::{ConnectOptions, ConnectionState, ConnectionStatus, Phy, PhyOption};
use crate::descriptor::DescriptorId;
use crate::device::{BleDevice, BondState};
use crate::error::{GattStatus, Result};
use crate::service::Service;

/// Commands a GATT client can issue over a link to a single remote device.
///
/// Every command only starts an operation. Its outcome, if any, is reported later as a
/// [`ClientEvent`] on the event stream that belongs to the same link. A command returns an
/// error only when the driver refuses to start it.
pub trait GattClientLink: Send + Sync + 'static {
    fn device(&self) -> &BleDevice;

    fn connect(&self, options: &ConnectOptions) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    /// Releases the native resources held for this link.
    fn close(&self);

    fn request_mtu(&self, mtu: u16) -> Result<()>;

    fn set_preferred_phy(&self, tx: Phy, rx: Phy, option: PhyOption) -> Result<()>;

    fn read_phy(&self) -> Result<()>;

    fn read_remote_rssi(&self) -> Result<()>;

    fn discover_services(&self) -> Result<()>;

    fn clear_services_cache(&self) -> Result<()>;

    fn begin_reliable_write(&self) -> Result<()>;

    fn abort_reliable_write(&self) -> Result<()>;

    fn execute_reliable_write(&self) -> Result<()>;

    fn read_characteristic(&self, characteristic: &CharacteristicId) -> Result<()>;

    fn write_characteristic(
        &self,
        characteristic: &CharacteristicId,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()>;

    fn set_characteristic_notification(
        &self,
        characteristic: &CharacteristicId,
        enable: bool,
    ) -> Result<()>;

    fn read_descriptor(&self, descriptor: &DescriptorId) -> Result<()>;

    fn write_descriptor(&self, descriptor: &DescriptorId, value: &[u8]) -> Result<()>;
}

/// An event reported by a client link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionStateChanged {
        status: ConnectionStatus,
        new_state: ConnectionState,
    },
    MtuChanged {
        mtu: u16,
        status: GattStatus,
    },
    PhyRead {
        tx: Phy,
        rx: Phy,
        status: GattStatus,
    },
    PhyUpdate {
        tx: Phy,
        rx: Phy,
        status: GattStatus,
    },
    ReadRemoteRssi {
        rssi: i16,
        status: GattStatus,
    },
    BondStateChanged {
        bond_state: BondState,
    },
    /// The remote database changed and the current services are stale.
    ServiceChanged,
    ServicesDiscovered {
        services: Vec<Service>,
        status: GattStatus,
    },
    ReliableWriteCompleted {
        status: GattStatus,
    },
    Attribute(ClientAttributeEvent),
}

/// An event scoped to a single remote characteristic or descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAttributeEvent {
    CharacteristicRead {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWrite {
        characteristic: CharacteristicId,
        status: GattStatus,
    },
    /// A notification or indication received from the remote device.
    CharacteristicChanged {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    DescriptorRead {
        descriptor: DescriptorId,
        value: Vec<u8>,
        status: GattStatus,
    },
    DescriptorWrite {
        descriptor: DescriptorId,
        status: GattStatus,
    },
}

impl ClientAttributeEvent {
    /// The characteristic the event is addressed to, directly or through one of its
    /// descriptors.
    pub fn characteristic(&self) -> &CharacteristicId {
        match self {
            ClientAttributeEvent::CharacteristicRead { characteristic, .. }
            | ClientAttributeEvent::CharacteristicWrite { characteristic, .. }
            | ClientAttributeEvent::CharacteristicChanged { characteristic, .. } => characteristic,
            ClientAttributeEvent::DescriptorRead { descriptor, .. }
            | ClientAttributeEvent::DescriptorWrite { descriptor, .. } => {
                &descriptor.characteristic
            }
        }
    }
}

impl From<ClientAttributeEvent> for ClientEvent {
    fn from(event: ClientAttributeEvent) -> Self {
        ClientEvent::Attribute(event)
    }
}
