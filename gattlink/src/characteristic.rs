use bitflags::bitflags;
use btuuid::BluetoothUuid;

use crate::descriptor::Descriptor;
use crate::service::ServiceId;

bitflags! {
    /// The operations a characteristic declares support for.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const SIGNED_WRITE = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

bitflags! {
    /// Access permissions of a local attribute.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AttributePermissions: u16 {
        const READ = 0x0001;
        const READ_ENCRYPTED = 0x0002;
        const READ_ENCRYPTED_MITM = 0x0004;
        const WRITE = 0x0010;
        const WRITE_ENCRYPTED = 0x0020;
        const WRITE_ENCRYPTED_MITM = 0x0040;
        const WRITE_SIGNED = 0x0080;
        const WRITE_SIGNED_MITM = 0x0100;
    }
}

/// How a characteristic value is written to the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
    Signed,
}

impl WriteType {
    /// The write type a characteristic supports by default, preferring acknowledged writes.
    pub fn for_properties(properties: CharacteristicProperties) -> Self {
        if properties.contains(CharacteristicProperties::WRITE) {
            WriteType::WithResponse
        } else if properties.contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else if properties.contains(CharacteristicProperties::SIGNED_WRITE) {
            WriteType::Signed
        } else {
            WriteType::WithResponse
        }
    }
}

/// Identifies one instance of a characteristic inside a specific service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    pub service: ServiceId,
    pub uuid: BluetoothUuid,
    pub instance_id: u32,
}

impl CharacteristicId {
    pub fn new(service: ServiceId, uuid: BluetoothUuid, instance_id: u32) -> Self {
        Self {
            service,
            uuid,
            instance_id,
        }
    }
}

/// A characteristic as reported by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub id: CharacteristicId,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn uuid(&self) -> &BluetoothUuid {
        &self.id.uuid
    }
}
