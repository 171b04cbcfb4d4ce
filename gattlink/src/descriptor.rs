use btuuid::BluetoothUuid;

use crate::characteristic::{AttributePermissions, CharacteristicId};

/// The Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: BluetoothUuid = BluetoothUuid::from_u16(0x2902);

/// CCCD value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
/// CCCD value enabling indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
/// CCCD value disabling both.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Identifies one instance of a descriptor inside a specific characteristic instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorId {
    pub characteristic: CharacteristicId,
    pub uuid: BluetoothUuid,
    pub instance_id: u32,
}

impl DescriptorId {
    pub fn new(characteristic: CharacteristicId, uuid: BluetoothUuid, instance_id: u32) -> Self {
        Self {
            characteristic,
            uuid,
            instance_id,
        }
    }
}

/// A descriptor as reported by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub id: DescriptorId,
    pub permissions: AttributePermissions,
}

impl Descriptor {
    pub fn uuid(&self) -> &BluetoothUuid {
        &self.id.uuid
    }

    pub fn is_client_characteristic_configuration(&self) -> bool {
        self.id.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION
    }
}
