use btuuid::BluetoothUuid;

use crate::characteristic::Characteristic;

/// Identifies one instance of a service on a device.
///
/// Several services may share a UUID, so the instance id is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    pub uuid: BluetoothUuid,
    pub instance_id: u32,
}

impl ServiceId {
    pub fn new(uuid: BluetoothUuid, instance_id: u32) -> Self {
        Self { uuid, instance_id }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind {
    #[default]
    Primary,
    Secondary,
}

/// A service as reported by the link, including its full attribute subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub kind: ServiceKind,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(id: ServiceId, kind: ServiceKind) -> Self {
        Self {
            id,
            kind,
            characteristics: Vec::new(),
        }
    }

    pub fn uuid(&self) -> &BluetoothUuid {
        &self.id.uuid
    }

    pub fn is_primary(&self) -> bool {
        self.kind == ServiceKind::Primary
    }
}
