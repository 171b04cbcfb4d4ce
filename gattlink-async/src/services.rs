//! The remote attribute database as seen by a [`GattClient`](crate::GattClient).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use btuuid::BluetoothUuid;
use gattlink::{
    CharacteristicId, CharacteristicProperties, ClientAttributeEvent, DescriptorId,
    GattClientLink, GattStatus, ServiceId, ServiceKind, WriteType,
};

use crate::error::{Error, ErrorKind, Result};
use crate::mutex::OperationMutex;
use crate::util::{BroadcastReceiver, Slot, Watch};

#[derive(Clone)]
pub(crate) struct LinkHandle {
    pub link: Arc<dyn GattClientLink>,
    pub gate: OperationMutex,
}

/// Everything a node needs to issue correlated commands on the link it was discovered on.
#[derive(Clone)]
struct NodeHandle {
    link: Arc<dyn GattClientLink>,
    gate: OperationMutex,
    retired: Arc<AtomicBool>,
}

impl NodeHandle {
    /// Runs one exchange for a node, failing with `Canceled` once its registry is replaced.
    ///
    /// The check runs after the slot is armed, so a registry retired later still disarms it.
    async fn correlate<T>(
        &self,
        slot: &Slot<Result<T>>,
        issue: impl FnOnce(&dyn GattClientLink) -> gattlink::Result<()>,
    ) -> Result<T> {
        self.gate
            .correlate(slot, || {
                self.ensure_current()?;
                issue(&*self.link).map_err(Error::from)
            })
            .await
    }

    fn ensure_current(&self) -> Result<()> {
        if self.retired.load(Ordering::SeqCst) {
            return Err(ErrorKind::Canceled.into());
        }
        Ok(())
    }
}

/// The services discovered on a remote device, in discovery order.
///
/// A new `ClientServices` is built for every successful discovery. Once a newer discovery
/// replaces it, operations on its nodes fail with [`ErrorKind::Canceled`].
#[derive(Debug)]
pub struct ClientServices {
    services: Vec<ClientService>,
    retired: Arc<AtomicBool>,
}

impl ClientServices {
    pub(crate) fn new(handle: &LinkHandle, services: Vec<gattlink::Service>) -> Self {
        let handle = NodeHandle {
            link: handle.link.clone(),
            gate: handle.gate.clone(),
            retired: Arc::new(AtomicBool::new(false)),
        };
        Self {
            services: services
                .into_iter()
                .map(|service| ClientService::new(&handle, service))
                .collect(),
            retired: handle.retired,
        }
    }

    pub fn services(&self) -> &[ClientService] {
        &self.services
    }

    /// Returns the first service with the given UUID.
    pub fn find_service(&self, uuid: &BluetoothUuid) -> Option<&ClientService> {
        self.services.iter().find(|service| service.uuid() == uuid)
    }

    pub fn find_service_by_id(&self, id: &ServiceId) -> Option<&ClientService> {
        self.services.iter().find(|service| service.id() == id)
    }

    pub fn find_characteristic(&self, id: &CharacteristicId) -> Option<&ClientCharacteristic> {
        self.find_service_by_id(&id.service)?
            .characteristics
            .iter()
            .find(|characteristic| characteristic.id() == id)
    }

    pub fn find_descriptor(&self, id: &DescriptorId) -> Option<&ClientDescriptor> {
        self.find_characteristic(&id.characteristic)?
            .descriptors
            .iter()
            .find(|descriptor| descriptor.id() == id)
    }

    /// Delivers an attribute event to the one node it is addressed to.
    pub(crate) fn route(&self, event: ClientAttributeEvent) -> Result<()> {
        match event {
            ClientAttributeEvent::CharacteristicRead {
                characteristic,
                value,
                status,
            } => {
                let node = self
                    .find_characteristic(&characteristic)
                    .ok_or(ErrorKind::RoutingMiss)?;
                node.on_read(value, status);
            }
            ClientAttributeEvent::CharacteristicWrite {
                characteristic,
                status,
            } => {
                let node = self
                    .find_characteristic(&characteristic)
                    .ok_or(ErrorKind::RoutingMiss)?;
                node.inner.write.resolve(Error::check(status));
            }
            ClientAttributeEvent::CharacteristicChanged {
                characteristic,
                value,
            } => {
                let node = self
                    .find_characteristic(&characteristic)
                    .ok_or(ErrorKind::RoutingMiss)?;
                node.publish(value);
            }
            ClientAttributeEvent::DescriptorRead {
                descriptor,
                value,
                status,
            } => {
                let node = self
                    .find_descriptor(&descriptor)
                    .ok_or(ErrorKind::RoutingMiss)?;
                node.inner
                    .read
                    .resolve(Error::check(status).map(|()| value));
            }
            ClientAttributeEvent::DescriptorWrite { descriptor, status } => {
                let node = self
                    .find_descriptor(&descriptor)
                    .ok_or(ErrorKind::RoutingMiss)?;
                node.inner.write.resolve(Error::check(status));
            }
        }
        Ok(())
    }

    /// Marks the registry as replaced and cancels whatever its nodes are waiting for.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.cancel_pending();
    }

    /// Drops every pending read and write so their callers fail with `Canceled`.
    pub(crate) fn cancel_pending(&self) {
        for characteristic in self.services.iter().flat_map(|s| &s.characteristics) {
            characteristic.inner.read.disarm();
            characteristic.inner.write.disarm();
            for descriptor in &characteristic.descriptors {
                descriptor.inner.read.disarm();
                descriptor.inner.write.disarm();
            }
        }
    }
}

/// A service on a remote device.
#[derive(Debug, Clone)]
pub struct ClientService {
    id: ServiceId,
    kind: ServiceKind,
    characteristics: Vec<ClientCharacteristic>,
}

impl ClientService {
    fn new(handle: &NodeHandle, service: gattlink::Service) -> Self {
        Self {
            id: service.id,
            kind: service.kind,
            characteristics: service
                .characteristics
                .into_iter()
                .map(|characteristic| ClientCharacteristic::new(handle, characteristic))
                .collect(),
        }
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    pub fn uuid(&self) -> &BluetoothUuid {
        &self.id.uuid
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn characteristics(&self) -> &[ClientCharacteristic] {
        &self.characteristics
    }

    /// Returns the first characteristic with the given UUID.
    pub fn find_characteristic(&self, uuid: &BluetoothUuid) -> Option<&ClientCharacteristic> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid() == uuid)
    }

    /// Returns the characteristic with the given UUID and instance id.
    ///
    /// Use this when a service exposes several characteristics with the same UUID.
    pub fn find_characteristic_instance(
        &self,
        uuid: &BluetoothUuid,
        instance_id: u32,
    ) -> Option<&ClientCharacteristic> {
        self.characteristics.iter().find(|characteristic| {
            characteristic.uuid() == uuid && characteristic.id().instance_id == instance_id
        })
    }
}

struct CharacteristicInner {
    handle: NodeHandle,
    read: Slot<Result<Vec<u8>>>,
    write: Slot<Result<()>>,
    value: Watch<Vec<u8>>,
}

/// A characteristic on a remote device.
///
/// Clones share the same value and pending requests.
#[derive(Clone)]
pub struct ClientCharacteristic {
    id: CharacteristicId,
    properties: CharacteristicProperties,
    descriptors: Vec<ClientDescriptor>,
    inner: Arc<CharacteristicInner>,
}

impl std::fmt::Debug for ClientCharacteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCharacteristic")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}

impl ClientCharacteristic {
    fn new(handle: &NodeHandle, characteristic: gattlink::Characteristic) -> Self {
        Self {
            id: characteristic.id,
            properties: characteristic.properties,
            descriptors: characteristic
                .descriptors
                .into_iter()
                .map(|descriptor| ClientDescriptor::new(handle, descriptor.id))
                .collect(),
            inner: Arc::new(CharacteristicInner {
                handle: handle.clone(),
                read: Slot::default(),
                write: Slot::default(),
                value: Watch::with_capacity(Vec::new(), 16),
            }),
        }
    }

    pub fn id(&self) -> &CharacteristicId {
        &self.id
    }

    pub fn uuid(&self) -> &BluetoothUuid {
        &self.id.uuid
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn descriptors(&self) -> &[ClientDescriptor] {
        &self.descriptors
    }

    pub fn find_descriptor(&self, uuid: &BluetoothUuid) -> Option<&ClientDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.uuid() == uuid)
    }

    /// The last value read or received through a notification.
    pub fn value(&self) -> Vec<u8> {
        self.inner.value.get()
    }

    /// Returns a stream of values received through notifications, indications and reads.
    pub fn value_updates(&self) -> BroadcastReceiver<Vec<u8>> {
        self.inner.value.subscribe()
    }

    /// Reads the value of the characteristic.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.inner
            .handle
            .correlate(&self.inner.read, |link| link.read_characteristic(&self.id))
            .await
    }

    /// Writes `value` using the write type implied by the characteristic properties.
    pub async fn write(&self, value: &[u8]) -> Result<()> {
        self.write_with_type(value, WriteType::for_properties(self.properties))
            .await
    }

    /// Writes `value` with an explicit write type.
    ///
    /// Writes without response complete as soon as the link accepts the command.
    pub async fn write_with_type(&self, value: &[u8], write_type: WriteType) -> Result<()> {
        let handle = &self.inner.handle;
        if write_type == WriteType::WithoutResponse {
            let _guard = handle.gate.lock().await;
            handle.ensure_current()?;
            handle.link.write_characteristic(&self.id, value, write_type)?;
            return Ok(());
        }
        handle
            .correlate(&self.inner.write, |link| {
                link.write_characteristic(&self.id, value, write_type)
            })
            .await
    }

    /// Subscribes to or unsubscribes from value changes.
    ///
    /// Notifications are preferred over indications when the characteristic supports both.
    /// The client characteristic configuration descriptor is written when present.
    pub async fn set_notifications(&self, enable: bool) -> Result<()> {
        let value = if !enable {
            gattlink::DISABLE_NOTIFICATION_VALUE
        } else if self.properties.contains(CharacteristicProperties::NOTIFY) {
            gattlink::ENABLE_NOTIFICATION_VALUE
        } else if self.properties.contains(CharacteristicProperties::INDICATE) {
            gattlink::ENABLE_INDICATION_VALUE
        } else {
            return Err(Error::operation_failed(GattStatus::REQUEST_NOT_SUPPORTED));
        };

        let handle = &self.inner.handle;
        handle.ensure_current()?;
        handle.link.set_characteristic_notification(&self.id, enable)?;
        match self
            .descriptors
            .iter()
            .find(|descriptor| descriptor.is_client_characteristic_configuration())
        {
            Some(cccd) => cccd.write(&value).await,
            None => Ok(()),
        }
    }

    fn on_read(&self, value: Vec<u8>, status: GattStatus) {
        let result = Error::check(status).map(|()| value);
        if let Ok(value) = &result {
            self.publish(value.clone());
        }
        self.inner.read.resolve(result);
    }

    fn publish(&self, value: Vec<u8>) {
        self.inner.value.set(value);
    }
}

struct DescriptorInner {
    handle: NodeHandle,
    read: Slot<Result<Vec<u8>>>,
    write: Slot<Result<()>>,
}

/// A descriptor on a remote device.
#[derive(Clone)]
pub struct ClientDescriptor {
    id: DescriptorId,
    inner: Arc<DescriptorInner>,
}

impl std::fmt::Debug for ClientDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDescriptor")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ClientDescriptor {
    fn new(handle: &NodeHandle, id: DescriptorId) -> Self {
        Self {
            id,
            inner: Arc::new(DescriptorInner {
                handle: handle.clone(),
                read: Slot::default(),
                write: Slot::default(),
            }),
        }
    }

    pub fn id(&self) -> &DescriptorId {
        &self.id
    }

    pub fn uuid(&self) -> &BluetoothUuid {
        &self.id.uuid
    }

    pub fn is_client_characteristic_configuration(&self) -> bool {
        self.id.uuid == gattlink::CLIENT_CHARACTERISTIC_CONFIGURATION
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        self.inner
            .handle
            .correlate(&self.inner.read, |link| link.read_descriptor(&self.id))
            .await
    }

    pub async fn write(&self, value: &[u8]) -> Result<()> {
        self.inner
            .handle
            .correlate(&self.inner.write, |link| link.write_descriptor(&self.id, value))
            .await
    }
}
