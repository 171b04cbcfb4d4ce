//! The local attribute database served to each connected client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use btuuid::BluetoothUuid;
use gattlink::{
    AttributePermissions, BleDevice, Characteristic, CharacteristicId, CharacteristicProperties,
    Descriptor, DescriptorId, GattServerLink, GattStatus, Service, ServiceId, ServiceKind,
    ServerAttributeEvent, WriteRequest,
};

use crate::error::{ErrorKind, Result};
use crate::mtu::MtuProvider;
use crate::util::{BroadcastReceiver, Watch, lock};

/// Describes a local service to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub uuid: BluetoothUuid,
    pub kind: ServiceKind,
    pub characteristics: Vec<CharacteristicConfig>,
}

impl ServiceConfig {
    pub fn new(uuid: BluetoothUuid, characteristics: Vec<CharacteristicConfig>) -> Self {
        Self {
            uuid,
            kind: ServiceKind::Primary,
            characteristics,
        }
    }
}

/// Describes a local characteristic.
///
/// A client characteristic configuration descriptor is added automatically when the
/// properties include `NOTIFY` or `INDICATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicConfig {
    pub uuid: BluetoothUuid,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    pub initial_value: Vec<u8>,
    pub descriptors: Vec<DescriptorConfig>,
}

impl CharacteristicConfig {
    pub fn new(
        uuid: BluetoothUuid,
        properties: CharacteristicProperties,
        permissions: AttributePermissions,
    ) -> Self {
        Self {
            uuid,
            properties,
            permissions,
            initial_value: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn has_notifications(&self) -> bool {
        self.properties
            .intersects(CharacteristicProperties::NOTIFY | CharacteristicProperties::INDICATE)
    }
}

/// Describes a local descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorConfig {
    pub uuid: BluetoothUuid,
    pub permissions: AttributePermissions,
    pub initial_value: Vec<u8>,
}

impl DescriptorConfig {
    pub fn new(uuid: BluetoothUuid, permissions: AttributePermissions) -> Self {
        Self {
            uuid,
            permissions,
            initial_value: Vec::new(),
        }
    }
}

/// The attribute tree built from a set of [`ServiceConfig`]s, with its initial values.
#[derive(Debug, Clone, Default)]
pub(crate) struct Database {
    pub services: Vec<Service>,
    characteristic_values: HashMap<CharacteristicId, Vec<u8>>,
    descriptor_values: HashMap<DescriptorId, Vec<u8>>,
}

impl Database {
    /// Assigns instance ids in declaration order, one counter for the whole database.
    pub fn build(configs: &[ServiceConfig]) -> Self {
        let mut database = Database::default();
        let mut instance_id = 0;
        let mut next = || {
            instance_id += 1;
            instance_id
        };

        for config in configs {
            let service_id = ServiceId::new(config.uuid.clone(), next());
            let mut service = Service::new(service_id.clone(), config.kind);

            for characteristic_config in &config.characteristics {
                let id = CharacteristicId::new(
                    service_id.clone(),
                    characteristic_config.uuid.clone(),
                    next(),
                );
                let mut descriptors = Vec::new();
                for descriptor_config in &characteristic_config.descriptors {
                    let descriptor_id =
                        DescriptorId::new(id.clone(), descriptor_config.uuid.clone(), next());
                    database
                        .descriptor_values
                        .insert(descriptor_id.clone(), descriptor_config.initial_value.clone());
                    descriptors.push(Descriptor {
                        id: descriptor_id,
                        permissions: descriptor_config.permissions,
                    });
                }
                if characteristic_config.has_notifications() {
                    let cccd_id = DescriptorId::new(
                        id.clone(),
                        gattlink::CLIENT_CHARACTERISTIC_CONFIGURATION,
                        next(),
                    );
                    database
                        .descriptor_values
                        .insert(cccd_id.clone(), gattlink::DISABLE_NOTIFICATION_VALUE.to_vec());
                    descriptors.push(Descriptor {
                        id: cccd_id,
                        permissions: AttributePermissions::READ_ENCRYPTED_MITM
                            | AttributePermissions::WRITE_ENCRYPTED_MITM,
                    });
                }

                database
                    .characteristic_values
                    .insert(id.clone(), characteristic_config.initial_value.clone());
                service.characteristics.push(Characteristic {
                    id,
                    properties: characteristic_config.properties,
                    permissions: characteristic_config.permissions,
                    descriptors,
                });
            }
            database.services.push(service);
        }
        database
    }
}

/// The client a set of local attribute nodes answers to.
#[derive(Clone)]
pub(crate) struct ServerContext {
    pub link: Arc<dyn GattServerLink>,
    pub device: BleDevice,
    pub mtu: MtuProvider,
}

impl ServerContext {
    fn respond(&self, request_id: u32, offset: u16, value: Option<&[u8]>) -> Result<()> {
        self.link
            .send_response(&self.device, request_id, GattStatus::SUCCESS, offset, value)?;
        Ok(())
    }
}

/// A value that clients can read, write and update through prepared writes.
struct AttributeValue {
    current: Watch<Vec<u8>>,
    staged: Mutex<Option<Vec<u8>>>,
}

impl AttributeValue {
    fn new(initial: Vec<u8>) -> Self {
        Self {
            current: Watch::with_capacity(initial, 16),
            staged: Mutex::new(None),
        }
    }

    fn publish(&self, value: Vec<u8>) {
        self.current.set(value);
    }

    fn read(&self, context: &ServerContext, request_id: u32, offset: u16) -> Result<()> {
        let value = self.current.get();
        let chunk = context.mtu.chunk(&value, usize::from(offset));
        context.respond(request_id, offset, Some(chunk))
    }

    fn write(&self, context: &ServerContext, request_id: u32, request: WriteRequest) -> Result<()> {
        if request.prepared_write {
            let mut staged = lock(&self.staged);
            let staged = staged.get_or_insert_with(Vec::new);
            let start = usize::from(request.offset);
            let end = start + request.value.len();
            if staged.len() < end {
                staged.resize(end, 0);
            }
            staged[start..end].copy_from_slice(&request.value);
        } else {
            self.publish(request.value.clone());
        }

        if request.response_needed {
            context.respond(request_id, request.offset, Some(&request.value))?;
        }
        Ok(())
    }

    /// Publishes the staged value, if any.
    fn commit(&self) {
        let staged = lock(&self.staged).take();
        if let Some(value) = staged {
            self.publish(value);
        }
    }

    fn abort(&self) {
        lock(&self.staged).take();
    }

    fn has_staged(&self) -> bool {
        lock(&self.staged).is_some()
    }
}

/// The local services as seen by one connected client.
pub struct ServerServices {
    services: Vec<ServerService>,
    context: ServerContext,
}

impl std::fmt::Debug for ServerServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerServices")
            .field("device", &self.context.device.address())
            .field("services", &self.services)
            .finish()
    }
}

impl ServerServices {
    pub(crate) fn new(database: &Database, context: ServerContext) -> Self {
        let services = database
            .services
            .iter()
            .map(|service| ServerService::new(database, &context, service))
            .collect();
        Self { services, context }
    }

    pub fn services(&self) -> &[ServerService] {
        &self.services
    }

    pub fn find_service(&self, uuid: &BluetoothUuid) -> Option<&ServerService> {
        self.services.iter().find(|service| service.uuid() == uuid)
    }

    pub fn find_characteristic(&self, id: &CharacteristicId) -> Option<&ServerCharacteristic> {
        self.services
            .iter()
            .find(|service| service.id == id.service)?
            .characteristics
            .iter()
            .find(|characteristic| characteristic.id() == id)
    }

    pub fn find_descriptor(&self, id: &DescriptorId) -> Option<&ServerDescriptor> {
        self.find_characteristic(&id.characteristic)?
            .descriptors
            .iter()
            .find(|descriptor| descriptor.id() == id)
    }

    fn descriptors(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.characteristics()
            .flat_map(|characteristic| characteristic.descriptors.iter())
    }

    fn characteristics(&self) -> impl Iterator<Item = &ServerCharacteristic> {
        self.services
            .iter()
            .flat_map(|service| service.characteristics.iter())
    }

    /// Answers a request addressed to one of the local attributes.
    pub(crate) fn handle(&self, event: ServerAttributeEvent) -> Result<()> {
        let context = &self.context;
        match event {
            ServerAttributeEvent::CharacteristicReadRequest {
                request_id,
                characteristic,
                offset,
                ..
            } => self
                .find_characteristic(&characteristic)
                .ok_or(ErrorKind::RoutingMiss)?
                .inner
                .value
                .read(context, request_id, offset),
            ServerAttributeEvent::CharacteristicWriteRequest {
                request_id,
                characteristic,
                request,
                ..
            } => self
                .find_characteristic(&characteristic)
                .ok_or(ErrorKind::RoutingMiss)?
                .inner
                .value
                .write(context, request_id, request),
            ServerAttributeEvent::DescriptorReadRequest {
                request_id,
                descriptor,
                offset,
                ..
            } => self
                .find_descriptor(&descriptor)
                .ok_or(ErrorKind::RoutingMiss)?
                .value
                .read(context, request_id, offset),
            ServerAttributeEvent::DescriptorWriteRequest {
                request_id,
                descriptor,
                request,
                ..
            } => self
                .find_descriptor(&descriptor)
                .ok_or(ErrorKind::RoutingMiss)?
                .value
                .write(context, request_id, request),
        }
    }

    /// Commits or discards every prepared write of the client.
    ///
    /// A commit is acknowledged with a single response. A discard is not acknowledged.
    pub(crate) fn execute_write(&self, request_id: u32, execute: bool) -> Result<()> {
        let values = self
            .characteristics()
            .map(|characteristic| &characteristic.inner.value)
            .chain(self.descriptors().map(|descriptor| &*descriptor.value));

        if !execute {
            tracing::debug!("discarding prepared writes");
            values.for_each(AttributeValue::abort);
            return Ok(());
        }

        tracing::debug!("committing prepared writes");
        values.for_each(AttributeValue::commit);
        self.context.respond(request_id, 0, None)
    }

    /// Whether any attribute holds a prepared write that was neither committed nor discarded.
    pub fn has_prepared_writes(&self) -> bool {
        self.characteristics()
            .any(|characteristic| characteristic.inner.value.has_staged())
            || self.descriptors().any(|descriptor| descriptor.value.has_staged())
    }
}

/// A local service.
#[derive(Debug, Clone)]
pub struct ServerService {
    id: ServiceId,
    kind: ServiceKind,
    characteristics: Vec<ServerCharacteristic>,
}

impl ServerService {
    fn new(database: &Database, context: &ServerContext, service: &Service) -> Self {
        Self {
            id: service.id.clone(),
            kind: service.kind,
            characteristics: service
                .characteristics
                .iter()
                .map(|characteristic| ServerCharacteristic::new(database, context, characteristic))
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

    pub fn characteristics(&self) -> &[ServerCharacteristic] {
        &self.characteristics
    }

    pub fn find_characteristic(&self, uuid: &BluetoothUuid) -> Option<&ServerCharacteristic> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid() == uuid)
    }
}

struct ServerCharacteristicInner {
    context: ServerContext,
    value: AttributeValue,
}

/// A local characteristic as seen by one client.
#[derive(Clone)]
pub struct ServerCharacteristic {
    id: CharacteristicId,
    properties: CharacteristicProperties,
    permissions: AttributePermissions,
    descriptors: Vec<ServerDescriptor>,
    inner: Arc<ServerCharacteristicInner>,
}

impl std::fmt::Debug for ServerCharacteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCharacteristic")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}

impl ServerCharacteristic {
    fn new(database: &Database, context: &ServerContext, characteristic: &Characteristic) -> Self {
        let initial = database
            .characteristic_values
            .get(&characteristic.id)
            .cloned()
            .unwrap_or_default();
        Self {
            id: characteristic.id.clone(),
            properties: characteristic.properties,
            permissions: characteristic.permissions,
            descriptors: characteristic
                .descriptors
                .iter()
                .map(|descriptor| ServerDescriptor::new(database, descriptor))
                .collect(),
            inner: Arc::new(ServerCharacteristicInner {
                context: context.clone(),
                value: AttributeValue::new(initial),
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

    pub fn permissions(&self) -> AttributePermissions {
        self.permissions
    }

    pub fn descriptors(&self) -> &[ServerDescriptor] {
        &self.descriptors
    }

    pub fn find_descriptor(&self, uuid: &BluetoothUuid) -> Option<&ServerDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.uuid() == uuid)
    }

    /// The committed value. Prepared writes are not visible until executed.
    pub fn value(&self) -> Vec<u8> {
        self.inner.value.current.get()
    }

    /// Returns a stream of committed values, whether set locally or written by the client.
    pub fn value_updates(&self) -> BroadcastReceiver<Vec<u8>> {
        self.inner.value.current.subscribe()
    }

    /// Replaces the value and pushes it to the client.
    ///
    /// A notification is sent if the characteristic declares `NOTIFY` and an indication if it
    /// declares `INDICATE`. Both are sent when both are declared.
    pub fn set_value(&self, value: Vec<u8>) -> Result<()> {
        let ServerContext { link, device, .. } = &self.inner.context;
        self.inner.value.publish(value.clone());

        if self.properties.contains(CharacteristicProperties::NOTIFY) {
            link.notify_characteristic_changed(device, &self.id, false, &value)?;
        }
        if self.properties.contains(CharacteristicProperties::INDICATE) {
            link.notify_characteristic_changed(device, &self.id, true, &value)?;
        }
        Ok(())
    }
}

/// A local descriptor as seen by one client.
#[derive(Clone)]
pub struct ServerDescriptor {
    id: DescriptorId,
    permissions: AttributePermissions,
    value: Arc<AttributeValue>,
}

impl std::fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("id", &self.id)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl ServerDescriptor {
    fn new(database: &Database, descriptor: &Descriptor) -> Self {
        let initial = database
            .descriptor_values
            .get(&descriptor.id)
            .cloned()
            .unwrap_or_default();
        Self {
            id: descriptor.id.clone(),
            permissions: descriptor.permissions,
            value: Arc::new(AttributeValue::new(initial)),
        }
    }

    pub fn id(&self) -> &DescriptorId {
        &self.id
    }

    pub fn uuid(&self) -> &BluetoothUuid {
        &self.id.uuid
    }

    pub fn permissions(&self) -> AttributePermissions {
        self.permissions
    }

    pub fn value(&self) -> Vec<u8> {
        self.value.current.get()
    }

    pub fn value_updates(&self) -> BroadcastReceiver<Vec<u8>> {
        self.value.current.subscribe()
    }

    /// Replaces the value without notifying the client.
    pub fn set_value(&self, value: Vec<u8>) {
        self.value.publish(value);
    }
}
