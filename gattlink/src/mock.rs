//! Loopback links that record commands and replay scripted events, for use without a radio.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_channel::mpsc;

use crate::characteristic::{CharacteristicId, WriteType};
use crate::client::{ClientAttributeEvent, ClientEvent, GattClientLink};
use crate::connection::{ConnectOptions, ConnectionState, ConnectionStatus, MAX_MTU, Phy, PhyOption};
use crate::descriptor::DescriptorId;
use crate::device::{BleDevice, DeviceAddress};
use crate::error::{ErrorKind, GattStatus, Result};
use crate::server::{GattServerLink, ServerEvent};
use crate::service::Service;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command received by a [`MockClientLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Connect(ConnectOptions),
    Disconnect,
    Close,
    RequestMtu(u16),
    SetPreferredPhy {
        tx: Phy,
        rx: Phy,
        option: PhyOption,
    },
    ReadPhy,
    ReadRemoteRssi,
    DiscoverServices,
    ClearServicesCache,
    BeginReliableWrite,
    AbortReliableWrite,
    ExecuteReliableWrite,
    ReadCharacteristic(CharacteristicId),
    WriteCharacteristic {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        write_type: WriteType,
    },
    SetCharacteristicNotification {
        characteristic: CharacteristicId,
        enable: bool,
    },
    ReadDescriptor(DescriptorId),
    WriteDescriptor {
        descriptor: DescriptorId,
        value: Vec<u8>,
    },
}

type ClientResponder = Box<dyn FnMut(&ClientCommand) -> Vec<ClientEvent> + Send>;

/// A [`GattClientLink`] that records every command and answers through a scripted responder.
///
/// Events produced by the responder are queued on the link's event stream right away, the
/// same way a driver callback would be. Once the link is closed, commands are still recorded
/// but fail with [`ErrorKind::NotConnected`].
pub struct MockClientLink {
    device: BleDevice,
    events: mpsc::UnboundedSender<ClientEvent>,
    commands: Mutex<Vec<ClientCommand>>,
    responder: Mutex<Option<ClientResponder>>,
    reject_next: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for MockClientLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClientLink")
            .field("device", &self.device)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockClientLink {
    pub fn new(device: impl Into<BleDevice>) -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, receiver) = mpsc::unbounded();
        let link = Arc::new(MockClientLink {
            device: device.into(),
            events,
            commands: Default::default(),
            responder: Default::default(),
            reject_next: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (link, receiver)
    }

    /// Installs a responder invoked for every subsequent command.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&ClientCommand) -> Vec<ClientEvent> + Send + 'static,
    {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    /// Queues an event as if the driver had reported it.
    pub fn emit(&self, event: impl Into<ClientEvent>) {
        let _ = self.events.unbounded_send(event.into());
    }

    /// Ends the event stream.
    pub fn close_events(&self) {
        self.events.close_channel();
    }

    /// Makes the next command fail with [`ErrorKind::Rejected`].
    pub fn reject_next_command(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<ClientCommand> {
        lock(&self.commands).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, command: ClientCommand) -> Result<()> {
        lock(&self.commands).push(command.clone());
        if self.is_closed() {
            return Err(ErrorKind::NotConnected.into());
        }
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(ErrorKind::Rejected.into());
        }

        let events = match lock(&self.responder).as_mut() {
            Some(responder) => responder(&command),
            None => Vec::new(),
        };
        for event in events {
            self.emit(event);
        }
        Ok(())
    }
}

impl GattClientLink for MockClientLink {
    fn device(&self) -> &BleDevice {
        &self.device
    }

    fn connect(&self, options: &ConnectOptions) -> Result<()> {
        self.record(ClientCommand::Connect(*options))
    }

    fn disconnect(&self) -> Result<()> {
        self.record(ClientCommand::Disconnect)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.commands).push(ClientCommand::Close);
    }

    fn request_mtu(&self, mtu: u16) -> Result<()> {
        self.record(ClientCommand::RequestMtu(mtu))
    }

    fn set_preferred_phy(&self, tx: Phy, rx: Phy, option: PhyOption) -> Result<()> {
        self.record(ClientCommand::SetPreferredPhy { tx, rx, option })
    }

    fn read_phy(&self) -> Result<()> {
        self.record(ClientCommand::ReadPhy)
    }

    fn read_remote_rssi(&self) -> Result<()> {
        self.record(ClientCommand::ReadRemoteRssi)
    }

    fn discover_services(&self) -> Result<()> {
        self.record(ClientCommand::DiscoverServices)
    }

    fn clear_services_cache(&self) -> Result<()> {
        self.record(ClientCommand::ClearServicesCache)
    }

    fn begin_reliable_write(&self) -> Result<()> {
        self.record(ClientCommand::BeginReliableWrite)
    }

    fn abort_reliable_write(&self) -> Result<()> {
        self.record(ClientCommand::AbortReliableWrite)
    }

    fn execute_reliable_write(&self) -> Result<()> {
        self.record(ClientCommand::ExecuteReliableWrite)
    }

    fn read_characteristic(&self, characteristic: &CharacteristicId) -> Result<()> {
        self.record(ClientCommand::ReadCharacteristic(characteristic.clone()))
    }

    fn write_characteristic(
        &self,
        characteristic: &CharacteristicId,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.record(ClientCommand::WriteCharacteristic {
            characteristic: characteristic.clone(),
            value: value.to_vec(),
            write_type,
        })
    }

    fn set_characteristic_notification(
        &self,
        characteristic: &CharacteristicId,
        enable: bool,
    ) -> Result<()> {
        self.record(ClientCommand::SetCharacteristicNotification {
            characteristic: characteristic.clone(),
            enable,
        })
    }

    fn read_descriptor(&self, descriptor: &DescriptorId) -> Result<()> {
        self.record(ClientCommand::ReadDescriptor(descriptor.clone()))
    }

    fn write_descriptor(&self, descriptor: &DescriptorId, value: &[u8]) -> Result<()> {
        self.record(ClientCommand::WriteDescriptor {
            descriptor: descriptor.clone(),
            value: value.to_vec(),
        })
    }
}

/// A responder that behaves like a cooperative peripheral exposing `services`.
///
/// Every request succeeds. Written characteristic and descriptor values are stored and
/// returned by later reads.
pub fn loopback_responder(
    services: Vec<Service>,
) -> impl FnMut(&ClientCommand) -> Vec<ClientEvent> + Send + 'static {
    let mut characteristic_values: HashMap<CharacteristicId, Vec<u8>> = HashMap::new();
    let mut descriptor_values: HashMap<DescriptorId, Vec<u8>> = HashMap::new();
    let mut phy = (Phy::Le1M, Phy::Le1M);

    move |command| {
        let event = match command {
            ClientCommand::Connect(_) => ClientEvent::ConnectionStateChanged {
                status: ConnectionStatus::SUCCESS,
                new_state: ConnectionState::Connected,
            },
            ClientCommand::Disconnect => ClientEvent::ConnectionStateChanged {
                status: ConnectionStatus::SUCCESS,
                new_state: ConnectionState::Disconnected,
            },
            ClientCommand::RequestMtu(mtu) => ClientEvent::MtuChanged {
                mtu: (*mtu).min(MAX_MTU),
                status: GattStatus::SUCCESS,
            },
            ClientCommand::SetPreferredPhy { tx, rx, .. } => {
                phy = (*tx, *rx);
                ClientEvent::PhyUpdate {
                    tx: *tx,
                    rx: *rx,
                    status: GattStatus::SUCCESS,
                }
            }
            ClientCommand::ReadPhy => ClientEvent::PhyRead {
                tx: phy.0,
                rx: phy.1,
                status: GattStatus::SUCCESS,
            },
            ClientCommand::ReadRemoteRssi => ClientEvent::ReadRemoteRssi {
                rssi: -60,
                status: GattStatus::SUCCESS,
            },
            ClientCommand::DiscoverServices => ClientEvent::ServicesDiscovered {
                services: services.clone(),
                status: GattStatus::SUCCESS,
            },
            ClientCommand::ExecuteReliableWrite => ClientEvent::ReliableWriteCompleted {
                status: GattStatus::SUCCESS,
            },
            ClientCommand::ReadCharacteristic(characteristic) => {
                ClientAttributeEvent::CharacteristicRead {
                    characteristic: characteristic.clone(),
                    value: characteristic_values
                        .get(characteristic)
                        .cloned()
                        .unwrap_or_default(),
                    status: GattStatus::SUCCESS,
                }
                .into()
            }
            ClientCommand::WriteCharacteristic {
                characteristic,
                value,
                write_type,
            } => {
                characteristic_values.insert(characteristic.clone(), value.clone());
                if *write_type == WriteType::WithoutResponse {
                    return Vec::new();
                }
                ClientAttributeEvent::CharacteristicWrite {
                    characteristic: characteristic.clone(),
                    status: GattStatus::SUCCESS,
                }
                .into()
            }
            ClientCommand::ReadDescriptor(descriptor) => ClientAttributeEvent::DescriptorRead {
                descriptor: descriptor.clone(),
                value: descriptor_values.get(descriptor).cloned().unwrap_or_default(),
                status: GattStatus::SUCCESS,
            }
            .into(),
            ClientCommand::WriteDescriptor { descriptor, value } => {
                descriptor_values.insert(descriptor.clone(), value.clone());
                ClientAttributeEvent::DescriptorWrite {
                    descriptor: descriptor.clone(),
                    status: GattStatus::SUCCESS,
                }
                .into()
            }
            ClientCommand::Close
            | ClientCommand::ClearServicesCache
            | ClientCommand::BeginReliableWrite
            | ClientCommand::AbortReliableWrite
            | ClientCommand::SetCharacteristicNotification { .. } => return Vec::new(),
        };
        vec![event]
    }
}

/// A command received by a [`MockServerLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    AddService(Service),
    SendResponse {
        device: DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: Option<Vec<u8>>,
    },
    NotifyCharacteristicChanged {
        device: DeviceAddress,
        characteristic: CharacteristicId,
        confirm: bool,
        value: Vec<u8>,
    },
    CancelConnection(DeviceAddress),
    Close,
}

/// A [`GattServerLink`] that records every command.
pub struct MockServerLink {
    events: mpsc::UnboundedSender<ServerEvent>,
    commands: Mutex<Vec<ServerCommand>>,
    reject_next: AtomicBool,
}

impl std::fmt::Debug for MockServerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServerLink").finish_non_exhaustive()
    }
}

impl MockServerLink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, receiver) = mpsc::unbounded();
        let link = Arc::new(MockServerLink {
            events,
            commands: Default::default(),
            reject_next: AtomicBool::new(false),
        });
        (link, receiver)
    }

    /// Queues an event as if a client had caused it.
    pub fn emit(&self, event: impl Into<ServerEvent>) {
        let _ = self.events.unbounded_send(event.into());
    }

    pub fn close_events(&self) {
        self.events.close_channel();
    }

    /// Makes the next command fail with [`ErrorKind::Rejected`].
    pub fn reject_next_command(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<ServerCommand> {
        lock(&self.commands).clone()
    }

    /// Removes and returns the commands recorded so far.
    pub fn take_commands(&self) -> Vec<ServerCommand> {
        std::mem::take(&mut *lock(&self.commands))
    }

    fn record(&self, command: ServerCommand) -> Result<()> {
        lock(&self.commands).push(command);
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(ErrorKind::Rejected.into());
        }
        Ok(())
    }
}

impl GattServerLink for MockServerLink {
    fn add_service(&self, service: &Service) -> Result<()> {
        self.record(ServerCommand::AddService(service.clone()))
    }

    fn send_response(
        &self,
        device: &BleDevice,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: Option<&[u8]>,
    ) -> Result<()> {
        self.record(ServerCommand::SendResponse {
            device: device.address(),
            request_id,
            status,
            offset,
            value: value.map(<[u8]>::to_vec),
        })
    }

    fn notify_characteristic_changed(
        &self,
        device: &BleDevice,
        characteristic: &CharacteristicId,
        confirm: bool,
        value: &[u8],
    ) -> Result<()> {
        self.record(ServerCommand::NotifyCharacteristicChanged {
            device: device.address(),
            characteristic: characteristic.clone(),
            confirm,
            value: value.to_vec(),
        })
    }

    fn cancel_connection(&self, device: &BleDevice) -> Result<()> {
        self.record(ServerCommand::CancelConnection(device.address()))
    }

    fn close(&self) {
        lock(&self.commands).push(ServerCommand::Close);
    }
}

#[cfg(test)]
mod tests {
    use btuuid::BluetoothUuid;
    use futures_lite::StreamExt;
    use futures_lite::future::block_on;

    use super::*;
    use crate::device::MockDevice;
    use crate::service::{ServiceId, ServiceKind};

    #[test]
    fn loopback_answers_and_records_commands() {
        let service = Service::new(
            ServiceId::new(BluetoothUuid::from_u16(0x180d), 1),
            ServiceKind::Primary,
        );
        let (link, mut events) = MockClientLink::new(MockDevice::default());
        link.set_responder(loopback_responder(vec![service.clone()]));

        link.request_mtu(600).unwrap();
        link.discover_services().unwrap();

        assert_eq!(
            block_on(events.next()),
            Some(ClientEvent::MtuChanged {
                mtu: MAX_MTU,
                status: GattStatus::SUCCESS
            })
        );
        assert_eq!(
            block_on(events.next()),
            Some(ClientEvent::ServicesDiscovered {
                services: vec![service],
                status: GattStatus::SUCCESS
            })
        );
        assert_eq!(
            link.commands(),
            vec![ClientCommand::RequestMtu(600), ClientCommand::DiscoverServices]
        );
    }

    #[test]
    fn rejected_commands_produce_no_events() {
        let (link, mut events) = MockClientLink::new(MockDevice::default());
        link.set_responder(loopback_responder(Vec::new()));
        link.reject_next_command();

        let error = link.read_remote_rssi().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Rejected);

        link.close_events();
        assert_eq!(block_on(events.next()), None);
        assert!(!link.is_closed());
    }

    #[test]
    fn closed_link_refuses_commands() {
        let (link, mut events) = MockClientLink::new(MockDevice::default());
        link.set_responder(loopback_responder(Vec::new()));
        link.close();

        let error = link.read_remote_rssi().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotConnected);
        assert_eq!(
            link.commands(),
            vec![ClientCommand::Close, ClientCommand::ReadRemoteRssi]
        );

        link.close_events();
        assert_eq!(block_on(events.next()), None);
    }
}
