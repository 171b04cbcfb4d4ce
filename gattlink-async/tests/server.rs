use std::sync::Arc;
use std::time::Duration;

use gattlink::mock::{MockServerLink, ServerCommand};
use gattlink::{
    AttributePermissions, BleDevice, CharacteristicId, CharacteristicProperties, ConnectionState,
    ConnectionStatus, DeviceAddress, GattStatus, MockDevice, ServerAttributeEvent, ServerEvent,
    WriteRequest,
};
use gattlink_async::{
    BluetoothUuid, CharacteristicConfig, DescriptorConfig, GattServer, ServerConnection,
    ServiceConfig,
};

const SERVICE: BluetoothUuid = BluetoothUuid::from_u16(0x181c);
const NAME: BluetoothUuid = BluetoothUuid::from_u16(0x2a8a);
const COUNTER: BluetoothUuid = BluetoothUuid::from_u16(0x2a99);
const DESCRIPTION: BluetoothUuid = BluetoothUuid::from_u16(0x2901);

fn configs() -> Vec<ServiceConfig> {
    let mut name = CharacteristicConfig::new(
        NAME,
        CharacteristicProperties::READ | CharacteristicProperties::WRITE,
        AttributePermissions::READ | AttributePermissions::WRITE,
    );
    name.initial_value = (0..50).collect();
    name.descriptors.push(DescriptorConfig::new(
        DESCRIPTION,
        AttributePermissions::READ | AttributePermissions::WRITE,
    ));
    let counter = CharacteristicConfig::new(
        COUNTER,
        CharacteristicProperties::READ
            | CharacteristicProperties::NOTIFY
            | CharacteristicProperties::INDICATE,
        AttributePermissions::READ,
    );
    vec![ServiceConfig::new(SERVICE, vec![name, counter])]
}

fn device(last: u8) -> BleDevice {
    MockDevice {
        address: DeviceAddress([0xc0, 0xff, 0xee, 0x00, 0x00, last]),
        ..Default::default()
    }
    .into()
}

fn connection_event(device: &BleDevice, new_state: ConnectionState) -> ServerEvent {
    ServerEvent::ConnectionStateChanged {
        device: device.clone(),
        status: ConnectionStatus::SUCCESS,
        new_state,
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

struct Fixture {
    link: Arc<MockServerLink>,
    server: GattServer,
}

impl Fixture {
    fn new() -> Self {
        let (link, events) = MockServerLink::new();
        let (server, event_loop) = GattServer::new(link.clone(), events, &configs()).unwrap();
        tokio::spawn(event_loop.run());
        Fixture { link, server }
    }

    async fn connect(&self, device: &BleDevice) -> ServerConnection {
        self.link
            .emit(connection_event(device, ConnectionState::Connected));
        let address = device.address();
        eventually(|| self.server.connection(&address).is_some()).await;
        self.server.connection(&address).unwrap()
    }

    /// Waits until the event loop has produced `count` commands and takes them.
    async fn take_commands(&self, count: usize) -> Vec<ServerCommand> {
        eventually(|| self.link.commands().len() >= count).await;
        self.link.take_commands()
    }

    /// Sends a read request and waits for its response, which also proves that every event
    /// emitted before it has been handled.
    async fn read(
        &self,
        device: &BleDevice,
        characteristic: &CharacteristicId,
        offset: u16,
    ) -> Vec<u8> {
        self.link.emit(ServerAttributeEvent::CharacteristicReadRequest {
            device: device.clone(),
            request_id: 1000,
            characteristic: characteristic.clone(),
            offset,
        });
        eventually(|| {
            self.link.commands().iter().any(|command| {
                matches!(command, ServerCommand::SendResponse { request_id: 1000, .. })
            })
        })
        .await;
        let commands = self.link.take_commands();
        let Some(ServerCommand::SendResponse { value, .. }) = commands.last() else {
            panic!("read response must be the last command, got {commands:?}");
        };
        value.clone().unwrap_or_default()
    }
}

fn characteristic_id(connection: &ServerConnection, uuid: &BluetoothUuid) -> CharacteristicId {
    connection
        .services()
        .find_service(&SERVICE)
        .and_then(|service| service.find_characteristic(uuid))
        .map(|characteristic| characteristic.id().clone())
        .unwrap()
}

fn prepared_write(
    device: &BleDevice,
    request_id: u32,
    characteristic: &CharacteristicId,
    offset: u16,
    value: &[u8],
) -> ServerEvent {
    ServerAttributeEvent::CharacteristicWriteRequest {
        device: device.clone(),
        request_id,
        characteristic: characteristic.clone(),
        request: WriteRequest {
            prepared_write: true,
            response_needed: true,
            offset,
            value: value.to_vec(),
        },
    }
    .into()
}

#[tokio::test]
async fn services_are_published_with_a_cccd_for_notifying_characteristics() {
    let fixture = Fixture::new();

    let commands = fixture.link.take_commands();
    let [ServerCommand::AddService(service)] = commands.as_slice() else {
        panic!("expected a single service, got {commands:?}");
    };
    assert_eq!(service.uuid(), &SERVICE);

    let name = &service.characteristics[0];
    assert_eq!(name.descriptors.len(), 1);
    assert_eq!(name.descriptors[0].uuid(), &DESCRIPTION);

    let counter = &service.characteristics[1];
    assert_eq!(counter.descriptors.len(), 1);
    assert!(counter.descriptors[0].is_client_characteristic_configuration());
}

#[tokio::test]
async fn reads_are_chunked_by_the_client_mtu() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;
    let name = characteristic_id(&connection, &NAME);
    let value: Vec<u8> = (0..50).collect();

    assert_eq!(fixture.read(&client, &name, 0).await, value[0..20]);
    assert_eq!(fixture.read(&client, &name, 40).await, value[40..50]);
    assert!(fixture.read(&client, &name, 50).await.is_empty());
    assert!(fixture.read(&client, &name, 70).await.is_empty());

    fixture.link.emit(ServerEvent::MtuChanged {
        device: client.clone(),
        mtu: 185,
    });
    assert_eq!(fixture.read(&client, &name, 10).await, value[10..50]);
    assert_eq!(connection.mtu(), 185);
}

#[tokio::test]
async fn writes_publish_and_echo_the_request() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;
    let name = characteristic_id(&connection, &NAME);
    let node = connection.services().find_characteristic(&name).unwrap().clone();
    let mut updates = node.value_updates();

    fixture.link.emit(ServerAttributeEvent::CharacteristicWriteRequest {
        device: client.clone(),
        request_id: 7,
        characteristic: name.clone(),
        request: WriteRequest {
            prepared_write: false,
            response_needed: true,
            offset: 0,
            value: b"kitchen".to_vec(),
        },
    });

    assert_eq!(
        fixture.take_commands(1).await,
        vec![ServerCommand::SendResponse {
            device: client.address(),
            request_id: 7,
            status: GattStatus::SUCCESS,
            offset: 0,
            value: Some(b"kitchen".to_vec()),
        }]
    );
    assert_eq!(updates.recv().await.unwrap(), b"kitchen".to_vec());
    assert_eq!(node.value(), b"kitchen".to_vec());
}

#[tokio::test]
async fn aborted_prepared_writes_are_never_observed() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;
    let name = characteristic_id(&connection, &NAME);
    let node = connection.services().find_characteristic(&name).unwrap().clone();
    let original = node.value();
    let mut updates = node.value_updates();

    fixture.link.emit(prepared_write(&client, 1, &name, 0, b"V1"));
    fixture.take_commands(1).await;
    assert!(connection.services().has_prepared_writes());

    fixture.link.emit(ServerEvent::ExecuteWrite {
        device: client.clone(),
        request_id: 2,
        execute: false,
    });

    // The read is answered after the execute request, and is the only response.
    assert_eq!(fixture.read(&client, &name, 0).await, original[0..20]);
    assert!(!connection.services().has_prepared_writes());
    assert_eq!(node.value(), original);
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn executed_prepared_writes_publish_once() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;
    let name = characteristic_id(&connection, &NAME);
    let node = connection.services().find_characteristic(&name).unwrap().clone();
    let mut updates = node.value_updates();

    fixture.link.emit(prepared_write(&client, 1, &name, 0, b"living "));
    fixture.link.emit(prepared_write(&client, 2, &name, 7, b"room"));
    fixture.take_commands(2).await;
    assert!(updates.try_recv().is_err());

    fixture.link.emit(ServerEvent::ExecuteWrite {
        device: client.clone(),
        request_id: 3,
        execute: true,
    });

    assert_eq!(
        fixture.take_commands(1).await,
        vec![ServerCommand::SendResponse {
            device: client.address(),
            request_id: 3,
            status: GattStatus::SUCCESS,
            offset: 0,
            value: None,
        }]
    );
    assert_eq!(updates.recv().await.unwrap(), b"living room".to_vec());
    assert!(updates.try_recv().is_err());
    assert_eq!(node.value(), b"living room".to_vec());
    assert!(!connection.services().has_prepared_writes());
}

#[tokio::test]
async fn set_value_notifies_and_indicates() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;
    let counter_id = characteristic_id(&connection, &COUNTER);
    let counter = connection.services().find_characteristic(&counter_id).unwrap();

    counter.set_value(vec![5]).unwrap();

    assert_eq!(counter.value(), vec![5]);
    assert_eq!(
        fixture.link.take_commands(),
        vec![
            ServerCommand::NotifyCharacteristicChanged {
                device: client.address(),
                characteristic: counter_id.clone(),
                confirm: false,
                value: vec![5],
            },
            ServerCommand::NotifyCharacteristicChanged {
                device: client.address(),
                characteristic: counter_id,
                confirm: true,
                value: vec![5],
            },
        ]
    );

    let mut sent = connection.notifications_sent();
    fixture.link.emit(ServerEvent::NotificationSent {
        device: client.clone(),
        status: GattStatus::SUCCESS,
    });
    assert!(sent.recv().await.unwrap().is_ok());
}

#[tokio::test]
async fn descriptors_answer_reads_and_writes() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;
    let counter_id = characteristic_id(&connection, &COUNTER);
    let cccd = connection
        .services()
        .find_characteristic(&counter_id)
        .and_then(|counter| {
            counter.find_descriptor(&gattlink::CLIENT_CHARACTERISTIC_CONFIGURATION)
        })
        .unwrap()
        .clone();
    assert_eq!(cccd.value(), vec![0, 0]);

    fixture.link.emit(ServerAttributeEvent::DescriptorWriteRequest {
        device: client.clone(),
        request_id: 4,
        descriptor: cccd.id().clone(),
        request: WriteRequest {
            prepared_write: false,
            response_needed: false,
            offset: 0,
            value: gattlink::ENABLE_INDICATION_VALUE.to_vec(),
        },
    });
    fixture.link.emit(ServerAttributeEvent::DescriptorReadRequest {
        device: client.clone(),
        request_id: 5,
        descriptor: cccd.id().clone(),
        offset: 0,
    });

    assert_eq!(
        fixture.take_commands(1).await,
        vec![ServerCommand::SendResponse {
            device: client.address(),
            request_id: 5,
            status: GattStatus::SUCCESS,
            offset: 0,
            value: Some(gattlink::ENABLE_INDICATION_VALUE.to_vec()),
        }]
    );
    assert_eq!(cccd.value(), gattlink::ENABLE_INDICATION_VALUE);
}

#[tokio::test]
async fn each_client_has_its_own_database() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let first = device(1);
    let second = device(2);
    let first_connection = fixture.connect(&first).await;
    let second_connection = fixture.connect(&second).await;
    assert_eq!(fixture.server.connections().len(), 2);

    let name = characteristic_id(&first_connection, &NAME);
    fixture.link.emit(ServerAttributeEvent::CharacteristicWriteRequest {
        device: first.clone(),
        request_id: 1,
        characteristic: name.clone(),
        request: WriteRequest {
            value: vec![9],
            ..Default::default()
        },
    });
    assert_eq!(fixture.read(&first, &name, 0).await, vec![9]);

    let untouched = second_connection
        .services()
        .find_characteristic(&name)
        .unwrap()
        .value();
    assert_eq!(untouched, (0..50).collect::<Vec<u8>>());
}

#[tokio::test]
async fn disconnected_clients_are_forgotten() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;
    let name = characteristic_id(&connection, &NAME);

    fixture
        .link
        .emit(connection_event(&client, ConnectionState::Disconnected));
    eventually(|| fixture.server.connections().is_empty()).await;

    // Requests from unknown clients are dropped without a response.
    fixture.link.emit(ServerAttributeEvent::CharacteristicReadRequest {
        device: client.clone(),
        request_id: 1,
        characteristic: name.clone(),
        offset: 0,
    });
    let other = device(2);
    fixture.connect(&other).await;
    assert_eq!(fixture.read(&other, &name, 0).await.len(), 20);
}

#[tokio::test]
async fn server_connection_can_drop_its_client() {
    let fixture = Fixture::new();
    fixture.link.take_commands();
    let client = device(1);
    let connection = fixture.connect(&client).await;

    connection.disconnect().unwrap();
    fixture.server.close();

    assert_eq!(
        fixture.link.take_commands(),
        vec![
            ServerCommand::CancelConnection(client.address()),
            ServerCommand::Close,
        ]
    );
}
