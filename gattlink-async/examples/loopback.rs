use std::error::Error;

use gattlink::mock::{MockClientLink, loopback_responder};
use gattlink::{
    AttributePermissions, Characteristic, CharacteristicId, CharacteristicProperties,
    ClientAttributeEvent, Descriptor, DescriptorId, MockDevice, Service, ServiceId, ServiceKind,
};
use gattlink_async::{BluetoothUuid, ConnectOptions, GattClient, Phy, PhyOption};
use tracing::info;
use tracing::metadata::LevelFilter;

const HEART_RATE_SERVICE: BluetoothUuid = BluetoothUuid::from_u16(0x180d);
const HEART_RATE_MEASUREMENT: BluetoothUuid = BluetoothUuid::from_u16(0x2a37);
const BODY_SENSOR_LOCATION: BluetoothUuid = BluetoothUuid::from_u16(0x2a38);

fn heart_rate_service() -> Service {
    let service_id = ServiceId::new(HEART_RATE_SERVICE, 1);
    let measurement_id = CharacteristicId::new(service_id.clone(), HEART_RATE_MEASUREMENT, 2);
    let mut service = Service::new(service_id.clone(), ServiceKind::Primary);
    service.characteristics.push(Characteristic {
        id: measurement_id.clone(),
        properties: CharacteristicProperties::NOTIFY,
        permissions: AttributePermissions::empty(),
        descriptors: vec![Descriptor {
            id: DescriptorId::new(
                measurement_id,
                gattlink::CLIENT_CHARACTERISTIC_CONFIGURATION,
                3,
            ),
            permissions: AttributePermissions::READ | AttributePermissions::WRITE,
        }],
    });
    service.characteristics.push(Characteristic {
        id: CharacteristicId::new(service_id, BODY_SENSOR_LOCATION, 4),
        properties: CharacteristicProperties::READ | CharacteristicProperties::WRITE,
        permissions: AttributePermissions::READ | AttributePermissions::WRITE,
        descriptors: Vec::new(),
    });
    service
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let (link, events) = MockClientLink::new(MockDevice::default());
    link.set_responder(loopback_responder(vec![heart_rate_service()]));

    let (client, event_loop) = GattClient::new(link.clone(), events, ConnectOptions::default());
    let task = tokio::spawn(event_loop.run());

    info!(state = ?client.connect().await?, "connected");
    info!(mtu = client.request_mtu(247).await?, "negotiated MTU");
    info!(phy = ?client.set_phy(Phy::Le2M, Phy::Le2M, PhyOption::NoPreferred).await?, "PHY");
    info!(rssi = client.read_rssi().await?, "signal strength");

    let services = client.discover_services().await?;
    let Some(service) = services.find_service(&HEART_RATE_SERVICE) else {
        return Err("heart rate service not found".into());
    };

    if let Some(location) = service.find_characteristic(&BODY_SENSOR_LOCATION) {
        location.write(&[0x01]).await?;
        info!(value = ?location.read().await?, "body sensor location");
    }

    if let Some(measurement) = service.find_characteristic(&HEART_RATE_MEASUREMENT) {
        let mut updates = measurement.value_updates();
        measurement.set_notifications(true).await?;
        link.emit(ClientAttributeEvent::CharacteristicChanged {
            characteristic: measurement.id().clone(),
            value: vec![0x00, 72],
        });
        info!(value = ?updates.recv().await?, "heart rate measurement");
    }

    client.disconnect()?;
    info!(state = ?client.wait_for_connection_state().await?, "done");

    link.close_events();
    task.await?;
    Ok(())
}
