use std::collections::HashMap;
use std::sync::Arc;

use futures_channel::mpsc;
use futures_lite::StreamExt;
use gattlink::{
    BleDevice, ConnectionState, ConnectionStatus, DeviceAddress, GattServerLink, ServerEvent,
};

use crate::error::{Error, ErrorKind, Result};
use crate::mtu::MtuProvider;
use crate::server_services::{Database, ServerContext, ServerServices, ServiceConfig};
use crate::util::{BroadcastReceiver, BroadcastSender, Watch, broadcast};

/// A local GATT server.
///
/// Every connected client gets a [`ServerConnection`] with its own copy of the local
/// services, so values written by one client are not visible to another.
#[derive(Clone)]
pub struct GattServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for GattServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattServer")
            .field("connections", &self.inner.connections.get().len())
            .finish_non_exhaustive()
    }
}

/// Drives a [`GattServer`] by consuming the event stream of its link.
pub struct ServerEventLoop {
    inner: Arc<ServerInner>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

struct ServerInner {
    link: Arc<dyn GattServerLink>,
    database: Database,
    connections: Watch<HashMap<DeviceAddress, ServerConnection>>,
}

impl GattServer {
    /// Publishes the services described by `configs` on `link`.
    pub fn new(
        link: Arc<dyn GattServerLink>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        configs: &[ServiceConfig],
    ) -> Result<(Self, ServerEventLoop)> {
        let database = Database::build(configs);
        for service in &database.services {
            link.add_service(service)?;
            tracing::debug!(uuid = ?service.uuid(), "service added");
        }

        let inner = Arc::new(ServerInner {
            link,
            database,
            connections: Watch::new(HashMap::new()),
        });
        let event_loop = ServerEventLoop {
            inner: inner.clone(),
            events,
        };
        Ok((GattServer { inner }, event_loop))
    }

    /// The currently connected clients.
    pub fn connections(&self) -> Vec<ServerConnection> {
        self.inner.connections.get().into_values().collect()
    }

    pub fn connection(&self, address: &DeviceAddress) -> Option<ServerConnection> {
        self.inner.connections.get().get(address).cloned()
    }

    /// Returns a stream that yields the set of connected clients whenever it changes.
    pub fn connections_updates(
        &self,
    ) -> BroadcastReceiver<HashMap<DeviceAddress, ServerConnection>> {
        self.inner.connections.subscribe()
    }

    /// Shuts the server down. Connected clients are dropped by the link.
    pub fn close(&self) {
        tracing::info!("closing server");
        self.inner.link.close();
    }
}

impl ServerEventLoop {
    /// Processes events until the link's event stream ends.
    pub async fn run(mut self) {
        while let Some(event) = self.events.next().await {
            if let Err(err) = self.inner.handle_event(event) {
                match err.kind() {
                    ErrorKind::RoutingMiss => {
                        tracing::debug!(error = %err, "dropping server event")
                    }
                    _ => tracing::error!(error = %err, "failed to handle server event"),
                }
            }
        }
        tracing::debug!("server event stream ended");
    }
}

impl ServerInner {
    fn connection(&self, device: &BleDevice) -> Result<ServerConnection> {
        self.connections
            .get()
            .get(&device.address())
            .cloned()
            .ok_or_else(|| Error::from(ErrorKind::RoutingMiss))
    }

    fn handle_event(&self, event: ServerEvent) -> Result<()> {
        tracing::trace!(?event, "server event");
        match event {
            ServerEvent::ConnectionStateChanged {
                device,
                status,
                new_state,
            } => self.on_connection_state_changed(device, status, new_state),
            ServerEvent::MtuChanged { device, mtu } => {
                tracing::info!(device = %device.address(), mtu, "client MTU changed");
                self.connection(&device)?.inner.mtu.update(mtu);
            }
            ServerEvent::NotificationSent { device, status } => {
                let connection = self.connection(&device)?;
                let _ = connection
                    .inner
                    .notifications_sent
                    .try_broadcast(Error::check(status));
            }
            ServerEvent::ExecuteWrite {
                device,
                request_id,
                execute,
            } => {
                self.connection(&device)?
                    .inner
                    .services
                    .execute_write(request_id, execute)?;
            }
            ServerEvent::Attribute(event) => {
                self.connection(event.device())?.inner.services.handle(event)?;
            }
        }
        Ok(())
    }

    fn on_connection_state_changed(
        &self,
        device: BleDevice,
        status: ConnectionStatus,
        new_state: ConnectionState,
    ) {
        let address = device.address();
        tracing::debug!(
            device = %address,
            ?new_state,
            %status,
            "client connection state changed"
        );
        let mut connections = self.connections.get();
        match new_state {
            ConnectionState::Connected if !connections.contains_key(&address) => {
                tracing::info!(device = %address, "client connected");
                let connection = ServerConnection::new(self.link.clone(), &self.database, device);
                connections.insert(address, connection);
            }
            ConnectionState::Disconnected => {
                if connections.remove(&address).is_none() {
                    return;
                }
                tracing::info!(device = %address, "client disconnected");
            }
            _ => return,
        }
        self.connections.set(connections);
    }
}

struct ConnectionInner {
    link: Arc<dyn GattServerLink>,
    device: BleDevice,
    mtu: MtuProvider,
    services: ServerServices,
    notifications_sent: BroadcastSender<Result<()>>,
}

/// A client connected to a [`GattServer`].
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("device", &self.inner.device)
            .field("mtu", &self.inner.mtu.mtu())
            .finish_non_exhaustive()
    }
}

impl ServerConnection {
    fn new(link: Arc<dyn GattServerLink>, database: &Database, device: BleDevice) -> Self {
        let mtu = MtuProvider::new();
        let context = ServerContext {
            link: link.clone(),
            device: device.clone(),
            mtu: mtu.clone(),
        };
        Self {
            inner: Arc::new(ConnectionInner {
                link,
                device,
                mtu,
                services: ServerServices::new(database, context),
                notifications_sent: broadcast(16),
            }),
        }
    }

    pub fn device(&self) -> &BleDevice {
        &self.inner.device
    }

    pub fn mtu(&self) -> u16 {
        self.inner.mtu.mtu()
    }

    pub fn mtu_provider(&self) -> &MtuProvider {
        &self.inner.mtu
    }

    /// The local services as seen by this client.
    pub fn services(&self) -> &ServerServices {
        &self.inner.services
    }

    /// Returns a stream of notification and indication delivery outcomes.
    pub fn notifications_sent(&self) -> BroadcastReceiver<Result<()>> {
        self.inner.notifications_sent.new_receiver()
    }

    /// Asks the link to drop this client.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.link.cancel_connection(&self.inner.device)?;
        Ok(())
    }
}
