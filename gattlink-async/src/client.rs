use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_io::Timer;
use futures_channel::mpsc;
use futures_lite::StreamExt;
use gattlink::{
    BleDevice, BondState, ClientEvent, ConnectOptions, ConnectionState, ConnectionStateWithStatus,
    ConnectionStatus, GattClientLink, GattStatus, Phy, PhyInfo, PhyOption, Service,
};

use crate::error::{Error, ErrorKind, Result};
use crate::mtu::MtuProvider;
use crate::mutex::{OperationGuard, OperationMutex};
use crate::services::{ClientServices, LinkHandle};
use crate::util::{BroadcastReceiver, BroadcastSender, Slot, Watch, broadcast, defer, lock};

/// How long [`GattClient::wait_for_bonding`] usually waits before looking at the bond state.
pub const DEFAULT_BONDING_DELAY: Duration = Duration::from_secs(2);

/// Whether the link should be closed after a disconnection.
///
/// A link lost while auto-connect is enabled is kept so that the driver can bring it back.
pub(crate) fn should_release_resources(is_link_loss: bool, auto_connect: bool) -> bool {
    !(is_link_loss && auto_connect)
}

/// An asynchronous GATT client session with a single remote device.
///
/// Every correlated operation takes the session's [`OperationMutex`] first, so at most one of
/// them is outstanding on the link at a time. Callers are served in the order they asked.
#[derive(Clone)]
pub struct GattClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for GattClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattClient")
            .field("device", self.device())
            .field("connection_state", &self.connection_state_with_status())
            .finish_non_exhaustive()
    }
}

/// Drives a [`GattClient`] by consuming the event stream of its link.
///
/// The session makes no progress unless this is running, usually spawned on the
/// application's executor.
pub struct ClientEventLoop {
    inner: Arc<ClientInner>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

struct ClientInner {
    handle: LinkHandle,
    options: ConnectOptions,
    connection_state: Watch<ConnectionStateWithStatus>,
    mtu: MtuProvider,
    phy: Watch<PhyInfo>,
    bond_state: Watch<BondState>,
    services: Watch<Option<Arc<ClientServices>>>,
    reliable_write_completions: BroadcastSender<Result<()>>,
    connection: Slot<Result<ConnectionState>>,
    mtu_request: Slot<Result<u16>>,
    phy_request: Slot<Result<PhyInfo>>,
    rssi_request: Slot<Result<i16>>,
    discovery: Slot<Result<Arc<ClientServices>>>,
    bonding: Slot<BondState>,
    rediscovery: Mutex<Option<OperationGuard>>,
}

impl GattClient {
    /// Creates a session over `link`, whose events must arrive on `events`.
    pub fn new(
        link: Arc<dyn GattClientLink>,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        options: ConnectOptions,
    ) -> (Self, ClientEventLoop) {
        let bond_state = link.device().bond_state();
        let inner = Arc::new(ClientInner {
            handle: LinkHandle {
                link,
                gate: OperationMutex::new(),
            },
            options,
            connection_state: Watch::new(ConnectionStateWithStatus::default()),
            mtu: MtuProvider::new(),
            phy: Watch::new(PhyInfo::default()),
            bond_state: Watch::new(bond_state),
            services: Watch::new(None),
            reliable_write_completions: broadcast(16),
            connection: Slot::default(),
            mtu_request: Slot::default(),
            phy_request: Slot::default(),
            rssi_request: Slot::default(),
            discovery: Slot::default(),
            bonding: Slot::default(),
            rediscovery: Mutex::new(None),
        });
        let event_loop = ClientEventLoop {
            inner: inner.clone(),
            events,
        };
        (GattClient { inner }, event_loop)
    }

    fn link(&self) -> &dyn GattClientLink {
        &*self.inner.handle.link
    }

    fn gate(&self) -> &OperationMutex {
        &self.inner.handle.gate
    }

    pub fn device(&self) -> &BleDevice {
        self.link().device()
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// The gate serializing the operations of this session.
    pub fn operation_mutex(&self) -> &OperationMutex {
        self.gate()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state.get().state
    }

    pub fn connection_state_with_status(&self) -> ConnectionStateWithStatus {
        self.inner.connection_state.get()
    }

    /// Returns a stream of connection state changes, including the synthesized `Connecting`
    /// and `Disconnecting` states.
    pub fn connection_state_updates(&self) -> BroadcastReceiver<ConnectionStateWithStatus> {
        self.inner.connection_state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn mtu(&self) -> u16 {
        self.inner.mtu.mtu()
    }

    pub fn mtu_updates(&self) -> BroadcastReceiver<u16> {
        self.inner.mtu.updates()
    }

    pub fn mtu_provider(&self) -> &MtuProvider {
        &self.inner.mtu
    }

    pub fn phy(&self) -> PhyInfo {
        self.inner.phy.get()
    }

    pub fn phy_updates(&self) -> BroadcastReceiver<PhyInfo> {
        self.inner.phy.subscribe()
    }

    pub fn bond_state(&self) -> BondState {
        self.inner.bond_state.get()
    }

    pub fn bond_state_updates(&self) -> BroadcastReceiver<BondState> {
        self.inner.bond_state.subscribe()
    }

    /// The services of the most recent successful discovery.
    pub fn services(&self) -> Option<Arc<ClientServices>> {
        self.inner.services.get()
    }

    /// Returns a stream that yields a new [`ClientServices`] after every successful discovery,
    /// including the ones triggered by the remote device changing its database.
    pub fn services_updates(&self) -> BroadcastReceiver<Option<Arc<ClientServices>>> {
        self.inner.services.subscribe()
    }

    /// Returns a stream of reliable write transaction outcomes.
    pub fn reliable_write_completions(&self) -> BroadcastReceiver<Result<()>> {
        self.inner.reliable_write_completions.new_receiver()
    }

    /// Connects to the device and waits until the attempt settles.
    ///
    /// Returns `Connected` or `Disconnected`, whichever the link reports first.
    pub async fn connect(&self) -> Result<ConnectionState> {
        if self.is_connected() {
            return Ok(ConnectionState::Connected);
        }

        self.inner.connection_state.set(ConnectionStateWithStatus::new(
            ConnectionState::Connecting,
            ConnectionStatus::SUCCESS,
        ));
        tracing::debug!(device = %self.device().address(), "connecting");

        let state = self
            .gate()
            .correlate(&self.inner.connection, || {
                self.link().connect(&self.inner.options)
            })
            .await?;
        tracing::info!(?state, "connection attempt settled");
        Ok(state)
    }

    /// Waits for the next `Connected` or `Disconnected` state.
    ///
    /// Returns right away if the session already is in one of them.
    pub async fn wait_for_connection_state(&self) -> Result<ConnectionState> {
        let mut updates = self.connection_state_updates();
        loop {
            let state = self.connection_state();
            if state.is_settled() {
                return Ok(state);
            }
            match updates.recv().await {
                Ok(_) | Err(async_broadcast::RecvError::Overflowed(_)) => {}
                Err(async_broadcast::RecvError::Closed) => return Err(ErrorKind::Canceled.into()),
            }
        }
    }

    /// Starts disconnecting from the device without waiting for it to complete.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.connection_state.set(ConnectionStateWithStatus::new(
            ConnectionState::Disconnecting,
            ConnectionStatus::SUCCESS,
        ));
        tracing::info!("disconnecting");
        self.link().disconnect()?;
        Ok(())
    }

    /// Requests a new MTU and returns the value the devices settled on, which may be lower.
    pub async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        tracing::debug!(mtu, "requesting MTU");
        self.gate()
            .correlate(&self.inner.mtu_request, || self.link().request_mtu(mtu))
            .await
    }

    /// Sets the preferred PHY and returns the PHY in use afterwards, which may differ.
    pub async fn set_phy(&self, tx: Phy, rx: Phy, option: PhyOption) -> Result<PhyInfo> {
        tracing::debug!(?tx, ?rx, ?option, "setting preferred PHY");
        self.gate()
            .correlate(&self.inner.phy_request, || {
                self.link().set_preferred_phy(tx, rx, option)
            })
            .await
    }

    pub async fn read_phy(&self) -> Result<PhyInfo> {
        self.gate()
            .correlate(&self.inner.phy_request, || self.link().read_phy())
            .await
    }

    /// Reads the signal strength of the connection in dBm.
    pub async fn read_rssi(&self) -> Result<i16> {
        self.gate()
            .correlate(&self.inner.rssi_request, || self.link().read_remote_rssi())
            .await
    }

    /// Discovers the services of the device.
    ///
    /// Fails with [`ErrorKind::InvalidState`] unless the session is connected.
    pub async fn discover_services(&self) -> Result<Arc<ClientServices>> {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            return Err(ErrorKind::InvalidState(state).into());
        }

        self.gate()
            .correlate(&self.inner.discovery, || self.link().discover_services())
            .await
    }

    /// Gives the device a chance to start bonding, then waits for bonding to finish.
    ///
    /// Other operations are held back for the whole wait. See [`DEFAULT_BONDING_DELAY`].
    pub async fn wait_for_bonding(&self, delay: Duration) -> Result<()> {
        let _guard = self.gate().lock().await;
        Timer::after(delay).await;

        let receiver = self.inner.bonding.arm();
        let _disarm = defer(|| self.inner.bonding.disarm());
        if self.bond_state() != BondState::Bonding {
            return Ok(());
        }
        let bond_state = receiver.await?;
        tracing::debug!(?bond_state, "bonding finished");
        Ok(())
    }

    pub fn begin_reliable_write(&self) -> Result<()> {
        self.link().begin_reliable_write()?;
        Ok(())
    }

    pub fn abort_reliable_write(&self) -> Result<()> {
        self.link().abort_reliable_write()?;
        Ok(())
    }

    /// Commits the open reliable write transaction.
    ///
    /// The outcome is reported on [`reliable_write_completions`](Self::reliable_write_completions).
    pub fn execute_reliable_write(&self) -> Result<()> {
        self.link().execute_reliable_write()?;
        Ok(())
    }

    pub fn clear_services_cache(&self) -> Result<()> {
        tracing::info!("clearing services cache");
        self.link().clear_services_cache()?;
        Ok(())
    }
}

impl ClientEventLoop {
    /// Processes events until the link's event stream ends.
    ///
    /// Once the stream ends every pending operation fails with [`ErrorKind::Canceled`].
    pub async fn run(mut self) {
        while let Some(event) = self.events.next().await {
            self.inner.handle_event(event);
        }
        tracing::debug!("client event stream ended");
        self.inner.cancel_pending();
    }
}

impl ClientInner {
    fn handle_event(&self, event: ClientEvent) {
        tracing::trace!(?event, "client event");
        match event {
            ClientEvent::ConnectionStateChanged { status, new_state } => {
                self.on_connection_state_changed(status, new_state)
            }
            ClientEvent::MtuChanged { mtu, status } => {
                if status.is_success() {
                    tracing::info!(mtu, "MTU changed");
                    self.mtu.update(mtu);
                } else {
                    tracing::error!(%status, "MTU request failed");
                }
                self.mtu_request.resolve(Error::check(status).map(|()| mtu));
            }
            ClientEvent::PhyRead { tx, rx, status } | ClientEvent::PhyUpdate { tx, rx, status } => {
                self.on_phy(PhyInfo { tx, rx }, status)
            }
            ClientEvent::ReadRemoteRssi { rssi, status } => {
                if status.is_success() {
                    tracing::info!(rssi, "RSSI read");
                } else {
                    tracing::error!(%status, "RSSI read failed");
                }
                self.rssi_request.resolve(Error::check(status).map(|()| rssi));
            }
            ClientEvent::BondStateChanged { bond_state } => {
                tracing::debug!(?bond_state, "bond state changed");
                self.bond_state.set(bond_state);
                self.bonding.resolve(bond_state);
            }
            ClientEvent::ServiceChanged => self.on_service_changed(),
            ClientEvent::ServicesDiscovered { services, status } => {
                self.on_services_discovered(services, status)
            }
            ClientEvent::ReliableWriteCompleted { status } => {
                let _ = self
                    .reliable_write_completions
                    .try_broadcast(Error::check(status));
            }
            ClientEvent::Attribute(event) => {
                let routed = match self.services.get() {
                    Some(services) => services.route(event),
                    None => Err(ErrorKind::RoutingMiss.into()),
                };
                if let Err(err) = routed {
                    tracing::debug!(error = %err, "dropping attribute event");
                }
            }
        }
    }

    fn on_connection_state_changed(&self, status: ConnectionStatus, new_state: ConnectionState) {
        tracing::debug!(?new_state, %status, "connection state changed");
        self.connection_state
            .set(ConnectionStateWithStatus::new(new_state, status));
        if new_state.is_settled() {
            self.connection.resolve(Ok(new_state));
        }

        if new_state == ConnectionState::Disconnected {
            if should_release_resources(status.is_link_loss(), self.options.auto_connect) {
                self.handle.link.close();
            } else {
                tracing::debug!("link lost, keeping it open for auto-connect");
            }
            self.cancel_pending();
        }
    }

    fn on_phy(&self, phy: PhyInfo, status: GattStatus) {
        if status.is_success() {
            tracing::info!(tx = ?phy.tx, rx = ?phy.rx, "PHY updated");
            self.phy.set(phy);
        } else {
            tracing::error!(%status, "PHY request failed");
        }
        self.phy_request.resolve(Error::check(status).map(|()| phy));
    }

    fn on_service_changed(&self) {
        tracing::info!("remote services changed, rediscovering");
        {
            let mut rediscovery = lock(&self.rediscovery);
            if rediscovery.is_none() {
                *rediscovery = self.handle.gate.try_lock();
                if rediscovery.is_none() {
                    tracing::warn!("rediscovering services while another operation is pending");
                }
            }
        }

        if let Err(err) = self.handle.link.discover_services() {
            tracing::error!(error = %err, "failed to start service rediscovery");
            lock(&self.rediscovery).take();
        }
    }

    fn on_services_discovered(&self, services: Vec<Service>, status: GattStatus) {
        let _rediscovery = lock(&self.rediscovery).take();
        if !status.is_success() {
            tracing::error!(%status, "service discovery failed");
            self.discovery.resolve(Err(Error::operation_failed(status)));
            return;
        }

        tracing::info!(count = services.len(), "services discovered");
        let services = Arc::new(ClientServices::new(&self.handle, services));
        if let Some(previous) = self.services.get() {
            previous.retire();
        }
        self.services.set(Some(services.clone()));
        self.discovery.resolve(Ok(services));
    }

    fn cancel_pending(&self) {
        let armed = self.connection.is_armed()
            || self.mtu_request.is_armed()
            || self.phy_request.is_armed()
            || self.rssi_request.is_armed()
            || self.discovery.is_armed()
            || self.bonding.is_armed();
        if armed {
            tracing::warn!("canceling pending operations");
        }

        self.connection.disarm();
        self.mtu_request.disarm();
        self.phy_request.disarm();
        self.rssi_request.disarm();
        self.discovery.disarm();
        self.bonding.disarm();
        if let Some(services) = self.services.get() {
            services.cancel_pending();
        }
        lock(&self.rediscovery).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_loss_with_auto_connect_keeps_resources() {
        assert!(should_release_resources(false, false));
        assert!(should_release_resources(false, true));
        assert!(should_release_resources(true, false));
        assert!(!should_release_resources(true, true));
    }
}
