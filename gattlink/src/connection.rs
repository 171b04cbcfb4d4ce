use std::fmt::Display;

/// The MTU every link starts with before negotiation.
pub const DEFAULT_MTU: u16 = 23;
/// The largest MTU a link can negotiate.
pub const MAX_MTU: u16 = 517;

/// The lifecycle state of a GATT connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// No connection has been attempted yet.
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Whether this state ends a connect or disconnect attempt.
    pub fn is_settled(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Disconnected)
    }
}

/// The status code accompanying a connection state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionStatus(pub u16);

impl ConnectionStatus {
    pub const SUCCESS: Self = Self(0);
    pub const L2CAP_FAILURE: Self = Self(1);
    /// Supervision timeout, i.e. the peer went out of range.
    pub const LINK_LOSS: Self = Self(8);
    pub const TERMINATE_PEER_USER: Self = Self(19);
    pub const TERMINATE_LOCAL_HOST: Self = Self(22);
    pub const LMP_TIMEOUT: Self = Self(34);
    pub const FAILED_TO_ESTABLISH: Self = Self(62);
    pub const GATT_ERROR: Self = Self(133);
    pub const CANCELLED: Self = Self(256);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Whether the connection ended for any reason other than a deliberate close by
    /// either side.
    pub fn is_link_loss(self) -> bool {
        self != Self::SUCCESS
            && self != Self::TERMINATE_LOCAL_HOST
            && self != Self::TERMINATE_PEER_USER
    }
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ConnectionStatus::SUCCESS => f.write_str("success"),
            ConnectionStatus::L2CAP_FAILURE => f.write_str("L2CAP failure"),
            ConnectionStatus::LINK_LOSS => f.write_str("link loss"),
            ConnectionStatus::TERMINATE_PEER_USER => f.write_str("terminated by peer"),
            ConnectionStatus::TERMINATE_LOCAL_HOST => f.write_str("terminated by local host"),
            ConnectionStatus::LMP_TIMEOUT => f.write_str("LMP timeout"),
            ConnectionStatus::FAILED_TO_ESTABLISH => f.write_str("failed to establish"),
            ConnectionStatus::GATT_ERROR => f.write_str("GATT error"),
            ConnectionStatus::CANCELLED => f.write_str("cancelled"),
            ConnectionStatus(code) => write!(f, "unknown connection status ({code})"),
        }
    }
}

/// A connection state together with the status that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionStateWithStatus {
    pub state: ConnectionState,
    pub status: ConnectionStatus,
}

impl ConnectionStateWithStatus {
    pub fn new(state: ConnectionState, status: ConnectionStatus) -> Self {
        Self { state, status }
    }
}

impl Default for ConnectionStateWithStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Idle, ConnectionStatus::SUCCESS)
    }
}

/// A physical layer mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phy {
    #[default]
    Le1M,
    Le2M,
    LeCoded,
}

/// The coding preference used when requesting [`Phy::LeCoded`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhyOption {
    #[default]
    NoPreferred,
    S2,
    S8,
}

/// The transmitter and receiver PHY in use on a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PhyInfo {
    pub tx: Phy,
    pub rx: Phy,
}

/// Options used when establishing a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnectOptions {
    /// Whether the link should keep reconnecting by itself after a link loss.
    pub auto_connect: bool,
    /// The PHY to prefer while connecting, if any.
    pub preferred_phy: Option<Phy>,
}
