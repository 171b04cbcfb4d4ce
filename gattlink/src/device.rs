use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};

/// The bonding state of a remote device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BondState {
    #[default]
    None,
    Bonding,
    Bonded,
}

/// A 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddress(pub [u8; 6]);

impl Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(ErrorKind::InvalidAddress)?;
            if part.len() != 2 {
                return Err(ErrorKind::InvalidAddress.into());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ErrorKind::InvalidAddress)?;
        }

        if parts.next().is_some() {
            return Err(ErrorKind::InvalidAddress.into());
        }

        Ok(DeviceAddress(bytes))
    }
}

/// Live access to a device tracked by the native stack.
///
/// Name and bond state may change over the lifetime of the device, so they are queried on
/// every access instead of being cached.
pub trait DeviceHandle: Debug + Send + Sync {
    fn name(&self) -> Option<String>;

    fn bond_state(&self) -> BondState;
}

/// A device known to the native stack.
#[derive(Debug, Clone)]
pub struct RealDevice {
    address: DeviceAddress,
    handle: Arc<dyn DeviceHandle>,
}

impl RealDevice {
    pub fn new(address: DeviceAddress, handle: Arc<dyn DeviceHandle>) -> Self {
        Self { address, handle }
    }

    pub fn handle(&self) -> &Arc<dyn DeviceHandle> {
        &self.handle
    }
}

/// A synthetic device used for loopback testing without a radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockDevice {
    pub name: String,
    pub address: DeviceAddress,
    pub bond_state: BondState,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            name: "MOCK".to_owned(),
            address: DeviceAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            bond_state: BondState::None,
        }
    }
}

/// A remote Bluetooth LE device.
#[derive(Debug, Clone)]
pub enum BleDevice {
    Real(RealDevice),
    Mock(MockDevice),
}

impl BleDevice {
    /// The device name, or an empty string if it has none.
    pub fn name(&self) -> String {
        match self {
            BleDevice::Real(device) => device.handle.name().unwrap_or_default(),
            BleDevice::Mock(device) => device.name.clone(),
        }
    }

    pub fn has_name(&self) -> bool {
        !self.name().is_empty()
    }

    pub fn address(&self) -> DeviceAddress {
        match self {
            BleDevice::Real(device) => device.address,
            BleDevice::Mock(device) => device.address,
        }
    }

    pub fn bond_state(&self) -> BondState {
        match self {
            BleDevice::Real(device) => device.handle.bond_state(),
            BleDevice::Mock(device) => device.bond_state,
        }
    }

    pub fn is_bonded(&self) -> bool {
        self.bond_state() == BondState::Bonded
    }

    pub fn is_bonding(&self) -> bool {
        self.bond_state() == BondState::Bonding
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, BleDevice::Mock(_))
    }
}

impl PartialEq for BleDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for BleDevice {}

impl std::hash::Hash for BleDevice {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl From<MockDevice> for BleDevice {
    fn from(device: MockDevice) -> Self {
        BleDevice::Mock(device)
    }
}

impl From<RealDevice> for BleDevice {
    fn from(device: RealDevice) -> Self {
        BleDevice::Real(device)
    }
}
