use std::sync::Arc;

use gattlink::DEFAULT_MTU;

use crate::util::{BroadcastReceiver, Watch};

/// Bytes of every ATT PDU taken by the opcode and attribute handle.
pub const ATT_HEADER_SIZE: u16 = 3;

/// The negotiated MTU of a link.
#[derive(Clone)]
pub struct MtuProvider {
    mtu: Arc<Watch<u16>>,
}

impl std::fmt::Debug for MtuProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtuProvider")
            .field("mtu", &self.mtu())
            .finish()
    }
}

impl Default for MtuProvider {
    fn default() -> Self {
        Self {
            mtu: Arc::new(Watch::new(DEFAULT_MTU)),
        }
    }
}

impl MtuProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.get()
    }

    /// Returns a stream of negotiated MTU values.
    pub fn updates(&self) -> BroadcastReceiver<u16> {
        self.mtu.subscribe()
    }

    pub(crate) fn update(&self, mtu: u16) {
        self.mtu.set(mtu);
    }

    /// The largest attribute value fragment that fits in a single PDU.
    pub fn max_chunk_len(&self) -> usize {
        usize::from(self.mtu().saturating_sub(ATT_HEADER_SIZE))
    }

    /// Returns the part of `value` starting at `offset` that fits in a single PDU.
    pub fn chunk<'a>(&self, value: &'a [u8], offset: usize) -> &'a [u8] {
        if offset >= value.len() {
            return &[];
        }
        let end = offset.saturating_add(self.max_chunk_len()).min(value.len());
        &value[offset..end]
    }
}
