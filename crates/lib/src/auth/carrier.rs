//! Per-request holder for the exchanged token.
//!
//! A carrier is created for each inbound request and handed to the outbound transport of
//! that request only. Nothing is shared between requests, so concurrent requests cannot
//! observe each other's token.

use super::AccessToken;
use std::sync::{Arc, RwLock};

/// Holds at most one exchanged token for the lifetime of one request.
#[derive(Debug, Default)]
pub struct TokenCarrier {
    slot: RwLock<Option<AccessToken>>,
}

impl TokenCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: AccessToken) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token);
    }

    pub fn get(&self) -> Option<AccessToken> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    /// Set `token` and return a guard that clears the carrier when dropped: on return, on
    /// error, on unwind, and when the owning request future is dropped mid-flight.
    pub fn scope(self: &Arc<Self>, token: AccessToken) -> CarrierScope {
        self.set(token);
        CarrierScope {
            carrier: Arc::clone(self),
        }
    }
}

/// Clears its carrier on drop.
#[must_use = "the carrier is cleared as soon as the scope is dropped"]
#[derive(Debug)]
pub struct CarrierScope {
    carrier: Arc<TokenCarrier>,
}

impl CarrierScope {
    pub fn carrier(&self) -> &Arc<TokenCarrier> {
        &self.carrier
    }
}

impl Drop for CarrierScope {
    fn drop(&mut self) {
        self.carrier.clear();
    }
}
