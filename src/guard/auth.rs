//! Authorization gate
//!
//! Capability check against a single identity fixed at construction.

use thiserror::Error;

use super::types::Address;

/// Caller is not the identity the gate was built for
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unauthorized caller {caller}")]
pub struct Unauthorized {
    pub caller: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationGate {
    principal: Address,
}

impl AuthorizationGate {
    pub fn new(principal: Address) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> Address {
        self.principal
    }

    pub fn authorize(&self, caller: &Address) -> Result<(), Unauthorized> {
        if *caller == self.principal {
            Ok(())
        } else {
            Err(Unauthorized { caller: *caller })
        }
    }
}
