//! Identity contract gating sync activity.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The authenticated principal owning the synced data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Creates a principal id from its backend representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the backend representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supplies the currently authenticated principal, if any.
///
/// Sync silently no-ops while no principal is present.
pub trait IdentityProvider: Send + Sync {
    /// Returns the current principal, or `None` when signed out.
    fn current_principal(&self) -> Option<PrincipalId>;
}

/// An identity provider backed by a swappable in-memory value.
///
/// Host applications that manage auth elsewhere update this on sign-in and
/// sign-out; tests use it to flip identity on and off.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    current: RwLock<Option<PrincipalId>>,
}

impl StaticIdentity {
    /// Creates a signed-out identity provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider already signed in as `principal`.
    pub fn signed_in(principal: PrincipalId) -> Self {
        Self {
            current: RwLock::new(Some(principal)),
        }
    }

    /// Records a completed sign-in.
    pub fn sign_in(&self, principal: PrincipalId) {
        *self.current.write() = Some(principal);
    }

    /// Records a sign-out.
    pub fn sign_out(&self) {
        *self.current.write() = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_principal(&self) -> Option<PrincipalId> {
        self.current.read().clone()
    }
}
