//! Consumer identities and their binding to addressable UI state.
//!
//! A consumer identity names one logical watcher. It is not held by the watch components
//! themselves; instead it lives in addressable state (think URL parameters) which any number of
//! independent components may read & write. The state is injected as an `AddressableState`
//! capability so that nothing here depends on a live UI context.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;

/// An opaque token identifying one logical watcher.
///
/// An empty (or blank) identity means that no subscription should be active.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity(Arc<String>);

impl ConsumerIdentity {
    /// Create a new instance.
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::new(id.into()))
    }

    /// Check if this identity is empty, in which case nothing may be watched on its behalf.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A get/set capability over a single value of addressable state.
pub trait AddressableState: Send + Sync {
    /// Read the current value, if any.
    fn get(&self) -> Option<String>;

    /// Write a new value, making it visible to all holders of the same state.
    fn set(&self, value: String);
}

/// The set of parameters held by a `UrlState`.
pub type UrlParams = BTreeMap<String, String>;

/// Process-wide addressable state, modelled after URL query parameters.
///
/// Clones share the same underlying parameters. The full state round-trips through a single
/// URL-safe token (unpadded URL-safe base64 of the parameters as a JSON object).
#[derive(Clone, Default)]
pub struct UrlState {
    params: Arc<ArcSwap<UrlParams>>,
}

impl UrlState {
    /// Create a new, empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an instance from a token previously produced by `encode`.
    pub fn decode(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self::default());
        }
        let bytes = base64::decode_config(token, base64::URL_SAFE_NO_PAD).context("error decoding url state token")?;
        let params: UrlParams = serde_json::from_slice(&bytes).context("error parsing url state params")?;
        Ok(Self {
            params: Arc::new(ArcSwap::from_pointee(params)),
        })
    }

    /// Encode the current parameters as a URL-safe token.
    pub fn encode(&self) -> Result<String> {
        let params = self.params.load();
        let json = serde_json::to_vec(params.as_ref()).context("error serializing url state params")?;
        Ok(base64::encode_config(json, base64::URL_SAFE_NO_PAD))
    }

    /// Get the value of the given parameter.
    pub fn get(&self, key: &str) -> Option<String> {
        self.params.load().get(key).cloned()
    }

    /// Set the value of the given parameter.
    pub fn set(&self, key: &str, value: String) {
        self.params.rcu(|params| {
            let mut updated = params.as_ref().clone();
            updated.insert(key.to_string(), value.clone());
            updated
        });
    }

    /// A handle to a single parameter of this state.
    pub fn param(&self, key: impl Into<String>) -> UrlParam {
        UrlParam { state: self.clone(), key: key.into() }
    }
}

/// A single parameter of a `UrlState`.
#[derive(Clone)]
pub struct UrlParam {
    state: UrlState,
    key: String,
}

impl AddressableState for UrlParam {
    fn get(&self) -> Option<String> {
        self.state.get(&self.key)
    }

    fn set(&self, value: String) {
        self.state.set(&self.key, value)
    }
}

/// Resolves & persists the consumer identity against addressable state.
#[derive(Clone)]
pub struct ConsumerIdentityBinding {
    state: Arc<dyn AddressableState>,
}

impl ConsumerIdentityBinding {
    /// Create a new instance.
    pub fn new(state: Arc<dyn AddressableState>) -> Self {
        Self { state }
    }

    /// Resolve the currently addressable identity.
    ///
    /// Yields an empty identity when none is addressable.
    pub fn resolve(&self) -> ConsumerIdentity {
        self.state.get().map(ConsumerIdentity::new).unwrap_or_default()
    }

    /// Bind the given identity, making it visible to later `resolve` calls.
    pub fn bind(&self, consumer: &ConsumerIdentity) {
        self.state.set(consumer.as_str().to_string());
    }
}
