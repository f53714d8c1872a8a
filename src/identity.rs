//!
//! Process-wide local replica identity.
//!
//! The local node id is the replica's address bytes, discovered from
//! configuration at startup. It is set exactly once and immutable afterwards;
//! the context codecs derive the cluster-wide id width from it.

use once_cell::sync::OnceCell;

use crate::error::StoreError;
use crate::types::NodeId;

static LOCAL: OnceCell<NodeId> = OnceCell::new();

/// Installs the local replica id. Startup calls this once, before any write
/// or read path runs. A second call with a different id is an error.
pub fn initialize(id: NodeId) -> Result<(), StoreError> {
    let mut fresh = false;
    let installed = LOCAL.get_or_init(|| {
        fresh = true;
        id.clone()
    });
    if !fresh && *installed != id {
        return Err(StoreError::Identity(format!(
            "already initialized as {:?}, refusing {:?}",
            installed.as_bytes(),
            id.as_bytes()
        )));
    }
    tracing::debug!(id = ?installed.as_bytes(), "local node identity installed");
    Ok(())
}

/// The local replica id, or an error when startup has not run yet.
pub fn local() -> Result<&'static NodeId, StoreError> {
    LOCAL
        .get()
        .ok_or_else(|| StoreError::Identity("not initialized".to_string()))
}

/// The cluster-wide id width in bytes, derived from the local id.
pub fn id_len() -> Result<usize, StoreError> {
    Ok(local()?.len())
}

/// Installs a fixed loopback identity for tests, tolerating repeat calls.
#[cfg(any(test, feature = "test-utils"))]
pub fn initialize_for_tests() -> &'static NodeId {
    LOCAL.get_or_init(|| NodeId::from(std::net::Ipv4Addr::LOCALHOST))
}
