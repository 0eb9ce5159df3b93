//! Sync coordination between the local store and the remote endpoint.
//!
//! - [`SyncCoordinator`] owns the online/offline state and the write path
//! - [`OutboxDrainer`] replays queued writes; [`DrainerHandle`] serves it to
//!   both execution contexts by message passing
//! - [`RemoteEndpoint`] is the remote collaborator

mod connectivity;
mod coordinator;
mod drainer;
mod remote;

pub use connectivity::{Connectivity, ConnectivityEvent};
pub use coordinator::SyncCoordinator;
pub use drainer::{DrainOrigin, DrainReport, DrainerHandle, OutboxDrainer};
pub use remote::{HttpRemote, RemoteEndpoint};
