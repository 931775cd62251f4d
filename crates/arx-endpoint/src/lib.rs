//! arx-endpoint — the client authentication endpoint of an arx node.
//!
//! Key authentication, two steps, client calls the node:
//!
//!   connect(client_key) -> {server_nonce, session_id}
//!   get_token(signed {server_nonce, client_nonce}) ->
//!       signed {client_nonce, encrypted(client_key, session_key)}
//!
//! Once keyed, all command traffic travels encrypted under the session key.

pub mod backend;
pub mod directory;
pub mod endpoint;
pub mod registry;
pub mod router;
pub mod session;

pub use backend::{NodeBackend, NullBackend};
pub use directory::{NetworkDirectory, NodeInfo, Roster};
pub use endpoint::ClientEndpoint;
pub use registry::{SessionRegistry, SharedSession};
pub use router::{router, EndpointState, HARD_UPLOAD_LIMIT};
pub use session::{ClientError, Session};
