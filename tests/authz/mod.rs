mod client;

use std::sync::Arc;

use truss_authz::{AuthorizationClient, AuthorizationConfig};
use truss_client::InvocationManager;
use wiremock::MockServer;

/// A client pointed at one mock server for both reads and writes.
pub fn store_client(server: &MockServer) -> Arc<AuthorizationClient> {
    let config = AuthorizationConfig::builder()
        .read_uri(server.uri())
        .write_uri(server.uri())
        .build();
    Arc::new(AuthorizationClient::new(
        config,
        Arc::new(InvocationManager::builder().build()),
    ))
}
