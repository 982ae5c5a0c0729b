//! Liveness probe.

/// Always answers `OK` once the server is accepting connections.
pub async fn health() -> &'static str {
    "OK"
}
