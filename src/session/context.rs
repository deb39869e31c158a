//! Connection-scoped context visible while a handler is being built.
//!
//! The peer certificate of the connection being established is bound as a
//! task-local for the extent of one handler factory call. It follows the
//! future across worker threads and is unbound on every exit path, including
//! cancellation.

use std::future::Future;

use crate::net::PeerCertificate;

tokio::task_local! {
    static PEER_CERTIFICATE: PeerCertificate;
}

/// Peer certificate of the connection whose handler is currently being
/// constructed, if any.
pub fn peer_certificate() -> Option<PeerCertificate> {
    PEER_CERTIFICATE.try_with(|cert| cert.clone()).ok()
}

/// Run `fut` with `cert` bound as the current peer certificate.
pub async fn with_peer_certificate<F>(cert: PeerCertificate, fut: F) -> F::Output
where
    F: Future,
{
    PEER_CERTIFICATE.scope(cert, fut).await
}
