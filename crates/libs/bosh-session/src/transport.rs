use crate::error::TransportError;

/// The HTTP side of a session: writes one response per held request.
///
/// Writes are synchronous and may block; the session calls them with its
/// state lock held, which serializes flushes within a session.
pub trait Transport: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn write(
        &self,
        connection: &mut Self::Connection,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), TransportError>;

    fn close(&self, connection: Self::Connection);
}
