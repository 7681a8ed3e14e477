use thiserror::Error;

#[derive(Debug, Error)]
pub enum MockError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection broken")]
    ConnectionBroken,
    #[error("link closed")]
    LinkClosed,
    #[error("disconnect failed")]
    DisconnectFailed,
}
