use bosh_session::BoshError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error(transparent)]
    Bosh(#[from] BoshError),
}
