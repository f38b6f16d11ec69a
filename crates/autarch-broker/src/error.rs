use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown subscription")]
    UnknownSubscription,
}
