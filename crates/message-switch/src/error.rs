use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("message switch delivery loop is no longer running")]
	DeliveryLoopStopped,
}
