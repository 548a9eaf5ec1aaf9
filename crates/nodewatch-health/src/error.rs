use thiserror::Error;

use nodewatch_state::RegistryError;

pub type HealthResult<T> = Result<T, HealthError>;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
