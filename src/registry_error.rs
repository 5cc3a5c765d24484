use std::any::Any;

use thiserror::Error;

/// Errors reported by [`Registry::try_trigger`](crate::Registry::try_trigger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A callback panicked during an abrupt-path walk. The walk stopped at this entry.
    #[error("cleanup callback #{index} panicked: {message}")]
    CallbackPanicked { index: usize, message: String },
}

impl RegistryError {
    pub(crate) fn from_panic(index: usize, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };

        RegistryError::CallbackPanicked { index, message }
    }
}
