//! Construct and release instances inside their own scope.

use std::any::type_name;

use crate::error::{BoxError, Error, Result};
use crate::scope::Scoped;

/// Build `T` with `factory` inside a fresh scope.
///
/// Cleanups registered while the factory runs belong to the returned
/// [`Scoped`]. A failing factory has its partial registrations released and
/// its error wrapped in [`Error::Construction`].
pub fn provide<T, E>(factory: impl FnOnce() -> Result<T, E>) -> Result<Scoped<T>>
where
    E: Into<BoxError>,
{
    Scoped::try_new(factory).map_err(|err| {
        let source = err.into();
        tracing::debug!(service = type_name::<T>(), error = %source, "construction failed");
        Error::Construction {
            service: type_name::<T>(),
            source,
        }
    })
}

/// Release an instance obtained from [`provide`], running its cleanups.
pub fn release<T>(instance: Scoped<T>) {
    instance.close();
}
