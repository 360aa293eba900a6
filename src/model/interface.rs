use std::any::Any;
use std::path::Path;

use crate::error::DynError;

/// User-implemented parameter container.
///
/// The runtime treats models as opaque values with three contracts: a
/// serialize/deserialize pair against a directory, and a parameter-publishing
/// copy used to mirror a training side into its inference twin. The `as_any`
/// accessors let `copy_params_to` implementations downcast their target to
/// the concrete type.
pub trait Model: Send + Sync {
    /// Serializes the parameters into `dir`. The directory exists when the
    /// runtime calls this.
    fn save_to(&self, dir: &Path) -> Result<(), DynError>;

    /// Restores the parameters from `dir`.
    fn load_from(&mut self, dir: &Path) -> Result<(), DynError>;

    /// Copies this side's parameters into `other`. Called with the inference
    /// twin while both sides are exclusively locked, so the copy may assume
    /// it is the only access in flight.
    fn copy_params_to(&self, other: &mut dyn Model) -> Result<(), DynError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
