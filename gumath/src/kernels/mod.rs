//! Built-in kernel families.
//!
//! Registration order is part of the behavior: within a function the
//! selector takes the first kernel set that fits.

mod arith;
mod elementwise;
mod records;

use tracing::debug;

use crate::error::Result;
use crate::registry::Registry;

/// Register every built-in function.
pub(crate) fn init(registry: &mut Registry) -> Result<()> {
    elementwise::register(registry)?;
    arith::register(registry)?;
    records::register(registry)?;
    debug!(functions = registry.functions().count(), "registered built-in kernels");
    Ok(())
}
