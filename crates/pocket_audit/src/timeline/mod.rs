//! Audit window selection and resolution to block heights.

mod model;
mod resolve;

pub use model::{ByBlock, HeightRange, Params, Selection, Timeline, TimelineError, Unit};
pub use resolve::{HeightResolver, ResolveError};
