//! Session state mutated by the input loop and read by the view: the query
//! under edit, the selection, the range anchor, and the cursor/page
//! location. Pure data structures; the loops own the locking.

mod location;
mod query;
mod selection;

pub use location::Location;
pub use query::Query;
pub use selection::{RangeStart, Selection};
