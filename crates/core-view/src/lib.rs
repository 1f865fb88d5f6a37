//! The paginated result view.
//!
//! [`ViewModel`] is the shared session state (current buffer, query,
//! location, selection); [`View`] renders it and runs the loop serving
//! draw, status and paging payloads from the hub.

mod model;
mod styles;
mod view;

pub use model::ViewModel;
pub use styles::{StyleError, Styles};
pub use view::View;
