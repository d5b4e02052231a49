mod document;
pub use document::*;

mod store;
pub use store::*;
