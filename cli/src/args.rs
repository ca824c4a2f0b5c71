mod filter;
mod global;

pub use filter::FilterArgs;
pub use global::GlobalArgs;
