pub mod api_base;
pub mod endpoints;
pub mod parse;
pub mod request;
pub mod runtime;

pub use api_base::*;
pub use endpoints::*;
pub use parse::*;
pub use request::*;
pub use runtime::*;
