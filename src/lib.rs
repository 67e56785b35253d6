pub mod ast;
pub mod error;
mod funcs;
pub mod namespace;
mod ops;
mod parser;
mod render;
mod scope;
mod ser;
pub mod tags;
pub mod template;
pub mod value;

pub use error::Error;
pub use namespace::Namespace;
pub use scope::Vars;
pub use ser::to_value;
pub use tags::{Tag, TagContext};
pub use template::Template;
pub use value::{Func, Kind, Object, StructValue, Value};

pub type Result<T> = std::result::Result<T, Error>;
