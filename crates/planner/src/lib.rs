pub mod builder;
pub mod condition;
pub mod explain;
pub mod expression;
pub mod field;
pub mod join_builder;
pub mod pipeline;
pub mod sql_frontend;
pub mod statement;
pub mod window;

pub use builder::*;
pub use condition::*;
pub use explain::*;
pub use expression::*;
pub use field::*;
pub use join_builder::*;
pub use pipeline::*;
pub use sql_frontend::*;
pub use statement::*;
pub use window::*;
