pub mod ast;
pub mod conditional;
pub mod error;
pub mod eval;
pub mod expression;
pub mod functions;
pub mod jsonpath;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod references;
pub mod syntax;
pub mod value;

pub use ast::*;
pub use conditional::*;
pub use error::*;
pub use eval::*;
pub use expression::*;
pub use functions::*;
pub use lexer::*;
pub use lower::*;
pub use parser::*;
pub use references::*;
pub use syntax::*;
pub use value::*;
