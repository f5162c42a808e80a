//! Boolean expressions over named check instances.
//!
//! Grammar: `expr := term (('&&' | '||') term)*`,
//! `term := '!' term | '(' expr ')' | ident`, identifiers are alphanumeric
//! plus `_`. Evaluation is not short-circuiting: callers run every referenced
//! check first and then evaluate against the complete truth map.

mod error;
mod expr;
mod token;

pub use error::ExprError;
pub use expr::Expr;
pub use token::Token;
