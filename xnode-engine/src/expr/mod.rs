//! Restricted expression language for `transform.js` and `logic.if` nodes
//!
//! A small JavaScript-flavoured subset: literals, `inputs`/`outputs`
//! lookups, arithmetic, comparison, logic, ternaries, `let` bindings and
//! calls into a fixed builtin table. Everything runs inside [`Sandbox`].

mod ast;
mod builtins;
mod eval;
mod parser;
mod scanner;
mod token;
mod value;

pub use eval::{Evaluation, Sandbox, SandboxError, SandboxLimits};
pub use parser::ParseError;
pub use value::truthy;
