//! Template pipeline: line parsing, tree building, IR lowering, optimization,
//! free-variable analysis and rendering.

pub mod ast;
pub mod cache;
pub mod compiler;
pub mod engine;
pub mod ir;
pub mod names;
pub mod optimizer;
pub mod parser;
mod render;
mod render_context;

pub use ast::SyntaxNode;
pub use engine::{CompiledTemplate, Renderer, compile};
pub use ir::{Instr, InstrKind};
