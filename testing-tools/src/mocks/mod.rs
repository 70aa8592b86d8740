mod evaluator;
mod expr;

pub use evaluator::{SimpleContext, SimpleEvaluator};
pub use expr::Expr;
