//! Expression compiler collaborator.
//!
//! The router treats the actual expression language as an external
//! collaborator: given source text and shape information it hands back a
//! boxed evaluator plus the number of per-instance scratch variables the
//! expression needs. This crate ships one evaluator, a small
//! arithmetic subset good enough to drive the router's own tests, so callers
//! exercising the public API never need a real expression engine linked in.

use crate::error::{RouterError, RouterResult};

/// A compiled expression, evaluated once per accepted sample.
///
/// `inputs` holds one slice per source slot, each `source.length` elements
/// long, all drawn from the same history position. `vars` is the
/// connection's per-instance scratch array (`num_vars` elements, zero
/// initialized, persisted across calls for this instance). Returning `None`
/// means the expression produced no output for this sample -- expressions
/// may be sparse in time.
pub trait CompiledExpression: Send {
    fn evaluate(&mut self, inputs: &[&[f64]], vars: &mut [f64]) -> Option<Vec<f64>>;
}

/// Result of compiling one connection's expression text.
pub struct CompiledProgram {
    pub evaluator: Box<dyn CompiledExpression>,
    pub num_vars: usize,
}

pub trait ExpressionCompiler {
    /// Compile `expr` against `num_sources` inputs producing a
    /// `dest_length`-element output. Implementations validate shape
    /// up front so [`RouterError::ExpressionCompile`] is the only failure
    /// mode seen on the data path.
    fn compile(
        &self,
        expr: &str,
        num_sources: usize,
        dest_length: usize,
    ) -> RouterResult<CompiledProgram>;
}

/// Identity passthrough: `y = x` for a single source whose length matches
/// the destination. Used by `raw` connections and by tests.
struct Identity {
    length: usize,
}

impl CompiledExpression for Identity {
    fn evaluate(&mut self, inputs: &[&[f64]], _vars: &mut [f64]) -> Option<Vec<f64>> {
        let src = inputs.first()?;
        debug_assert_eq!(src.len(), self.length);
        Some(src.to_vec())
    }
}

/// Scale the single source by a constant factor: `y = x * k`.
struct Scale {
    factor: f64,
}

impl CompiledExpression for Scale {
    fn evaluate(&mut self, inputs: &[&[f64]], _vars: &mut [f64]) -> Option<Vec<f64>> {
        let src = inputs.first()?;
        Some(src.iter().map(|v| v * self.factor).collect())
    }
}

/// Element-wise sum of every source (requires matching lengths).
struct SumSources;

impl CompiledExpression for SumSources {
    fn evaluate(&mut self, inputs: &[&[f64]], _vars: &mut [f64]) -> Option<Vec<f64>> {
        let first = inputs.first()?;
        let mut out = first.to_vec();
        for src in &inputs[1..] {
            for (o, v) in out.iter_mut().zip(src.iter()) {
                *o += v;
            }
        }
        Some(out)
    }
}

/// A minimal arithmetic compiler supporting the handful of forms the
/// router's own tests and examples need: `y=x`, `y=x*<const>`,
/// `y=x+<const>`, and `y=sum(x)` across sources. Anything else fails to
/// compile -- a real deployment links in a full expression engine via its
/// own [`ExpressionCompiler`] impl and never reaches this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearExpressionCompiler;

impl ExpressionCompiler for LinearExpressionCompiler {
    fn compile(
        &self,
        expr: &str,
        num_sources: usize,
        dest_length: usize,
    ) -> RouterResult<CompiledProgram> {
        let trimmed = expr.trim();
        let rhs = trimmed
            .strip_prefix("y=")
            .or_else(|| trimmed.strip_prefix("y ="))
            .map(str::trim)
            .ok_or_else(|| RouterError::ExpressionCompile(expr.to_string()))?;

        let evaluator: Box<dyn CompiledExpression> = if rhs == "x" {
            Box::new(Identity {
                length: dest_length,
            })
        } else if rhs == "sum(x)" {
            if num_sources < 1 {
                return Err(RouterError::ExpressionCompile(expr.to_string()));
            }
            Box::new(SumSources)
        } else if let Some(factor) = rhs.strip_prefix("x*").and_then(|s| s.parse::<f64>().ok()) {
            Box::new(Scale { factor })
        } else if let Some(offset) = rhs.strip_prefix("x+").and_then(|s| s.parse::<f64>().ok()) {
            Box::new(AddConst { offset })
        } else {
            return Err(RouterError::ExpressionCompile(expr.to_string()));
        };

        Ok(CompiledProgram {
            evaluator,
            num_vars: 0,
        })
    }
}

struct AddConst {
    offset: f64,
}

impl CompiledExpression for AddConst {
    fn evaluate(&mut self, inputs: &[&[f64]], _vars: &mut [f64]) -> Option<Vec<f64>> {
        let src = inputs.first()?;
        Some(src.iter().map(|v| v + self.offset).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_value_through() {
        let compiler = LinearExpressionCompiler;
        let mut program = compiler.compile("y=x", 1, 3).unwrap();
        let mut vars = Vec::new();
        let input = [1.0, 2.0, 3.0];
        let out = program.evaluator.evaluate(&[&input], &mut vars).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn scale_multiplies_every_element() {
        let compiler = LinearExpressionCompiler;
        let mut program = compiler.compile("y=x*10", 1, 3).unwrap();
        let mut vars = Vec::new();
        let input = [0.0, 1.0, 2.0];
        let out = program.evaluator.evaluate(&[&input], &mut vars).unwrap();
        assert_eq!(out, vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn sum_combines_all_sources() {
        let compiler = LinearExpressionCompiler;
        let mut program = compiler.compile("y=sum(x)", 2, 2).unwrap();
        let mut vars = Vec::new();
        let a = [1.0, 1.0];
        let b = [2.0, 3.0];
        let out = program.evaluator.evaluate(&[&a, &b], &mut vars).unwrap();
        assert_eq!(out, vec![3.0, 4.0]);
    }

    #[test]
    fn unknown_expression_fails_to_compile() {
        let compiler = LinearExpressionCompiler;
        assert!(compiler.compile("y=sqrt(x)", 1, 1).is_err());
    }
}
