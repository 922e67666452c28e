//! Tree-walking evaluator with step, depth and size limits

use super::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use super::builtins;
use super::parser::{ParseError, Parser};
use super::scanner::Lexer;
use super::value::{
    footprint, loose_eq, number_value, to_display, to_number, truthy, type_name,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use xnode_core::JsonMap;

/// Resource bounds for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxLimits {
    /// Source text length in bytes.
    pub max_source_len: usize,
    /// Expression nodes evaluated before the run is aborted.
    pub max_steps: u64,
    /// Syntactic nesting depth.
    pub max_depth: usize,
    /// Approximate bytes in any single value, nested contents included.
    pub max_value_len: usize,
    /// Bytes of values the program may build over the whole run.
    pub max_allocated: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_source_len: 64 * 1024,
            max_steps: 100_000,
            max_depth: 64,
            max_value_len: 1_000_000,
            max_allocated: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("Source exceeds {limit} bytes")]
    SourceTooLarge { limit: usize },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{name} is not defined")]
    Undefined { name: String },

    #[error("{name} is not a function")]
    UnknownFunction { name: String },

    #[error("{reason}")]
    Type { reason: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Step limit of {limit} exceeded")]
    StepLimit { limit: u64 },

    #[error("Value exceeds {limit} bytes")]
    ValueTooLarge { limit: usize },

    #[error("Program allocated more than {limit} bytes")]
    MemoryLimit { limit: usize },
}

/// Result of running a program: its value and anything it logged.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: Value,
    pub logs: Vec<String>,
}

/// Entry point for transform programs and logic conditions.
///
/// Programs only see the bindings handed to them. There is no I/O,
/// clock or host access, and every run is bounded by [`SandboxLimits`].
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: SandboxLimits,
}

impl Sandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Run a statement list. The result is the `return` value, else the
    /// value of the last expression statement.
    pub fn run(&self, source: &str, bindings: &JsonMap) -> Result<Evaluation, SandboxError> {
        self.check_source(source)?;
        let program =
            Parser::new(Lexer::new(source).tokenize(), self.limits.max_depth).parse_program()?;

        let mut interpreter = Interpreter::new(&self.limits, bindings);
        let value = interpreter.run(&program)?;
        interpreter.measure(&value)?;
        Ok(Evaluation {
            value,
            logs: interpreter.logs,
        })
    }

    /// Evaluate a single expression.
    pub fn evaluate(&self, source: &str, bindings: &JsonMap) -> Result<Value, SandboxError> {
        self.check_source(source)?;
        let expr =
            Parser::new(Lexer::new(source).tokenize(), self.limits.max_depth).parse_single()?;
        let mut interpreter = Interpreter::new(&self.limits, bindings);
        let value = interpreter.eval(&expr)?;
        interpreter.measure(&value)?;
        Ok(value)
    }

    fn check_source(&self, source: &str) -> Result<(), SandboxError> {
        if source.len() > self.limits.max_source_len {
            return Err(SandboxError::SourceTooLarge {
                limit: self.limits.max_source_len,
            });
        }
        Ok(())
    }
}

struct Interpreter<'a> {
    limits: &'a SandboxLimits,
    globals: &'a JsonMap,
    locals: HashMap<String, Value>,
    steps: u64,
    allocated: usize,
    logs: Vec<String>,
}

impl<'a> Interpreter<'a> {
    fn new(limits: &'a SandboxLimits, globals: &'a JsonMap) -> Self {
        Self {
            limits,
            globals,
            locals: HashMap::new(),
            steps: 0,
            allocated: 0,
            logs: Vec::new(),
        }
    }

    fn run(&mut self, program: &Program) -> Result<Value, SandboxError> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            match stmt {
                Stmt::Let(name, expr) => {
                    let value = self.eval(expr)?;
                    self.locals.insert(name.clone(), value);
                    last = Value::Null;
                }
                Stmt::Return(Some(expr)) => return self.eval(expr),
                Stmt::Return(None) => return Ok(Value::Null),
                Stmt::Expr(expr) => last = self.eval(expr)?,
            }
        }
        Ok(last)
    }

    fn tick(&mut self) -> Result<(), SandboxError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(SandboxError::StepLimit {
                limit: self.limits.max_steps,
            });
        }
        Ok(())
    }

    fn measure(&self, value: &Value) -> Result<usize, SandboxError> {
        let limit = self.limits.max_value_len;
        let size = footprint(value, limit);
        if size > limit {
            return Err(SandboxError::ValueTooLarge { limit });
        }
        Ok(size)
    }

    /// Size-check a freshly built value and charge it to the run.
    fn bounded(&mut self, value: Value) -> Result<Value, SandboxError> {
        let size = self.measure(&value)?;
        self.allocated = self.allocated.saturating_add(size);
        if self.allocated > self.limits.max_allocated {
            return Err(SandboxError::MemoryLimit {
                limit: self.limits.max_allocated,
            });
        }
        Ok(value)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, SandboxError> {
        self.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self
                .locals
                .get(name)
                .or_else(|| self.globals.get(name))
                .cloned()
                .ok_or_else(|| SandboxError::Undefined { name: name.clone() }),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<Vec<_>, _>>()?;
                self.bounded(Value::Array(values))
            }
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (key, value) in fields {
                    let value = self.eval(value)?;
                    map.insert(key.clone(), value);
                }
                self.bounded(Value::Object(map))
            }
            Expr::Member(object, name) => {
                let object = self.eval(object)?;
                member(&object, name)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                match &index {
                    Value::String(key) => member(&object, key),
                    other => element(&object, other),
                }
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                if builtins::is_log(name) {
                    let line = args.iter().map(to_display).collect::<Vec<_>>().join(" ");
                    self.logs.push(line);
                    return Ok(Value::Null);
                }
                let value = builtins::call(name, &args)?;
                self.bounded(value)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!truthy(&value)),
                    UnaryOp::Neg => number_value(-to_number(&value)),
                })
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let value = binary(*op, &left, &right)?;
                self.bounded(value)
            }
            Expr::Conditional(condition, then, otherwise) => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }
}

fn member(object: &Value, name: &str) -> Result<Value, SandboxError> {
    match object {
        Value::Null => Err(SandboxError::Type {
            reason: format!("Cannot read properties of null (reading '{}')", name),
        }),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::String(s) if name == "length" => Ok(Value::from(s.chars().count())),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::Array(_) | Value::String(_) => match name.parse::<usize>() {
            Ok(i) => element(object, &Value::from(i)),
            Err(_) => Ok(Value::Null),
        },
        _ => Ok(Value::Null),
    }
}

fn element(object: &Value, index: &Value) -> Result<Value, SandboxError> {
    let position = to_number(index);
    let slot = if position >= 0.0 && position.fract() == 0.0 {
        Some(position as usize)
    } else {
        None
    };
    match object {
        Value::Null => Err(SandboxError::Type {
            reason: format!(
                "Cannot read properties of null (reading '{}')",
                to_display(index)
            ),
        }),
        Value::Array(items) => Ok(slot
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        Value::String(s) => Ok(slot
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        Value::Object(map) => Ok(map.get(&to_display(index)).cloned().unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, SandboxError> {
    let value = match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                Value::String(format!("{}{}", to_display(left), to_display(right)))
            } else {
                number_value(to_number(left) + to_number(right))
            }
        }
        BinaryOp::Sub => number_value(to_number(left) - to_number(right)),
        BinaryOp::Mul => number_value(to_number(left) * to_number(right)),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = to_number(right);
            if divisor == 0.0 {
                return Err(SandboxError::DivisionByZero);
            }
            let dividend = to_number(left);
            number_value(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            })
        }
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Value::Bool(compare(op, left, right)?)
        }
        BinaryOp::And | BinaryOp::Or => {
            return Err(SandboxError::Type {
                reason: "logical operators short-circuit".to_string(),
            })
        }
    };
    Ok(value)
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, SandboxError> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            return Err(SandboxError::Type {
                reason: format!(
                    "Cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                ),
            })
        }
        _ => to_number(left).partial_cmp(&to_number(right)),
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Integer arithmetic agrees with native i64 arithmetic.
        #[test]
        fn prop_integer_addition_matches(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            let source = format!("({}) + ({})", a, b);
            let value = Sandbox::default().evaluate(&source, &JsonMap::new()).unwrap();
            prop_assert_eq!(value, Value::from(a + b));
        }

        /// Arbitrary input never panics; it either evaluates or errors.
        #[test]
        fn prop_evaluation_is_total(source in "\\PC{0,64}") {
            let _ = Sandbox::default().run(&source, &JsonMap::new());
        }
    }
}
