//! Bounded interpreter for probe execution.
//!
//! Walks the entry function of a parsed program directly over its syn
//! tree. Only the integer/boolean core needed for probe comparison is
//! supported; anything outside it stops the run with
//! `InterpError::Unsupported` so the validator falls back to "not
//! executable". The interpreter owns no I/O and touches no state outside
//! its own environment; every run is capped by a step budget, a wall
//! clock deadline and a call-depth limit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::program::Program;

/// Resource limits for a single probe execution.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub step_budget: u64,
    pub timeout: Duration,
    pub max_call_depth: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            step_budget: 20_000,
            timeout: Duration::from_millis(50),
            max_call_depth: 48,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Unit,
}

/// Observable behavior of one execution: a returned value or an explicit
/// raise (panic macro, division fault, overflow).
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Return(Value),
    Panic,
}

#[derive(Debug, Error)]
pub enum InterpError {
    #[error("unsupported construct: {0}")]
    Unsupported(&'static str),
    #[error("unknown identifier `{0}`")]
    UnknownIdent(String),
    #[error("read of unassigned local `{0}`")]
    Unassigned(String),
    #[error("step budget exhausted")]
    BudgetExhausted,
    #[error("wall clock deadline exceeded")]
    Timeout,
    #[error("call depth limit reached")]
    DepthLimit,
    #[error("entry expects {expected} arguments, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("type error: {0}")]
    Type(&'static str),
}

/// Execute the entry function against the given arguments.
pub fn run_entry(
    program: &Program,
    args: &[Value],
    config: &ProbeConfig,
) -> Result<Outcome, InterpError> {
    let mut functions = HashMap::new();
    for item in &program.ast().items {
        if let syn::Item::Fn(item_fn) = item {
            functions.insert(item_fn.sig.ident.to_string(), item_fn);
        }
    }
    let mut interp = Interp {
        functions,
        config,
        steps: 0,
        deadline: Instant::now() + config.timeout,
    };
    interp.call(program.entry_fn(), args, 0)
}

enum Flow {
    Value(Value),
    Return(Value),
    Break(Option<Value>),
    Continue,
    Panic,
}

/// Evaluate a sub-expression, short-circuiting any non-value flow up to
/// the enclosing frame.
macro_rules! eval_to_value {
    ($self:ident, $expr:expr, $env:ident, $depth:ident) => {
        match $self.eval_expr($expr, $env, $depth)? {
            Flow::Value(value) => value,
            other => return Ok(other),
        }
    };
}

struct Env {
    scopes: Vec<HashMap<String, Option<Value>>>,
}

impl Env {
    fn new() -> Self {
        Self { scopes: vec![HashMap::new()] }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: String, value: Option<Value>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        }
    }

    fn get(&self, name: &str) -> Result<Value, InterpError> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.get(name) {
                return slot.ok_or_else(|| InterpError::Unassigned(name.to_string()));
            }
        }
        Err(InterpError::UnknownIdent(name.to_string()))
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), InterpError> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = Some(value);
                return Ok(());
            }
        }
        Err(InterpError::UnknownIdent(name.to_string()))
    }
}

struct Interp<'a> {
    functions: HashMap<String, &'a syn::ItemFn>,
    config: &'a ProbeConfig,
    steps: u64,
    deadline: Instant,
}

impl<'a> Interp<'a> {
    fn tick(&mut self) -> Result<(), InterpError> {
        self.steps += 1;
        if self.steps > self.config.step_budget {
            return Err(InterpError::BudgetExhausted);
        }
        if self.steps % 1024 == 0 && Instant::now() >= self.deadline {
            return Err(InterpError::Timeout);
        }
        Ok(())
    }

    fn call(
        &mut self,
        function: &'a syn::ItemFn,
        args: &[Value],
        depth: usize,
    ) -> Result<Outcome, InterpError> {
        if depth > self.config.max_call_depth {
            return Err(InterpError::DepthLimit);
        }
        let params = param_names(function)?;
        if params.len() != args.len() {
            return Err(InterpError::Arity {
                expected: params.len(),
                got: args.len(),
            });
        }
        let mut env = Env::new();
        for (name, value) in params.into_iter().zip(args.iter().copied()) {
            env.bind(name, Some(value));
        }
        match self.eval_block(&function.block, &mut env, depth)? {
            Flow::Value(value) | Flow::Return(value) => Ok(Outcome::Return(value)),
            Flow::Panic => Ok(Outcome::Panic),
            Flow::Break(_) | Flow::Continue => {
                Err(InterpError::Unsupported("break or continue outside a loop"))
            }
        }
    }

    fn eval_block(
        &mut self,
        block: &'a syn::Block,
        env: &mut Env,
        depth: usize,
    ) -> Result<Flow, InterpError> {
        env.push();
        let result = self.eval_stmts(&block.stmts, env, depth);
        env.pop();
        result
    }

    fn eval_stmts(
        &mut self,
        stmts: &'a [syn::Stmt],
        env: &mut Env,
        depth: usize,
    ) -> Result<Flow, InterpError> {
        let mut result = Value::Unit;
        for (index, stmt) in stmts.iter().enumerate() {
            let last = index + 1 == stmts.len();
            match stmt {
                syn::Stmt::Local(local) => {
                    let value = match &local.init {
                        Some(init) => {
                            if init.diverge.is_some() {
                                return Err(InterpError::Unsupported("let-else"));
                            }
                            Some(eval_to_value!(self, &init.expr, env, depth))
                        }
                        None => None,
                    };
                    match pat_ident(&local.pat) {
                        Some(name) => env.bind(name, value),
                        None => return Err(InterpError::Unsupported("non-identifier pattern")),
                    }
                }
                syn::Stmt::Expr(expr, semi) => {
                    let value = eval_to_value!(self, expr, env, depth);
                    if last && semi.is_none() {
                        result = value;
                    }
                }
                syn::Stmt::Macro(stmt_macro) => {
                    if crate::properties::is_raise_macro(&stmt_macro.mac) {
                        return Ok(Flow::Panic);
                    }
                    return Err(InterpError::Unsupported("macro statement"));
                }
                syn::Stmt::Item(_) => return Err(InterpError::Unsupported("nested item")),
            }
        }
        Ok(Flow::Value(result))
    }

    fn eval_expr(
        &mut self,
        expr: &'a syn::Expr,
        env: &mut Env,
        depth: usize,
    ) -> Result<Flow, InterpError> {
        self.tick()?;
        match expr {
            syn::Expr::Lit(lit) => literal_value(lit).map(Flow::Value),
            syn::Expr::Path(path) => match crate::idents::single_segment(path) {
                Some(name) => env.get(&name).map(Flow::Value),
                None => Err(InterpError::Unsupported("qualified path")),
            },
            syn::Expr::Paren(paren) => self.eval_expr(&paren.expr, env, depth),
            syn::Expr::Group(group) => self.eval_expr(&group.expr, env, depth),
            syn::Expr::Block(block) => self.eval_block(&block.block, env, depth),
            syn::Expr::Unary(unary) => {
                let value = eval_to_value!(self, &unary.expr, env, depth);
                match (&unary.op, value) {
                    (syn::UnOp::Neg(_), Value::Int(v)) => Ok(match v.checked_neg() {
                        Some(result) => Flow::Value(Value::Int(result)),
                        None => Flow::Panic,
                    }),
                    (syn::UnOp::Not(_), Value::Bool(v)) => Ok(Flow::Value(Value::Bool(!v))),
                    _ => Err(InterpError::Type("unary operand")),
                }
            }
            syn::Expr::Binary(binary) => self.eval_binary(binary, env, depth),
            syn::Expr::Assign(assign) => {
                let value = eval_to_value!(self, &assign.right, env, depth);
                let name = assign_target(&assign.left)?;
                env.assign(&name, value)?;
                Ok(Flow::Value(Value::Unit))
            }
            syn::Expr::If(expr_if) => {
                let cond = eval_to_value!(self, &expr_if.cond, env, depth);
                match cond {
                    Value::Bool(true) => self.eval_block(&expr_if.then_branch, env, depth),
                    Value::Bool(false) => match &expr_if.else_branch {
                        Some((_, else_branch)) => self.eval_expr(else_branch, env, depth),
                        None => Ok(Flow::Value(Value::Unit)),
                    },
                    _ => Err(InterpError::Type("if condition must be boolean")),
                }
            }
            syn::Expr::While(expr_while) => {
                loop {
                    self.tick()?;
                    let cond = eval_to_value!(self, &expr_while.cond, env, depth);
                    match cond {
                        Value::Bool(true) => {}
                        Value::Bool(false) => break,
                        _ => return Err(InterpError::Type("while condition must be boolean")),
                    }
                    match self.eval_block(&expr_while.body, env, depth)? {
                        Flow::Break(_) => break,
                        Flow::Continue | Flow::Value(_) => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Value(Value::Unit))
            }
            syn::Expr::ForLoop(expr_for) => self.eval_for(expr_for, env, depth),
            syn::Expr::Loop(expr_loop) => loop {
                self.tick()?;
                match self.eval_block(&expr_loop.body, env, depth)? {
                    Flow::Break(value) => {
                        return Ok(Flow::Value(value.unwrap_or(Value::Unit)))
                    }
                    Flow::Continue | Flow::Value(_) => {}
                    other => return Ok(other),
                }
            },
            syn::Expr::Return(expr_return) => {
                let value = match &expr_return.expr {
                    Some(inner) => eval_to_value!(self, inner, env, depth),
                    None => Value::Unit,
                };
                Ok(Flow::Return(value))
            }
            syn::Expr::Break(expr_break) => {
                if expr_break.label.is_some() {
                    return Err(InterpError::Unsupported("labeled break"));
                }
                let value = match &expr_break.expr {
                    Some(inner) => Some(eval_to_value!(self, inner, env, depth)),
                    None => None,
                };
                Ok(Flow::Break(value))
            }
            syn::Expr::Continue(expr_continue) => {
                if expr_continue.label.is_some() {
                    return Err(InterpError::Unsupported("labeled continue"));
                }
                Ok(Flow::Continue)
            }
            syn::Expr::Call(call) => self.eval_call(call, env, depth),
            syn::Expr::Macro(expr_macro) => {
                if crate::properties::is_raise_macro(&expr_macro.mac) {
                    Ok(Flow::Panic)
                } else {
                    Err(InterpError::Unsupported("macro expression"))
                }
            }
            syn::Expr::MethodCall(_) => Err(InterpError::Unsupported("method call")),
            _ => Err(InterpError::Unsupported("expression form")),
        }
    }

    fn eval_binary(
        &mut self,
        binary: &'a syn::ExprBinary,
        env: &mut Env,
        depth: usize,
    ) -> Result<Flow, InterpError> {
        use syn::BinOp;

        // Short-circuit logic first; both sides of everything else are
        // evaluated eagerly.
        match binary.op {
            BinOp::And(_) => {
                let left = eval_to_value!(self, &binary.left, env, depth);
                return match left {
                    Value::Bool(false) => Ok(Flow::Value(Value::Bool(false))),
                    Value::Bool(true) => {
                        let right = eval_to_value!(self, &binary.right, env, depth);
                        match right {
                            Value::Bool(b) => Ok(Flow::Value(Value::Bool(b))),
                            _ => Err(InterpError::Type("logical operand")),
                        }
                    }
                    _ => Err(InterpError::Type("logical operand")),
                };
            }
            BinOp::Or(_) => {
                let left = eval_to_value!(self, &binary.left, env, depth);
                return match left {
                    Value::Bool(true) => Ok(Flow::Value(Value::Bool(true))),
                    Value::Bool(false) => {
                        let right = eval_to_value!(self, &binary.right, env, depth);
                        match right {
                            Value::Bool(b) => Ok(Flow::Value(Value::Bool(b))),
                            _ => Err(InterpError::Type("logical operand")),
                        }
                    }
                    _ => Err(InterpError::Type("logical operand")),
                };
            }
            _ => {}
        }

        if let Some(op) = compound_arith_op(&binary.op) {
            let name = assign_target(&binary.left)?;
            let current = env.get(&name)?;
            let rhs = eval_to_value!(self, &binary.right, env, depth);
            return match apply_arithmetic(op, current, rhs)? {
                Flow::Value(value) => {
                    env.assign(&name, value)?;
                    Ok(Flow::Value(Value::Unit))
                }
                other => Ok(other),
            };
        }

        let left = eval_to_value!(self, &binary.left, env, depth);
        let right = eval_to_value!(self, &binary.right, env, depth);
        match binary.op {
            BinOp::Eq(_) => Ok(Flow::Value(Value::Bool(left == right))),
            BinOp::Ne(_) => Ok(Flow::Value(Value::Bool(left != right))),
            BinOp::Lt(_) | BinOp::Le(_) | BinOp::Gt(_) | BinOp::Ge(_) => {
                let (Value::Int(a), Value::Int(b)) = (left, right) else {
                    return Err(InterpError::Type("comparison operand"));
                };
                let result = match binary.op {
                    BinOp::Lt(_) => a < b,
                    BinOp::Le(_) => a <= b,
                    BinOp::Gt(_) => a > b,
                    _ => a >= b,
                };
                Ok(Flow::Value(Value::Bool(result)))
            }
            _ => match arith_op(&binary.op) {
                Some(op) => apply_arithmetic(op, left, right),
                None => Err(InterpError::Unsupported("binary operator")),
            },
        }
    }

    fn eval_for(
        &mut self,
        expr_for: &'a syn::ExprForLoop,
        env: &mut Env,
        depth: usize,
    ) -> Result<Flow, InterpError> {
        let syn::Expr::Range(range) = expr_for.expr.as_ref() else {
            return Err(InterpError::Unsupported("for over a non-range iterator"));
        };
        let start = match &range.start {
            Some(expr) => eval_to_value!(self, expr, env, depth),
            None => return Err(InterpError::Unsupported("open range start")),
        };
        let end = match &range.end {
            Some(expr) => eval_to_value!(self, expr, env, depth),
            None => return Err(InterpError::Unsupported("open range end")),
        };
        let (Value::Int(start), Value::Int(end)) = (start, end) else {
            return Err(InterpError::Type("range bound"));
        };
        let Some(var) = pat_ident(&expr_for.pat) else {
            return Err(InterpError::Unsupported("non-identifier loop pattern"));
        };

        let inclusive = matches!(range.limits, syn::RangeLimits::Closed(_));
        let mut index = start;
        env.push();
        let result = loop {
            let in_bounds = if inclusive { index <= end } else { index < end };
            if !in_bounds {
                break Ok(Flow::Value(Value::Unit));
            }
            if let Err(err) = self.tick() {
                break Err(err);
            }
            env.bind(var.clone(), Some(Value::Int(index)));
            match self.eval_block(&expr_for.body, env, depth) {
                Ok(Flow::Break(_)) => break Ok(Flow::Value(Value::Unit)),
                Ok(Flow::Continue) | Ok(Flow::Value(_)) => {}
                Ok(other) => break Ok(other),
                Err(err) => break Err(err),
            }
            match index.checked_add(1) {
                Some(next) => index = next,
                None => break Ok(Flow::Value(Value::Unit)),
            }
        };
        env.pop();
        result
    }

    fn eval_call(
        &mut self,
        call: &'a syn::ExprCall,
        env: &mut Env,
        depth: usize,
    ) -> Result<Flow, InterpError> {
        let syn::Expr::Path(path) = call.func.as_ref() else {
            return Err(InterpError::Unsupported("indirect call"));
        };
        let Some(name) = crate::idents::single_segment(path) else {
            return Err(InterpError::Unsupported("qualified call"));
        };
        let Some(&callee) = self.functions.get(&name) else {
            return Err(InterpError::Unsupported("call to a function outside the file"));
        };
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(eval_to_value!(self, arg, env, depth));
        }
        match self.call(callee, &args, depth + 1)? {
            Outcome::Return(value) => Ok(Flow::Value(value)),
            Outcome::Panic => Ok(Flow::Panic),
        }
    }
}

#[derive(Clone, Copy)]
enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn arith_op(op: &syn::BinOp) -> Option<ArithmeticOp> {
    use syn::BinOp;
    match op {
        BinOp::Add(_) => Some(ArithmeticOp::Add),
        BinOp::Sub(_) => Some(ArithmeticOp::Sub),
        BinOp::Mul(_) => Some(ArithmeticOp::Mul),
        BinOp::Div(_) => Some(ArithmeticOp::Div),
        BinOp::Rem(_) => Some(ArithmeticOp::Rem),
        _ => None,
    }
}

fn compound_arith_op(op: &syn::BinOp) -> Option<ArithmeticOp> {
    use syn::BinOp;
    match op {
        BinOp::AddAssign(_) => Some(ArithmeticOp::Add),
        BinOp::SubAssign(_) => Some(ArithmeticOp::Sub),
        BinOp::MulAssign(_) => Some(ArithmeticOp::Mul),
        BinOp::DivAssign(_) => Some(ArithmeticOp::Div),
        BinOp::RemAssign(_) => Some(ArithmeticOp::Rem),
        _ => None,
    }
}

/// Integer arithmetic with Rust's faulting semantics: overflow, division
/// by zero and remainder by zero surface as `Panic` outcomes, not errors.
fn apply_arithmetic(op: ArithmeticOp, left: Value, right: Value) -> Result<Flow, InterpError> {
    let (Value::Int(a), Value::Int(b)) = (left, right) else {
        return Err(InterpError::Type("arithmetic operand"));
    };
    let result = match op {
        ArithmeticOp::Add => a.checked_add(b),
        ArithmeticOp::Sub => a.checked_sub(b),
        ArithmeticOp::Mul => a.checked_mul(b),
        ArithmeticOp::Div => a.checked_div(b),
        ArithmeticOp::Rem => a.checked_rem(b),
    };
    Ok(match result {
        Some(value) => Flow::Value(Value::Int(value)),
        None => Flow::Panic,
    })
}

fn literal_value(lit: &syn::ExprLit) -> Result<Value, InterpError> {
    match &lit.lit {
        syn::Lit::Int(value) => value
            .base10_parse::<i64>()
            .map(Value::Int)
            .map_err(|_| InterpError::Type("integer literal out of range")),
        syn::Lit::Bool(value) => Ok(Value::Bool(value.value)),
        _ => Err(InterpError::Unsupported("non-integer literal")),
    }
}

fn assign_target(expr: &syn::Expr) -> Result<String, InterpError> {
    match expr {
        syn::Expr::Path(path) => crate::idents::single_segment(path)
            .ok_or(InterpError::Unsupported("qualified assignment target")),
        _ => Err(InterpError::Unsupported("non-identifier assignment target")),
    }
}

fn pat_ident(pat: &syn::Pat) -> Option<String> {
    match pat {
        syn::Pat::Ident(pat_ident) => Some(pat_ident.ident.to_string()),
        syn::Pat::Type(pat_type) => pat_ident(&pat_type.pat),
        syn::Pat::Wild(_) => Some("_".to_string()),
        _ => None,
    }
}

fn param_names(function: &syn::ItemFn) -> Result<Vec<String>, InterpError> {
    let mut names = Vec::new();
    for input in &function.sig.inputs {
        match input {
            syn::FnArg::Typed(pat_type) => match pat_ident(&pat_type.pat) {
                Some(name) => names.push(name),
                None => return Err(InterpError::Unsupported("non-identifier parameter")),
            },
            syn::FnArg::Receiver(_) => {
                return Err(InterpError::Unsupported("method receiver"));
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, args: &[Value]) -> Result<Outcome, InterpError> {
        let program = Program::parse(source).expect("test source must parse");
        run_entry(&program, args, &ProbeConfig::default())
    }

    #[test]
    fn evaluates_arithmetic_and_branches() {
        let outcome = run(
            "fn f(n: i64) -> i64 { if n <= 0 { return 0; } n * 2 }",
            &[Value::Int(21)],
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Return(Value::Int(42)));
    }

    #[test]
    fn panic_macro_becomes_a_panic_outcome() {
        let outcome = run(
            "fn f(n: i64) -> i64 { if n < 0 { panic!(\"negative\"); } n }",
            &[Value::Int(-1)],
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Panic);
    }

    #[test]
    fn division_by_zero_panics_instead_of_erroring() {
        let outcome = run("fn f(n: i64) -> i64 { 10 / n }", &[Value::Int(0)]).unwrap();
        assert_eq!(outcome, Outcome::Panic);
    }

    #[test]
    fn for_loop_accumulates() {
        let outcome = run(
            "fn f(n: i64) -> i64 { let mut total = 0; for i in 0..n { total = total + i; } total }",
            &[Value::Int(5)],
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Return(Value::Int(10)));
    }

    #[test]
    fn recursion_runs_within_depth_limit() {
        let outcome = run(
            "fn fact(n: i64) -> i64 { if n <= 1 { return 1; } n * fact(n - 1) }",
            &[Value::Int(5)],
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Return(Value::Int(120)));
    }

    #[test]
    fn infinite_loop_exhausts_the_budget() {
        let err = run("fn f() -> i64 { loop { } }", &[]).expect_err("must not terminate");
        assert!(matches!(err, InterpError::BudgetExhausted | InterpError::Timeout));
    }

    #[test]
    fn unsupported_constructs_are_reported_not_guessed() {
        let err = run("fn f(n: i64) -> i64 { n.abs() }", &[Value::Int(-3)])
            .expect_err("method calls are out of scope");
        assert!(matches!(err, InterpError::Unsupported(_)));
    }
}
