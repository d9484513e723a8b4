//! Symbolic expressions for rate laws and time-dependent parameters
//!
//! An [`Expression`] is parsed once from text into a [`Node`] tree and keeps
//! its source string for serialization. The tree supports:
//!
//! - enumeration of free symbols ([`Expression::free_variables`])
//! - evaluation against a symbol lookup ([`Expression::eval_with`])
//! - symbolic differentiation ([`Expression::derivative`]) used for Newton Jacobians
//! - binding of symbols to value slots ([`Expression::bind`]) for fast repeated evaluation
//! - dimensional analysis given the units of its symbols ([`Expression::unit_of`]),
//!   rescaling terms of a sum declared in different units ([`Expression::with_consistent_units`])
//!
//! [`TimeExpression`] restricts the free symbols to `t` and adds closed-form
//! integration, used to preintegrate time-dependent parameters over a step.
//!
//! # Grammar
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | identifier | function '(' expr ')' | '(' expr ')'
//! ```
//!
//! Functions: `exp log ln sqrt sin cos tan tanh abs heaviside`. The identifier
//! `pi` is the constant π.
//!
//! # Example
//!
//! ```rust
//! use smart_rs::physics::expression::TimeExpression;
//!
//! let pulse = TimeExpression::parse("exp(-t/20) - exp(-t/5)").unwrap();
//! let integral = pulse.integrate().unwrap();
//! let exact = integral.evaluate(10.0) - integral.evaluate(0.0);
//! assert!(exact > 0.0);
//! ```

use crate::physics::units::{Dimension, Unit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Name of the time symbol
pub const TIME_SYMBOL: &str = "t";

// =================================================================================================
// Errors
// =================================================================================================

/// Failure to parse, bind, evaluate, integrate or analyse an expression
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    /// Malformed expression text
    #[error("cannot parse expression '{input}' at offset {position}: {message}")]
    Parse {
        /// Full input string
        input: String,
        /// Character offset of the failure
        position: usize,
        /// What went wrong
        message: String,
    },

    /// A symbol that is not allowed in this context
    #[error("unexpected variable '{variable}' in '{expression}'")]
    UnexpectedVariable {
        /// Expression text
        expression: String,
        /// Offending symbol
        variable: String,
    },

    /// A symbol with no value, slot or unit
    #[error("unknown symbol '{symbol}' in '{expression}'")]
    UnknownSymbol {
        /// Expression text
        expression: String,
        /// Unresolved symbol
        symbol: String,
    },

    /// No closed form is known
    #[error("cannot integrate '{expression}' in closed form: {reason}")]
    Unsupported {
        /// Expression text
        expression: String,
        /// Which rule is missing
        reason: String,
    },

    /// Dimensionally inconsistent expression
    #[error("dimensional inconsistency in '{expression}': {message}")]
    Dimension {
        /// Expression text
        expression: String,
        /// What is inconsistent
        message: String,
    },
}

// =================================================================================================
// Tree
// =================================================================================================

/// Built-in single-argument functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Tanh,
    Abs,
    /// Unit step, `0.5` at the origin
    Heaviside,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "exp" => Self::Exp,
            "ln" | "log" => Self::Ln,
            "sqrt" => Self::Sqrt,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "tanh" => Self::Tanh,
            "abs" => Self::Abs,
            "heaviside" | "Heaviside" => Self::Heaviside,
            _ => return None,
        };
        Some(function)
    }

    /// Name used when printing
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Tanh => "tanh",
            Self::Abs => "abs",
            Self::Heaviside => "heaviside",
        }
    }

    /// Numeric value at `x`
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Sqrt => x.sqrt(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Tanh => x.tanh(),
            Self::Abs => x.abs(),
            Self::Heaviside => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    0.0
                } else {
                    0.5
                }
            }
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(f64),
    Var(String),
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Pow(Box<Node>, Box<Node>),
    Call(Function, Box<Node>),
}

fn add(a: Node, b: Node) -> Node {
    Node::Add(Box::new(a), Box::new(b))
}

fn sub(a: Node, b: Node) -> Node {
    Node::Sub(Box::new(a), Box::new(b))
}

fn mul(a: Node, b: Node) -> Node {
    Node::Mul(Box::new(a), Box::new(b))
}

fn div(a: Node, b: Node) -> Node {
    Node::Div(Box::new(a), Box::new(b))
}

fn pow(a: Node, b: Node) -> Node {
    Node::Pow(Box::new(a), Box::new(b))
}

fn neg(a: Node) -> Node {
    Node::Neg(Box::new(a))
}

fn call(f: Function, a: Node) -> Node {
    Node::Call(f, Box::new(a))
}

impl Node {
    /// True if `name` occurs in the tree
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Node::Const(_) => false,
            Node::Var(v) => v == name,
            Node::Neg(a) | Node::Call(_, a) => a.contains(name),
            Node::Add(a, b) | Node::Sub(a, b) | Node::Mul(a, b) | Node::Div(a, b) | Node::Pow(a, b) => {
                a.contains(name) || b.contains(name)
            }
        }
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Node::Const(_) => {}
            Node::Var(v) => {
                out.insert(v.clone());
            }
            Node::Neg(a) | Node::Call(_, a) => a.collect_variables(out),
            Node::Add(a, b) | Node::Sub(a, b) | Node::Mul(a, b) | Node::Div(a, b) | Node::Pow(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
        }
    }

    fn constant_value(&self) -> Option<f64> {
        match self {
            Node::Const(c) => Some(*c),
            _ => None,
        }
    }

    fn eval(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, String> {
        Ok(match self {
            Node::Const(c) => *c,
            Node::Var(v) => lookup(v).ok_or_else(|| v.clone())?,
            Node::Neg(a) => -a.eval(lookup)?,
            Node::Add(a, b) => a.eval(lookup)? + b.eval(lookup)?,
            Node::Sub(a, b) => a.eval(lookup)? - b.eval(lookup)?,
            Node::Mul(a, b) => a.eval(lookup)? * b.eval(lookup)?,
            Node::Div(a, b) => a.eval(lookup)? / b.eval(lookup)?,
            Node::Pow(a, b) => power(a.eval(lookup)?, b.eval(lookup)?),
            Node::Call(f, a) => f.apply(a.eval(lookup)?),
        })
    }

    /// Symbolic derivative with respect to `var`, simplified
    pub fn derivative(&self, var: &str) -> Node {
        self.differentiate(var).simplified()
    }

    fn differentiate(&self, var: &str) -> Node {
        if !self.contains(var) {
            return Node::Const(0.0);
        }

        match self {
            Node::Const(_) => Node::Const(0.0),
            Node::Var(_) => Node::Const(1.0),
            Node::Neg(a) => neg(a.differentiate(var)),
            Node::Add(a, b) => add(a.differentiate(var), b.differentiate(var)),
            Node::Sub(a, b) => sub(a.differentiate(var), b.differentiate(var)),
            Node::Mul(a, b) => add(
                mul(a.differentiate(var), (**b).clone()),
                mul((**a).clone(), b.differentiate(var)),
            ),
            Node::Div(a, b) => div(
                sub(
                    mul(a.differentiate(var), (**b).clone()),
                    mul((**a).clone(), b.differentiate(var)),
                ),
                pow((**b).clone(), Node::Const(2.0)),
            ),
            Node::Pow(base, exponent) => {
                if !exponent.contains(var) {
                    // n * u^(n-1) * u'
                    mul(
                        mul(
                            (**exponent).clone(),
                            pow((**base).clone(), sub((**exponent).clone(), Node::Const(1.0))),
                        ),
                        base.differentiate(var),
                    )
                } else {
                    // u^v * (v' ln u + v u'/u)
                    mul(
                        self.clone(),
                        add(
                            mul(exponent.differentiate(var), call(Function::Ln, (**base).clone())),
                            div(mul((**exponent).clone(), base.differentiate(var)), (**base).clone()),
                        ),
                    )
                }
            }
            Node::Call(f, a) => {
                let inner = a.differentiate(var);
                let u = (**a).clone();
                let outer = match f {
                    Function::Exp => call(Function::Exp, u),
                    Function::Ln => div(Node::Const(1.0), u),
                    Function::Sqrt => div(Node::Const(0.5), call(Function::Sqrt, u)),
                    Function::Sin => call(Function::Cos, u),
                    Function::Cos => neg(call(Function::Sin, u)),
                    Function::Tan => div(Node::Const(1.0), pow(call(Function::Cos, u), Node::Const(2.0))),
                    Function::Tanh => sub(Node::Const(1.0), pow(call(Function::Tanh, u), Node::Const(2.0))),
                    Function::Abs => div(u.clone(), call(Function::Abs, u)),
                    Function::Heaviside => Node::Const(0.0),
                };
                mul(outer, inner)
            }
        }
    }

    /// Constant folding and removal of neutral elements
    pub fn simplified(self) -> Node {
        match self {
            Node::Const(_) | Node::Var(_) => self,
            Node::Neg(a) => match a.simplified() {
                Node::Const(c) => Node::Const(-c),
                Node::Neg(inner) => *inner,
                other => neg(other),
            },
            Node::Add(a, b) => match (a.simplified(), b.simplified()) {
                (Node::Const(x), Node::Const(y)) => Node::Const(x + y),
                (Node::Const(z), other) | (other, Node::Const(z)) if z == 0.0 => other,
                (x, y) => add(x, y),
            },
            Node::Sub(a, b) => match (a.simplified(), b.simplified()) {
                (Node::Const(x), Node::Const(y)) => Node::Const(x - y),
                (x, Node::Const(z)) if z == 0.0 => x,
                (Node::Const(z), y) if z == 0.0 => neg(y).simplified(),
                (x, y) => sub(x, y),
            },
            Node::Mul(a, b) => match (a.simplified(), b.simplified()) {
                (Node::Const(x), Node::Const(y)) => Node::Const(x * y),
                (Node::Const(z), _) | (_, Node::Const(z)) if z == 0.0 => Node::Const(0.0),
                (Node::Const(o), other) | (other, Node::Const(o)) if o == 1.0 => other,
                (x, y) => mul(x, y),
            },
            Node::Div(a, b) => match (a.simplified(), b.simplified()) {
                (Node::Const(x), Node::Const(y)) if y != 0.0 => Node::Const(x / y),
                (Node::Const(z), _) if z == 0.0 => Node::Const(0.0),
                (x, Node::Const(o)) if o == 1.0 => x,
                (x, y) => div(x, y),
            },
            Node::Pow(a, b) => match (a.simplified(), b.simplified()) {
                (Node::Const(x), Node::Const(y)) => Node::Const(power(x, y)),
                (_, Node::Const(z)) if z == 0.0 => Node::Const(1.0),
                (x, Node::Const(o)) if o == 1.0 => x,
                (x, y) => pow(x, y),
            },
            Node::Call(f, a) => match a.simplified() {
                Node::Const(c) if f != Function::Heaviside => Node::Const(f.apply(c)),
                other => call(f, other),
            },
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Node::Add(..) | Node::Sub(..) => 1,
            Node::Mul(..) | Node::Div(..) => 2,
            Node::Neg(_) => 3,
            Node::Const(c) if *c < 0.0 => 3,
            Node::Pow(..) => 4,
            Node::Const(_) | Node::Var(_) | Node::Call(..) => 5,
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, parenthesize: bool) -> fmt::Result {
        if parenthesize {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

fn power(base: f64, exponent: f64) -> f64 {
    if exponent.fract() == 0.0 && exponent.abs() <= i32::MAX as f64 {
        base.powi(exponent as i32)
    } else {
        base.powf(exponent)
    }
}

impl fmt::Display for Node {
    /// Prints with the minimum parentheses needed to re-parse the same tree
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const(c) => write!(f, "{}", c),
            Node::Var(v) => write!(f, "{}", v),
            Node::Neg(a) => {
                write!(f, "-")?;
                a.write_operand(f, a.precedence() < 5)
            }
            Node::Add(a, b) | Node::Sub(a, b) => {
                a.write_operand(f, false)?;
                write!(f, " {} ", if matches!(self, Node::Add(..)) { "+" } else { "-" })?;
                b.write_operand(f, b.precedence() <= 1)
            }
            Node::Mul(a, b) | Node::Div(a, b) => {
                a.write_operand(f, a.precedence() < 2)?;
                write!(f, "{}", if matches!(self, Node::Mul(..)) { "*" } else { "/" })?;
                b.write_operand(f, b.precedence() <= 2)
            }
            Node::Pow(a, b) => {
                a.write_operand(f, a.precedence() <= 4)?;
                write!(f, "^")?;
                b.write_operand(f, b.precedence() < 3)
            }
            Node::Call(func, a) => write!(f, "{}({})", func.name(), a),
        }
    }
}

// =================================================================================================
// Parser
// =================================================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LeftParen,
    RightParen,
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(usize, Token)>,
    position: usize,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let fail = |position: usize, message: String| ExpressionError::Parse {
        input: input.to_string(),
        position,
        message,
    };

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push((start, Token::Plus));
                i += 1;
            }
            '-' => {
                tokens.push((start, Token::Minus));
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push((start, Token::Caret));
                i += 2;
            }
            '*' => {
                tokens.push((start, Token::Star));
                i += 1;
            }
            '/' => {
                tokens.push((start, Token::Slash));
                i += 1;
            }
            '^' => {
                tokens.push((start, Token::Caret));
                i += 1;
            }
            '(' => {
                tokens.push((start, Token::LeftParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RightParen));
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent part: 1e-3, 2.5E+4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| fail(start, format!("invalid number '{}'", text)))?;
                tokens.push((start, Token::Number(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            }
            other => return Err(fail(start, format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ExpressionError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            position: 0,
        })
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        let position = self
            .tokens
            .get(self.position)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.input.chars().count());
        ExpressionError::Parse {
            input: self.input.to_string(),
            position,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(_, token)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek().cloned();
        self.position += 1;
        token
    }

    fn parse(mut self) -> Result<Node, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(self.error("empty expression"));
        }
        let node = self.expr()?;
        if self.position < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(node)
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.position += 1;
                    node = add(node, self.term()?);
                }
                Some(Token::Minus) => {
                    self.position += 1;
                    node = sub(node, self.term()?);
                }
                _ => return Ok(node),
            }
        }
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.position += 1;
                    node = mul(node, self.unary()?);
                }
                Some(Token::Slash) => {
                    self.position += 1;
                    node = div(node, self.unary()?);
                }
                _ => return Ok(node),
            }
        }
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.position += 1;
                Ok(neg(self.unary()?))
            }
            Some(Token::Plus) => {
                self.position += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.position += 1;
            let exponent = self.unary()?;
            return Ok(pow(base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Node::Const(value)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LeftParen) {
                    let function = Function::from_name(&name).ok_or_else(|| {
                        self.position -= 1;
                        self.error(format!("unknown function '{}'", name))
                    })?;
                    self.position += 1;
                    let argument = self.expr()?;
                    self.expect_right_paren()?;
                    Ok(call(function, argument))
                } else if name == "pi" {
                    Ok(Node::Const(std::f64::consts::PI))
                } else {
                    Ok(Node::Var(name))
                }
            }
            Some(Token::LeftParen) => {
                let inner = self.expr()?;
                self.expect_right_paren()?;
                Ok(inner)
            }
            _ => {
                self.position = self.position.saturating_sub(1);
                Err(self.error("expected a number, a symbol, a function call or '('"))
            }
        }
    }

    fn expect_right_paren(&mut self) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(Token::RightParen) => Ok(()),
            _ => {
                self.position = self.position.saturating_sub(1);
                Err(self.error("missing closing parenthesis"))
            }
        }
    }
}

// =================================================================================================
// Expression
// =================================================================================================

/// Parsed symbolic expression
///
/// Equality compares the source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parse expression text
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let root = Parser::new(source)?.parse()?;
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    /// Wrap a tree; the source text is its printed form
    pub fn from_node(root: Node) -> Self {
        Self {
            source: root.to_string(),
            root,
        }
    }

    /// Text the expression was declared with
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root of the tree
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Sorted set of free symbols
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.root.collect_variables(&mut out);
        out
    }

    /// True if `name` occurs in the expression
    pub fn depends_on(&self, name: &str) -> bool {
        self.root.contains(name)
    }

    /// Evaluate with symbol values provided by `lookup`
    pub fn eval_with(&self, lookup: impl Fn(&str) -> Option<f64>) -> Result<f64, ExpressionError> {
        self.root.eval(&lookup).map_err(|symbol| ExpressionError::UnknownSymbol {
            expression: self.source.clone(),
            symbol,
        })
    }

    /// Simplified symbolic derivative with respect to `var`
    pub fn derivative(&self, var: &str) -> Expression {
        Expression::from_node(self.root.derivative(var))
    }

    /// Replace every symbol by a value slot
    pub fn bind(&self, resolve: impl Fn(&str) -> Option<Slot>) -> Result<BoundExpression, ExpressionError> {
        let root = bind_node(&self.root, &resolve).map_err(|symbol| ExpressionError::UnknownSymbol {
            expression: self.source.clone(),
            symbol,
        })?;
        Ok(BoundExpression { root })
    }

    /// Unit of the expression given the units of its symbols
    ///
    /// Sums must combine terms of the same dimension; exponents must be
    /// constant unless the base is a pure number; transcendental functions
    /// need dimensionless arguments. Terms of a sum may differ in scale.
    pub fn unit_of(&self, lookup: impl Fn(&str) -> Option<Unit>) -> Result<Unit, ExpressionError> {
        self.rescaled_node(&self.root, &lookup).map(|(_, unit)| unit)
    }

    /// Equivalent expression whose value is expressed in the returned unit
    ///
    /// The right term of every sum is multiplied by its conversion factor into
    /// the left term's unit, and dimensionless arguments of functions and
    /// powers are turned into pure numbers. Symbol values keep their own units.
    ///
    /// ```rust
    /// use smart_rs::physics::{Expression, Unit};
    ///
    /// let expr = Expression::parse("a + b").unwrap();
    /// let (rescaled, unit) = expr
    ///     .with_consistent_units(|name| match name {
    ///         "a" => Unit::parse("uM").ok(),
    ///         "b" => Unit::parse("mM").ok(),
    ///         _ => None,
    ///     })
    ///     .unwrap();
    /// assert_eq!(unit.to_string(), "uM");
    /// let value = rescaled.eval_with(|name| Some(if name == "a" { 1.0 } else { 2.0 })).unwrap();
    /// assert!((value - 2001.0).abs() < 1e-9);
    /// ```
    pub fn with_consistent_units(
        &self,
        lookup: impl Fn(&str) -> Option<Unit>,
    ) -> Result<(Expression, Unit), ExpressionError> {
        let (root, unit) = self.rescaled_node(&self.root, &lookup)?;
        if root == self.root {
            return Ok((self.clone(), unit));
        }
        Ok((Expression::from_node(root), unit))
    }

    fn dimension_error(&self, message: String) -> ExpressionError {
        ExpressionError::Dimension {
            expression: self.source.clone(),
            message,
        }
    }

    fn rescaled_node(&self, node: &Node, lookup: &dyn Fn(&str) -> Option<Unit>) -> Result<(Node, Unit), ExpressionError> {
        match node {
            Node::Const(c) => Ok((Node::Const(*c), Unit::dimensionless())),
            Node::Var(v) => {
                let unit = lookup(v).ok_or_else(|| ExpressionError::UnknownSymbol {
                    expression: self.source.clone(),
                    symbol: v.clone(),
                })?;
                Ok((node.clone(), unit))
            }
            Node::Neg(a) => {
                let (a, unit) = self.rescaled_node(a, lookup)?;
                Ok((neg(a), unit))
            }
            Node::Add(a, b) | Node::Sub(a, b) => {
                let (left_node, left) = self.rescaled_node(a, lookup)?;
                let (right_node, right) = self.rescaled_node(b, lookup)?;
                let factor = right.conversion_factor(&left).map_err(|_| {
                    self.dimension_error(format!(
                        "cannot add {} ({}) and {} ({})",
                        a,
                        left.dimension(),
                        b,
                        right.dimension()
                    ))
                })?;
                let right_node = if right.is_equivalent(&left) {
                    right_node
                } else {
                    mul(Node::Const(factor), right_node)
                };
                let sum = match node {
                    Node::Add(..) => add(left_node, right_node),
                    _ => sub(left_node, right_node),
                };
                Ok((sum, left))
            }
            Node::Mul(a, b) => {
                let (a, left) = self.rescaled_node(a, lookup)?;
                let (b, right) = self.rescaled_node(b, lookup)?;
                Ok((mul(a, b), &left * &right))
            }
            Node::Div(a, b) => {
                let (a, left) = self.rescaled_node(a, lookup)?;
                let (b, right) = self.rescaled_node(b, lookup)?;
                Ok((div(a, b), &left / &right))
            }
            Node::Pow(base, exponent) => {
                let (exponent_node, exponent_unit) = self.rescaled_node(exponent, lookup)?;
                if !exponent_unit.dimension().is_dimensionless() {
                    return Err(self.dimension_error(format!("exponent {} is not dimensionless", exponent)));
                }
                let exponent_node = pure_number(exponent_node, &exponent_unit);
                let (base_node, base_unit) = self.rescaled_node(base, lookup)?;
                if base_unit.dimension().is_dimensionless() {
                    return Ok((pow(pure_number(base_node, &base_unit), exponent_node), Unit::dimensionless()));
                }
                let unit = match exponent_node.clone().simplified().constant_value() {
                    Some(n) if n.fract() == 0.0 => base_unit.powi(n as i32),
                    Some(n) if n == 0.5 => base_unit.sqrt().ok_or_else(|| {
                        self.dimension_error(format!("square root of {}", base_unit.dimension()))
                    })?,
                    _ => {
                        return Err(self.dimension_error(format!(
                            "{} with dimension {} raised to a non-integer or variable power",
                            base,
                            base_unit.dimension()
                        )));
                    }
                };
                Ok((pow(base_node, exponent_node), unit))
            }
            Node::Call(function, argument) => {
                let (argument_node, unit) = self.rescaled_node(argument, lookup)?;
                match function {
                    Function::Abs => Ok((call(*function, argument_node), unit)),
                    Function::Sqrt => {
                        let root = unit
                            .sqrt()
                            .ok_or_else(|| self.dimension_error(format!("square root of {}", unit.dimension())))?;
                        Ok((call(*function, argument_node), root))
                    }
                    Function::Heaviside => Ok((call(*function, argument_node), Unit::dimensionless())),
                    _ if unit.dimension().is_dimensionless() => {
                        Ok((call(*function, pure_number(argument_node, &unit)), Unit::dimensionless()))
                    }
                    _ => Err(self.dimension_error(format!(
                        "argument of {} has dimension {}",
                        function.name(),
                        unit.dimension()
                    ))),
                }
            }
        }
    }
}

/// Multiply a dimensionless term by its scale, e.g. `uM/mM` becomes `1e-3`
fn pure_number(node: Node, unit: &Unit) -> Node {
    if unit.is_equivalent(&Unit::dimensionless()) {
        node
    } else {
        mul(Node::Const(unit.scale()), node)
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl TryFrom<String> for Expression {
    type Error = ExpressionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Expression::parse(&value)
    }
}

impl From<Expression> for String {
    fn from(expression: Expression) -> Self {
        expression.source
    }
}

// =================================================================================================
// Bound expressions
// =================================================================================================

/// Value slot a symbol is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Index into the species value array
    Species(usize),
    /// Index into the parameter value array
    Parameter(usize),
    /// Current time
    Time,
}

#[derive(Debug, Clone, PartialEq)]
enum BoundNode {
    Const(f64),
    Slot(Slot),
    Neg(Box<BoundNode>),
    Add(Box<BoundNode>, Box<BoundNode>),
    Sub(Box<BoundNode>, Box<BoundNode>),
    Mul(Box<BoundNode>, Box<BoundNode>),
    Div(Box<BoundNode>, Box<BoundNode>),
    Pow(Box<BoundNode>, Box<BoundNode>),
    Call(Function, Box<BoundNode>),
}

fn bind_node(node: &Node, resolve: &dyn Fn(&str) -> Option<Slot>) -> Result<BoundNode, String> {
    let pair = |a: &Node, b: &Node| -> Result<(Box<BoundNode>, Box<BoundNode>), String> {
        Ok((Box::new(bind_node(a, resolve)?), Box::new(bind_node(b, resolve)?)))
    };

    Ok(match node {
        Node::Const(c) => BoundNode::Const(*c),
        Node::Var(v) => BoundNode::Slot(resolve(v).ok_or_else(|| v.clone())?),
        Node::Neg(a) => BoundNode::Neg(Box::new(bind_node(a, resolve)?)),
        Node::Add(a, b) => {
            let (a, b) = pair(a, b)?;
            BoundNode::Add(a, b)
        }
        Node::Sub(a, b) => {
            let (a, b) = pair(a, b)?;
            BoundNode::Sub(a, b)
        }
        Node::Mul(a, b) => {
            let (a, b) = pair(a, b)?;
            BoundNode::Mul(a, b)
        }
        Node::Div(a, b) => {
            let (a, b) = pair(a, b)?;
            BoundNode::Div(a, b)
        }
        Node::Pow(a, b) => {
            let (a, b) = pair(a, b)?;
            BoundNode::Pow(a, b)
        }
        Node::Call(f, a) => BoundNode::Call(*f, Box::new(bind_node(a, resolve)?)),
    })
}

/// Expression whose symbols are resolved to slots, evaluated without lookups
#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpression {
    root: BoundNode,
}

impl BoundExpression {
    /// Evaluate against slot values
    ///
    /// # Panics
    ///
    /// Panics if a bound slot index is out of range for `species` or `parameters`.
    pub fn evaluate(&self, species: &[f64], parameters: &[f64], t: f64) -> f64 {
        evaluate_bound(&self.root, species, parameters, t)
    }

    /// True if the expression evaluates to the same constant everywhere
    pub fn is_zero(&self) -> bool {
        matches!(self.root, BoundNode::Const(c) if c == 0.0)
    }
}

fn evaluate_bound(node: &BoundNode, species: &[f64], parameters: &[f64], t: f64) -> f64 {
    let eval = |n: &BoundNode| evaluate_bound(n, species, parameters, t);
    match node {
        BoundNode::Const(c) => *c,
        BoundNode::Slot(Slot::Species(i)) => species[*i],
        BoundNode::Slot(Slot::Parameter(i)) => parameters[*i],
        BoundNode::Slot(Slot::Time) => t,
        BoundNode::Neg(a) => -eval(a),
        BoundNode::Add(a, b) => eval(a) + eval(b),
        BoundNode::Sub(a, b) => eval(a) - eval(b),
        BoundNode::Mul(a, b) => eval(a) * eval(b),
        BoundNode::Div(a, b) => eval(a) / eval(b),
        BoundNode::Pow(a, b) => power(eval(a), eval(b)),
        BoundNode::Call(f, a) => f.apply(eval(a)),
    }
}

// =================================================================================================
// Time expressions
// =================================================================================================

/// Expression whose only free symbol is `t`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeExpression {
    expression: Expression,
    bound: BoundExpression,
}

impl TimeExpression {
    /// Parse and check that `t` is the only free symbol
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        Self::new(Expression::parse(source)?)
    }

    /// Check that `t` is the only free symbol of `expression`
    pub fn new(expression: Expression) -> Result<Self, ExpressionError> {
        if let Some(variable) = expression.free_variables().into_iter().find(|v| v != TIME_SYMBOL) {
            return Err(ExpressionError::UnexpectedVariable {
                expression: expression.source().to_string(),
                variable,
            });
        }
        let bound = expression.bind(|_| Some(Slot::Time))?;
        Ok(Self { expression, bound })
    }

    /// Underlying expression
    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Value at time `t`
    pub fn evaluate(&self, t: f64) -> f64 {
        self.bound.evaluate(&[], &[], t)
    }

    /// Closed-form antiderivative in `t`
    ///
    /// Returns [`ExpressionError::Unsupported`] when no rule applies; never
    /// falls back to quadrature.
    pub fn integrate(&self) -> Result<TimeExpression, ExpressionError> {
        let antiderivative = integrate_node(self.expression.root()).map_err(|reason| {
            ExpressionError::Unsupported {
                expression: self.expression.source().to_string(),
                reason,
            }
        })?;
        TimeExpression::new(Expression::from_node(antiderivative.simplified()))
    }
}

impl PartialEq for TimeExpression {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl fmt::Display for TimeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

impl TryFrom<String> for TimeExpression {
    type Error = ExpressionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TimeExpression::parse(&value)
    }
}

impl From<TimeExpression> for String {
    fn from(expression: TimeExpression) -> Self {
        expression.expression.source
    }
}

/// `g` is linear in `t` when `g'` is a non-zero constant in `t`
fn linear_slope(g: &Node) -> Option<Node> {
    let slope = g.derivative(TIME_SYMBOL);
    if slope.contains(TIME_SYMBOL) || slope == Node::Const(0.0) {
        None
    } else {
        Some(slope)
    }
}

fn integrate_node(node: &Node) -> Result<Node, String> {
    let t = || Node::Var(TIME_SYMBOL.to_string());

    if !node.contains(TIME_SYMBOL) {
        return Ok(mul(node.clone(), t()));
    }

    match node {
        Node::Var(_) => Ok(div(pow(t(), Node::Const(2.0)), Node::Const(2.0))),
        Node::Neg(a) => Ok(neg(integrate_node(a)?)),
        Node::Add(a, b) => Ok(add(integrate_node(a)?, integrate_node(b)?)),
        Node::Sub(a, b) => Ok(sub(integrate_node(a)?, integrate_node(b)?)),
        Node::Mul(a, b) if !a.contains(TIME_SYMBOL) => Ok(mul((**a).clone(), integrate_node(b)?)),
        Node::Mul(a, b) if !b.contains(TIME_SYMBOL) => Ok(mul(integrate_node(a)?, (**b).clone())),
        Node::Mul(..) => Err("product of two time-dependent factors".to_string()),
        Node::Div(a, b) if !b.contains(TIME_SYMBOL) => Ok(div(integrate_node(a)?, (**b).clone())),
        Node::Div(a, b) if !a.contains(TIME_SYMBOL) => {
            let slope = linear_slope(b).ok_or_else(|| "division by a non-linear function of t".to_string())?;
            Ok(div(
                mul((**a).clone(), call(Function::Ln, call(Function::Abs, (**b).clone()))),
                slope,
            ))
        }
        Node::Div(..) => Err("quotient of two time-dependent terms".to_string()),
        Node::Pow(base, exponent) if !exponent.contains(TIME_SYMBOL) => {
            let slope =
                linear_slope(base).ok_or_else(|| "power of a non-linear function of t".to_string())?;
            let n = (**exponent).clone().simplified();
            if n == Node::Const(-1.0) {
                return Ok(div(call(Function::Ln, call(Function::Abs, (**base).clone())), slope));
            }
            let raised = add(n, Node::Const(1.0)).simplified();
            Ok(div(
                pow((**base).clone(), raised.clone()),
                mul(raised, slope),
            ))
        }
        Node::Pow(base, exponent) if !base.contains(TIME_SYMBOL) => {
            let slope =
                linear_slope(exponent).ok_or_else(|| "exponent is not linear in t".to_string())?;
            Ok(div(
                node.clone(),
                mul(call(Function::Ln, (**base).clone()), slope),
            ))
        }
        Node::Pow(..) => Err("time-dependent base and exponent".to_string()),
        Node::Call(function, argument) => {
            let slope = linear_slope(argument)
                .ok_or_else(|| format!("{} of a non-linear function of t", function.name()))?;
            let u = (**argument).clone();
            match function {
                Function::Exp => Ok(div(call(Function::Exp, u), slope)),
                Function::Sin => Ok(neg(div(call(Function::Cos, u), slope))),
                Function::Cos => Ok(div(call(Function::Sin, u), slope)),
                other => Err(format!("no antiderivative rule for {}", other.name())),
            }
        }
        Node::Const(_) => Ok(mul(node.clone(), t())),
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn eval(source: &str, values: &[(&str, f64)]) -> f64 {
        let map: HashMap<&str, f64> = values.iter().cloned().collect();
        Expression::parse(source)
            .unwrap()
            .eval_with(|name| map.get(name).copied())
            .unwrap()
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_relative_eq!(eval("1 + 2*3", &[]), 7.0);
        assert_relative_eq!(eval("2^3^2", &[]), 512.0);
        assert_relative_eq!(eval("-2^2", &[]), -4.0);
        assert_relative_eq!(eval("2**-1", &[]), 0.5);
        assert_relative_eq!(eval("8/4/2", &[]), 1.0);
        assert_relative_eq!(eval("1e-3 * 2.5E+2", &[]), 0.25);
    }

    #[test]
    fn test_functions_and_constants() {
        assert_relative_eq!(eval("exp(0) + ln(1) + log(1)", &[]), 1.0);
        assert_relative_eq!(eval("sin(pi/2)", &[]), 1.0, epsilon = 1e-12);
        assert_relative_eq!(eval("heaviside(t - 1)", &[("t", 2.0)]), 1.0);
        assert_relative_eq!(eval("heaviside(t - 1)", &[("t", 0.0)]), 0.0);
        assert_relative_eq!(eval("abs(-3) + sqrt(16)", &[]), 7.0);
    }

    #[test]
    fn test_free_variables() {
        let expr = Expression::parse("kon*A*X - koff*B + pi").unwrap();
        let vars: Vec<String> = expr.free_variables().into_iter().collect();
        assert_eq!(vars, vec!["A", "B", "X", "koff", "kon"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Expression::parse(""), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expression::parse("(a + b"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expression::parse("a + * b"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expression::parse("foo(t)"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expression::parse("a $ b"), Err(ExpressionError::Parse { .. })));
    }

    #[test]
    fn test_unknown_symbol_on_eval() {
        let expr = Expression::parse("a + b").unwrap();
        let err = expr.eval_with(|name| (name == "a").then_some(1.0)).unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownSymbol { ref symbol, .. } if symbol == "b"));
    }

    #[test]
    fn test_derivative_of_mass_action() {
        let expr = Expression::parse("kon*A*X - koff*B").unwrap();
        let d_a = expr.derivative("A");
        let value = d_a
            .eval_with(|name| match name {
                "kon" => Some(2.0),
                "X" => Some(3.0),
                _ => None,
            })
            .unwrap();
        assert_relative_eq!(value, 6.0);

        let d_b = expr.derivative("B");
        assert_eq!(d_b.root(), &Node::Neg(Box::new(Node::Var("koff".to_string()))));
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let expr = Expression::parse("x^3*exp(-x/2) + sin(x)/x + tanh(x)").unwrap();
        let derivative = expr.derivative("x");
        let f = |x: f64| expr.eval_with(|_| Some(x)).unwrap();
        let x0 = 1.3;
        let h = 1e-6;
        let numeric = (f(x0 + h) - f(x0 - h)) / (2.0 * h);
        let symbolic = derivative.eval_with(|_| Some(x0)).unwrap();
        assert_relative_eq!(symbolic, numeric, max_relative = 1e-6);
    }

    #[test]
    fn test_display_reparses_to_same_tree() {
        for source in ["a - (b - c)", "a/(b*c)", "-(a + b)^2", "(-2)^x", "2^-t", "a*(b + c)"] {
            let expr = Expression::parse(source).unwrap();
            let printed = expr.root().to_string();
            let reparsed = Expression::parse(&printed).unwrap();
            assert_eq!(reparsed.root(), expr.root(), "printed form '{}'", printed);
        }
    }

    #[test]
    fn test_bind_and_evaluate() {
        let expr = Expression::parse("kon*A*X - koff*B + t").unwrap();
        let bound = expr
            .bind(|name| match name {
                "A" => Some(Slot::Species(0)),
                "X" => Some(Slot::Species(1)),
                "B" => Some(Slot::Species(2)),
                "kon" => Some(Slot::Parameter(0)),
                "koff" => Some(Slot::Parameter(1)),
                "t" => Some(Slot::Time),
                _ => None,
            })
            .unwrap();
        let value = bound.evaluate(&[1.0, 2.0, 3.0], &[0.5, 0.1], 10.0);
        assert_relative_eq!(value, 0.5 * 2.0 - 0.3 + 10.0);

        assert!(matches!(
            expr.bind(|_| None),
            Err(ExpressionError::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn test_unit_of_mass_action() {
        let expr = Expression::parse("kon*A*X - koff*B").unwrap();
        let unit = expr
            .unit_of(|name| {
                let symbol = match name {
                    "kon" => "1/(uM*s)",
                    "koff" => "1/s",
                    "A" => "uM",
                    "X" | "B" => "molecule/um^2",
                    _ => return None,
                };
                Unit::parse(symbol).ok()
            })
            .unwrap();
        assert_eq!(unit.dimension(), Dimension::concentration_rate(2));
    }

    #[test]
    fn test_unit_of_rejects_inconsistent_sum() {
        let expr = Expression::parse("A + t").unwrap();
        let err = expr
            .unit_of(|name| match name {
                "A" => Unit::parse("uM").ok(),
                "t" => Some(Unit::second()),
                _ => None,
            })
            .unwrap_err();
        assert!(matches!(err, ExpressionError::Dimension { .. }));

        let transcendental = Expression::parse("exp(A)").unwrap();
        assert!(transcendental.unit_of(|_| Unit::parse("uM").ok()).is_err());
    }

    #[test]
    fn test_sum_of_differently_scaled_terms_is_rescaled() {
        let lookup = |name: &str| {
            let symbol = match name {
                "kon" => "1/(mM*s)",
                "koff" => "1/s",
                "A" => "uM",
                "X" | "B" => "molecule/um^2",
                _ => return None,
            };
            Unit::parse(symbol).ok()
        };
        let expr = Expression::parse("kon*A*X - koff*B").unwrap();
        let (rescaled, unit) = expr.with_consistent_units(lookup).unwrap();
        assert_eq!(unit.dimension(), Dimension::concentration_rate(2));
        assert_eq!(expr.unit_of(lookup).unwrap().dimension(), unit.dimension());

        // 1000/(mM s) is 1/(uM s); in the left term's unit the rate is 1e3 times larger
        let values = |name: &str| match name {
            "kon" => Some(1000.0),
            "koff" => Some(0.1),
            "A" => Some(1.0),
            "X" => Some(500.0),
            "B" => Some(20.0),
            _ => None,
        };
        let rate = rescaled.eval_with(values).unwrap() * unit.scale();
        let per_um = Unit::parse("1/(uM*s)").unwrap().scale() * Unit::parse("uM").unwrap().scale()
            * Unit::parse("molecule/um^2").unwrap().scale();
        assert_relative_eq!(rate, (1.0 * 500.0 - 0.1 * 20.0) * per_um, max_relative = 1e-12);
    }

    #[test]
    fn test_consistent_expression_is_unchanged() {
        let expr = Expression::parse("k*A").unwrap();
        let (rescaled, _) = expr
            .with_consistent_units(|name| match name {
                "k" => Unit::parse("1/s").ok(),
                "A" => Unit::parse("uM").ok(),
                _ => None,
            })
            .unwrap();
        assert_eq!(rescaled.source(), "k*A");
    }

    #[test]
    fn test_dimensionless_ratio_becomes_pure_number() {
        // A/K with A in uM and K in mM is 1e-3 * A/K
        let expr = Expression::parse("exp(A/K)").unwrap();
        let (rescaled, unit) = expr
            .with_consistent_units(|name| match name {
                "A" => Unit::parse("uM").ok(),
                "K" => Unit::parse("mM").ok(),
                _ => None,
            })
            .unwrap();
        assert!(unit.dimension().is_dimensionless());
        let value = rescaled
            .eval_with(|name| if name == "A" { Some(1000.0) } else { Some(1.0) })
            .unwrap();
        assert_relative_eq!(value, 1.0f64.exp(), max_relative = 1e-12);
    }

    #[test]
    fn test_time_expression_rejects_other_symbols() {
        let err = TimeExpression::parse("k*t").unwrap_err();
        assert!(matches!(err, ExpressionError::UnexpectedVariable { ref variable, .. } if variable == "k"));
    }

    #[test]
    fn test_integrate_polynomial() {
        let expr = TimeExpression::parse("3*t^2 + 2*t + 1").unwrap();
        let integral = expr.integrate().unwrap();
        assert_relative_eq!(integral.evaluate(2.0) - integral.evaluate(0.0), 8.0 + 4.0 + 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_integrate_exponential_pulse() {
        let expr = TimeExpression::parse("exp(-t/20) - exp(-t/5)").unwrap();
        let integral = expr.integrate().unwrap();
        let exact = 20.0 * (1.0 - (-1.0_f64).exp()) - 5.0 * (1.0 - (-4.0_f64).exp());
        assert_relative_eq!(integral.evaluate(20.0) - integral.evaluate(0.0), exact, max_relative = 1e-12);
    }

    #[test]
    fn test_integrate_trig_reciprocal_and_power_base() {
        let cases = [
            ("cos(2*t)", 0.0, 1.0),
            ("sin(t + 1)", 0.5, 2.0),
            ("1/(t + 1)", 0.0, 3.0),
            ("(2*t + 1)^-1", 0.0, 3.0),
            ("2^t", 0.0, 1.0),
            ("(t - 1)^3/4", 0.0, 3.0),
        ];
        for (source, a, b) in cases {
            let expr = TimeExpression::parse(source).unwrap();
            let integral = expr.integrate().unwrap();
            let n = 2000;
            let h = (b - a) / n as f64;
            let mut simpson = expr.evaluate(a) + expr.evaluate(b);
            for i in 1..n {
                let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
                simpson += weight * expr.evaluate(a + i as f64 * h);
            }
            simpson *= h / 3.0;
            assert_relative_eq!(
                integral.evaluate(b) - integral.evaluate(a),
                simpson,
                max_relative = 1e-8
            );
        }
    }

    #[test]
    fn test_integrate_unsupported() {
        let expr = TimeExpression::parse("exp(-t^2)").unwrap();
        assert!(matches!(expr.integrate(), Err(ExpressionError::Unsupported { .. })));

        let product = TimeExpression::parse("t*sin(t)").unwrap();
        assert!(matches!(product.integrate(), Err(ExpressionError::Unsupported { .. })));
    }

    #[test]
    fn test_serde_round_trip() {
        let expr = Expression::parse("kon * A").unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, "\"kon * A\"");
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);

        let bad: Result<TimeExpression, _> = serde_json::from_str("\"k*t\"");
        assert!(bad.is_err());
    }
}
