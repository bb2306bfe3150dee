//! Operand expressions.
//!
//! An operand is a flat chain of terms combined strictly left to right,
//! with no precedence and no parentheses:
//! ```text
//! 14 - 4 / 2 * 3   ==   ((14 - 4) / 2) * 3   ==   15
//! ```
//! Labels in a chain may refer to addresses defined later in the file,
//! so chains are stored as [`Expr`] during the first pass and evaluated
//! against the final [`SymbolTable`] afterwards.

use std::borrow::Cow;
use std::num::ParseIntError;

use crate::asm::SymbolTable;

/// A binary operator of an expression chain.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/` (truncating)
    Div,
}
impl BinOp {
    /// Gets the operator for an operator token, if it is one.
    pub fn from_token(s: &str) -> Option<Self> {
        match s {
            "+" => Some(BinOp::Add),
            "-" => Some(BinOp::Sub),
            "*" => Some(BinOp::Mul),
            "/" => Some(BinOp::Div),
            _ => None,
        }
    }

    fn apply(self, lhs: u64, rhs: u64) -> Result<u64, ExprErr> {
        match self {
            BinOp::Add => Ok(lhs.wrapping_add(rhs)),
            BinOp::Sub => Ok(lhs.wrapping_sub(rhs)),
            BinOp::Mul => Ok(lhs.wrapping_mul(rhs)),
            BinOp::Div => lhs.checked_div(rhs).ok_or(ExprErr::DivideByZero),
        }
    }
}
impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinOp::Add => f.write_str("+"),
            BinOp::Sub => f.write_str("-"),
            BinOp::Mul => f.write_str("*"),
            BinOp::Div => f.write_str("/"),
        }
    }
}

/// A value in an expression chain.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Operand {
    /// A literal (or a special register's address).
    Number(u64),
    /// A reference to a label, by its full (expanded) name.
    Label(String),
}
impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "{n}"),
            Operand::Label(l)  => f.write_str(l),
        }
    }
}

/// An operator applied to an operand.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Term {
    /// The operator combining this term with the running value.
    pub op: BinOp,
    /// The term's value.
    pub operand: Operand,
}

/// An expression chain.
///
/// The first term's operator is always [`BinOp::Add`] (it is added onto zero).
///
/// # Example
/// ```
/// use ppasm::asm::SymbolTable;
/// use ppasm::parse::expr::{BinOp, Expr, Operand};
///
/// let mut expr = Expr::new(Operand::Number(14));
/// expr.push(BinOp::Sub, Operand::Number(4));
/// expr.push(BinOp::Div, Operand::Number(2));
/// expr.push(BinOp::Mul, Operand::Number(3));
/// assert_eq!(expr.evaluate(&SymbolTable::new()), Ok(15));
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Expr(Vec<Term>);
impl Expr {
    /// Creates a chain holding a single operand.
    pub fn new(first: Operand) -> Self {
        Expr(vec![Term { op: BinOp::Add, operand: first }])
    }

    /// Appends a term to the chain.
    pub fn push(&mut self, op: BinOp, operand: Operand) {
        self.0.push(Term { op, operand });
    }

    /// The terms of this chain, in evaluation order.
    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    /// Evaluates the chain left to right against a symbol table.
    ///
    /// Arithmetic wraps around at 64 bits. Division truncates,
    /// and dividing by zero is an error rather than a crash.
    pub fn evaluate(&self, symbols: &SymbolTable) -> Result<u64, ExprErr> {
        self.0.iter().try_fold(0u64, |acc, term| {
            let value = match &term.operand {
                Operand::Number(n) => *n,
                Operand::Label(l)  => symbols.lookup(l)
                    .ok_or_else(|| ExprErr::UnresolvedLabel(l.clone()))?,
            };
            term.op.apply(acc, value)
        })
    }
}
impl From<u64> for Expr {
    fn from(value: u64) -> Self {
        Expr::new(Operand::Number(value))
    }
}
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, term) in self.0.iter().enumerate() {
            if i != 0 { write!(f, " {} ", term.op)?; }
            term.operand.fmt(f)?;
        }
        Ok(())
    }
}

/// Errors from evaluating an [`Expr`].
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ExprErr {
    /// A label in the chain was never defined.
    UnresolvedLabel(String),
    /// A term divided by zero.
    DivideByZero,
}
impl std::fmt::Display for ExprErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprErr::UnresolvedLabel(l) => write!(f, "label {l} could not be found"),
            ExprErr::DivideByZero       => f.write_str("division by zero"),
        }
    }
}
impl std::error::Error for ExprErr {}
impl crate::err::Error for ExprErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            ExprErr::UnresolvedLabel(_) => Some("check the spelling, or define this label somewhere in the file".into()),
            ExprErr::DivideByZero       => None,
        }
    }
}

/// Parses a numeric literal.
///
/// `$` starts a hexadecimal literal, `%` a binary literal, and a digit a decimal literal.
/// Underscores may be used as digit separators.
///
/// Returns `None` if the token does not look like a number at all.
///
/// ```
/// use ppasm::parse::expr::parse_number;
///
/// assert_eq!(parse_number("$1F"), Some(Ok(31)));
/// assert_eq!(parse_number("%1010_0101"), Some(Ok(0xA5)));
/// assert_eq!(parse_number("80_000_000"), Some(Ok(80_000_000)));
/// assert!(matches!(parse_number("$"), Some(Err(_))));
/// assert_eq!(parse_number("label"), None);
/// ```
pub fn parse_number(token: &str) -> Option<Result<u64, ParseIntError>> {
    let (digits, radix) = if let Some(hex) = token.strip_prefix('$') {
        (hex, 16)
    } else if let Some(bin) = token.strip_prefix('%') {
        (bin, 2)
    } else if token.starts_with(|c: char| c.is_ascii_digit()) {
        (token, 10)
    } else {
        return None;
    };

    let digits = digits.replace('_', "");
    Some(u64::from_str_radix(&digits, radix))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::asm::SymbolTable;

    use super::{parse_number, BinOp, Expr, ExprErr, Operand};

    fn label(s: &str) -> Operand {
        Operand::Label(s.to_string())
    }

    #[test]
    fn test_left_to_right() {
        let mut expr = Expr::from(14);
        expr.push(BinOp::Sub, Operand::Number(4));
        expr.push(BinOp::Div, Operand::Number(2));
        expr.push(BinOp::Mul, Operand::Number(3));
        assert_eq!(expr.evaluate(&SymbolTable::new()), Ok(15));
        assert_eq!(expr.to_string(), "14 - 4 / 2 * 3");
    }

    #[test]
    fn test_labels() {
        let mut symbols = SymbolTable::new();
        symbols.insert("start", 4).unwrap();
        symbols.insert("end", 10).unwrap();

        let mut expr = Expr::new(label("end"));
        expr.push(BinOp::Sub, label("start"));
        assert_eq!(expr.evaluate(&symbols), Ok(6));

        let expr = Expr::new(label("nowhere"));
        assert_eq!(expr.evaluate(&symbols), Err(ExprErr::UnresolvedLabel("nowhere".to_string())));
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let mut symbols = SymbolTable::new();
        symbols.insert("x", 3).unwrap();

        let mut expr = Expr::new(label("x"));
        expr.push(BinOp::Mul, label("x"));
        assert_eq!(expr.evaluate(&symbols), Ok(9));
        assert_eq!(expr.evaluate(&symbols), Ok(9));
        assert_eq!(expr.terms().len(), 2);
    }

    #[test]
    fn test_divide_by_zero() {
        let mut expr = Expr::from(1);
        expr.push(BinOp::Div, Operand::Number(0));
        assert_eq!(expr.evaluate(&SymbolTable::new()), Err(ExprErr::DivideByZero));
    }

    #[test]
    fn test_wrapping() {
        let mut expr = Expr::from(0);
        expr.push(BinOp::Sub, Operand::Number(1));
        assert_eq!(expr.evaluate(&SymbolTable::new()), Ok(u64::MAX));

        let mut expr = Expr::from(u64::MAX);
        expr.push(BinOp::Add, Operand::Number(2));
        assert_eq!(expr.evaluate(&SymbolTable::new()), Ok(1));
    }

    #[test]
    fn test_matches_fold() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let symbols = SymbolTable::new();

        for _ in 0..200 {
            let first = rng.gen_range(0..1000u64);
            let mut expr = Expr::from(first);
            let mut expected = first;

            for _ in 0..rng.gen_range(0..6) {
                let n = rng.gen_range(1..100u64);
                let op = [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div][rng.gen_range(0..4)];
                expected = match op {
                    BinOp::Add => expected.wrapping_add(n),
                    BinOp::Sub => expected.wrapping_sub(n),
                    BinOp::Mul => expected.wrapping_mul(n),
                    BinOp::Div => expected / n,
                };
                expr.push(op, Operand::Number(n));
            }
            assert_eq!(expr.evaluate(&symbols), Ok(expected), "{expr}");
        }
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_number("0"), Some(Ok(0)));
        assert_eq!(parse_number("1_000"), Some(Ok(1000)));
        assert_eq!(parse_number("$ff"), Some(Ok(255)));
        assert_eq!(parse_number("$FF_FF"), Some(Ok(0xFFFF)));
        assert_eq!(parse_number("%11"), Some(Ok(3)));
        assert!(matches!(parse_number("%12"), Some(Err(_))));
        assert!(matches!(parse_number("12ab"), Some(Err(_))));
        assert!(matches!(parse_number("$fffffffffffffffff"), Some(Err(_))));
        assert_eq!(parse_number("_1"), None);
        assert_eq!(parse_number("outa"), None);
    }
}
