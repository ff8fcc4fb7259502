//! Check and eval recipes carry small arithmetic expressions over the
//! columns of their input tuples.  Expressions are plain data, so
//! recipes that embed them still compare and hash by value.
//!
//! Every expression evaluates to a `Value`.  Comparisons and logical
//! operators return 1 for true and 0 for false, and treat any non-zero
//! operand as true.
use crate::value::Tuple;
use crate::value::Value;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Integer division, rounding toward zero.
    Div,
    Rem,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    And,
    Or,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Expression {
    /// The value at this position of the input tuple.
    Column(usize),
    Constant(Value),
    /// 1 if the operand is 0, 0 otherwise.
    Not(Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

/// Why an expression has no value for a tuple.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvalError {
    ColumnOutOfBounds(usize),
    Overflow,
    DivisionByZero,
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ColumnOutOfBounds(column) => write!(f, "column {} out of bounds", column),
            Self::Overflow => f.write_str("arithmetic overflow"),
            Self::DivisionByZero => f.write_str("division by zero"),
        }
    }
}

impl std::error::Error for EvalError {}

fn truth(value: bool) -> Value {
    Value::new(value as i64)
}

impl Expression {
    #[must_use]
    pub fn column(index: usize) -> Self {
        Self::Column(index)
    }

    #[must_use]
    pub fn constant(raw: i64) -> Self {
        Self::Constant(Value::new(raw))
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Self::Binary(op, Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn not(operand: Expression) -> Self {
        Self::Not(Box::new(operand))
    }

    /// Returns the largest column index the expression reads, if any.
    #[must_use]
    pub fn max_column(&self) -> Option<usize> {
        match self {
            Self::Column(index) => Some(*index),
            Self::Constant(_) => None,
            Self::Not(operand) => operand.max_column(),
            Self::Binary(_, left, right) => left.max_column().max(right.max_column()),
        }
    }

    /// Evaluates the expression on `tuple`.
    ///
    /// # Errors
    ///
    /// Returns `Err` on out-of-bounds columns, integer overflow and
    /// division by zero.
    pub fn evaluate(&self, tuple: &Tuple) -> Result<Value, EvalError> {
        match self {
            Self::Column(index) => tuple.get(*index).ok_or(EvalError::ColumnOutOfBounds(*index)),
            Self::Constant(value) => Ok(*value),
            Self::Not(operand) => Ok(truth(operand.evaluate(tuple)?.get() == 0)),
            Self::Binary(op, left, right) => {
                let left = left.evaluate(tuple)?.get();
                // Short-circuit like the host language would.
                match op {
                    BinaryOp::And if left == 0 => return Ok(truth(false)),
                    BinaryOp::Or if left != 0 => return Ok(truth(true)),
                    _ => {}
                }

                let right = right.evaluate(tuple)?.get();
                let raw = match op {
                    BinaryOp::Add => left.checked_add(right).ok_or(EvalError::Overflow)?,
                    BinaryOp::Sub => left.checked_sub(right).ok_or(EvalError::Overflow)?,
                    BinaryOp::Mul => left.checked_mul(right).ok_or(EvalError::Overflow)?,
                    BinaryOp::Div | BinaryOp::Rem if right == 0 => {
                        return Err(EvalError::DivisionByZero)
                    }
                    BinaryOp::Div => left.checked_div(right).ok_or(EvalError::Overflow)?,
                    BinaryOp::Rem => left.checked_rem(right).ok_or(EvalError::Overflow)?,
                    BinaryOp::Min => left.min(right),
                    BinaryOp::Max => left.max(right),
                    BinaryOp::Eq => (left == right) as i64,
                    BinaryOp::Ne => (left != right) as i64,
                    BinaryOp::Lt => (left < right) as i64,
                    BinaryOp::Le => (left <= right) as i64,
                    BinaryOp::And | BinaryOp::Or => (right != 0) as i64,
                };

                Ok(Value::new(raw))
            }
        }
    }

    /// Evaluates the expression as a condition: true iff the value is
    /// non-zero.
    ///
    /// # Errors
    ///
    /// Returns `Err` when `evaluate` does.
    pub fn holds(&self, tuple: &Tuple) -> Result<bool, EvalError> {
        Ok(self.evaluate(tuple)?.get() != 0)
    }
}

#[test]
fn test_arithmetic() {
    let tuple = Tuple::from([7, 3]);
    let sum = Expression::binary(BinaryOp::Add, Expression::column(0), Expression::column(1));
    assert_eq!(sum.evaluate(&tuple), Ok(Value::new(10)));

    let scaled = Expression::binary(BinaryOp::Mul, sum, Expression::constant(-2));
    assert_eq!(scaled.evaluate(&tuple), Ok(Value::new(-20)));

    let quotient = Expression::binary(BinaryOp::Div, Expression::column(0), Expression::column(1));
    assert_eq!(quotient.evaluate(&tuple), Ok(Value::new(2)));
    assert_eq!(scaled.max_column(), Some(1));
    assert_eq!(Expression::constant(1).max_column(), None);
}

#[test]
fn test_conditions() {
    let less = Expression::binary(BinaryOp::Lt, Expression::column(0), Expression::column(1));
    assert_eq!(less.holds(&Tuple::from([1, 2])), Ok(true));
    assert_eq!(less.holds(&Tuple::from([2, 2])), Ok(false));
    assert_eq!(Expression::not(less.clone()).holds(&Tuple::from([2, 2])), Ok(true));

    // The right operand is never evaluated when the left one decides.
    let guarded = Expression::binary(
        BinaryOp::And,
        Expression::binary(BinaryOp::Ne, Expression::column(1), Expression::constant(0)),
        Expression::binary(BinaryOp::Div, Expression::column(0), Expression::column(1)),
    );
    assert_eq!(guarded.holds(&Tuple::from([4, 0])), Ok(false));
    assert_eq!(guarded.holds(&Tuple::from([4, 2])), Ok(true));
}

#[test]
fn test_eval_errors() {
    let tuple = Tuple::from([i64::MAX, 0]);
    let overflow = Expression::binary(
        BinaryOp::Add,
        Expression::column(0),
        Expression::constant(1),
    );
    assert_eq!(overflow.evaluate(&tuple), Err(EvalError::Overflow));

    let divide = Expression::binary(BinaryOp::Rem, Expression::column(0), Expression::column(1));
    assert_eq!(divide.evaluate(&tuple), Err(EvalError::DivisionByZero));
    assert_eq!(
        Expression::column(2).evaluate(&tuple),
        Err(EvalError::ColumnOutOfBounds(2))
    );
}
