use std::{cmp::Ordering, fmt, rc::Rc};

use crate::{
    error::{ErrorKind, Failure},
    line::Line,
    token::{Op, Token, TokenKind},
};

/// Longest string or list that repetition and padding will build.
pub const MAX_REPEAT_LEN: usize = 1 << 24;

/// Check a repeat count for something `unit` long. The result stays under
/// [`MAX_REPEAT_LEN`].
pub(crate) fn repeat_count(n: f64, unit: usize, blame: &str) -> Result<usize, Failure> {
    if n.is_nan() || n < 0.0 {
        return Err(ErrorKind::InvalidArg.at(blame));
    }
    let count = n as usize;
    match count.checked_mul(unit) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(count),
        _ => Err(ErrorKind::ValueOutOfRange.at(blame)),
    }
}

/// A runtime datum.
///
/// Lists are shared between every variable they are assigned to. Nothing
/// mutates a list in place: operations that change a list build a new one,
/// so sharing is never observable.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Num(f64),
    Str(String),
    List(Rc<Line>),
}

/// Integral numbers print without a decimal point, others with six places.
pub fn num_to_string(n: f64) -> String {
    if !n.is_finite() {
        format!("{n}")
    } else if n == n.trunc() && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{n:.6}")
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Num(if b { 1.0 } else { 0.0 })
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<Line> for Value {
    fn from(line: Line) -> Self {
        Value::List(Rc::new(line))
    }
}

impl From<&Token> for Value {
    /// The value of a list element. Anything that is not a number or a
    /// list reads as its text.
    fn from(tok: &Token) -> Self {
        match &tok.kind {
            TokenKind::Num(n) => Value::Num(*n),
            TokenKind::List(line) => Value::List(line.clone()),
            _ => Value::Str(tok.text.clone()),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Truthiness: a non-zero number, a non-empty string or list.
    pub fn is_set(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.tokens.is_empty(),
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Rc<Line>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Apply `count` logical NOTs.
    pub fn invert(self, count: u32) -> Result<Value, Failure> {
        if count == 0 {
            return Ok(self);
        }
        let Value::Num(mut n) = self else {
            return Err(ErrorKind::CantInvert.bare());
        };
        for _ in 0..count {
            n = if n == 0.0 { 1.0 } else { 0.0 };
        }
        Ok(Value::Num(n))
    }

    pub fn negate(self) -> Result<Value, Failure> {
        match self {
            Value::Num(n) => Ok(Value::Num(-n)),
            _ => Err(ErrorKind::CantNegate.bare()),
        }
    }

    /// Printed form. Strings are quoted only when `quotes` is set.
    pub fn dump(&self, quotes: bool) -> String {
        match self {
            Value::Undefined => String::new(),
            Value::Num(n) => num_to_string(*n),
            Value::Str(s) if quotes => format!("\"{s}\""),
            Value::Str(s) => s.clone(),
            Value::List(l) => format!("[{l}]"),
        }
    }

    fn blame(&self) -> String {
        self.dump(false)
    }

    fn num_operands(&self, rhs: &Value) -> Result<(f64, f64), Failure> {
        let Value::Num(l) = self else {
            return Err(ErrorKind::InvalidArg.at(self.blame()));
        };
        let Value::Num(r) = rhs else {
            return Err(ErrorKind::InvalidArg.at(rhs.blame()));
        };
        Ok((*l, *r))
    }

    fn compare(&self, rhs: &Value) -> Result<Ordering, Failure> {
        match (self, rhs) {
            (Value::Num(l), Value::Num(r)) => Ok(l.partial_cmp(r).unwrap_or(Ordering::Less)),
            (Value::Str(l), Value::Str(r)) => Ok(l.cmp(r)),
            (Value::List(_), Value::List(_)) | (Value::Undefined, Value::Undefined) => {
                Err(ErrorKind::InvalidArg.bare())
            }
            _ => Err(ErrorKind::InvalidArg.at(rhs.blame())),
        }
    }

    fn equals(&self, rhs: &Value) -> Result<bool, Failure> {
        match (self, rhs) {
            (Value::List(l), Value::List(r)) => Ok(l.list_eq(r)),
            _ => Ok(self.compare(rhs)? == Ordering::Equal),
        }
    }

    /// Evaluate a binary operator.
    pub fn binary(self, op: Op, rhs: &Value) -> Result<Value, Failure> {
        Ok(match op {
            Op::And => (self.is_set() && rhs.is_set()).into(),
            Op::Or => (self.is_set() || rhs.is_set()).into(),
            Op::Xor => (self.is_set() ^ rhs.is_set()).into(),
            Op::Eq => self.equals(rhs)?.into(),
            Op::Ne => (!self.equals(rhs)?).into(),
            Op::Lt => (self.compare(rhs)? == Ordering::Less).into(),
            Op::Gt => (self.compare(rhs)? == Ordering::Greater).into(),
            Op::Le => (self.compare(rhs)? != Ordering::Greater).into(),
            Op::Ge => (self.compare(rhs)? != Ordering::Less).into(),
            Op::Add => self.add(rhs)?,
            Op::Mul => self.mul(rhs)?,
            Op::Sub => {
                let (l, r) = self.num_operands(rhs)?;
                Value::Num(l - r)
            }
            Op::Div => {
                let (l, r) = self.num_operands(rhs)?;
                if r == 0.0 {
                    return Err(ErrorKind::DivideByZero.at("/"));
                }
                Value::Num(l / r)
            }
            Op::Mod => {
                let (l, r) = self.num_operands(rhs)?;
                let r = r.trunc();
                if r == 0.0 || r.is_nan() {
                    return Err(ErrorKind::DivideByZero.at("%"));
                }
                // The left operand keeps its fractional part.
                Value::Num(l.trunc() % r + l.fract())
            }
            Op::Pow => {
                let (l, r) = self.num_operands(rhs)?;
                Value::Num(l.powf(r))
            }
            Op::LParen | Op::RParen | Op::LBracket | Op::RBracket | Op::Not => {
                return Err(ErrorKind::UnexpectedOp.at(op.symbol()))
            }
        })
    }

    fn add(self, rhs: &Value) -> Result<Value, Failure> {
        Ok(match (self, rhs) {
            (Value::Num(l), Value::Num(r)) => Value::Num(l + r),
            (Value::Str(mut l), Value::Str(r)) => {
                l.push_str(r);
                Value::Str(l)
            }
            (Value::List(l), Value::List(r)) => Value::from(l.concat(r)),
            (Value::Undefined, _) => return Err(ErrorKind::InvalidArg.bare()),
            (_, rhs) => return Err(ErrorKind::InvalidArg.at(rhs.blame())),
        })
    }

    fn mul(self, rhs: &Value) -> Result<Value, Failure> {
        Ok(match (self, rhs) {
            (Value::Num(l), Value::Num(r)) => Value::Num(l * r),
            (Value::Num(n), Value::Str(s)) => {
                Value::Str(s.repeat(repeat_count(n, s.len(), &rhs.blame())?))
            }
            (Value::Str(s), Value::Num(n)) => {
                let count = repeat_count(*n, s.len(), &rhs.blame())?;
                Value::Str(s.repeat(count))
            }
            (Value::Num(n), Value::List(l)) => {
                Value::from(l.repeat(repeat_count(n, l.len(), &rhs.blame())?))
            }
            (Value::List(l), Value::Num(n)) => {
                let count = repeat_count(*n, l.len(), &rhs.blame())?;
                Value::from(l.repeat(count))
            }
            (_, rhs) => return Err(ErrorKind::InvalidArg.at(rhs.blame())),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.list_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize_list;

    fn list(src: &str) -> Value {
        Value::from(tokenize_list(src).unwrap())
    }

    #[test]
    fn number_formatting() {
        assert_eq!(num_to_string(12.0), "12");
        assert_eq!(num_to_string(-3.0), "-3");
        assert_eq!(num_to_string(0.5), "0.500000");
        assert_eq!(num_to_string(2.25), "2.250000");
    }

    #[test]
    fn arithmetic() {
        let v = Value::Num(7.0).binary(Op::Add, &Value::Num(2.0)).unwrap();
        assert_eq!(v, Value::Num(9.0));
        let v = Value::Num(7.5).binary(Op::Mod, &Value::Num(2.0)).unwrap();
        assert_eq!(v, Value::Num(1.5));
        let v = Value::Num(2.0).binary(Op::Pow, &Value::Num(10.0)).unwrap();
        assert_eq!(v, Value::Num(1024.0));

        let err = Value::Num(1.0).binary(Op::Div, &Value::Num(0.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivideByZero);
        let err = Value::Num(1.0).binary(Op::Sub, &"a".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArg);
    }

    #[test]
    fn remainder_of_huge_numbers() {
        let v = Value::Num(-1e20).binary(Op::Mod, &Value::Num(-1.0)).unwrap();
        assert_eq!(v.to_string(), "0");
        let v = Value::Num(-7.5).binary(Op::Mod, &Value::Num(2.0)).unwrap();
        assert_eq!(v, Value::Num(-1.5));
        let err = Value::Num(1e20).binary(Op::Mod, &Value::Num(0.5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivideByZero);
    }

    #[test]
    fn repetition() {
        let v = Value::Num(3.0).binary(Op::Mul, &"ab".into()).unwrap();
        assert_eq!(v, Value::from("ababab"));
        let v = Value::from("ab").binary(Op::Mul, &Value::Num(0.0)).unwrap();
        assert_eq!(v, Value::from(""));
        let v = list("1 2").binary(Op::Mul, &Value::Num(2.0)).unwrap();
        assert_eq!(v, list("1 2 1 2"));

        let err = Value::Num(-1.0).binary(Op::Mul, &"ab".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArg);

        let err = Value::Num(1e20).binary(Op::Mul, &"ab".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueOutOfRange);
        let err = list("1 2").binary(Op::Mul, &Value::Num(1e10)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueOutOfRange);
        let v = Value::from("").binary(Op::Mul, &Value::Num(1e20)).unwrap();
        assert_eq!(v, Value::from(""));
    }

    #[test]
    fn comparisons_need_matching_types() {
        assert_eq!(
            Value::from("abc").binary(Op::Lt, &"abd".into()).unwrap(),
            Value::Num(1.0)
        );
        assert_eq!(
            list("1 [2 3]").binary(Op::Eq, &list("1 [2 3]")).unwrap(),
            Value::Num(1.0)
        );
        let err = Value::Num(1.0).binary(Op::Eq, &"1".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArg);
        let err = list("1").binary(Op::Lt, &list("2")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArg);
    }

    #[test]
    fn list_concat_leaves_operands_alone() {
        let a = list("1 2");
        let Value::List(shared) = &a else { unreachable!() };
        let shared = shared.clone();
        let b = a.clone().binary(Op::Add, &list("3")).unwrap();
        assert_eq!(b, list("1 2 3"));
        assert_eq!(a, list("1 2"));
        assert_eq!(Value::List(shared), list("1 2"));
    }

    #[test]
    fn inversion() {
        assert_eq!(Value::Num(5.0).invert(1).unwrap(), Value::Num(0.0));
        assert_eq!(Value::Num(5.0).invert(2).unwrap(), Value::Num(1.0));
        assert_eq!(
            Value::from("x").invert(1).unwrap_err().kind,
            ErrorKind::CantInvert
        );
        assert_eq!(
            Value::from("x").negate().unwrap_err().kind,
            ErrorKind::CantNegate
        );
    }
}
