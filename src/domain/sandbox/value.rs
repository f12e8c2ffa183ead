//! Runtime values seen by custom indicator code.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use chrono::NaiveDateTime;

use crate::domain::sandbox::ast::BinaryOp;

/// A timestamp-indexed column of optional values.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesValue {
    pub index: Rc<Vec<NaiveDateTime>>,
    pub values: Vec<Option<f64>>,
}

impl SeriesValue {
    pub fn new(index: Rc<Vec<NaiveDateTime>>, values: Vec<Option<f64>>) -> Self {
        SeriesValue { index, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same index, new values.
    pub fn with_values(&self, values: Vec<Option<f64>>) -> Self {
        SeriesValue {
            index: Rc::clone(&self.index),
            values,
        }
    }

    pub fn same_index(&self, other: &SeriesValue) -> bool {
        Rc::ptr_eq(&self.index, &other.index) || self.index == other.index
    }

    /// Defined values only.
    pub fn defined(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().flatten().copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableValue {
    pub index: Rc<Vec<NaiveDateTime>>,
    pub columns: BTreeMap<String, Rc<SeriesValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(Rc<Vec<Value>>),
    Series(Rc<SeriesValue>),
    Table(Rc<TableValue>),
    Map(Rc<BTreeMap<String, Value>>),
    Module(&'static str),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Series(_) => "series",
            Value::Table(_) => "table",
            Value::Map(_) => "map",
            Value::Module(_) => "module",
        }
    }

    /// Scalar numeric view; bools count as 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn truthy(&self) -> Result<bool, String> {
        match self {
            Value::None => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0 && !n.is_nan()),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::List(items) => Ok(!items.is_empty()),
            Value::Map(m) => Ok(!m.is_empty()),
            Value::Module(_) | Value::Table(_) => Ok(true),
            Value::Series(_) => Err(
                "the truth value of a series is ambiguous; use series.where or a reduction"
                    .to_string(),
            ),
        }
    }

    pub fn series(s: SeriesValue) -> Self {
        Value::Series(Rc::new(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }

    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write_number(f, *n),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "\"{}\"", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "]")
            }
            Value::Series(s) => write!(f, "<series len={}>", s.len()),
            Value::Table(t) => write!(f, "<table rows={}>", t.index.len()),
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Module(name) => write!(f, "<module {}>", name),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

pub(crate) fn finite(x: f64) -> Option<f64> {
    if x.is_finite() { Some(x) } else { None }
}

/// `right`'s values re-indexed onto `left`'s timestamps; unmatched
/// positions become missing.
pub(crate) fn align_values(
    left: &SeriesValue,
    right: &SeriesValue,
) -> Result<Vec<Option<f64>>, String> {
    if left.same_index(right) {
        return Ok(right.values.clone());
    }
    let mut by_ts: HashMap<NaiveDateTime, Option<f64>> = HashMap::with_capacity(right.len());
    for (ts, v) in right.index.iter().zip(right.values.iter()) {
        if by_ts.insert(*ts, *v).is_some() {
            return Err(format!("duplicate timestamp {} in series index", ts));
        }
    }
    Ok(left
        .index
        .iter()
        .map(|ts| by_ts.get(ts).copied().flatten())
        .collect())
}

/// Scalar arithmetic and comparison.
pub(crate) fn scalar_op(op: BinaryOp, a: f64, b: f64) -> Result<Value, String> {
    let n = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err("modulo by zero".to_string());
            }
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Eq => return Ok(Value::Bool(a == b)),
        BinaryOp::NotEq => return Ok(Value::Bool(a != b)),
        BinaryOp::Lt => return Ok(Value::Bool(a < b)),
        BinaryOp::Le => return Ok(Value::Bool(a <= b)),
        BinaryOp::Gt => return Ok(Value::Bool(a > b)),
        BinaryOp::Ge => return Ok(Value::Bool(a >= b)),
        BinaryOp::And | BinaryOp::Or => {
            return Err(format!("'{}' is not an arithmetic operator", op));
        }
    };
    Ok(Value::Number(n))
}

/// One element of a series operation. Missing operands, zero divisors and
/// non-finite results are all missing; comparisons yield 1.0 or 0.0.
pub(crate) fn element_op(op: BinaryOp, a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let (a, b) = (a?, b?);
    let flag = |c: bool| Some(if c { 1.0 } else { 0.0 });
    match op {
        BinaryOp::Add => finite(a + b),
        BinaryOp::Sub => finite(a - b),
        BinaryOp::Mul => finite(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                None
            } else {
                finite(a / b)
            }
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                None
            } else {
                finite(a - b * (a / b).floor())
            }
        }
        BinaryOp::Pow => finite(a.powf(b)),
        BinaryOp::Eq => flag(a == b),
        BinaryOp::NotEq => flag(a != b),
        BinaryOp::Lt => flag(a < b),
        BinaryOp::Le => flag(a <= b),
        BinaryOp::Gt => flag(a > b),
        BinaryOp::Ge => flag(a >= b),
        BinaryOp::And => flag(a != 0.0 && b != 0.0),
        BinaryOp::Or => flag(a != 0.0 || b != 0.0),
    }
}

/// Structural equality used by `==` on non-numeric operands.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn index(days: &[u32]) -> Rc<Vec<NaiveDateTime>> {
        Rc::new(
            days.iter()
                .map(|d| {
                    NaiveDate::from_ymd_opt(2024, 1, *d)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap()
                })
                .collect(),
        )
    }

    #[test]
    fn align_identical_index_is_positional() {
        let idx = index(&[1, 2, 3]);
        let a = SeriesValue::new(Rc::clone(&idx), vec![Some(1.0), Some(2.0), Some(3.0)]);
        let b = SeriesValue::new(idx, vec![Some(4.0), None, Some(6.0)]);
        assert_eq!(align_values(&a, &b).unwrap(), vec![Some(4.0), None, Some(6.0)]);
    }

    #[test]
    fn align_by_timestamp_fills_missing() {
        let a = SeriesValue::new(index(&[1, 2, 3]), vec![Some(1.0); 3]);
        let b = SeriesValue::new(index(&[2, 3, 4]), vec![Some(20.0), Some(30.0), Some(40.0)]);
        assert_eq!(align_values(&a, &b).unwrap(), vec![None, Some(20.0), Some(30.0)]);
    }

    #[test]
    fn align_rejects_duplicate_timestamps() {
        let a = SeriesValue::new(index(&[1, 2]), vec![Some(1.0); 2]);
        let b = SeriesValue::new(index(&[2, 2]), vec![Some(1.0); 2]);
        assert!(align_values(&a, &b).unwrap_err().contains("duplicate timestamp"));
    }

    #[test]
    fn scalar_division_by_zero_is_error() {
        assert!(scalar_op(BinaryOp::Div, 1.0, 0.0).is_err());
        assert_eq!(scalar_op(BinaryOp::Mod, -1.0, 3.0).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn element_division_by_zero_is_missing() {
        assert_eq!(element_op(BinaryOp::Div, Some(1.0), Some(0.0)), None);
        assert_eq!(element_op(BinaryOp::Gt, Some(2.0), Some(1.0)), Some(1.0));
        assert_eq!(element_op(BinaryOp::Add, None, Some(1.0)), None);
    }

    #[test]
    fn series_truthiness_is_an_error() {
        let s = Value::series(SeriesValue::new(index(&[1]), vec![Some(1.0)]));
        assert!(s.truthy().is_err());
        assert!(!Value::Number(0.0).truthy().unwrap());
        assert!(Value::str("x").truthy().unwrap());
    }

    #[test]
    fn display_values() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(
            Value::list(vec![Value::Number(1.0), Value::str("a")]).to_string(),
            "[1, \"a\"]"
        );
    }

    #[test]
    fn loose_equality_coerces_bools() {
        assert!(loose_eq(&Value::Bool(true), &Value::Number(1.0)));
        assert!(loose_eq(&Value::None, &Value::None));
        assert!(!loose_eq(&Value::str("a"), &Value::Number(1.0)));
    }
}
