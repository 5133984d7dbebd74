//! Combination operators.

use std::fmt;
use std::ops::{Add, Mul};
use std::sync::Arc;

/// Built-in reduction operations. All of them are commutative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReduceOp {
    /// Sum of values
    Sum = 0,
    /// Maximum value
    Max = 1,
    /// Minimum value
    Min = 2,
    /// Product of values
    Prod = 3,
}

type CombineFn<T> = dyn Fn(&T, &T) -> T + Send + Sync;

/// An associative binary operator applied elementwise.
///
/// `combine(a, b)` always receives the operand contributed by lower ranks as
/// `a`. Operators flagged as non-commutative are never evaluated with their
/// operands swapped.
///
/// # Example
///
/// ```
/// use ferroscan::{Operator, ReduceOp};
///
/// let sum = Operator::<i64>::builtin(ReduceOp::Sum);
/// assert_eq!(sum.combine(&2, &3), 5);
///
/// let concat = Operator::<String>::concat();
/// assert!(!concat.is_commutative());
/// assert_eq!(concat.combine(&"A".into(), &"B".into()), "AB");
/// ```
pub struct Operator<T> {
    combine: Arc<CombineFn<T>>,
    commutative: bool,
    name: &'static str,
}

impl<T> Clone for Operator<T> {
    fn clone(&self) -> Self {
        Operator {
            combine: Arc::clone(&self.combine),
            commutative: self.commutative,
            name: self.name,
        }
    }
}

impl<T> fmt::Debug for Operator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("commutative", &self.commutative)
            .finish()
    }
}

impl<T> Operator<T> {
    /// Wrap a user function.
    pub fn new<F>(commutative: bool, combine: F) -> Self
    where
        F: Fn(&T, &T) -> T + Send + Sync + 'static,
    {
        Operator {
            combine: Arc::new(combine),
            commutative,
            name: "user",
        }
    }

    /// Wrap a user function whose operands may be swapped.
    pub fn commutative<F>(combine: F) -> Self
    where
        F: Fn(&T, &T) -> T + Send + Sync + 'static,
    {
        Self::new(true, combine)
    }

    /// Wrap a user function that must see operands in rank order.
    pub fn non_commutative<F>(combine: F) -> Self
    where
        F: Fn(&T, &T) -> T + Send + Sync + 'static,
    {
        Self::new(false, combine)
    }

    /// Whether operand order may be swapped.
    pub fn is_commutative(&self) -> bool {
        self.commutative
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `combine(earlier, later)`.
    pub fn combine(&self, earlier: &T, later: &T) -> T {
        (self.combine)(earlier, later)
    }

    /// `dst[i] := combine(src[i], dst[i])` for every element.
    ///
    /// Both slices must have the same length.
    pub fn reduce_into(&self, src: &[T], dst: &mut [T]) {
        debug_assert_eq!(src.len(), dst.len());
        for (s, d) in src.iter().zip(dst.iter_mut()) {
            *d = (self.combine)(s, &*d);
        }
    }
}

impl<T> Operator<T>
where
    T: Copy + PartialOrd + Add<Output = T> + Mul<Output = T> + Send + Sync + 'static,
{
    /// One of the built-in operations.
    pub fn builtin(op: ReduceOp) -> Self {
        let (combine, name): (Arc<CombineFn<T>>, &'static str) = match op {
            ReduceOp::Sum => (Arc::new(|a: &T, b: &T| *a + *b) as Arc<CombineFn<T>>, "sum"),
            ReduceOp::Prod => (Arc::new(|a: &T, b: &T| *a * *b) as Arc<CombineFn<T>>, "prod"),
            ReduceOp::Max => (
                Arc::new(|a: &T, b: &T| if *b > *a { *b } else { *a }) as Arc<CombineFn<T>>,
                "max",
            ),
            ReduceOp::Min => (
                Arc::new(|a: &T, b: &T| if *b < *a { *b } else { *a }) as Arc<CombineFn<T>>,
                "min",
            ),
        };
        Operator {
            combine,
            commutative: true,
            name,
        }
    }
}

impl<T> From<ReduceOp> for Operator<T>
where
    T: Copy + PartialOrd + Add<Output = T> + Mul<Output = T> + Send + Sync + 'static,
{
    fn from(op: ReduceOp) -> Self {
        Operator::builtin(op)
    }
}

impl Operator<String> {
    /// Ordered string concatenation, the canonical non-commutative operator.
    pub fn concat() -> Self {
        Operator {
            combine: Arc::new(|a: &String, b: &String| {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                out
            }),
            commutative: false,
            name: "concat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ops() {
        let sum = Operator::<f64>::builtin(ReduceOp::Sum);
        let max = Operator::<i32>::builtin(ReduceOp::Max);
        let min = Operator::<i32>::builtin(ReduceOp::Min);
        let prod = Operator::<u64>::builtin(ReduceOp::Prod);
        assert!((sum.combine(&1.5, &2.0) - 3.5).abs() < f64::EPSILON);
        assert_eq!(max.combine(&-3, &7), 7);
        assert_eq!(min.combine(&-3, &7), -3);
        assert_eq!(prod.combine(&6, &7), 42);
        assert!(sum.is_commutative());
    }

    #[test]
    fn reduce_into_keeps_operand_order() {
        let concat = Operator::<String>::concat();
        let src = vec!["a".to_string(), "b".to_string()];
        let mut dst = vec!["X".to_string(), "Y".to_string()];
        concat.reduce_into(&src, &mut dst);
        assert_eq!(dst, vec!["aX".to_string(), "bY".to_string()]);
    }

    #[test]
    fn user_operator_flags() {
        let op = Operator::<i32>::non_commutative(|a, b| a * 10 + b);
        assert!(!op.is_commutative());
        assert_eq!(op.combine(&1, &2), 12);
        assert_eq!(format!("{op:?}"), "Operator { name: \"user\", commutative: false }");
    }

    #[test]
    fn from_reduce_op() {
        let op: Operator<i64> = ReduceOp::Sum.into();
        assert_eq!(op.name(), "sum");
    }
}
