use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};

/// Column type as declared in a schema.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int,
    BigInt,
    Decimal { precision: u8, scale: u8 },
    Varchar { max_len: u32 },
    Text,
    Date,
    Bool,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Int => write!(f, "INT"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            SqlType::Varchar { max_len } => write!(f, "VARCHAR({max_len})"),
            SqlType::Text => write!(f, "TEXT"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Bool => write!(f, "BOOL"),
        }
    }
}

/// Runtime value. One arm per declarable column type, plus `Null`.
///
/// `Decimal` is fixed-point: `digits` is the value scaled by `10^scale`.
/// `Date` is days since 1970-01-01.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i32),
    BigInt(i64),
    Decimal { digits: i64, scale: u8 },
    Varchar(String),
    Text(String),
    Date(i32),
    Bool(bool),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integral view used by arithmetic and aggregate folding.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// SQL comparison. `None` when the operands belong to different type
    /// families or either side is NULL (three-valued logic is handled by
    /// the expression evaluator, not here).
    pub fn cmp_compatible(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (BigInt(a), BigInt(b)) => Some(a.cmp(b)),
            (Int(a), BigInt(b)) => Some((*a as i64).cmp(b)),
            (BigInt(a), Int(b)) => Some(a.cmp(&(*b as i64))),
            (Decimal { digits: a, scale: sa }, Decimal { digits: b, scale: sb }) => {
                let widest = *sa.max(sb);
                Some(scaled(*a, *sa, widest).cmp(&scaled(*b, *sb, widest)))
            }
            (Decimal { digits, scale }, rhs) if rhs.as_i64().is_some() => {
                let rhs = rhs.as_i64()? as i128 * pow10(*scale);
                Some((*digits as i128).cmp(&rhs))
            }
            (lhs, Decimal { digits, scale }) if lhs.as_i64().is_some() => {
                let lhs = lhs.as_i64()? as i128 * pow10(*scale);
                Some(lhs.cmp(&(*digits as i128)))
            }
            (Varchar(a) | Text(a), Varchar(b) | Text(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_compatible(&self, other: &Value) -> Option<bool> {
        self.cmp_compatible(other).map(|o| o == Ordering::Equal)
    }

    /// Coerce into the given column type, returning `None` if the value
    /// cannot represent it (range overflow, length overflow, bad date text).
    /// NULL coerces to anything; nullability is the schema's concern.
    pub fn coerce(&self, ty: &SqlType) -> Option<Value> {
        use Value::*;
        match (self, ty) {
            (Null, _) => Some(Null),
            (Int(v), SqlType::Int) => Some(Int(*v)),
            (BigInt(v), SqlType::Int) => i32::try_from(*v).ok().map(Int),
            (Int(v), SqlType::BigInt) => Some(BigInt(*v as i64)),
            (BigInt(v), SqlType::BigInt) => Some(BigInt(*v)),
            (Int(v), SqlType::Decimal { scale, .. }) => {
                decimal_from_i128(*v as i128 * pow10(*scale), *scale)
            }
            (BigInt(v), SqlType::Decimal { scale, .. }) => {
                decimal_from_i128(*v as i128 * pow10(*scale), *scale)
            }
            (Decimal { digits, scale }, SqlType::Decimal { scale: target, .. }) => {
                if scale == target {
                    Some(Decimal { digits: *digits, scale: *scale })
                } else if scale < target {
                    decimal_from_i128(*digits as i128 * pow10(target - scale), *target)
                } else {
                    let div = pow10(scale - target);
                    let v = *digits as i128;
                    if v % div != 0 {
                        return None;
                    }
                    decimal_from_i128(v / div, *target)
                }
            }
            (Varchar(s) | Text(s), SqlType::Varchar { max_len }) => {
                if s.chars().count() as u32 > *max_len {
                    return None;
                }
                Some(Varchar(s.clone()))
            }
            (Varchar(s) | Text(s), SqlType::Text) => Some(Text(s.clone())),
            (Varchar(s) | Text(s), SqlType::Date) => Value::date_from_str(s),
            (Date(d), SqlType::Date) => Some(Date(*d)),
            (Bool(b), SqlType::Bool) => Some(Bool(*b)),
            _ => None,
        }
    }

    /// Canonical representation for hashing: two non-null values that
    /// compare equal under [`Value::cmp_compatible`] map to the same
    /// canonical value, so hash tables keyed on it agree with SQL
    /// equality. Numerics collapse to `BigInt` (or a trailing-zero-free
    /// `Decimal`), and the string arms collapse to `Text`.
    pub fn canonical(&self) -> Value {
        match self {
            Value::Int(v) => Value::BigInt(*v as i64),
            Value::Decimal { digits, scale } => {
                let (mut digits, mut scale) = (*digits, *scale);
                while scale > 0 && digits % 10 == 0 {
                    digits /= 10;
                    scale -= 1;
                }
                if scale == 0 {
                    Value::BigInt(digits)
                } else {
                    Value::Decimal { digits, scale }
                }
            }
            Value::Varchar(s) => Value::Text(s.clone()),
            other => other.clone(),
        }
    }

    /// Parse a `YYYY-MM-DD` literal into a `Date` value.
    pub fn date_from_str(s: &str) -> Option<Value> {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        Some(Value::Date((date - epoch).num_days() as i32))
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::BigInt(_) => 3,
            Value::Decimal { .. } => 4,
            Value::Date(_) => 5,
            Value::Varchar(_) => 6,
            Value::Text(_) => 7,
        }
    }
}

fn pow10(scale: u8) -> i128 {
    10i128.pow(scale as u32)
}

fn scaled(digits: i64, from: u8, to: u8) -> i128 {
    digits as i128 * pow10(to - from)
}

fn decimal_from_i128(digits: i128, scale: u8) -> Option<Value> {
    i64::try_from(digits)
        .ok()
        .map(|digits| Value::Decimal { digits, scale })
}

/// Total order used by index keys. All values of one indexed column share a
/// variant after coercion, so cross-variant pairs fall back to a stable
/// variant rank with NULL ordered first.
impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        match self.cmp_compatible(other) {
            Some(ord) => ord,
            None => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Decimal { digits, scale } => {
                if *scale == 0 {
                    return write!(f, "{digits}");
                }
                let sign = if *digits < 0 { "-" } else { "" };
                let abs = digits.unsigned_abs();
                let div = 10u64.pow(*scale as u32);
                write!(f, "{sign}{}.{:0width$}", abs / div, abs % div, width = *scale as usize)
            }
            Value::Varchar(s) | Value::Text(s) => write!(f, "{s}"),
            Value::Date(days) => {
                let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch");
                let date = epoch + Duration::days(*days as i64);
                write!(f, "{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
            }
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn comparisons_widen_within_the_numeric_family() {
        assert_eq!(Value::Int(1).cmp_compatible(&Value::BigInt(2)), Some(Less));
        assert_eq!(Value::BigInt(5).cmp_compatible(&Value::Int(5)), Some(Equal));
        assert_eq!(
            Value::Decimal { digits: 1250, scale: 2 }.cmp_compatible(&Value::Int(12)),
            Some(Greater)
        );
    }

    #[test]
    fn comparisons_reject_cross_family_operands() {
        assert_eq!(Value::Int(1).cmp_compatible(&Value::Text("1".into())), None);
        assert_eq!(Value::Bool(true).cmp_compatible(&Value::Int(1)), None);
    }

    #[test]
    fn null_never_compares() {
        assert_eq!(Value::Null.cmp_compatible(&Value::Int(1)), None);
        assert_eq!(Value::Null.cmp_compatible(&Value::Null), None);
        assert_eq!(Value::Null.eq_compatible(&Value::Null), None);
    }

    #[test]
    fn truthiness_is_strict() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(1).as_bool(), None);
        assert_eq!(Value::Text("true".into()).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn coercion_checks_ranges_and_lengths() {
        assert_eq!(Value::BigInt(42).coerce(&SqlType::Int), Some(Value::Int(42)));
        assert_eq!(Value::BigInt(i64::MAX).coerce(&SqlType::Int), None);
        assert_eq!(
            Value::Text("ab".into()).coerce(&SqlType::Varchar { max_len: 2 }),
            Some(Value::Varchar("ab".into()))
        );
        assert_eq!(
            Value::Text("abc".into()).coerce(&SqlType::Varchar { max_len: 2 }),
            None
        );
    }

    #[test]
    fn integers_scale_into_decimals() {
        assert_eq!(
            Value::Int(7).coerce(&SqlType::Decimal { precision: 10, scale: 2 }),
            Some(Value::Decimal { digits: 700, scale: 2 })
        );
        assert_eq!(
            Value::Decimal { digits: 700, scale: 2 }
                .coerce(&SqlType::Decimal { precision: 10, scale: 0 }),
            Some(Value::Decimal { digits: 7, scale: 0 })
        );
        assert_eq!(
            Value::Decimal { digits: 705, scale: 2 }
                .coerce(&SqlType::Decimal { precision: 10, scale: 1 }),
            None
        );
    }

    #[test]
    fn date_round_trips_through_text() {
        let date = Value::date_from_str("2024-03-01").unwrap();
        assert_eq!(date, Value::Date(19783));
        assert_eq!(date.to_string(), "2024-03-01");
        assert_eq!(Value::Date(0).to_string(), "1970-01-01");
        assert_eq!(Value::date_from_str("not-a-date"), None);
    }

    #[test]
    fn decimal_display_keeps_the_declared_scale() {
        assert_eq!(Value::Decimal { digits: 1205, scale: 2 }.to_string(), "12.05");
        assert_eq!(Value::Decimal { digits: -5, scale: 2 }.to_string(), "-0.05");
    }

    #[test]
    fn canonical_agrees_with_compatible_equality() {
        // one numeric family, one canonical form
        assert_eq!(Value::Int(5).canonical(), Value::BigInt(5));
        assert_eq!(Value::BigInt(5).canonical(), Value::BigInt(5));
        assert_eq!(Value::Decimal { digits: 500, scale: 2 }.canonical(), Value::BigInt(5));
        assert_eq!(
            Value::Decimal { digits: 1230, scale: 3 }.canonical(),
            Value::Decimal { digits: 123, scale: 2 }
        );
        assert_eq!(Value::Decimal { digits: 0, scale: 2 }.canonical(), Value::BigInt(0));

        // string arms collapse; unequal values stay distinct
        assert_eq!(Value::Varchar("a".into()).canonical(), Value::Text("a".into()));
        assert_ne!(Value::Int(5).canonical(), Value::Int(6).canonical());
        assert_ne!(
            Value::Decimal { digits: 123, scale: 2 }.canonical(),
            Value::BigInt(123)
        );
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Int(-42),
            Value::BigInt(1 << 40),
            Value::Decimal { digits: 999, scale: 2 },
            Value::Varchar("Ada".into()),
            Value::Date(19783),
            Value::Bool(true),
            Value::Null,
        ];
        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(vals, back);
    }

    proptest! {
        // Order symmetry: if a < b, then b > a
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
            let a = Value::BigInt(i);
            let b = Value::BigInt(j);
            match (a.cmp_compatible(&b), b.cmp_compatible(&a)) {
                (Some(o1), Some(o2)) => prop_assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(false, "same-type ints must compare"),
            }
        }

        // Total order agrees with SQL comparison wherever both are defined
        #[test]
        fn total_order_refines_sql_order(i in any::<i32>(), j in any::<i32>()) {
            let a = Value::Int(i);
            let b = Value::Int(j);
            prop_assert_eq!(a.cmp(&b), a.cmp_compatible(&b).unwrap());
        }

        // Text comparisons align with standard String ordering
        #[test]
        fn text_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Text(a.clone());
            let vb = Value::Text(b.clone());
            prop_assert_eq!(va.cmp_compatible(&vb), Some(a.cmp(&b)));
        }
    }
}
