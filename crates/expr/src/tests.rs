use super::*;
use types::Value::*;

#[test]
fn comparisons_return_bool() {
    assert_eq!(eval_binary(&Int(1), BinaryOp::Lt, &Int(2)).unwrap(), Bool(true));
    assert_eq!(eval_binary(&Int(2), BinaryOp::Le, &Int(2)).unwrap(), Bool(true));
    assert_eq!(
        eval_binary(&Text("a".into()), BinaryOp::Ge, &Text("b".into())).unwrap(),
        Bool(false)
    );
}

#[test]
fn comparison_with_null_is_null() {
    assert_eq!(eval_binary(&Null, BinaryOp::Eq, &Int(1)).unwrap(), Null);
    assert_eq!(eval_binary(&Int(1), BinaryOp::Ne, &Null).unwrap(), Null);
}

#[test]
fn cross_family_comparison_is_a_type_error() {
    let err = eval_binary(&Int(1), BinaryOp::Eq, &Bool(true)).unwrap_err();
    assert!(matches!(err, common::DbError::Type(_)));
}

#[test]
fn three_valued_and_or() {
    assert_eq!(eval_binary(&Bool(false), BinaryOp::And, &Null).unwrap(), Bool(false));
    assert_eq!(eval_binary(&Null, BinaryOp::And, &Bool(true)).unwrap(), Null);
    assert_eq!(eval_binary(&Bool(true), BinaryOp::Or, &Null).unwrap(), Bool(true));
    assert_eq!(eval_binary(&Null, BinaryOp::Or, &Bool(false)).unwrap(), Null);
}

#[test]
fn integer_arithmetic_widens_when_needed() {
    assert_eq!(eval_binary(&Int(2), BinaryOp::Add, &Int(3)).unwrap(), Int(5));
    assert_eq!(
        eval_binary(&Int(i32::MAX), BinaryOp::Add, &Int(1)).unwrap(),
        BigInt(i32::MAX as i64 + 1)
    );
    assert_eq!(eval_binary(&BigInt(10), BinaryOp::Mul, &Int(3)).unwrap(), BigInt(30));
}

#[test]
fn division_by_zero_is_an_error() {
    assert!(eval_binary(&Int(1), BinaryOp::Div, &Int(0)).is_err());
    assert!(eval_binary(
        &Decimal { digits: 100, scale: 2 },
        BinaryOp::Div,
        &Int(0)
    )
    .is_err());
}

#[test]
fn decimal_arithmetic_keeps_scale() {
    let price = Decimal { digits: 1250, scale: 2 }; // 12.50
    assert_eq!(
        eval_binary(&price, BinaryOp::Add, &Decimal { digits: 50, scale: 2 }).unwrap(),
        Decimal { digits: 1300, scale: 2 }
    );
    assert_eq!(
        eval_binary(&price, BinaryOp::Mul, &Int(2)).unwrap(),
        Decimal { digits: 2500, scale: 2 }
    );
    assert_eq!(
        eval_binary(&price, BinaryOp::Div, &Int(5)).unwrap(),
        Decimal { digits: 250, scale: 2 }
    );
}

#[test]
fn negation_and_not() {
    assert_eq!(eval_unary(UnaryOp::Neg, &Int(5)).unwrap(), Int(-5));
    assert_eq!(eval_unary(UnaryOp::Not, &Bool(false)).unwrap(), Bool(true));
    assert_eq!(eval_unary(UnaryOp::Not, &Null).unwrap(), Null);
    assert!(eval_unary(UnaryOp::Not, &Int(1)).is_err());
}

#[test]
fn like_matches_percent_and_underscore() {
    let t = |s: &str| Text(s.into());
    assert_eq!(eval_like(&t("Alice"), &t("Al%"), false).unwrap(), Bool(true));
    assert_eq!(eval_like(&t("Alice"), &t("A_ice"), false).unwrap(), Bool(true));
    assert_eq!(eval_like(&t("Alice"), &t("%z%"), false).unwrap(), Bool(false));
    assert_eq!(eval_like(&t("Alice"), &t("%z%"), true).unwrap(), Bool(true));
    // regex metacharacters in the pattern are literal
    assert_eq!(eval_like(&t("a.c"), &t("a.c"), false).unwrap(), Bool(true));
    assert_eq!(eval_like(&t("abc"), &t("a.c"), false).unwrap(), Bool(false));
}

#[test]
fn like_with_null_is_null() {
    assert_eq!(eval_like(&Null, &Text("%".into()), false).unwrap(), Null);
    assert_eq!(eval_like(&Text("x".into()), &Null, false).unwrap(), Null);
}
