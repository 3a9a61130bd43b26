use batchflow_eval::{eval, parse, Decimal2, EvalError, ScalarValue, VarContext};
use chrono::DateTime;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn eval_str(src: &str, vars: &VarContext) -> Result<ScalarValue, EvalError> {
    eval(&parse(src).unwrap(), vars)
}

fn order_vars() -> VarContext {
    VarContext::new()
        .with("r", "order_id", 1001)
        .with("r", "qty", 3)
        .with("r", "price", Decimal2::from_cents(1999))
        .with("r", "discount", 0.1)
        .with("r", "status", "shipped")
        .with("r", "paid", true)
        .with(
            "r",
            "ts",
            DateTime::parse_from_rfc3339("2024-06-30T22:15:00+02:00").unwrap(),
        )
}

#[test]
fn decimal_line_total() {
    assert_eq!(
        eval_str("r.price * r.qty", &order_vars()).unwrap(),
        ScalarValue::Decimal(Decimal2::from_cents(5997))
    );
}

#[test]
fn float_discount_promotes_to_float() {
    let value = eval_str("r.price * r.qty * (1 - r.discount)", &order_vars()).unwrap();
    let ScalarValue::Float(v) = value else {
        panic!("expected float, got {value:?}");
    };
    assert!((v - 53.973).abs() < 1e-9);
}

#[test]
fn filter_style_predicates() {
    let vars = order_vars();
    assert_eq!(
        eval_str("r.status == \"shipped\" && r.paid && r.qty >= 3", &vars).unwrap(),
        ScalarValue::Bool(true)
    );
    assert_eq!(
        eval_str("strings.Contains(r.status, \"hip\") || r.qty > 10", &vars).unwrap(),
        ScalarValue::Bool(true)
    );
    assert_eq!(
        eval_str("re.MatchString(\"^s.*d$\", r.status)", &vars).unwrap(),
        ScalarValue::Bool(true)
    );
}

#[test]
fn string_building() {
    let vars = order_vars();
    assert_eq!(
        eval_str(
            "fmt.Sprintf(\"%s-%06d\", strings.ReplaceAll(r.status, \"ship\", \"SHIP\"), r.order_id)",
            &vars
        )
        .unwrap(),
        ScalarValue::from("SHIPped-001001")
    );
    assert_eq!(
        eval_str("string(r.order_id) + \"/\" + string(r.price)", &vars).unwrap(),
        ScalarValue::from("1001/19.99")
    );
    assert_eq!(
        eval_str("len(r.status)", &vars).unwrap(),
        ScalarValue::Int(7)
    );
}

#[test]
fn time_functions_compose() {
    let vars = order_vars();
    assert_eq!(
        eval_str("time.Format(r.ts, \"2006-01-02 15:04\")", &vars).unwrap(),
        ScalarValue::from("2024-06-30 22:15")
    );
    assert_eq!(
        eval_str(
            "time.Before(r.ts, time.Date(2024, time.July, 1, 0, 0, 0, 0, time.UTC))",
            &vars
        )
        .unwrap(),
        ScalarValue::Bool(true)
    );
    assert_eq!(
        eval_str(
            "time.DiffMilli(time.Date(2024, time.July, 1, 0, 0, 0, 0, time.FixedZone(\"CEST\", 7200)), r.ts)",
            &vars
        )
        .unwrap(),
        ScalarValue::Int(6_300_000)
    );
    assert_eq!(
        eval_str("time.Parse(\"2006-01-02\", \"2024-06-30\") < r.ts", &vars).unwrap(),
        ScalarValue::Bool(true)
    );
}

#[test]
fn iif_picks_branch() {
    let vars = order_vars();
    assert_eq!(
        eval_str("string.iif(r.qty > 2, \"bulk\", \"single\")", &vars).unwrap(),
        ScalarValue::from("bulk")
    );
    assert_eq!(
        eval_str("decimal2.iif(r.paid, r.price, decimal2(0))", &vars).unwrap(),
        ScalarValue::Decimal(Decimal2::from_cents(1999))
    );
}

#[test]
fn conversions() {
    let vars = order_vars();
    assert_eq!(
        eval_str("int(\"12\") + int(r.price)", &vars).unwrap(),
        ScalarValue::Int(31)
    );
    assert_eq!(
        eval_str("float(r.qty) / 2", &vars).unwrap(),
        ScalarValue::Float(1.5)
    );
    assert_eq!(
        eval_str("decimal2(\"2.345\")", &vars).unwrap(),
        ScalarValue::Decimal(Decimal2::from_cents(235))
    );
}

#[test]
fn errors_surface_with_context() {
    let vars = order_vars();
    assert_eq!(
        eval_str("len(r.qty)", &vars).unwrap_err().to_string(),
        "cannot evaluate len(): expected string arg, got 3(int)"
    );
    assert_eq!(
        eval_str("strings.Contains(r.status)", &vars)
            .unwrap_err()
            .to_string(),
        "cannot evaluate strings.Contains(), requires 2 args, 1 supplied"
    );
    assert_eq!(
        eval_str("r.paid + 1", &vars).unwrap_err().to_string(),
        "type error: cannot perform binary arithmetic op, incompatible arg types 'true(bool)' + '1(int)'"
    );
    assert!(matches!(
        eval_str("-r.status", &vars).unwrap_err(),
        EvalError::Type(_)
    ));
}

proptest! {
    #[test]
    fn decimal_arithmetic_is_exact(a in -1_000_000_000i64..1_000_000_000, b in -1_000_000_000i64..1_000_000_000) {
        let vars = VarContext::new()
            .with("r", "a", Decimal2::from_cents(a))
            .with("r", "b", Decimal2::from_cents(b));
        prop_assert_eq!(
            eval_str("r.a + r.b", &vars).unwrap(),
            ScalarValue::Decimal(Decimal2::from_cents(a + b))
        );
        prop_assert_eq!(
            eval_str("r.a - r.b > 0", &vars).unwrap(),
            ScalarValue::Bool(a > b)
        );
    }
}
