use batchflow_eval::{
    detect_root_agg, eval_with_aggregate, parse, AggFunc, AggState, Decimal2, ScalarValue,
    VarContext,
};
use pretty_assertions::assert_eq;

fn run(src: &str, rows: &[(i64, &str)]) -> ScalarValue {
    let expr = parse(src).unwrap();
    let mut state = AggState::for_expr(&expr).unwrap().unwrap();
    let mut last = None;
    for (amount, region) in rows {
        let vars = VarContext::new()
            .with("l", "amount", *amount)
            .with("l", "region", *region)
            .with("r", "factor", Decimal2::from_cents(150));
        last = Some(eval_with_aggregate(&expr, &vars, &mut state).unwrap());
    }
    last.unwrap()
}

const ROWS: &[(i64, &str)] = &[(10, "east"), (25, "west"), (5, "east"), (40, "north")];

#[test]
fn sum_over_mixed_operands_promotes_to_decimal() {
    assert_eq!(
        run("sum(l.amount * r.factor)", ROWS),
        ScalarValue::Decimal(Decimal2::from_cents(12000))
    );
}

#[test]
fn conditional_forms() {
    assert_eq!(
        run("sum_if(l.amount, l.region == \"east\")", ROWS),
        ScalarValue::Int(15)
    );
    assert_eq!(run("count_if(l.amount > 7)", ROWS), ScalarValue::Int(3));
    assert_eq!(
        run("max_if(l.region, l.amount < 30)", ROWS),
        ScalarValue::from("west")
    );
    assert_eq!(
        run("string_agg_if(l.region, \"|\", l.amount >= 10)", ROWS),
        ScalarValue::from("east|west|north")
    );
}

#[test]
fn avg_min_max() {
    assert_eq!(run("avg(l.amount)", ROWS), ScalarValue::Int(20));
    assert_eq!(run("min(l.amount)", ROWS), ScalarValue::Int(5));
    assert_eq!(run("max(l.region)", ROWS), ScalarValue::from("west"));
    assert_eq!(run("min(l.region)", ROWS), ScalarValue::from("east"));
}

#[test]
fn aggregate_inside_arithmetic_still_accumulates() {
    // Only the root decides grouping, but a nested aggregate still uses the state.
    let expr = parse("sum(l.amount) * 2").unwrap();
    assert_eq!(detect_root_agg(&expr), None);
    let mut state = AggState::new();
    let mut last = ScalarValue::Int(0);
    for (amount, _) in ROWS {
        let vars = VarContext::new().with("l", "amount", *amount);
        last = eval_with_aggregate(&expr, &vars, &mut state).unwrap();
    }
    assert_eq!(last, ScalarValue::Int(160));
    assert_eq!(state.bound_function(), Some(AggFunc::Sum));
}

#[test]
fn two_aggregates_in_one_tree_are_rejected() {
    let expr = parse("sum(l.amount) + count()").unwrap();
    let mut state = AggState::new();
    let vars = VarContext::new().with("l", "amount", 1);
    let err = eval_with_aggregate(&expr, &vars, &mut state).unwrap_err();
    assert_eq!(
        err.to_string(),
        "more than one aggregate function is not allowed, extra count() found besides already used sum()"
    );
}

#[test]
fn non_aggregate_fields_have_no_state() {
    assert!(AggState::for_expr(&parse("l.amount + 1").unwrap())
        .unwrap()
        .is_none());
}
