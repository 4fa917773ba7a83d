//! End-to-end tests running whole programs through the full
//! lex/parse/eval pipeline.
use lark::common::source::Source;
use lark::common::Value;
use lark::{root_env, run_source, LarkError};

fn eval(src: &str) -> Result<Value, LarkError> {
    let env = root_env();
    run_source(Source::source(src), &env)
}

#[test]
fn closures_and_upvalue_mutation_build_a_counter() {
    let result = eval(
        r#"
        make_counter = {
            n = 0
            {
                ^n = n + 1
                n
            }
        }
        counter = make_counter[]
        counter[]
        counter[]
        counter[]
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(3));
}

#[test]
fn tuples_support_positional_and_named_members() {
    let result = eval(
        r#"
        point = (x: 3, y: 4)
        point.x * point.x + point.y * point.y
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(25));
}

#[test]
fn operator_overload_on_a_tuple_member() {
    let result = eval(
        r#"
        vec = (x: 1, y: 2)
        vec."+" = [other]{(x: vec.x + other.x, y: vec.y + other.y)}
        sum = vec + (x: 10, y: 20)
        sum.x + sum.y
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(33));
}

#[test]
fn loop_with_break_and_continue() {
    let result = eval(
        r#"
        total = 0
        i = 0
        loop true
            i = i + 1
            if i > 10 then break end
            if i % 2 == 0 then continue end
            total = total + i
        end
        total
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(25));
}

#[test]
fn recursive_closures_via_self_reference() {
    let result = eval(
        r#"
        fact = [n]{
            if n <= 1 then 1
            else n * fact[n - 1]
            end
        }
        fact[6]
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(720));
}

#[test]
fn by_reference_parameter_mutates_caller_slot() {
    let result = eval(
        r#"
        bump = [^slot]{slot = slot + 1}
        (
            x = 41
            bump[^x]
            x
        )
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn namespaces_scope_names_independently() {
    let result = eval(
        r#"
        namespace geometry {
            pi = 3
            area = [r]{pi * r * r}
        }
        geometry::area[2]
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(12));
}

#[test]
fn undefined_name_is_a_runtime_error_not_a_panic() {
    let err = eval("totally_unbound_name").unwrap_err();
    match err {
        LarkError::Runtime(_) => {},
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

#[test]
fn unterminated_block_is_a_syntax_error() {
    let err = eval("[n]{ 1").unwrap_err();
    match err {
        LarkError::Syntax(_) => {},
        other => panic!("expected a syntax error, got {:?}", other),
    }
}

#[test]
fn tuple_equality_ignores_named_members_but_not_position() {
    let result = eval("(1, 2, label: \"ignored\") == (1, 2)").unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn compound_assignment_accumulates() {
    let result = eval(
        r#"
        total = 0
        i = 1
        loop i <= 5
            total += i
            i += 1
        end
        total
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::Int(15));
}

#[test]
fn elif_chain_picks_the_first_matching_arm() {
    let result = eval(
        r#"
        classify = [n]{
            if n < 0 then "negative"
            elif n == 0 then "zero"
            else "positive"
            end
        }
        classify[0]
        "#,
    )
    .unwrap();
    assert_eq!(result, Value::String("zero".into()));
}
