//! The seed end-to-end scenarios from the language's testable-properties
//! section, asserted against captured stdout, plus property tests for
//! the section's universal invariants.
use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use lark::common::source::Source;
use lark::common::Value;
use lark::construct::env::Env;
use lark::{root_env, run_source};

/// Runs `src` against a fresh root environment with output redirected
/// into an in-memory buffer, returning what the program wrote to
/// `print`/`println` as a `String`.
fn run_capturing(src: &str) -> String {
    let env = root_env();
    let sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    env.install_output(sink.clone());
    run_source(Source::source(src), &env).unwrap();
    String::from_utf8(sink.borrow().clone()).unwrap()
}

#[test]
fn scenario_1_arithmetic_and_precedence() {
    assert_eq!(run_capturing("print[1 + 2 * 3]"), "7\n");
}

#[test]
fn scenario_2_closure_and_capture() {
    let out = run_capturing(
        r#"
        make = [n]{ [x]{ x + n } }
        add2 = make[2]
        print[add2[5]]
        "#,
    );
    assert_eq!(out, "7\n");
}

#[test]
fn scenario_2_leaves_no_slots_behind() {
    let env = root_env();
    let sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    env.install_output(sink);
    let before = env.live_slots();
    run_source(
        Source::source(
            r#"
            make = [n]{ [x]{ x + n } }
            add2 = make[2]
            print[add2[5]]
            "#,
        ),
        &env,
    )
    .unwrap();
    // only the two root bindings (`make`, `add2`) remain; every
    // intermediate call frame and closure was torn down.
    assert_eq!(env.live_slots(), before + 2);
}

#[test]
fn scenario_3_upvalue_write() {
    let out = run_capturing(
        r#"
        counter = { n = 0; [] { ^n = n + 1; n } }
        c = counter[]
        print[c[]]; print[c[]]
        "#,
    );
    assert_eq!(out, "1\n2\n");
}

#[test]
fn scenario_4_tuple_named_and_positional() {
    let out = run_capturing(
        r#"
        t = (10, 20, name: "hi")
        print[t.0]; print[t.1]; print[t.name]
        "#,
    );
    assert_eq!(out, "10\n20\nhi\n");
}

#[test]
fn scenario_5_loop_with_break_and_continue() {
    let out = run_capturing(
        r#"
        i = 0; s = 0
        loop i < 10
            i = i + 1
            if i == 3 then continue end
            if i == 8 then break end
            s = s + i
        end
        print[s]
        "#,
    );
    assert_eq!(out, "25\n");
}

#[test]
fn scenario_6_by_reference_parameter() {
    let out = run_capturing(
        r#"
        incr = [^r]{ ^r = r + 1 }
        x = 5; incr[^x]; print[x]
        "#,
    );
    assert_eq!(out, "6\n");
}

proptest! {
    /// Invariant 1: after a terminating program finishes, the root
    /// environment's heap holds exactly the slots its own top-level
    /// bindings allocated — no intermediate call frame or loop body
    /// leaves a dangling slot behind, no matter how many iterations
    /// ran.
    #[test]
    fn no_slot_leak_after_termination(iterations in 0i64..200) {
        let env = root_env();
        let src = format!(
            "i = 0\nloop i < {}\n  i = i + 1\nend\n",
            iterations,
        );
        run_source(Source::source(&src), &env).unwrap();
        prop_assert_eq!(env.live_slots(), 1);
    }

    /// Invariant 4: double negation normalizes any value to its
    /// boolean truthiness.
    #[test]
    fn double_negation_normalizes_truthiness(n in -1000i64..1000) {
        let env = root_env();
        let src = format!("!!{}", n);
        let result = run_source(Source::source(&src), &env).unwrap();
        prop_assert_eq!(result, Value::Bool(n != 0));
    }

    #[test]
    fn double_negation_on_strings(s in "[a-zA-Z0-9]{0,8}") {
        let env = root_env();
        let src = format!("!!\"{}\"", s);
        let result = run_source(Source::source(&src), &env).unwrap();
        prop_assert_eq!(result, Value::Bool(!s.is_empty()));
    }

    /// Invariant 3: a tuple's `copy()` is equal to the original under
    /// `==`, but mutating the copy's positional slot leaves the
    /// original untouched — they share no mutable state.
    #[test]
    fn tuple_copy_is_equal_but_independent(a in -500i64..500, b in -500i64..500) {
        let env = root_env();
        let src = format!(
            r#"
            t = ({}, {})
            u = copy[t]
            eq = t == u
            (eq, u)
            "#,
            a, b,
        );
        let result = run_source(Source::source(&src), &env).unwrap();
        match result {
            Value::Tuple(cell) => {
                let tuple = cell.borrow();
                prop_assert_eq!(tuple.positional[0].clone(), Value::Bool(true));
            },
            other => prop_assert!(false, "expected a tuple, got {:?}", other.type_tag()),
        }
    }
}

/// Invariant 2: a closure's captured slots' refcounts return to their
/// pre-construction value once every reference to the closure is
/// dropped. Exercised at the `Env`/`Pval` level rather than through
/// source text, since refcounts aren't directly observable from Lark.
#[test]
fn capture_refcount_returns_to_baseline_after_closure_is_dropped() {
    use lark::common::closure::{Arg, Body, Param, Pval};
    use lark::common::span::Span;

    let env = Env::root();
    let span = Span::empty();
    let r = env.new_assign("n", Value::Int(0), &span).unwrap();
    let baseline = env.live_slots();

    let body = Body::Native(Rc::new(|_: &Env, _: &[Arg], _: &Span| Ok(Value::Nil)));
    let pval = Pval::new(vec![Param { name: "n".to_string(), by_ref: true }], env.clone(), vec![r], body);
    assert_eq!(env.live_slots(), baseline);

    drop(pval);
    assert_eq!(env.live_slots(), baseline);
}
