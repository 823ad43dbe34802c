// Integration tests for the compiler + VM pipeline, one per testable
// property.

mod common;

use common::{expect_number, expect_string, run_source};

#[test]
fn closure_captures_a_fresh_binding_per_loop_iteration() {
    let src = r#"
        let fs = [];
        for (let i = 0; i < 3; i++) {
            fs.push(() => i);
        }
        return "" + fs[0]() + fs[1]() + fs[2]();
    "#;
    assert_eq!(expect_string(src), "012");
}

#[test]
fn private_field_is_readable_through_a_method_but_not_directly() {
    let readable = r#"
        class A {
            private var s = 1;
            get() { return this.s; }
        }
        let a = new A();
        return a.get();
    "#;
    assert_eq!(expect_number(readable), 1.0);

    let forbidden = r#"
        class A {
            private var s = 1;
            get() { return this.s; }
        }
        let a = new A();
        return a.s;
    "#;
    assert!(run_source(forbidden).is_err());
}

#[test]
fn subclass_inherits_superclass_methods() {
    let src = r#"
        class P { greet() { return "p"; } }
        class C extends P {}
        return new C().greet();
    "#;
    assert_eq!(expect_string(src), "p");
}

#[test]
fn finally_runs_after_a_caught_exception() {
    let src = r#"
        let log = "";
        try {
            throw "x";
        } catch (e) {
            log = log + "c" + e;
        } finally {
            log = log + "f";
        }
        return log;
    "#;
    assert_eq!(expect_string(src), "cxf");
}

#[test]
fn new_promise_resolves_through_its_executor() {
    let src = r#"
        let p = new Promise((resolve, reject) => { resolve(42); });
        return await p;
    "#;
    assert_eq!(expect_number(src), 42.0);
}

#[test]
fn rest_and_default_parameters() {
    let src = r#"
        function f(a, b = 10, ...r) { return a + b + r.length; }
        return "" + f(1) + f(1, 2, 3, 4);
    "#;
    assert_eq!(expect_string(src), "115");
}
