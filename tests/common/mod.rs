//! Shared fixtures for integration tests: a registry populated with the
//! small programs the tests trace.

#![allow(dead_code)]

use tapir::ir::{CfgBuilder, Expr};
use tapir::registry::{Method, ParamType, Registry};
use tapir::value::ValueType;
use tapir::FuncId;

pub struct Fixture {
    pub registry: Registry,
    /// f(x) = g(x) + 1
    pub f: FuncId,
    /// g(x) = 2 * x
    pub g: FuncId,
    /// branchy(x) = if x < 0 { neg(x) } else { x * 2 }
    pub branchy: FuncId,
    /// pow(x, n) = x^n by counting loop
    pub pow: FuncId,
    /// h(x, ys...) = x + length(ys)
    pub h: FuncId,
    /// wrap4(a, b, c, d) = h(a, b, c, d)
    pub wrap4: FuncId,
    /// amb(x): two methods that both match an Int argument
    pub amb: FuncId,
    /// mid(x) = amb(x)
    pub mid: FuncId,
    /// outer(x) = mid(x)
    pub outer: FuncId,
}

/// Install a `tracing` subscriber for test runs (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn fixture() -> Fixture {
    init_tracing();
    let mut registry = Registry::new();
    let add = registry.lookup("+").unwrap();
    let mul = registry.lookup("*").unwrap();
    let lt = registry.lookup("<").unwrap();
    let neg = registry.lookup("neg").unwrap();
    let length = registry.lookup("length").unwrap();

    // g(x) = 2 * x
    let g = registry.register("g", "user");
    {
        let mut b = CfgBuilder::new(1);
        let d = b.call(Expr::func(mul), vec![Expr::int(2), Expr::arg(0)]);
        b.ret(d);
        registry.add_cfg_method(g, vec![ParamType::Any], b.finish());
    }

    // f(x) = g(x) + 1
    let f = registry.register("f", "user");
    {
        let mut b = CfgBuilder::new(1);
        let gx = b.call(Expr::func(g), vec![Expr::arg(0)]);
        let s = b.call(Expr::func(add), vec![gx, Expr::int(1)]);
        b.ret(s);
        registry.add_cfg_method(f, vec![ParamType::Any], b.finish());
    }

    // branchy(x) = if x < 0 { neg(x) } else { x * 2 }
    let branchy = registry.register("branchy", "user");
    {
        let mut b = CfgBuilder::new(1);
        let cond = b.call(Expr::func(lt), vec![Expr::arg(0), Expr::int(0)]);
        b.goto_if_not(cond, 2);
        b.start_block();
        let negated = b.call(Expr::func(neg), vec![Expr::arg(0)]);
        b.ret(negated);
        b.start_block();
        let doubled = b.call(Expr::func(mul), vec![Expr::arg(0), Expr::int(2)]);
        b.ret(doubled);
        registry.add_cfg_method(branchy, vec![ParamType::Any], b.finish());
    }

    // pow(x, n): r = 1.0; i = 0; while i < n { r = r * x; i = i + 1 }; r
    let pow = registry.register("pow", "user");
    {
        let mut b = CfgBuilder::new(2);
        let entry_edge = b.pc();
        b.goto(1);
        b.start_block();
        let r = b.phi_placeholder();
        let i = b.phi_placeholder();
        let c = b.call(Expr::func(lt), vec![i.clone(), Expr::arg(1)]);
        b.goto_if_not(c, 3);
        b.start_block();
        let r2 = b.call(Expr::func(mul), vec![r.clone(), Expr::arg(0)]);
        let i2 = b.call(Expr::func(add), vec![i.clone(), Expr::int(1)]);
        let back_edge = b.pc();
        b.goto(1);
        b.start_block();
        b.ret(r.clone());
        b.set_phi_edges(&r, vec![(entry_edge, Expr::float(1.0)), (back_edge, r2)]);
        b.set_phi_edges(&i, vec![(entry_edge, Expr::int(0)), (back_edge, i2)]);
        registry.add_cfg_method(
            pow,
            vec![ParamType::Any, ParamType::Exact(ValueType::Int)],
            b.finish(),
        );
    }

    // h(x, ys...) = x + length(ys)
    let h = registry.register("h", "user");
    {
        let mut b = CfgBuilder::new(2);
        let n = b.call(Expr::func(length), vec![Expr::arg(1)]);
        let s = b.call(Expr::func(add), vec![Expr::arg(0), n]);
        b.ret(s);
        registry.add_method(
            h,
            Method::cfg_variadic(vec![ParamType::Any, ParamType::Any], b.finish()),
        );
    }

    // wrap4(a, b, c, d) = h(a, b, c, d)
    let wrap4 = registry.register("wrap4", "user");
    {
        let mut b = CfgBuilder::new(4);
        let call = b.call(
            Expr::func(h),
            vec![Expr::arg(0), Expr::arg(1), Expr::arg(2), Expr::arg(3)],
        );
        b.ret(call);
        registry.add_cfg_method(
            wrap4,
            vec![ParamType::Any; 4],
            b.finish(),
        );
    }

    // amb(x): both methods match an Int argument
    let amb = registry.register("amb", "user");
    for params in [
        vec![ParamType::Any],
        vec![ParamType::Exact(ValueType::Int)],
    ] {
        let mut b = CfgBuilder::new(1);
        let v = b.value(Expr::arg(0));
        b.ret(v);
        registry.add_cfg_method(amb, params, b.finish());
    }

    // mid(x) = amb(x); outer(x) = mid(x)
    let mid = registry.register("mid", "user");
    {
        let mut b = CfgBuilder::new(1);
        let v = b.call(Expr::func(amb), vec![Expr::arg(0)]);
        b.ret(v);
        registry.add_cfg_method(mid, vec![ParamType::Any], b.finish());
    }
    let outer = registry.register("outer", "user");
    {
        let mut b = CfgBuilder::new(1);
        let v = b.call(Expr::func(mid), vec![Expr::arg(0)]);
        b.ret(v);
        registry.add_cfg_method(outer, vec![ParamType::Any], b.finish());
    }

    Fixture {
        registry,
        f,
        g,
        branchy,
        pow,
        h,
        wrap4,
        amb,
        mid,
        outer,
    }
}
