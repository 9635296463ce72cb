//! 内置 calc 库
//!
//! A small native library shipped with the kernel. The CLI registers it by
//! default and the tests use it as their fixture.

use crate::error::{KernelError, KernelResult};
use crate::native::{Bindings, Invocation, MemberCall, NativeContext, NativeLibrary, Step};
use crate::value::{ObjectRef, Value};

const MANIFEST: &str = include_str!("manifest.json");

const GREETER: &str = "calc.Greeter";
const NUMBER: &str = "calc.Number";
const CALCULATOR: &str = "calc.Calculator";
const SHAPE: &str = "calc.Shape";
const CLOCK: &str = "calc.Clock";
const COLOR: &str = "calc.Color";

/// The `calc` assembly
#[derive(Debug, Default, Clone, Copy)]
pub struct CalcLibrary;

impl NativeLibrary for CalcLibrary {
    fn assembly(&self) -> &str {
        "calc"
    }

    fn manifest(&self) -> Option<&str> {
        Some(MANIFEST)
    }

    fn bind(&self, bindings: &mut Bindings) {
        bind_greeter(bindings);
        bind_number(bindings);
        bind_calculator(bindings);
        bind_shape(bindings);
        bind_clock(bindings);
    }
}

fn bind_greeter(b: &mut Bindings) {
    b.initializer(GREETER, |ctx, this, args| {
        if let Some(Value::String(greeting)) = args.first() {
            ctx.set_slot(this, "greeting", Value::String(greeting.clone()))?;
        }
        Ok(())
    })
    // Reads `greeting` through the router so a host override is honored.
    .method(GREETER, "greet", |_, inv| {
        let this = inv.receiver()?.clone();
        let name = inv.string(0)?.to_string();
        Step::call(MemberCall::get(&this, "greeting"), move |_, greeting| {
            let greeting = greeting?;
            Step::done(format!("{}, {name}", greeting.as_str().unwrap_or_default()))
        })
    })
    .method(GREETER, "welcome", |_, inv| {
        let this = inv.receiver()?.clone();
        Step::call(
            MemberCall::invoke(&this, "greet", inv.args.clone()),
            |_, greeted| {
                let greeted = greeted?;
                Step::done(format!("{}. Welcome!", greeted.as_str().unwrap_or_default()))
            },
        )
    });
}

fn bind_number(b: &mut Bindings) {
    b.initializer(NUMBER, |ctx, this, args| {
        let value = args.into_iter().next().unwrap_or_default();
        if value.as_f64().is_none() {
            return Err(KernelError::native(format!(
                "calc.Number expects a number, got {}",
                value.type_name()
            )));
        }
        ctx.set_slot(this, "value", value)
    })
    .method(NUMBER, "doubled", |ctx, inv| {
        let this = inv.receiver()?;
        let value = ctx.slot(this, "value")?;
        let doubled = arith(&value, &value, i64::checked_add, |a, b| a + b)?;
        let number = ctx.construct(NUMBER, vec![doubled])?;
        Step::done(number)
    });
}

fn bind_calculator(b: &mut Bindings) {
    b.initializer(CALCULATOR, |ctx, this, args| {
        if let Some(initial) = args.into_iter().next().filter(|v| !v.is_null()) {
            if initial.as_f64().is_none() {
                return Err(KernelError::native("calc.Calculator expects a numeric initial value"));
            }
            ctx.set_slot(this, "value", initial)?;
        }
        Ok(())
    })
    .getter(CALCULATOR, "display", |ctx, inv| {
        let value = ctx.slot(inv.receiver()?, "value")?;
        Step::done(format!("= {}", render(&value)))
    })
    .method(CALCULATOR, "add", |ctx, inv| {
        accumulate(ctx, &inv, |a, b| arith(a, b, i64::checked_add, |x, y| x + y))
    })
    .method(CALCULATOR, "mul", |ctx, inv| {
        accumulate(ctx, &inv, |a, b| arith(a, b, i64::checked_mul, |x, y| x * y))
    })
    .method(CALCULATOR, "sumAsync", |_, inv| {
        let this = inv.receiver()?.clone();
        let numbers = match inv.arg(0) {
            Value::Array(items) => items.clone(),
            other => {
                return Err(KernelError::malformed(format!(
                    "sumAsync expects an array, got {}",
                    other.type_name()
                )))
            }
        };
        sum_step(this, numbers, 0, Value::Int(0))
    })
    .method(CALCULATOR, "applyOperation", |ctx, inv| {
        let this = inv.receiver()?.clone();
        let Some(op) = inv.arg(0).as_object().cloned() else {
            return Err(KernelError::malformed("applyOperation expects an IOperation"));
        };
        let current = ctx.slot(&this, "value")?;
        let rhs = inv.arg(1).clone();
        Step::call(
            MemberCall::invoke(&op, "apply", vec![current, rhs]),
            move |ctx, result| {
                let result = result?;
                if result.as_f64().is_none() {
                    return Err(KernelError::native(format!(
                        "IOperation.apply returned {}, expected a number",
                        result.type_name()
                    )));
                }
                ctx.set_slot(&this, "value", result.clone())?;
                Step::done(result)
            },
        )
    });
}

/// One element per pump, so other tasks interleave with a long sum.
fn sum_step(
    this: ObjectRef,
    numbers: Vec<Value>,
    index: usize,
    total: Value,
) -> KernelResult<Step> {
    if index == numbers.len() {
        return Step::call(MemberCall::set(&this, "value", total.clone()), move |_, stored| {
            stored?;
            Step::done(total)
        });
    }
    let total = arith(&total, &numbers[index], i64::checked_add, |a, b| a + b)?;
    Step::yield_then(move |_, _| sum_step(this, numbers, index + 1, total))
}

fn bind_shape(b: &mut Bindings) {
    b.method(SHAPE, "describe", |_, inv| {
        let this = inv.receiver()?.clone();
        Step::call(MemberCall::get(&this, "name"), move |_, name| {
            let name = name?.as_str().unwrap_or_default().to_string();
            Step::call(MemberCall::invoke(&this, "area", vec![]), move |_, area| {
                Step::done(format!("{name} with area {}", render(&area?)))
            })
        })
    });
}

fn bind_clock(b: &mut Bindings) {
    b.method(CLOCK, "epoch", |_, _| Ok(Step::Done(Value::date_millis(0)?)))
        .method(CLOCK, "tick", |ctx, _| {
            let next = ctx
                .static_slot(CLOCK, "counter")
                .as_int()
                .unwrap_or(0)
                .checked_add(1)
                .ok_or_else(|| KernelError::native("Clock.counter overflowed"))?;
            ctx.set_static_slot(CLOCK, "counter", Value::Int(next));
            Step::done(next)
        })
        .method(CLOCK, "paint", |_, inv| match inv.arg(0) {
            Value::Enum(color) if color.fqn == COLOR => Step::done(Value::Enum(color.clone())),
            other => Err(KernelError::malformed(format!(
                "paint expects a {COLOR}, got {}",
                other.type_name()
            ))),
        });
}

fn accumulate(
    ctx: &mut NativeContext<'_>,
    inv: &Invocation,
    op: impl Fn(&Value, &Value) -> KernelResult<Value>,
) -> KernelResult<Step> {
    let this = inv.receiver()?;
    let current = ctx.slot(this, "value")?;
    let next = op(&current, inv.arg(0))?;
    ctx.set_slot(this, "value", next.clone())?;
    Ok(Step::Done(next))
}

/// Integer arithmetic while it fits, floating point otherwise
fn arith(
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> KernelResult<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        if let Some(r) = int_op(*x, *y) {
            return Ok(Value::Int(r));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Value::float(float_op(x, y)),
        _ => Err(KernelError::malformed(format!(
            "expected numbers, got {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        other => other.type_name().to_string(),
    }
}
