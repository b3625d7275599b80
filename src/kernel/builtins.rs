//! Builtin functions available in every kernel

use super::value::{required, Args, CellError, EvalResult, NativeContext, NativeFunction, Value};
use crate::posterior::{load_posteriors, save_posteriors};
use std::path::Path;
use std::sync::Arc;

/// All builtins, keyed by name
pub const BUILTINS: &[NativeFunction] = &[
    NativeFunction { name: "print", call: print },
    NativeFunction { name: "len", call: len },
    NativeFunction { name: "str", call: str_ },
    NativeFunction { name: "int", call: int },
    NativeFunction { name: "float", call: float },
    NativeFunction { name: "type", call: type_ },
    NativeFunction { name: "range", call: range },
    NativeFunction { name: "abs", call: abs },
    NativeFunction { name: "min", call: min },
    NativeFunction { name: "max", call: max },
    NativeFunction { name: "sum", call: sum },
    NativeFunction { name: "fail", call: fail },
    NativeFunction { name: "with_extension", call: with_extension },
    NativeFunction { name: "save_posteriors", call: save_posteriors_ },
    NativeFunction { name: "load_posteriors", call: load_posteriors_ },
];

/// Look up a builtin by name
#[must_use]
pub fn lookup(name: &str) -> Option<NativeFunction> {
    BUILTINS.iter().find(|b| b.name == name).copied()
}

fn single(args: Args, function: &str) -> EvalResult<Value> {
    let value = args.bind(function, &["x"])?.pop().flatten();
    required(value, function, "x")
}

fn print(ctx: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (name, value) in &args.keyword {
        match name.as_str() {
            "sep" => sep = value.expect_str("sep")?.to_string(),
            "end" => end = value.expect_str("end")?.to_string(),
            other => {
                return Err(CellError::type_error(format!(
                    "print() got an unexpected keyword argument '{other}'"
                )))
            }
        }
    }
    let parts: Vec<String> = args.positional.iter().map(ToString::to_string).collect();
    ctx.stdout.push_str(&parts.join(&sep));
    ctx.stdout.push_str(&end);
    Ok(Value::None)
}

fn len(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let n = match single(args, "len")? {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Record(fields) => fields.len(),
        Value::Trace(trace) => trace.num_rows(),
        other => {
            return Err(CellError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    i64::try_from(n)
        .map(Value::Int)
        .map_err(|_| CellError::value("length overflows int"))
}

fn str_(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    Ok(Value::Str(single(args, "str")?.to_string()))
}

#[allow(clippy::cast_possible_truncation)]
fn int(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    match single(args, "int")? {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| CellError::value(format!("invalid literal for int(): '{s}'"))),
        other => Err(CellError::type_error(format!(
            "int() argument must be a number or string, not {}",
            other.type_name()
        ))),
    }
}

fn float(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    match single(args, "float")? {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| CellError::value(format!("could not convert string to float: '{s}'"))),
        other => other.expect_f64("float() argument").map(Value::Float),
    }
}

fn type_(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    Ok(Value::Str(single(args, "type")?.type_name().to_string()))
}

fn range(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let bound = args.bind("range", &["start", "stop"])?;
    let (start, stop) = match (bound[0].as_ref(), bound[1].as_ref()) {
        (Some(stop), None) => (0, stop.expect_int("range() bound")?),
        (Some(start), Some(stop)) => (
            start.expect_int("range() bound")?,
            stop.expect_int("range() bound")?,
        ),
        _ => return Err(CellError::type_error("range() expected 1 or 2 arguments")),
    };
    Ok(Value::List((start..stop).map(Value::Int).collect()))
}

fn abs(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    match single(args, "abs")? {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| CellError::new("OverflowError", "integer overflow in abs()")),
        other => Ok(Value::Float(other.expect_f64("abs() argument")?.abs())),
    }
}

fn numbers(args: Args, function: &str) -> EvalResult<Vec<Value>> {
    if !args.keyword.is_empty() {
        return Err(CellError::type_error(format!(
            "{function}() takes no keyword arguments"
        )));
    }
    let mut items = args.positional;
    if items.len() == 1 && matches!(items[0], Value::List(_)) {
        if let Some(Value::List(inner)) = items.pop() {
            items = inner;
        }
    }
    for item in &items {
        item.expect_f64(&format!("{function}() argument"))?;
    }
    Ok(items)
}

fn extreme(args: Args, function: &str, pick_greater: bool) -> EvalResult<Value> {
    let items = numbers(args, function)?;
    let mut iter = items.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| CellError::value(format!("{function}() arg is an empty sequence")))?;
    Ok(iter.fold(first, |best, v| {
        let (b, x) = (best.as_f64().unwrap_or(f64::NAN), v.as_f64().unwrap_or(f64::NAN));
        if (x > b) == pick_greater && x != b {
            v
        } else {
            best
        }
    }))
}

fn min(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    extreme(args, "min", false)
}

fn max(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    extreme(args, "max", true)
}

fn sum(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let items = numbers(args, "sum")?;
    if items.iter().all(|v| matches!(v, Value::Int(_))) {
        let mut total: i64 = 0;
        for item in &items {
            if let Value::Int(i) = item {
                total = total
                    .checked_add(*i)
                    .ok_or_else(|| CellError::new("OverflowError", "integer overflow in sum()"))?;
            }
        }
        return Ok(Value::Int(total));
    }
    Ok(Value::Float(items.iter().filter_map(Value::as_f64).sum()))
}

fn fail(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let message = single(args, "fail")?;
    Err(CellError::new("RuntimeError", message.to_string()))
}

fn with_extension(_: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let bound = args.bind("with_extension", &["path", "extension"])?;
    let mut it = bound.into_iter();
    let path = required(it.next().flatten(), "with_extension", "path")?;
    let ext = required(it.next().flatten(), "with_extension", "extension")?;
    let replaced = Path::new(path.expect_str("path")?).with_extension(ext.expect_str("extension")?);
    Ok(Value::Str(replaced.to_string_lossy().into_owned()))
}

fn save_posteriors_(ctx: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let bound = args.bind("save_posteriors", &["trace", "path"])?;
    let mut it = bound.into_iter();
    let trace = required(it.next().flatten(), "save_posteriors", "trace")?;
    let path = required(it.next().flatten(), "save_posteriors", "path")?;
    let Value::Trace(trace) = trace else {
        return Err(CellError::type_error(format!(
            "save_posteriors() expects a PosteriorTrace, not {}",
            trace.type_name()
        )));
    };
    let target = ctx.resolve(path.expect_str("path")?);
    save_posteriors(&trace, &target)?;
    ctx.record_artifact(target);
    Ok(Value::None)
}

fn load_posteriors_(ctx: &mut NativeContext<'_>, args: Args) -> EvalResult<Value> {
    let path = single(args, "load_posteriors")?;
    let source = ctx.resolve(path.expect_str("path")?);
    Ok(Value::Trace(Arc::new(load_posteriors(source)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn call(name: &str, args: Args) -> (EvalResult<Value>, String) {
        let mut stdout = String::new();
        let mut artifacts: Vec<PathBuf> = Vec::new();
        let dir = std::env::temp_dir();
        let mut ctx = NativeContext {
            stdout: &mut stdout,
            working_dir: &dir,
            artifacts: &mut artifacts,
        };
        let native = lookup(name).unwrap();
        let result = (native.call)(&mut ctx, args);
        (result, stdout)
    }

    #[test]
    fn test_print_joins_with_sep() {
        let args = Args::positional(vec![Value::Int(1), Value::Str("a".to_string())])
            .kw("sep", Value::Str("-".to_string()));
        let (result, out) = call("print", args);
        assert_eq!(result.unwrap(), Value::None);
        assert_eq!(out, "1-a\n");
    }

    #[test]
    fn test_range_forms() {
        let (one, _) = call("range", Args::positional(vec![Value::Int(3)]));
        assert_eq!(one.unwrap(), Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(2)]));
        let (two, _) = call("range", Args::positional(vec![Value::Int(2), Value::Int(4)]));
        assert_eq!(two.unwrap(), Value::List(vec![Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn test_min_max_sum() {
        let list = Value::List(vec![Value::Int(3), Value::Float(1.5), Value::Int(2)]);
        let (min, _) = call("min", Args::positional(vec![list.clone()]));
        assert_eq!(min.unwrap(), Value::Float(1.5));
        let (max, _) = call("max", Args::positional(vec![list.clone()]));
        assert_eq!(max.unwrap(), Value::Int(3));
        let (sum, _) = call("sum", Args::positional(vec![list]));
        assert_eq!(sum.unwrap(), Value::Float(6.5));
    }

    #[test]
    fn test_fail_raises_runtime_error() {
        let (result, _) = call("fail", Args::positional(vec![Value::Str("boom".to_string())]));
        let err = result.unwrap_err();
        assert_eq!(err.ename, "RuntimeError");
        assert_eq!(err.evalue, "boom");
    }

    #[test]
    fn test_with_extension() {
        let args = Args::positional(vec![
            Value::Str("toi_178.ipynb".to_string()),
            Value::Str("parquet".to_string()),
        ]);
        let (result, _) = call("with_extension", args);
        assert_eq!(result.unwrap(), Value::Str("toi_178.parquet".to_string()));
    }

    #[test]
    fn test_int_parsing_error() {
        let (result, _) = call("int", Args::positional(vec![Value::Str("x".to_string())]));
        assert_eq!(result.unwrap_err().ename, "ValueError");
    }

    #[test]
    fn test_load_missing_archive_is_corrupt() {
        let (result, _) = call(
            "load_posteriors",
            Args::positional(vec![Value::Str("no-such-archive.parquet".to_string())]),
        );
        assert_eq!(result.unwrap_err().ename, "CorruptArchiveError");
    }
}
