//! Evaluator.
//!
//! Scripts run against one variable environment and one `Content`
//! capability. Any failure aborts the script and surfaces as a mutation
//! error, line attached.

use std::collections::BTreeMap;
use std::fmt;

use chisel_core::errors::{ChiselError, ChiselResult};

use crate::content::Content;
use crate::parse::{parse, BinOp, Expr, Stmt};

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    /// The injected capability object.
    Content,
    /// A callable surfaced by attribute access or a builtin name.
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ContentRead,
    ContentWrite,
    ContentList,
    Len,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Content => "content",
            Value::Builtin(_) => "function",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Content => write!(f, "<content>"),
            Value::Builtin(_) => write!(f, "<function>"),
        }
    }
}

/// Run `source` against `content`. The environment starts with just the
/// `content` capability bound.
pub fn run_script(source: &str, content: &mut dyn Content) -> ChiselResult<()> {
    let stmts = parse(source)?;
    let mut env: BTreeMap<String, Value> = BTreeMap::new();
    env.insert("content".to_string(), Value::Content);

    for spanned in &stmts {
        let result = match &spanned.stmt {
            Stmt::Assign(name, expr) => eval(expr, &env, content).map(|value| {
                env.insert(name.clone(), value);
            }),
            Stmt::Expr(expr) => eval(expr, &env, content).map(|_| ()),
        };
        result.map_err(|e| attach_line(e, spanned.line))?;
    }
    Ok(())
}

fn attach_line(err: ChiselError, line: usize) -> ChiselError {
    match err {
        ChiselError::Mutation(msg) if !msg.starts_with("script line") => {
            ChiselError::mutation(format!("script line {line}: {msg}"))
        }
        other => other,
    }
}

fn eval(
    expr: &Expr,
    env: &BTreeMap<String, Value>,
    content: &mut dyn Content,
) -> ChiselResult<Value> {
    match expr {
        Expr::None => Ok(Value::None),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, env, content)?);
            }
            Ok(Value::List(out))
        }
        Expr::Var(name) => match name.as_str() {
            "len" => Ok(Value::Builtin(Builtin::Len)),
            _ => env.get(name).cloned().ok_or_else(|| {
                ChiselError::mutation(format!("undefined name \"{name}\""))
            }),
        },
        Expr::Attr(object, name) => {
            let object = eval(object, env, content)?;
            match (&object, name.as_str()) {
                (Value::Content, "read") => Ok(Value::Builtin(Builtin::ContentRead)),
                (Value::Content, "write") => Ok(Value::Builtin(Builtin::ContentWrite)),
                (Value::Content, "list") => Ok(Value::Builtin(Builtin::ContentList)),
                _ => Err(ChiselError::mutation(format!(
                    "{} has no attribute \"{name}\"",
                    object.type_name()
                ))),
            }
        }
        Expr::Call(callee, args) => {
            let callee = eval(callee, env, content)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, env, content)?);
            }
            call(callee, values, content)
        }
        Expr::Index(object, index) => {
            let object = eval(object, env, content)?;
            let index = eval(index, env, content)?;
            let i = match index {
                Value::Int(i) => i,
                other => {
                    return Err(ChiselError::mutation(format!(
                        "index must be an integer, not {}",
                        other.type_name()
                    )))
                }
            };
            match object {
                Value::List(items) => pick(&items, i)
                    .cloned()
                    .ok_or_else(|| ChiselError::mutation(format!("list index {i} out of range"))),
                Value::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    pick(&chars, i)
                        .map(|c| Value::Str(c.to_string()))
                        .ok_or_else(|| {
                            ChiselError::mutation(format!("string index {i} out of range"))
                        })
                }
                other => Err(ChiselError::mutation(format!(
                    "cannot index {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, env, content)?;
            let right = eval(right, env, content)?;
            binary(*op, left, right)
        }
        Expr::Neg(inner) => match eval(inner, env, content)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            other => Err(ChiselError::mutation(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
    }
}

/// Negative indices count from the end, Starlark style.
fn pick<T>(items: &[T], index: i64) -> Option<&T> {
    let len = items.len() as i64;
    let actual = if index < 0 { len + index } else { index };
    if actual < 0 || actual >= len {
        None
    } else {
        items.get(actual as usize)
    }
}

fn call(callee: Value, args: Vec<Value>, content: &mut dyn Content) -> ChiselResult<Value> {
    let builtin = match callee {
        Value::Builtin(b) => b,
        other => {
            return Err(ChiselError::mutation(format!(
                "{} is not callable",
                other.type_name()
            )))
        }
    };
    match builtin {
        Builtin::ContentRead => {
            let [path] = take_args::<1>("content.read", args)?;
            let path = as_str("content.read", "path", path)?;
            Ok(Value::Str(content.read(&path)?))
        }
        Builtin::ContentWrite => {
            let [path, data] = take_args::<2>("content.write", args)?;
            let path = as_str("content.write", "path", path)?;
            let data = as_str("content.write", "data", data)?;
            content.write(&path, &data)?;
            Ok(Value::None)
        }
        Builtin::ContentList => {
            let [dir] = take_args::<1>("content.list", args)?;
            let dir = as_str("content.list", "dir", dir)?;
            let names = content.list(&dir)?;
            Ok(Value::List(names.into_iter().map(Value::Str).collect()))
        }
        Builtin::Len => {
            let [value] = take_args::<1>("len", args)?;
            match value {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(ChiselError::mutation(format!(
                    "len() does not accept {}",
                    other.type_name()
                ))),
            }
        }
    }
}

fn take_args<const N: usize>(name: &str, args: Vec<Value>) -> ChiselResult<[Value; N]> {
    let count = args.len();
    args.try_into().map_err(|_| {
        ChiselError::mutation(format!("{name}() takes {N} arguments, got {count}"))
    })
}

fn as_str(function: &str, param: &str, value: Value) -> ChiselResult<String> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ChiselError::mutation(format!(
            "{function}() expects a string {param}, not {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> ChiselResult<Value> {
    use BinOp::*;
    match op {
        Add => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (a, b) => Err(ChiselError::mutation(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
        Sub => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
            (a, b) => Err(ChiselError::mutation(format!(
                "cannot subtract {} from {}",
                b.type_name(),
                a.type_name()
            ))),
        },
        Eq => Ok(Value::Bool(left == right)),
        Ne => Ok(Value::Bool(left != right)),
        Lt | Le | Gt | Ge => {
            let ordering = match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                (a, b) => {
                    return Err(ChiselError::mutation(format!(
                        "cannot compare {} and {}",
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}
