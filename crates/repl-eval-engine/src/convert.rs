//! Value and error conversion between QuickJS and the Rust side, grounded on
//! the teacher's `js_to_json`/`js_value_to_string`/`format_js_error` trio.

use repl_eval_types::EvalError;
use rquickjs::{Ctx, Type, Value};

/// Convert a QuickJS value into JSON for the `result` field of the response
/// (§10.5: this is the one place a live JS value crosses into `serde_json::Value`).
pub fn js_to_json(ctx: &Ctx<'_>, val: Value<'_>) -> serde_json::Value {
    match val.type_of() {
        Type::Null | Type::Undefined | Type::Uninitialized => serde_json::Value::Null,
        Type::Bool => val
            .as_bool()
            .map(serde_json::Value::Bool)
            .unwrap_or(serde_json::Value::Null),
        Type::Int => val
            .as_int()
            .map(|n| serde_json::Value::Number(n.into()))
            .unwrap_or(serde_json::Value::Null),
        Type::Float => val
            .as_float()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Type::String => val
            .as_string()
            .and_then(|s| s.to_string().ok())
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
        Type::Array => {
            if let Some(arr) = val.as_array() {
                let items: Vec<serde_json::Value> = arr
                    .iter()
                    .filter_map(|item| item.ok())
                    .map(|item| js_to_json(ctx, item))
                    .collect();
                serde_json::Value::Array(items)
            } else {
                serde_json::Value::Null
            }
        }
        Type::Object | Type::Constructor | Type::Function => {
            if let Some(obj) = val.as_object() {
                let mut map = serde_json::Map::new();
                for key in obj.keys::<String>().flatten() {
                    if let Ok(v) = obj.get::<_, Value>(&key) {
                        map.insert(key, js_to_json(ctx, v));
                    }
                }
                serde_json::Value::Object(map)
            } else {
                serde_json::Value::Null
            }
        }
        _ => serde_json::Value::Null,
    }
}

/// Convert a value to a human-readable string for `console.log`-style output.
pub fn js_value_to_string(ctx: &Ctx<'_>, val: &Value<'_>) -> String {
    match val.type_of() {
        Type::Null => "null".to_string(),
        Type::Undefined => "undefined".to_string(),
        Type::Bool => val.as_bool().map(|b| b.to_string()).unwrap_or_default(),
        Type::Int => val.as_int().map(|n| n.to_string()).unwrap_or_default(),
        Type::Float => val.as_float().map(|f| f.to_string()).unwrap_or_default(),
        Type::String => val
            .as_string()
            .and_then(|s| s.to_string().ok())
            .unwrap_or_default(),
        Type::Object | Type::Exception => {
            if let Some(obj) = val.as_object() {
                let name: Option<String> = obj.get("name").ok();
                let message: Option<String> = obj.get("message").ok();
                let stack: Option<String> = obj.get("stack").ok();
                if message.is_some() || name.is_some() {
                    let name = name.unwrap_or_else(|| "Error".to_string());
                    let message = message.unwrap_or_default();
                    return match stack {
                        Some(stack) => format!("{name}: {message}\n{stack}"),
                        None => format!("{name}: {message}"),
                    };
                }
                let json = js_to_json(ctx, val.clone());
                serde_json::to_string(&json).unwrap_or_else(|_| "[object]".to_string())
            } else {
                "[object]".to_string()
            }
        }
        Type::Array => {
            let json = js_to_json(ctx, val.clone());
            serde_json::to_string(&json).unwrap_or_else(|_| "[array]".to_string())
        }
        Type::Function | Type::Constructor => "[function]".to_string(),
        Type::Symbol => "[symbol]".to_string(),
        Type::BigInt => val
            .as_big_int()
            .and_then(|b| b.clone().to_i64().ok())
            .map(|n| n.to_string())
            .unwrap_or_else(|| "[bigint]".to_string()),
        _ => format!("[{}]", val.type_name()),
    }
}

/// Turn an uncaught QuickJS exception into `EvalError::UserRuntimeError`.
/// Only reached when the pending-fatal slot (checked by the caller first) is
/// empty, i.e. the exception genuinely came from user code rather than one of
/// our own `__env.put*` preconditions.
pub fn exception_to_user_runtime_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> EvalError {
    if err.is_exception() {
        let exc = ctx.catch();
        if !exc.is_undefined() && !exc.is_null() {
            if let Some(exc_obj) = exc.as_object() {
                let message: String = exc_obj
                    .get::<_, String>("message")
                    .unwrap_or_else(|_| "Unknown error".to_string());
                let stack: Option<String> = exc_obj.get::<_, String>("stack").ok();
                let name: String = exc_obj
                    .get::<_, String>("name")
                    .unwrap_or_else(|_| "Error".to_string());
                return EvalError::UserRuntimeError {
                    message: format!("{name}: {message}"),
                    stack,
                };
            }
            let text = js_value_to_string(ctx, &exc);
            return EvalError::UserRuntimeError {
                message: text,
                stack: None,
            };
        }
    }
    EvalError::UserRuntimeError {
        message: err.to_string(),
        stack: None,
    }
}
