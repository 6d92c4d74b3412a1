//! The fixed built-in module registry (§6.1): `console`, `path`, `process`.
//! Installed fresh into a context's globals on every evaluation; which ids
//! are actually wired up is gated by `EvalConfig::built_ins` so a disabled
//! built-in behaves like any other unresolvable bare specifier.

use std::path::Path;

use rquickjs::{Ctx, Function, Object, Result as JsResult};

fn arg_string(ctx: &Ctx<'_>, args: &rquickjs::function::Rest<rquickjs::Value>, idx: usize) -> String {
    args.0
        .get(idx)
        .map(|v| crate::convert::js_value_to_string(ctx, v))
        .unwrap_or_default()
}

fn install_path(ctx: &Ctx<'_>) -> JsResult<()> {
    let path = Object::new(ctx.clone())?;
    path.set(
        "join",
        Function::new(
            ctx.clone(),
            |ctx: Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                let mut buf = std::path::PathBuf::new();
                for i in 0..args.0.len() {
                    buf.push(arg_string(&ctx, &args, i));
                }
                buf.to_string_lossy().into_owned()
            },
        ),
    )?;
    path.set(
        "basename",
        Function::new(
            ctx.clone(),
            |ctx: Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                let p = arg_string(&ctx, &args, 0);
                Path::new(&p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            },
        ),
    )?;
    path.set(
        "dirname",
        Function::new(
            ctx.clone(),
            |ctx: Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                let p = arg_string(&ctx, &args, 0);
                Path::new(&p)
                    .parent()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| ".".to_string())
            },
        ),
    )?;
    path.set(
        "extname",
        Function::new(
            ctx.clone(),
            |ctx: Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                let p = arg_string(&ctx, &args, 0);
                Path::new(&p)
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default()
            },
        ),
    )?;
    ctx.globals().set("path", path)?;
    Ok(())
}

fn install_process(ctx: &Ctx<'_>) -> JsResult<()> {
    let process = Object::new(ctx.clone())?;
    process.set("platform", "linux")?;
    process.set("env", Object::new(ctx.clone())?)?;
    process.set("argv", Vec::<String>::new())?;
    ctx.globals().set("process", process)?;
    Ok(())
}

/// Install every built-in named in `enabled` (a config's `built_ins` list).
/// Anything not named there is simply never defined, so referencing it
/// surfaces as an ordinary `UserRuntimeError` (ReferenceError), not a fatal
/// resolver error.
pub fn install_builtins(ctx: &Ctx<'_>, enabled: &[String]) -> JsResult<()> {
    if enabled.iter().any(|b| b == "path") {
        install_path(ctx)?;
    }
    if enabled.iter().any(|b| b == "process") {
        install_process(ctx)?;
    }
    Ok(())
}
