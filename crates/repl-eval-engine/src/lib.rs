//! Namespace Store (4.B), Scope Synthesizer (4.D), and Evaluator (4.E).
//!
//! Grounded on `quickjs_backend.rs`'s one-`Context`-per-unit pattern: there
//! the teacher keyed contexts by plugin name, here each namespace gets its
//! own persistent `Context` sharing one process-wide `Runtime`. Binding
//! values therefore never have to be represented as data on the Rust side
//! (see the module doc on `NamespaceEntry`) — they live as real globals in
//! that namespace's own `Context`, so they stay callable and stay alive
//! across separate `evaluate` calls the way a REPL's state is expected to.

mod builtins;
mod convert;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use repl_eval_rewriter::{resolve_specifier, rewrite_for_eval};
use repl_eval_types::{EvalConfig, EvalError, Export, ExportKey, Import, ImportedName, ModuleRef, Namespace};
use rquickjs::{context::EvalOptions, Context, Function, Object, Runtime};

/// Everything the Namespace Store remembers about one user module: its own
/// persistent `Context` (where its bindings actually live as JS globals), and
/// the structural metadata (which names are bound, what each one is exported
/// as, what it imports) that the rest of the system reasons about without
/// ever touching a JS value directly.
struct NamespaceEntry {
    context: Context,
    bindings: Rc<RefCell<HashSet<String>>>,
    exports: Rc<RefCell<HashMap<ExportKey, String>>>,
    imports: Vec<Import>,
}

/// Result of one `evaluate` call (§6).
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub result: serde_json::Value,
    pub stdout: String,
    pub stderr: String,
}

pub struct NamespaceStore {
    runtime: Runtime,
    config: EvalConfig,
    namespaces: RefCell<HashMap<Namespace, NamespaceEntry>>,
    /// Lets a native `require()` closure (installed with a `'static` bound,
    /// since it is stored as a long-lived JS global) call back into
    /// `evaluate` for recursive module loading. Ordinary Rust-level
    /// recursion (static `import` handling in `evaluate` itself) never needs
    /// this — only a closure that QuickJS might invoke from deep inside a
    /// call stack the type system can't see through does.
    self_weak: Weak<NamespaceStore>,
}

impl NamespaceStore {
    pub fn new(config: EvalConfig) -> Result<Rc<Self>, EvalError> {
        let runtime = Runtime::new()
            .map_err(|e| EvalError::unsupported(format!("failed to start QuickJS runtime: {e}")))?;
        runtime.set_host_promise_rejection_tracker(Some(Box::new(
            |_ctx, _promise, reason, is_handled| {
                if !is_handled {
                    tracing::warn!("unhandled promise rejection: {:?}", reason);
                }
            },
        )));
        Ok(Rc::new_cyclic(|weak| NamespaceStore {
            runtime,
            config,
            namespaces: RefCell::new(HashMap::new()),
            self_weak: weak.clone(),
        }))
    }

    /// True once `namespace` has any entry in the store at all (§4.B
    /// `hasBeenEvaluated`) — the sole cycle-breaking marker per §9: a
    /// namespace is marked the instant its entry is created, before any of
    /// its own imports are processed, so a cycle back to it is recognized
    /// rather than recursing forever.
    pub fn has_been_evaluated(&self, namespace: &Namespace) -> bool {
        self.namespaces.borrow().contains_key(namespace)
    }

    fn default_export_value(&self, namespace: &Namespace) -> Option<serde_json::Value> {
        let namespaces = self.namespaces.borrow();
        let entry = namespaces.get(namespace)?;
        let local = entry.exports.borrow().get(&ExportKey::Default)?.clone();
        Some(read_global_as_json(&entry.context, &local))
    }

    fn context_for(&self, namespace: &Namespace) -> Result<Context, EvalError> {
        if let Some(entry) = self.namespaces.borrow().get(namespace) {
            return Ok(entry.context.clone());
        }
        let context = Context::full(&self.runtime)
            .map_err(|e| EvalError::unsupported(format!("failed to create QuickJS context: {e}")))?;
        let entry = NamespaceEntry {
            context: context.clone(),
            bindings: Rc::new(RefCell::new(HashSet::new())),
            exports: Rc::new(RefCell::new(HashMap::new())),
            imports: Vec::new(),
        };
        self.namespaces.borrow_mut().insert(namespace.clone(), entry);
        Ok(context)
    }

    /// Evaluate one fragment of source (§6) within `namespace`'s persistent
    /// scope, synthesizing any cross-module imports it needs first (4.D).
    pub fn evaluate(&self, namespace: &Namespace, code: &str) -> Result<EvalOutcome, EvalError> {
        // Mark this namespace as "being evaluated" before anything else, per
        // §4.E step 1 and §9: this is the sole cycle-breaking mechanism, so
        // it must happen before transitively evaluating anything it imports.
        self.context_for(namespace)?;

        let rewritten = rewrite_for_eval(code, namespace)?;

        if self.config.eval_imports {
            self.evaluate_imports_transitively(namespace, &rewritten.imports)?;
        }

        self.synthesize_scope(namespace, &rewritten.imports)?;

        let context = self.context_for(namespace)?;
        let (bindings, exports) = {
            let namespaces = self.namespaces.borrow();
            let entry = namespaces
                .get(namespace)
                .expect("context_for always inserts an entry");
            (Rc::clone(&entry.bindings), Rc::clone(&entry.exports))
        };

        let stdout = Rc::new(RefCell::new(String::new()));
        let stderr = Rc::new(RefCell::new(String::new()));
        let pending_fatal: Rc<RefCell<Option<EvalError>>> = Rc::new(RefCell::new(None));
        let namespace_display = namespace.display().to_string();
        let store_handle = self
            .self_weak
            .upgrade()
            .expect("NamespaceStore outlives any evaluate() call made through it");

        let result = context.with(|ctx| -> Result<serde_json::Value, EvalError> {
            builtins::install_builtins(&ctx, &self.config.built_ins)
                .map_err(|e| EvalError::unsupported(format!("environment setup failed: {e}")))?;
            install_console(&ctx, &self.config.built_ins, Rc::clone(&stdout), Rc::clone(&stderr))
                .map_err(|e| EvalError::unsupported(format!("environment setup failed: {e}")))?;
            install_env(
                &ctx,
                namespace,
                Rc::clone(&bindings),
                Rc::clone(&exports),
                Rc::clone(&pending_fatal),
            )
            .map_err(|e| EvalError::unsupported(format!("environment setup failed: {e}")))?;
            install_cjs(
                &ctx,
                namespace,
                store_handle,
                Rc::clone(&pending_fatal),
            )
            .map_err(|e| EvalError::unsupported(format!("environment setup failed: {e}")))?;

            let mut options = EvalOptions::default();
            options.global = true;
            options.filename = Some(namespace_display.clone());

            match ctx.eval_with_options::<rquickjs::Value, _>(rewritten.code.as_bytes(), options) {
                Ok(value) => Ok(convert::js_to_json(&ctx, value)),
                Err(e) => {
                    if let Some(fatal) = pending_fatal.borrow_mut().take() {
                        return Err(fatal);
                    }
                    // Per §7: a `UserRuntimeError` is the one kind this
                    // wrapper recovers from locally rather than propagating.
                    let recovered = convert::exception_to_user_runtime_error(&ctx, e);
                    tracing::warn!(namespace = %namespace_display, error = %recovered, "user code threw, returning undefined");
                    if let EvalError::UserRuntimeError { message, .. } = &recovered {
                        let mut buf = stderr.borrow_mut();
                        if !buf.is_empty() {
                            buf.push('\n');
                        }
                        buf.push_str(message);
                    }
                    Ok(serde_json::Value::Null)
                }
            }
        })?;

        self.namespaces
            .borrow_mut()
            .get_mut(namespace)
            .expect("context_for always inserts an entry")
            .imports = rewritten.imports;

        Ok(EvalOutcome {
            result,
            stdout: stdout.borrow().clone(),
            stderr: stderr.borrow().clone(),
        })
    }

    /// §4.E step 3: for every import that names a user module not yet
    /// evaluated, read it from disk and evaluate it with the same flags,
    /// before the importing namespace's own code runs. Namespaces already
    /// marked (including the importing one itself, marked in `evaluate`
    /// before this runs) are skipped — that is what makes a cycle terminate.
    fn evaluate_imports_transitively(
        &self,
        importing_namespace: &Namespace,
        imports: &[Import],
    ) -> Result<(), EvalError> {
        for import in imports {
            let ModuleRef::User { path } = &import.source else {
                continue;
            };
            if self.has_been_evaluated(path) {
                continue;
            }
            let contents = std::fs::read_to_string(path)
                .map_err(|_| EvalError::resolve(path.display().to_string(), importing_namespace))?;
            self.evaluate(path, &contents)?;
        }
        Ok(())
    }

    /// Pull every export this namespace's rewrite recorded, keyed as the
    /// spec's `Export` entities (used by tests and by callers introspecting
    /// a namespace after evaluation).
    pub fn exports_of(&self, namespace: &Namespace) -> Vec<Export> {
        self.namespaces
            .borrow()
            .get(namespace)
            .map(|entry| {
                entry
                    .exports
                    .borrow()
                    .iter()
                    .map(|(exported, local)| Export {
                        exported: exported.clone(),
                        local: local.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resolve_import_value(
        &self,
        namespaces: &HashMap<Namespace, NamespaceEntry>,
        importing_namespace: &Namespace,
        import: &Import,
    ) -> Result<Option<serde_json::Value>, EvalError> {
        match &import.source {
            ModuleRef::BuiltIn { .. } => Ok(None),
            ModuleRef::User { path } => {
                let entry = namespaces
                    .get(path)
                    .ok_or_else(|| EvalError::resolve(path.display().to_string(), importing_namespace))?;
                let exports = entry.exports.borrow();
                match &import.imported {
                    ImportedName::Namespace => {
                        let mut map = serde_json::Map::new();
                        for (key, local) in exports.iter() {
                            let name = match key {
                                ExportKey::Named(n) => n.clone(),
                                ExportKey::Default => "default".to_string(),
                            };
                            map.insert(name, read_global_as_json(&entry.context, local));
                        }
                        Ok(Some(serde_json::Value::Object(map)))
                    }
                    ImportedName::Default => {
                        let local = exports.get(&ExportKey::Default).ok_or_else(|| {
                            EvalError::missing_local(path, "default")
                        })?;
                        Ok(Some(read_global_as_json(&entry.context, local)))
                    }
                    ImportedName::Named(name) => {
                        let local = exports
                            .get(&ExportKey::Named(name.clone()))
                            .ok_or_else(|| EvalError::missing_local(path, name.clone()))?;
                        Ok(Some(read_global_as_json(&entry.context, local)))
                    }
                }
            }
        }
    }

    /// Scope Synthesizer (4.D): make every name `imports` asks for available
    /// as a real global in `namespace`'s context before evaluation starts.
    /// Built-ins are aliased in place (same context, same live object, no
    /// conversion needed) — a named import (`import { join } from 'path'`)
    /// binds to that property of the host-loaded module, while a default or
    /// namespace import binds to the module object itself. User-module
    /// imports cross a context boundary and go through a JSON round trip, so
    /// an imported function degrades to its own enumerable properties rather
    /// than staying callable (documented as a known limitation in
    /// DESIGN.md).
    fn synthesize_scope(&self, namespace: &Namespace, imports: &[Import]) -> Result<(), EvalError> {
        let mut resolved: Vec<(String, Option<serde_json::Value>, Option<String>, ImportedName)> = Vec::new();
        {
            let namespaces = self.namespaces.borrow();
            for import in imports {
                let built_in_id = match &import.source {
                    ModuleRef::BuiltIn { id } => Some(id.clone()),
                    ModuleRef::User { .. } => None,
                };
                let value = self.resolve_import_value(&namespaces, namespace, import)?;
                resolved.push((import.local.clone(), value, built_in_id, import.imported.clone()));
            }
        }

        let context = self.context_for(namespace)?;
        context
            .with(|ctx| -> rquickjs::Result<()> {
                builtins::install_builtins(&ctx, &self.config.built_ins)?;
                // `console` is installed separately from the rest of the
                // built-in registry (it needs per-call stdout/stderr
                // buffers); install it here too, with throwaway buffers,
                // purely so an `import console from 'console'` alias below
                // has something real to read. `evaluate`'s own `context.with`
                // block re-installs it afterwards with the call's real
                // buffers, overwriting this throwaway one.
                install_console(
                    &ctx,
                    &self.config.built_ins,
                    Rc::new(RefCell::new(String::new())),
                    Rc::new(RefCell::new(String::new())),
                )?;
                let globals = ctx.globals();
                for (local, value, built_in_id, imported) in &resolved {
                    if let Some(id) = built_in_id {
                        let enabled = self.config.built_ins.iter().any(|b| b == id);
                        if enabled {
                            let source = globals.get::<_, rquickjs::Value>(id.as_str());
                            if let Ok(module) = source {
                                // Layer 2 (4.D): a named built-in import binds to that
                                // property of the host-loaded module, not the module
                                // object itself; default/namespace imports keep the
                                // whole object.
                                let named_property = match imported {
                                    ImportedName::Named(name) => match module.as_object() {
                                        Some(obj) => Some(obj.get::<_, rquickjs::Value>(name.as_str())?),
                                        None => None,
                                    },
                                    ImportedName::Default | ImportedName::Namespace => None,
                                };
                                let bound = named_property.unwrap_or(module);
                                globals.set(local.as_str(), bound)?;
                                continue;
                            }
                        }
                        ctx.eval::<(), _>(format!("var {};", local).as_bytes())?;
                    } else if let Some(json) = value {
                        let js_value = json_to_js(&ctx, json)?;
                        globals.set(local.as_str(), js_value)?;
                    }
                }
                Ok(())
            })
            .map_err(|e| EvalError::unsupported(format!("scope synthesis failed: {e}")))?;

        let mut namespaces = self.namespaces.borrow_mut();
        let entry = namespaces
            .entry(namespace.clone())
            .or_insert_with(|| NamespaceEntry {
                context: context.clone(),
                bindings: Rc::new(RefCell::new(HashSet::new())),
                exports: Rc::new(RefCell::new(HashMap::new())),
                imports: Vec::new(),
            });
        for (local, _, _, _) in &resolved {
            entry.bindings.borrow_mut().insert(local.clone());
        }
        Ok(())
    }
}

fn read_global_as_json(context: &Context, name: &str) -> serde_json::Value {
    context.with(|ctx| match ctx.globals().get::<_, rquickjs::Value>(name) {
        Ok(v) => convert::js_to_json(&ctx, v),
        Err(_) => serde_json::Value::Null,
    })
}

fn json_to_js<'js>(
    ctx: &rquickjs::Ctx<'js>,
    json: &serde_json::Value,
) -> rquickjs::Result<rquickjs::Value<'js>> {
    let text = serde_json::to_string(json).unwrap_or_else(|_| "null".to_string());
    ctx.eval::<rquickjs::Value, _>(format!("({text})").as_bytes())
}

/// Install `console.log/warn/error`, capturing output into this call's
/// stdout/stderr buffers instead of (or in addition to) the ambient trace
/// log, mirroring the teacher's `console` object but redirected per request.
fn install_console(
    ctx: &rquickjs::Ctx<'_>,
    enabled: &[String],
    stdout: Rc<RefCell<String>>,
    stderr: Rc<RefCell<String>>,
) -> rquickjs::Result<()> {
    if !enabled.iter().any(|b| b == "console") {
        return Ok(());
    }
    let console = Object::new(ctx.clone())?;

    let out = Rc::clone(&stdout);
    console.set(
        "log",
        Function::new(
            ctx.clone(),
            move |ctx: rquickjs::Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                let parts: Vec<String> = args
                    .0
                    .iter()
                    .map(|v| convert::js_value_to_string(&ctx, v))
                    .collect();
                let line = parts.join(" ");
                tracing::debug!(target: "repl_eval_engine::console", "{}", line);
                let mut buf = out.borrow_mut();
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(&line);
            },
        ),
    )?;

    let err_out = Rc::clone(&stderr);
    console.set(
        "warn",
        Function::new(
            ctx.clone(),
            move |ctx: rquickjs::Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                let parts: Vec<String> = args
                    .0
                    .iter()
                    .map(|v| convert::js_value_to_string(&ctx, v))
                    .collect();
                let line = parts.join(" ");
                tracing::warn!(target: "repl_eval_engine::console", "{}", line);
                let mut buf = err_out.borrow_mut();
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(&line);
            },
        ),
    )?;

    let err_out = Rc::clone(&stderr);
    console.set(
        "error",
        Function::new(
            ctx.clone(),
            move |ctx: rquickjs::Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                let parts: Vec<String> = args
                    .0
                    .iter()
                    .map(|v| convert::js_value_to_string(&ctx, v))
                    .collect();
                let line = parts.join(" ");
                tracing::error!(target: "repl_eval_engine::console", "{}", line);
                let mut buf = err_out.borrow_mut();
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(&line);
            },
        ),
    )?;

    ctx.globals().set("console", console)?;
    Ok(())
}

/// Install `__env.putBinding/putExport/putDefaultExport`, the three calls
/// the Source Rewriter splices into every top-level declaration and export.
/// A violated precondition (exporting a name with no binding) is fatal per
/// the error handling design, not an ordinary caught exception: the native
/// call stashes the real `EvalError` into `pending_fatal` and throws, so
/// `evaluate` can recover the precise error instead of downgrading it to a
/// `UserRuntimeError`.
fn install_env(
    ctx: &rquickjs::Ctx<'_>,
    namespace: &Namespace,
    bindings: Rc<RefCell<HashSet<String>>>,
    exports: Rc<RefCell<HashMap<ExportKey, String>>>,
    pending_fatal: Rc<RefCell<Option<EvalError>>>,
) -> rquickjs::Result<()> {
    let env = Object::new(ctx.clone())?;

    fn throw_missing_local<'js>(ctx: &rquickjs::Ctx<'js>) -> rquickjs::Error {
        let message = rquickjs::String::from_str(ctx.clone(), "missing local binding")
            .expect("constructing a short JS string never fails");
        ctx.throw(message.into())
    }

    let put_binding_bindings = Rc::clone(&bindings);
    env.set(
        "putBinding",
        Function::new(
            ctx.clone(),
            move |ctx: rquickjs::Ctx, args: rquickjs::function::Rest<rquickjs::Value>| {
                if let Some(name) = args.0.first() {
                    put_binding_bindings
                        .borrow_mut()
                        .insert(convert::js_value_to_string(&ctx, name));
                }
            },
        ),
    )?;

    let put_export_bindings = Rc::clone(&bindings);
    let put_export_exports = Rc::clone(&exports);
    let put_export_fatal = Rc::clone(&pending_fatal);
    let put_export_namespace = namespace.clone();
    env.set(
        "putExport",
        Function::new(
            ctx.clone(),
            move |ctx: rquickjs::Ctx, args: rquickjs::function::Rest<rquickjs::Value>| -> rquickjs::Result<()> {
                let exported = args.0.first().map(|v| convert::js_value_to_string(&ctx, v)).unwrap_or_default();
                let local = args.0.get(1).map(|v| convert::js_value_to_string(&ctx, v)).unwrap_or_default();
                if !put_export_bindings.borrow().contains(&local) {
                    *put_export_fatal.borrow_mut() =
                        Some(EvalError::missing_local(&put_export_namespace, local.clone()));
                    return Err(throw_missing_local(&ctx));
                }
                put_export_exports
                    .borrow_mut()
                    .insert(ExportKey::Named(exported), local);
                Ok(())
            },
        ),
    )?;

    let put_default_bindings = Rc::clone(&bindings);
    let put_default_exports = Rc::clone(&exports);
    let put_default_fatal = Rc::clone(&pending_fatal);
    let put_default_namespace = namespace.clone();
    env.set(
        "putDefaultExport",
        Function::new(
            ctx.clone(),
            move |ctx: rquickjs::Ctx, args: rquickjs::function::Rest<rquickjs::Value>| -> rquickjs::Result<()> {
                let local = args.0.first().map(|v| convert::js_value_to_string(&ctx, v)).unwrap_or_default();
                if !put_default_bindings.borrow().contains(&local) {
                    *put_default_fatal.borrow_mut() =
                        Some(EvalError::missing_local(&put_default_namespace, local.clone()));
                    return Err(throw_missing_local(&ctx));
                }
                put_default_exports.borrow_mut().insert(ExportKey::Default, local);
                Ok(())
            },
        ),
    )?;

    ctx.globals().set("__env", env)?;
    Ok(())
}

fn throw_js_error(ctx: &rquickjs::Ctx<'_>, message: &str) -> rquickjs::Error {
    let value = rquickjs::String::from_str(ctx.clone(), message)
        .expect("constructing a short JS string never fails");
    ctx.throw(value.into())
}

/// Install the CommonJS-interop layer (§4.D layer 1): `__filename`,
/// `__dirname`, `require`, and the `module`/`exports` pair. `module`/`exports`
/// are installed only once per context (guarded by `typeof module ===
/// 'undefined'`) so they persist across separate `evaluate` calls on the same
/// namespace exactly like the rest of that namespace's bindings do; `require`
/// is reinstalled every call since it only closes over per-call handles.
///
/// `module.exports`/`exports` are modeled with a `Proxy` and an accessor
/// property rather than a native Rust object, grounded in the same
/// "meaningful logic lives in a bootstrap JS string, native code only
/// supplies primitives" split the teacher's QuickJS backend uses for its own
/// Promise-returning wrappers.
fn install_cjs(
    ctx: &rquickjs::Ctx<'_>,
    namespace: &Namespace,
    store: Rc<NamespaceStore>,
    pending_fatal: Rc<RefCell<Option<EvalError>>>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("__filename", namespace.display().to_string())?;
    globals.set(
        "__dirname",
        namespace
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    )?;

    let importing_namespace = namespace.clone();
    globals.set(
        "require",
        Function::new(
            ctx.clone(),
            move |ctx: rquickjs::Ctx, args: rquickjs::function::Rest<rquickjs::Value>| -> rquickjs::Result<rquickjs::Value> {
                let specifier = args
                    .0
                    .first()
                    .map(|v| convert::js_value_to_string(&ctx, v))
                    .unwrap_or_default();

                let resolved = match resolve_specifier(&importing_namespace, &specifier) {
                    Ok(r) => r,
                    Err(e) => {
                        *pending_fatal.borrow_mut() = Some(e);
                        return Err(throw_js_error(&ctx, "module resolution failed"));
                    }
                };

                match resolved {
                    ModuleRef::BuiltIn { id } => {
                        if store.config.built_ins.iter().any(|b| b == &id) {
                            ctx.globals().get::<_, rquickjs::Value>(id.as_str())
                        } else {
                            ctx.eval::<rquickjs::Value, _>("undefined".as_bytes())
                        }
                    }
                    ModuleRef::User { path } => {
                        if store.config.eval_imports && !store.has_been_evaluated(&path) {
                            let contents = match std::fs::read_to_string(&path) {
                                Ok(c) => c,
                                Err(_) => {
                                    *pending_fatal.borrow_mut() =
                                        Some(EvalError::resolve(path.display().to_string(), &importing_namespace));
                                    return Err(throw_js_error(&ctx, "module resolution failed"));
                                }
                            };
                            if let Err(e) = store.evaluate(&path, &contents) {
                                *pending_fatal.borrow_mut() = Some(e);
                                return Err(throw_js_error(&ctx, "required module failed to evaluate"));
                            }
                        }
                        let value = store.default_export_value(&path).unwrap_or(serde_json::Value::Null);
                        json_to_js(&ctx, &value)
                    }
                }
            },
        ),
    )?;

    ctx.eval::<(), _>(
        r#"
        if (typeof module === 'undefined') {
            (function() {
                var __defaultLocal = null;
                function ensureExportsObject() {
                    if (__defaultLocal === null) {
                        __defaultLocal = '__cjsModuleExports';
                        globalThis[__defaultLocal] = {};
                        __env.putBinding(__defaultLocal);
                        __env.putDefaultExport(__defaultLocal);
                    }
                    return globalThis[__defaultLocal];
                }
                var moduleObj = {};
                Object.defineProperty(moduleObj, 'exports', {
                    get: function() { return ensureExportsObject(); },
                    set: function(v) {
                        __defaultLocal = '__cjsModuleExports';
                        globalThis[__defaultLocal] = v;
                        __env.putBinding(__defaultLocal);
                        __env.putDefaultExport(__defaultLocal);
                    },
                    enumerable: true,
                    configurable: true,
                });
                globalThis.module = moduleObj;
                globalThis.exports = new Proxy({}, {
                    get: function(_t, prop) { return ensureExportsObject()[prop]; },
                    set: function(_t, prop, v) { ensureExportsObject()[prop] = v; return true; },
                    has: function(_t, prop) { return prop in ensureExportsObject(); },
                });
            })();
        }
        "#
        .as_bytes(),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ns(n: &str) -> Namespace {
        PathBuf::from(format!("/tmp/session/{n}.ts"))
    }

    /// Writes `contents` to `dir/name` and returns its path. Cross-namespace
    /// import/require resolution goes through the real filesystem (4.A), so
    /// any test exercising it needs an actual file behind the namespace path,
    /// not just a synthetic in-memory one.
    fn fixture(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn evaluates_trailing_expression() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let outcome = store.evaluate(&ns("a"), "1 + 1").unwrap();
        assert_eq!(outcome.result, serde_json::json!(2));
    }

    #[test]
    fn bindings_persist_across_calls_in_the_same_namespace() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let namespace = ns("b");
        store.evaluate(&namespace, "const x = 41;").unwrap();
        let outcome = store.evaluate(&namespace, "x + 1").unwrap();
        assert_eq!(outcome.result, serde_json::json!(42));
    }

    #[test]
    fn default_export_is_callable_within_its_own_namespace() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let namespace = ns("c");
        store
            .evaluate(&namespace, "export default function add(a, b) { return a + b; }")
            .unwrap();
        let outcome = store.evaluate(&namespace, "add(2, 3)").unwrap();
        assert_eq!(outcome.result, serde_json::json!(5));
    }

    #[test]
    fn console_log_is_captured_as_stdout() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let outcome = store.evaluate(&ns("d"), "console.log('hello'); 1").unwrap();
        assert_eq!(outcome.stdout, "hello");
    }

    #[test]
    fn thrown_user_error_is_recovered_as_undefined_with_a_stderr_diagnostic() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let outcome = store.evaluate(&ns("e"), "throw new Error('boom');").unwrap();
        assert_eq!(outcome.result, serde_json::Value::Null);
        assert!(outcome.stderr.contains("boom"));
    }

    #[test]
    fn exports_are_recorded_on_the_namespace() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let namespace = ns("f");
        store.evaluate(&namespace, "export const API_VERSION = 1;").unwrap();
        let exports = store.exports_of(&namespace);
        assert!(exports
            .iter()
            .any(|e| e.exported == ExportKey::Named("API_VERSION".into()) && e.local == "API_VERSION"));
    }

    #[test]
    fn named_import_is_synthesized_from_an_already_evaluated_namespace() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib = fixture(dir.path(), "lib-g.ts", "");
        let main = fixture(dir.path(), "main-g.ts", "");

        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        store.evaluate(&lib, "export const greet = 'hi';").unwrap();

        let outcome = store.evaluate(&main, "import { greet } from './lib-g'; greet").unwrap();
        assert_eq!(outcome.result, serde_json::json!("hi"));
    }

    #[test]
    fn import_triggers_transitive_evaluation_when_eval_imports_is_set() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib_path = dir.path().join("lib.ts");
        std::fs::write(&lib_path, "export const greet = 'hi from disk';").unwrap();
        let main_path = dir.path().join("main.ts");
        std::fs::write(&main_path, "").unwrap();

        let config = EvalConfig {
            eval_imports: true,
            ..EvalConfig::default()
        };
        let store = NamespaceStore::new(config).unwrap();

        let outcome = store
            .evaluate(&main_path, "import { greet } from './lib'; greet")
            .unwrap();
        assert_eq!(outcome.result, serde_json::json!("hi from disk"));
    }

    #[test]
    fn cyclic_imports_terminate_instead_of_recursing_forever() {
        let dir = tempfile::TempDir::new().unwrap();
        let a_path = dir.path().join("a.ts");
        let b_path = dir.path().join("b.ts");
        std::fs::write(&a_path, "import './b'; export const a = 1; a;").unwrap();
        std::fs::write(&b_path, "import './a'; export const b = 2; b;").unwrap();

        let config = EvalConfig {
            eval_imports: true,
            ..EvalConfig::default()
        };
        let store = NamespaceStore::new(config).unwrap();
        let contents = std::fs::read_to_string(&a_path).unwrap();
        let outcome = store.evaluate(&a_path, &contents).unwrap();
        assert_eq!(outcome.result, serde_json::json!(1));
    }

    #[test]
    fn commonjs_module_exports_is_visible_to_a_later_require() {
        let dir = tempfile::TempDir::new().unwrap();
        let c_path = dir.path().join("c.ts");
        std::fs::write(&c_path, "module.exports = 99;").unwrap();
        let main_path = dir.path().join("main.ts");
        std::fs::write(&main_path, "").unwrap();

        let config = EvalConfig {
            eval_imports: true,
            ..EvalConfig::default()
        };
        let store = NamespaceStore::new(config).unwrap();
        let outcome = store.evaluate(&main_path, "require('./c')").unwrap();
        assert_eq!(outcome.result, serde_json::json!(99));
    }

    #[test]
    fn require_of_a_disabled_built_in_is_undefined_not_fatal() {
        let config = EvalConfig {
            built_ins: Vec::new(),
            ..EvalConfig::default()
        };
        let store = NamespaceStore::new(config).unwrap();
        let outcome = store.evaluate(&ns("h"), "require('console') === undefined").unwrap();
        assert_eq!(outcome.result, serde_json::json!(true));
    }

    #[test]
    fn reevaluating_the_same_binding_does_not_duplicate_it() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let namespace = ns("p1");
        store.evaluate(&namespace, "const x = 1;").unwrap();
        store.evaluate(&namespace, "const x = 1;").unwrap();
        let outcome = store.evaluate(&namespace, "x").unwrap();
        assert_eq!(outcome.result, serde_json::json!(1));
    }

    #[test]
    fn redefinition_overwrites_the_earlier_value() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let namespace = ns("p2");
        store.evaluate(&namespace, "const x = 1;").unwrap();
        store.evaluate(&namespace, "const x = 2;").unwrap();
        let outcome = store.evaluate(&namespace, "x").unwrap();
        assert_eq!(outcome.result, serde_json::json!(2));
    }

    #[test]
    fn a_declaration_with_no_trailing_expression_yields_undefined() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let outcome = store.evaluate(&ns("p3"), "const a = 5;").unwrap();
        assert_eq!(outcome.result, serde_json::Value::Null);
    }

    #[test]
    fn importing_a_built_in_never_creates_a_namespace_entry_for_it() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        store.evaluate(&ns("p7"), "import fs from 'console'; 1").unwrap();
        assert!(!store.has_been_evaluated(&PathBuf::from("console")));
    }

    #[test]
    fn named_built_in_import_binds_the_module_property_not_the_module_object() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let outcome = store
            .evaluate(&ns("p7-named"), "import { join } from 'path'; join('a', 'b')")
            .unwrap();
        assert_eq!(outcome.result, serde_json::json!("a/b"));
    }

    #[test]
    fn default_built_in_import_still_binds_the_whole_module_object() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let outcome = store
            .evaluate(&ns("p7-default"), "import path from 'path'; typeof path.join")
            .unwrap();
        assert_eq!(outcome.result, serde_json::json!("function"));
    }

    #[test]
    fn namespace_import_snapshots_the_exports_at_synthesis_time() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib = fixture(dir.path(), "p9-lib.ts", "");
        let main = fixture(dir.path(), "p9-main.ts", "");

        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        store
            .evaluate(&lib, "export const x = 1; export const y = 2;")
            .unwrap();

        let outcome = store
            .evaluate(&main, "import * as A from './p9-lib'; A.x + A.y")
            .unwrap();
        assert_eq!(outcome.result, serde_json::json!(3));

        store.evaluate(&lib, "const x = 10;").unwrap();
        let outcome2 = store
            .evaluate(&main, "import * as A from './p9-lib'; A.x + A.y")
            .unwrap();
        assert_eq!(outcome2.result, serde_json::json!(12));
    }

    #[test]
    fn default_export_function_stays_callable_within_its_own_namespace() {
        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        let outcome = store
            .evaluate(
                &ns("p5-same-namespace"),
                "export default function foo() { return 7; }; foo()",
            )
            .unwrap();
        assert_eq!(outcome.result, serde_json::json!(7));
    }

    #[test]
    fn default_export_function_loses_callability_once_required_cross_namespace() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib = fixture(dir.path(), "p5-lib.ts", "");
        let main = fixture(dir.path(), "p5-main.ts", "");

        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        store
            .evaluate(&lib, "export default function foo() { return 7; }")
            .unwrap();

        // Narrowed Non-goal (SPEC_FULL.md §8 P5): a default export's
        // callability is only guaranteed within its own namespace. Crossing
        // a `Context` boundary degrades the function to its JSON shape.
        let outcome = store.evaluate(&main, "typeof require('./p5-lib')").unwrap();
        assert_eq!(outcome.result, serde_json::json!("object"));
    }

    #[test]
    fn missing_named_export_is_a_missing_local_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib = fixture(dir.path(), "lib-i.ts", "");
        let main = fixture(dir.path(), "main-i.ts", "");

        let store = NamespaceStore::new(EvalConfig::default()).unwrap();
        store.evaluate(&lib, "export const present = 1;").unwrap();

        let err = store
            .evaluate(&main, "import { absent } from './lib-i'; absent")
            .unwrap_err();
        assert!(matches!(err, EvalError::MissingLocalError { .. }));
    }
}
