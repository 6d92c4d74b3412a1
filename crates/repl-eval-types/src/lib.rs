//! Shared data model for the inline evaluator: the tagged enums that replace
//! the original's `DEFAULT_EXPORT`/`NAMESPACE_EXPORT` sentinels, the
//! per-namespace entities, the typed error taxonomy, and the external
//! request/response protocol.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Absolute canonical filesystem path identifying a user-authored module
/// within the session. Built-ins are never namespaces.
pub type Namespace = PathBuf;

/// The outward name an export is registered under. Replaces the
/// `DEFAULT_EXPORT` sentinel with a real variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum ExportKey {
    Named(String),
    Default,
}

/// What an `import` specifier asks for from its source module. Replaces the
/// `DEFAULT_EXPORT`/`NAMESPACE_EXPORT` sentinels with real variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum ImportedName {
    Named(String),
    Default,
    Namespace,
}

/// Where an import resolves to, per the Module Path Resolver (4.A).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ModuleRef {
    User { path: Namespace },
    BuiltIn { id: String },
}

impl ModuleRef {
    pub fn is_built_in(&self) -> bool {
        matches!(self, ModuleRef::BuiltIn { .. })
    }
}

/// `{ exported, local }`: records that `exported` resolves to the binding
/// named `local` in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub exported: ExportKey,
    pub local: String,
}

/// `{ local, imported, importedNamespace, isBuiltIn }`: a reference from one
/// namespace into another (or a built-in), keyed by the local name it is
/// bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub local: String,
    pub imported: ImportedName,
    pub source: ModuleRef,
}

/// The five-kind error taxonomy from the error handling design. Only
/// `UserRuntimeError` is ever recovered locally by the evaluator; every other
/// variant is fatal to the call that produced it.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("cannot resolve '{specifier}' from {}", .from.display())]
    ResolveError { specifier: String, from: PathBuf },

    #[error("export references local '{local}' which has no binding in {}", .namespace.display())]
    MissingLocalError { namespace: Namespace, local: String },

    #[error("unsupported construct: {description}")]
    UnsupportedError { description: String },

    #[error("{message}")]
    UserRuntimeError {
        message: String,
        stack: Option<String>,
    },

    #[error("parse error: {message}")]
    ParseError { message: String },
}

impl EvalError {
    pub fn resolve(specifier: impl Into<String>, from: impl AsRef<Path>) -> Self {
        EvalError::ResolveError {
            specifier: specifier.into(),
            from: from.as_ref().to_path_buf(),
        }
    }

    pub fn missing_local(namespace: impl AsRef<Path>, local: impl Into<String>) -> Self {
        EvalError::MissingLocalError {
            namespace: namespace.as_ref().to_path_buf(),
            local: local.into(),
        }
    }

    pub fn unsupported(description: impl Into<String>) -> Self {
        EvalError::UnsupportedError {
            description: description.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        EvalError::ParseError {
            message: message.into(),
        }
    }
}

/// Tunables for one evaluation, per §10.3. `evalImports`/`debug` mirror the
/// library entry point's own parameters; `built_ins` is the fixed registry
/// §6.1 substitutes for "the host platform's native module system".
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalConfig {
    pub eval_imports: bool,
    pub debug: bool,
    pub built_ins: Vec<String>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            eval_imports: false,
            debug: false,
            built_ins: vec!["console".into(), "path".into(), "process".into()],
        }
    }
}

/// External request shape (§6): one source fragment plus the absolute path
/// of the file it was selected from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRequest {
    pub code: String,
    pub module_path: Namespace,
}

/// External response shape (§6). `result` is whatever the transport's
/// serialization can carry; values that don't serialize cleanly are coerced
/// to their string form upstream of this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResponse {
    pub result: serde_json::Value,
    pub stdout: String,
    pub stderr: String,
}
