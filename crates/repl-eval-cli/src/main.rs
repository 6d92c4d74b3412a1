//! Local harness for exercising the evaluator library entry point (§10.4):
//! reads one JSON `EvalRequest` from stdin, evaluates it against a single
//! process-lifetime `NamespaceStore`, writes one JSON `EvalResponse` to
//! stdout. Not the HTTP transport named out of scope in §1.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use repl_eval_engine::NamespaceStore;
use repl_eval_types::{EvalConfig, EvalRequest, EvalResponse};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let env_filter =
        EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

fn load_config(path: Option<&str>) -> Result<EvalConfig> {
    let Some(path) = path else {
        return Ok(EvalConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {path}"))?;
    let config: EvalConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing config file {path}"))?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading request from stdin")?;
    let request: EvalRequest =
        serde_json::from_str(&input).context("parsing request JSON from stdin")?;

    let store = NamespaceStore::new(config).context("constructing namespace store")?;

    let response = match store.evaluate(&request.module_path, &request.code) {
        Ok(outcome) => EvalResponse {
            result: outcome.result,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        },
        Err(err) => {
            tracing::error!(error = %err, "evaluation failed");
            return Err(err.into());
        }
    };

    let out = serde_json::to_string(&response).context("serializing response")?;
    let mut stdout = std::io::stdout();
    stdout.write_all(out.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}
