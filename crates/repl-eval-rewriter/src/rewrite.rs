//! Source Rewriter (4.C).
//!
//! Two passes over the same source text, mirroring how the teacher's bundler
//! separated `extract_module_bindings` (read-only) from
//! `strip_imports_and_exports` (move/drain): `analyze` walks the parsed
//! program by reference and decides everything data-shaped (imports,
//! exports, and the exact text of every `__env.put*` call to splice in);
//! `apply` re-parses the same source and drains it, consuming the owned AST
//! nodes and splicing in statements parsed from the frozen snippet text
//! `analyze` already computed. Freezing the snippet strings before `apply`
//! starts draining means every snippet parse borrows text that never moves
//! or gets pushed to again, so nothing in the second pass fights the first.
//!
//! A final pass reuses the TypeScript-erasure half of the teacher's
//! `transpile_typescript` to strip remaining type syntax from the rewritten
//! text.

use std::collections::HashMap;
use std::path::Path;

use oxc_allocator::{Allocator, Vec as OxcVec};
use oxc_ast::ast::{
    Declaration, Expression, ExportDefaultDeclarationKind, ImportDeclarationSpecifier, Program,
    Statement,
};
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};

use repl_eval_types::{EvalError, Export, ExportKey, Import, ImportedName};

use crate::resolve::resolve_specifier;

/// What the rewriter produces: plain JS ready for `eval`, plus the import and
/// export tables the Namespace Store (4.B) needs to record for this
/// namespace.
#[derive(Debug, Clone)]
pub struct RewriteOutput {
    pub code: String,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
}

struct Analysis {
    imports: Vec<Import>,
    exports: Vec<Export>,
    snippets_after: HashMap<usize, Vec<String>>,
    synth_default_name: HashMap<usize, String>,
}

fn declaration_names(decl: &Declaration<'_>) -> Vec<String> {
    match decl {
        Declaration::VariableDeclaration(var_decl) => var_decl
            .declarations
            .iter()
            .filter_map(|d| d.id.get_binding_identifier().map(|id| id.name.to_string()))
            .collect(),
        Declaration::FunctionDeclaration(f) => f
            .id
            .as_ref()
            .map(|id| vec![id.name.to_string()])
            .unwrap_or_default(),
        Declaration::ClassDeclaration(c) => c
            .id
            .as_ref()
            .map(|id| vec![id.name.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn declaration_to_statement(decl: Declaration<'_>) -> Statement<'_> {
    match decl {
        Declaration::VariableDeclaration(d) => Statement::VariableDeclaration(d),
        Declaration::FunctionDeclaration(d) => Statement::FunctionDeclaration(d),
        Declaration::ClassDeclaration(d) => Statement::ClassDeclaration(d),
        Declaration::TSTypeAliasDeclaration(d) => Statement::TSTypeAliasDeclaration(d),
        Declaration::TSInterfaceDeclaration(d) => Statement::TSInterfaceDeclaration(d),
        Declaration::TSEnumDeclaration(d) => Statement::TSEnumDeclaration(d),
        Declaration::TSModuleDeclaration(d) => Statement::TSModuleDeclaration(d),
        Declaration::TSImportEqualsDeclaration(d) => Statement::TSImportEqualsDeclaration(d),
        Declaration::TSGlobalDeclaration(d) => Statement::TSGlobalDeclaration(d),
    }
}

fn parse_program<'a>(allocator: &'a Allocator, source: &'a str) -> Result<Program<'a>, EvalError> {
    let source_type = SourceType::default()
        .with_module(true)
        .with_typescript(true);
    let parser_ret = Parser::new(allocator, source, source_type).parse();
    if !parser_ret.errors.is_empty() {
        let message = parser_ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(EvalError::parse(message));
    }
    Ok(parser_ret.program)
}

fn analyze(source: &str, namespace: &Path) -> Result<Analysis, EvalError> {
    let allocator = Allocator::default();
    let program = parse_program(&allocator, source)?;

    let mut imports = Vec::new();
    let mut exports = Vec::new();
    let mut snippets_after: HashMap<usize, Vec<String>> = HashMap::new();
    let mut synth_default_name: HashMap<usize, String> = HashMap::new();

    for (idx, stmt) in program.body.iter().enumerate() {
        match stmt {
            Statement::ImportDeclaration(import_decl) => {
                let specifier = import_decl.source.value.to_string();
                let source_ref = resolve_specifier(namespace, &specifier)?;
                if let Some(specifiers) = &import_decl.specifiers {
                    for spec in specifiers {
                        let imp = match spec {
                            ImportDeclarationSpecifier::ImportSpecifier(s) => Import {
                                local: s.local.name.to_string(),
                                imported: ImportedName::Named(s.imported.name().to_string()),
                                source: source_ref.clone(),
                            },
                            ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => Import {
                                local: s.local.name.to_string(),
                                imported: ImportedName::Default,
                                source: source_ref.clone(),
                            },
                            ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => Import {
                                local: s.local.name.to_string(),
                                imported: ImportedName::Namespace,
                                source: source_ref.clone(),
                            },
                        };
                        imports.push(imp);
                    }
                }
            }

            Statement::ExportNamedDeclaration(export_decl) => {
                if export_decl.source.is_some() {
                    return Err(EvalError::unsupported(
                        "re-exporting from another module (`export ... from`) is not supported",
                    ));
                }
                if let Some(decl) = &export_decl.declaration {
                    let names = declaration_names(decl);
                    let entry = snippets_after.entry(idx).or_default();
                    for name in &names {
                        entry.push(format!("__env.putBinding({name:?});"));
                        entry.push(format!("__env.putExport({name:?}, {name:?});"));
                        exports.push(Export {
                            exported: ExportKey::Named(name.clone()),
                            local: name.clone(),
                        });
                    }
                }
                for spec in &export_decl.specifiers {
                    let exported = spec.exported.name().to_string();
                    let local = spec.local.name().to_string();
                    exports.push(Export {
                        exported: ExportKey::Named(exported.clone()),
                        local: local.clone(),
                    });
                    snippets_after
                        .entry(idx)
                        .or_default()
                        .push(format!("__env.putExport({exported:?}, {local:?});"));
                }
            }

            Statement::ExportDefaultDeclaration(export_default) => {
                let local = match &export_default.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                        f.id.as_ref().map(|id| id.name.to_string())
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                        c.id.as_ref().map(|id| id.name.to_string())
                    }
                    ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                        continue;
                    }
                    other => {
                        let expr = other.as_expression().expect(
                            "non-declaration export default kind is always an expression",
                        );
                        if let Expression::Identifier(ident_ref) = expr {
                            let local = ident_ref.name.to_string();
                            exports.push(Export {
                                exported: ExportKey::Default,
                                local: local.clone(),
                            });
                            snippets_after
                                .entry(idx)
                                .or_default()
                                .push(format!("__env.putDefaultExport({local:?});"));
                            continue;
                        }
                        return Err(EvalError::unsupported(
                            "export default <expression> is only supported for functions, classes, and identifiers",
                        ));
                    }
                };

                let local = local.unwrap_or_else(|| {
                    let synth = format!("__defaultExport_{idx}");
                    synth_default_name.insert(idx, synth.clone());
                    synth
                });
                exports.push(Export {
                    exported: ExportKey::Default,
                    local: local.clone(),
                });
                snippets_after.entry(idx).or_default().push(format!(
                    "__env.putBinding({local:?}); __env.putDefaultExport({local:?});"
                ));
            }

            Statement::ExportAllDeclaration(_) => {
                return Err(EvalError::unsupported("`export * from ...` is not supported"));
            }

            Statement::VariableDeclaration(var_decl) => {
                let entry = snippets_after.entry(idx).or_default();
                for d in &var_decl.declarations {
                    if let Some(id) = d.id.get_binding_identifier() {
                        entry.push(format!("__env.putBinding({:?});", id.name.to_string()));
                    }
                }
            }
            Statement::FunctionDeclaration(f) => {
                if let Some(id) = &f.id {
                    snippets_after
                        .entry(idx)
                        .or_default()
                        .push(format!("__env.putBinding({:?});", id.name.to_string()));
                }
            }
            Statement::ClassDeclaration(c) => {
                if let Some(id) = &c.id {
                    snippets_after
                        .entry(idx)
                        .or_default()
                        .push(format!("__env.putBinding({:?});", id.name.to_string()));
                }
            }

            _ => {}
        }
    }

    Ok(Analysis {
        imports,
        exports,
        snippets_after,
        synth_default_name,
    })
}

fn parse_snippet_statements<'a>(allocator: &'a Allocator, text: &'a str) -> Vec<Statement<'a>> {
    let source_type = SourceType::default();
    let parser_ret = Parser::new(allocator, text, source_type).parse();
    let mut program = parser_ret.program;
    program.body.drain(..).collect()
}

fn synth_named_binding<'a>(
    allocator: &'a Allocator,
    template: &'a str,
    replacement: Expression<'a>,
) -> Statement<'a> {
    let parser_ret = Parser::new(allocator, template, SourceType::default()).parse();
    let mut program = parser_ret.program;
    let mut stmt = program
        .body
        .drain(..)
        .next()
        .expect("template always produces exactly one statement");
    if let Statement::VariableDeclaration(ref mut var_decl) = stmt {
        if let Some(declarator) = var_decl.declarations.first_mut() {
            declarator.init = Some(replacement);
        }
    }
    stmt
}

fn apply(
    allocator: &Allocator,
    source: &str,
    analysis: &Analysis,
    default_templates: &HashMap<usize, String>,
) -> Result<String, EvalError> {
    let mut program = parse_program(allocator, source)?;

    let mut new_body: OxcVec<Statement> = OxcVec::with_capacity_in(program.body.len() * 2, allocator);

    for (idx, stmt) in program.body.drain(..).enumerate() {
        match stmt {
            Statement::ImportDeclaration(_) => {}

            Statement::ExportNamedDeclaration(export_decl) => {
                let inner = export_decl.unbox();
                if let Some(decl) = inner.declaration {
                    new_body.push(declaration_to_statement(decl));
                }
            }

            Statement::ExportDefaultDeclaration(export_default) => {
                let inner = export_default.unbox();
                match inner.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                        if func.id.is_some() {
                            new_body.push(Statement::FunctionDeclaration(func));
                        } else {
                            let template = default_templates
                                .get(&idx)
                                .expect("synth template precomputed during analysis");
                            new_body.push(synth_named_binding(
                                allocator,
                                template,
                                Expression::FunctionExpression(func),
                            ));
                        }
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                        if class.id.is_some() {
                            new_body.push(Statement::ClassDeclaration(class));
                        } else {
                            let template = default_templates
                                .get(&idx)
                                .expect("synth template precomputed during analysis");
                            new_body.push(synth_named_binding(
                                allocator,
                                template,
                                Expression::ClassExpression(class),
                            ));
                        }
                    }
                    ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {}
                    _identifier_or_other => {
                        // Already recorded as a putDefaultExport snippet during analysis;
                        // the identifier itself keeps its own declaration statement elsewhere.
                    }
                }
            }

            Statement::ExportAllDeclaration(_) => {}

            // A trailing bare expression statement is left untouched: QuickJS
            // reports the completion value of the last statement it evaluates,
            // which is exactly the "result" value the REPL protocol wants back.
            other => new_body.push(other),
        }

        if let Some(snippets) = analysis.snippets_after.get(&idx) {
            for text in snippets {
                for parsed in parse_snippet_statements(allocator, text) {
                    new_body.push(parsed);
                }
            }
        }
    }

    program.body = new_body;
    let codegen_ret = Codegen::new().build(&program);
    Ok(codegen_ret.code)
}

/// Erase remaining TypeScript syntax, mirroring the teacher's
/// `transpile_typescript`.
fn strip_types(source: &str, namespace: &Path) -> Result<String, EvalError> {
    let allocator = Allocator::default();
    let filename = namespace.to_str().unwrap_or("module.ts");
    let source_type = SourceType::from_path(filename).unwrap_or_default();

    let parser_ret = Parser::new(&allocator, source, source_type).parse();
    if !parser_ret.errors.is_empty() {
        let message = parser_ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(EvalError::parse(message));
    }
    let mut program = parser_ret.program;

    let semantic_ret = SemanticBuilder::new().build(&program);
    if !semantic_ret.errors.is_empty() {
        let message = semantic_ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(EvalError::parse(message));
    }
    let scoping = semantic_ret.semantic.into_scoping();

    let transform_options = TransformOptions::default();
    let transformer_ret = Transformer::new(&allocator, Path::new(filename), &transform_options)
        .build_with_scoping(scoping, &mut program);
    if !transformer_ret.errors.is_empty() {
        let message = transformer_ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(EvalError::parse(message));
    }

    let codegen_ret = Codegen::new().build(&program);
    Ok(codegen_ret.code)
}

/// Rewrite one fragment of source for incremental evaluation: strip module
/// syntax, register every top-level binding and export with the host
/// environment via injected `__env.put*` calls, turn a trailing bare
/// expression into its result, and erase TypeScript types.
pub fn rewrite_for_eval(source: &str, namespace: &Path) -> Result<RewriteOutput, EvalError> {
    let analysis = analyze(source, namespace)?;
    let default_templates: HashMap<usize, String> = analysis
        .synth_default_name
        .iter()
        .map(|(idx, name)| (*idx, format!("const {name} = 0;")))
        .collect();

    let allocator = Allocator::default();
    let intermediate = apply(&allocator, source, &analysis, &default_templates)?;
    let final_code = strip_types(&intermediate, namespace)?;

    Ok(RewriteOutput {
        code: final_code,
        imports: analysis.imports,
        exports: analysis.exports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ns() -> PathBuf {
        PathBuf::from("/tmp/session/main.ts")
    }

    #[test]
    fn trailing_expression_is_left_as_a_bare_statement() {
        let out = rewrite_for_eval("1 + 1", &ns()).unwrap();
        assert!(out.code.trim_end().ends_with("1 + 1;"));
    }

    #[test]
    fn top_level_const_registers_binding() {
        let out = rewrite_for_eval("const x = 5;", &ns()).unwrap();
        assert!(out.code.contains("__env.putBinding(\"x\")"));
    }

    #[test]
    fn named_export_registers_export_and_binding() {
        let out = rewrite_for_eval("export const API_VERSION = 1;", &ns()).unwrap();
        assert!(out.code.contains("const API_VERSION = 1"));
        assert!(out.code.contains("__env.putExport(\"API_VERSION\", \"API_VERSION\")"));
        assert_eq!(out.exports.len(), 1);
        assert_eq!(out.exports[0].exported, ExportKey::Named("API_VERSION".into()));
    }

    #[test]
    fn named_default_function_export_keeps_its_name() {
        let out = rewrite_for_eval("export default function greet() {}", &ns()).unwrap();
        assert!(out.code.contains("function greet"));
        assert!(out.code.contains("__env.putDefaultExport(\"greet\")"));
    }

    #[test]
    fn anonymous_default_function_export_is_synthesized_a_name() {
        let out = rewrite_for_eval("export default function() {}", &ns()).unwrap();
        assert!(out.code.contains("__defaultExport_0"));
        assert!(out.code.contains("__env.putDefaultExport(\"__defaultExport_0\")"));
    }

    #[test]
    fn default_export_of_identifier_is_supported() {
        let out = rewrite_for_eval("const helper = 1;\nexport default helper;", &ns()).unwrap();
        assert!(out.code.contains("__env.putDefaultExport(\"helper\")"));
    }

    #[test]
    fn default_export_of_arbitrary_expression_is_unsupported() {
        let err = rewrite_for_eval("export default 5;", &ns()).unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedError { .. }));
    }

    #[test]
    fn import_statement_is_recorded_and_dropped_from_output() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("util.ts"), "export const x = 1;").unwrap();
        let entry = dir.path().join("main.ts");
        std::fs::write(&entry, "").unwrap();

        let out = rewrite_for_eval("import { x } from \"./util\";\nx", &entry).unwrap();
        assert!(!out.code.contains("import"));
        assert_eq!(out.imports.len(), 1);
        assert_eq!(out.imports[0].local, "x");
    }

    #[test]
    fn re_export_with_source_is_unsupported() {
        let err = rewrite_for_eval("export { x } from \"./other\";", &ns()).unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedError { .. }));
    }

    #[test]
    fn export_star_is_unsupported() {
        let err = rewrite_for_eval("export * from \"./other\";", &ns()).unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedError { .. }));
    }

    #[test]
    fn type_annotations_are_erased() {
        let out = rewrite_for_eval("const x: number = 42;", &ns()).unwrap();
        assert!(!out.code.contains(": number"));
    }
}
