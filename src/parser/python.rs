use tree_sitter::{Node, Parser};

use super::{
    LanguageExtractor, end_line, has_child_kind, is_field_of_parent, node_text, set_language,
    start_line, unquote,
};
use crate::error::ParseError;
use crate::model::{
    ImportBinding, ImportType, Language, Param, ParsedFile, ParsedImport, ParsedReference,
    ParsedSymbol, Signature, SymbolKind,
};

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        set_language(&mut parser, tree_sitter_python::LANGUAGE.into(), "python")?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for PythonExtractor {
    fn extract(&mut self, source: &str) -> Option<ParsedFile> {
        let tree = self.parser.parse(source, None)?;
        let mut file = ParsedFile {
            language: Language::Python,
            imports: Vec::new(),
            symbols: Vec::new(),
            references: Vec::new(),
        };
        let root = tree.root_node();
        walk_node(root, &Context::default(), source, &mut file);
        if let Some(all) = dunder_all(root, source) {
            for symbol in file.symbols.iter_mut().filter(|s| s.parent.is_none()) {
                symbol.is_exported = all.iter().any(|name| name == &symbol.name);
            }
        }
        Some(file)
    }
}

#[derive(Clone, Default)]
struct Context {
    class: Option<String>,
    scope: Option<String>,
    in_function: bool,
    in_type: bool,
    type_checking: bool,
}

impl Context {
    fn reference(&self, name: &str, member: Option<String>, line: usize, is_call: bool) -> ParsedReference {
        ParsedReference {
            from: self.scope.clone(),
            name: name.to_string(),
            member,
            line,
            is_call,
            type_only: self.in_type,
        }
    }

    fn typed(&self) -> Context {
        Context {
            in_type: true,
            ..self.clone()
        }
    }
}

fn is_public(name: &str) -> bool {
    !name.starts_with('_') || (name.starts_with("__") && name.ends_with("__"))
}

fn walk_node(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    match node.kind() {
        "import_statement" => {
            handle_import(node, ctx, source, file);
            return;
        }
        "import_from_statement" => {
            handle_import_from(node, ctx, source, file);
            return;
        }
        "future_import_statement" | "comment" | "string" | "integer" | "float" => return,
        "if_statement" => {
            let guarded = node
                .child_by_field_name("condition")
                .is_some_and(|cond| node_text(cond, source).ends_with("TYPE_CHECKING"));
            if guarded {
                let inner = Context {
                    type_checking: true,
                    ..ctx.clone()
                };
                if let Some(body) = node.child_by_field_name("consequence") {
                    walk_node(body, &inner, source, file);
                }
                return;
            }
        }
        "decorated_definition" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "decorator" {
                    walk_children(child, ctx, source, file);
                }
            }
            if let Some(definition) = node.child_by_field_name("definition") {
                walk_node(definition, ctx, source, file);
            }
            return;
        }
        "function_definition" => {
            handle_function(node, ctx, source, file);
            return;
        }
        "class_definition" => {
            handle_class(node, ctx, source, file);
            return;
        }
        "expression_statement" if ctx.scope.is_none() && ctx.class.is_none() => {
            record_module_assignment(node, source, file);
        }
        "call" => {
            handle_call(node, ctx, source, file);
            return;
        }
        "attribute" => {
            push_attribute(node, ctx, source, file, false);
            return;
        }
        "type" => {
            walk_children(node, &ctx.typed(), source, file);
            return;
        }
        "identifier" => {
            if !is_binding_identifier(node) {
                file.references.push(ctx.reference(
                    node_text(node, source),
                    None,
                    start_line(node),
                    false,
                ));
            }
            return;
        }
        _ => {}
    }
    walk_children(node, ctx, source, file);
}

fn walk_children(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, source, file);
    }
}

fn is_binding_identifier(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "parameters" | "lambda_parameters" | "typed_parameter" | "list_splat_pattern"
        | "dictionary_splat_pattern" | "global_statement" | "nonlocal_statement"
        | "pattern_list" | "tuple_pattern" | "aliased_import" | "dotted_name" => true,
        "default_parameter" | "typed_default_parameter" | "keyword_argument"
        | "function_definition" | "class_definition" => is_field_of_parent(node, "name"),
        "assignment" | "for_statement" | "for_in_clause" => is_field_of_parent(node, "left"),
        "as_pattern_target" => true,
        _ => false,
    }
}

fn import_type(ctx: &Context) -> ImportType {
    if ctx.type_checking {
        ImportType::TypeOnly
    } else {
        ImportType::Static
    }
}

/// `import a.b` / `import a.b as c`
fn handle_import(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        let (module, local) = match name.kind() {
            "aliased_import" => {
                let Some(module) = name.child_by_field_name("name") else {
                    continue;
                };
                let alias = name
                    .child_by_field_name("alias")
                    .map(|a| node_text(a, source).to_string());
                let module = node_text(module, source).to_string();
                let local = alias.unwrap_or_else(|| first_segment(&module));
                (module, local)
            }
            _ => {
                let module = node_text(name, source).to_string();
                let local = first_segment(&module);
                (module, local)
            }
        };
        file.imports.push(ParsedImport {
            module,
            import_type: import_type(ctx),
            line: start_line(node),
            bindings: vec![ImportBinding {
                imported: "*".to_string(),
                local,
                type_only: ctx.type_checking,
                namespace: true,
            }],
        });
    }
}

fn first_segment(module: &str) -> String {
    module.split('.').next().unwrap_or(module).to_string()
}

/// `from m import a, b as c` / `from . import x` / `from m import *`
fn handle_import_from(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let Some(module_node) = node.child_by_field_name("module_name") else {
        return;
    };
    let module = node_text(module_node, source).to_string();
    let mut bindings = Vec::new();
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        let (imported, local) = match name.kind() {
            "aliased_import" => {
                let imported = name
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source).to_string())
                    .unwrap_or_default();
                let local = name
                    .child_by_field_name("alias")
                    .map(|n| node_text(n, source).to_string())
                    .unwrap_or_else(|| imported.clone());
                (imported, local)
            }
            _ => {
                let imported = node_text(name, source).to_string();
                (imported.clone(), imported)
            }
        };
        if imported.is_empty() {
            continue;
        }
        bindings.push(ImportBinding {
            imported,
            local,
            type_only: ctx.type_checking,
            namespace: false,
        });
    }
    if has_child_kind(node, "wildcard_import") {
        bindings.push(ImportBinding {
            imported: "*".to_string(),
            local: "*".to_string(),
            type_only: ctx.type_checking,
            namespace: true,
        });
    }

    // `from . import helpers` names submodules of the package, one import each.
    if module.chars().all(|c| c == '.') {
        for binding in bindings {
            if binding.namespace {
                continue;
            }
            file.imports.push(ParsedImport {
                module: format!("{module}{}", binding.imported),
                import_type: import_type(ctx),
                line: start_line(node),
                bindings: vec![ImportBinding {
                    namespace: true,
                    ..binding
                }],
            });
        }
        return;
    }
    file.imports.push(ParsedImport {
        module,
        import_type: import_type(ctx),
        line: start_line(node),
        bindings,
    });
}

fn handle_function(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let nested = ctx.in_function;
    let qualified = match (&ctx.class, nested) {
        (Some(class), false) => format!("{class}.{name}"),
        _ => name.clone(),
    };
    if !nested {
        let is_method = ctx.class.is_some();
        file.symbols.push(ParsedSymbol {
            name: name.clone(),
            qualified_name: qualified.clone(),
            kind: if is_method {
                SymbolKind::Method
            } else {
                SymbolKind::Function
            },
            line: start_line(node),
            end_line: end_line(node),
            is_exported: is_public(&name),
            parent: ctx.class.clone(),
            signature: Some(extract_signature(node, is_method, source)),
        });
    }
    let inner = Context {
        scope: if nested {
            ctx.scope.clone()
        } else {
            Some(qualified)
        },
        in_function: true,
        ..ctx.clone()
    };
    if let Some(params) = node.child_by_field_name("parameters") {
        walk_node(params, &inner, source, file);
    }
    if let Some(ret) = node.child_by_field_name("return_type") {
        walk_node(ret, &inner.typed(), source, file);
    }
    if let Some(body) = node.child_by_field_name("body") {
        walk_node(body, &inner, source, file);
    }
}

fn handle_class(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    if ctx.in_function || ctx.class.is_some() {
        if let Some(body) = node.child_by_field_name("body") {
            walk_node(body, ctx, source, file);
        }
        return;
    }
    file.symbols.push(ParsedSymbol {
        name: name.clone(),
        qualified_name: name.clone(),
        kind: SymbolKind::Class,
        line: start_line(node),
        end_line: end_line(node),
        is_exported: is_public(&name),
        parent: None,
        signature: None,
    });
    let inner = Context {
        class: Some(name.clone()),
        scope: Some(name),
        ..ctx.clone()
    };
    if let Some(bases) = node.child_by_field_name("superclasses") {
        walk_node(bases, &inner, source, file);
    }
    if let Some(body) = node.child_by_field_name("body") {
        walk_node(body, &inner, source, file);
    }
}

fn record_module_assignment(node: Node<'_>, source: &str, file: &mut ParsedFile) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() != "assignment" {
            continue;
        }
        let Some(left) = child.child_by_field_name("left") else {
            continue;
        };
        if left.kind() != "identifier" {
            continue;
        }
        let name = node_text(left, source).to_string();
        if name == "__all__" {
            continue;
        }
        let constant = name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        file.symbols.push(ParsedSymbol {
            is_exported: is_public(&name),
            qualified_name: name.clone(),
            name,
            kind: if constant {
                SymbolKind::Constant
            } else {
                SymbolKind::Variable
            },
            line: start_line(child),
            end_line: end_line(child),
            parent: None,
            signature: None,
        });
    }
}

fn dunder_all(root: Node<'_>, source: &str) -> Option<Vec<String>> {
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let Some(assign) = stmt.named_child(0).filter(|n| n.kind() == "assignment") else {
            continue;
        };
        let is_all = assign
            .child_by_field_name("left")
            .is_some_and(|left| node_text(left, source) == "__all__");
        if !is_all {
            continue;
        }
        let right = assign.child_by_field_name("right")?;
        let mut names = Vec::new();
        let mut inner = right.walk();
        for item in right.named_children(&mut inner) {
            if item.kind() == "string" {
                if let Some(name) = unquote(node_text(item, source)) {
                    names.push(name);
                }
            }
        }
        return Some(names);
    }
    None
}

fn handle_call(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    if let Some(function) = node.child_by_field_name("function") {
        match function.kind() {
            "identifier" => {
                let name = node_text(function, source);
                if name == "__import__" || name == "import_module" {
                    if let Some(module) = first_string_argument(node, source) {
                        file.imports.push(ParsedImport {
                            module,
                            import_type: ImportType::Dynamic,
                            line: start_line(node),
                            bindings: Vec::new(),
                        });
                    }
                }
                file.references
                    .push(ctx.reference(name, None, start_line(function), true));
            }
            "attribute" => {
                if node_text(function, source) == "importlib.import_module" {
                    if let Some(module) = first_string_argument(node, source) {
                        file.imports.push(ParsedImport {
                            module,
                            import_type: ImportType::Dynamic,
                            line: start_line(node),
                            bindings: Vec::new(),
                        });
                    }
                }
                push_attribute(function, ctx, source, file, true);
            }
            _ => walk_node(function, ctx, source, file),
        }
    }
    if let Some(args) = node.child_by_field_name("arguments") {
        walk_node(args, ctx, source, file);
    }
}

fn first_string_argument(call: Node<'_>, source: &str) -> Option<String> {
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    if first.kind() != "string" {
        return None;
    }
    unquote(node_text(first, source))
}

fn push_attribute(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile, is_call: bool) {
    let object = node.child_by_field_name("object");
    let member = node
        .child_by_field_name("attribute")
        .map(|a| node_text(a, source).to_string());
    let line = start_line(node);
    match object {
        Some(object) if object.kind() == "identifier" => {
            let name = node_text(object, source);
            if matches!(name, "self" | "cls") {
                if let (Some(class), Some(member)) = (ctx.class.as_deref(), member) {
                    file.references
                        .push(ctx.reference(class, Some(member), line, is_call));
                }
                return;
            }
            file.references
                .push(ctx.reference(name, member, line, is_call));
        }
        Some(object) => walk_node(object, ctx, source, file),
        None => {}
    }
}

fn extract_signature(node: Node<'_>, is_method: bool, source: &str) -> Signature {
    let mut params = Vec::new();
    if let Some(list) = node.child_by_field_name("parameters") {
        let mut cursor = list.walk();
        for (idx, param) in list.named_children(&mut cursor).enumerate() {
            let Some(parsed) = parse_param(param, source) else {
                continue;
            };
            if is_method && idx == 0 && matches!(parsed.name.as_str(), "self" | "cls") {
                continue;
            }
            params.push(parsed);
        }
    }
    Signature {
        params,
        return_type: node
            .child_by_field_name("return_type")
            .map(|n| node_text(n, source).to_string()),
        is_async: has_child_kind(node, "async"),
    }
}

fn parse_param(param: Node<'_>, source: &str) -> Option<Param> {
    let type_name = param
        .child_by_field_name("type")
        .map(|t| node_text(t, source).to_string());
    match param.kind() {
        "identifier" => Some(Param {
            name: node_text(param, source).to_string(),
            type_name: None,
            optional: false,
            variadic: false,
        }),
        "typed_parameter" => {
            let inner = param.named_child(0)?;
            let variadic = matches!(
                inner.kind(),
                "list_splat_pattern" | "dictionary_splat_pattern"
            );
            Some(Param {
                name: node_text(inner, source).trim_start_matches('*').to_string(),
                type_name,
                optional: false,
                variadic,
            })
        }
        "default_parameter" | "typed_default_parameter" => Some(Param {
            name: param
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default(),
            type_name,
            optional: true,
            variadic: false,
        }),
        "list_splat_pattern" | "dictionary_splat_pattern" => Some(Param {
            name: node_text(param, source).trim_start_matches('*').to_string(),
            type_name: None,
            optional: false,
            variadic: true,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> ParsedFile {
        PythonExtractor::new().unwrap().extract(source).unwrap()
    }

    #[test]
    fn collects_import_forms() {
        let file = extract(
            "import os.path\nimport numpy as np\nfrom utils.helpers import fmt, load as ld\nfrom . import sibling\nfrom ..pkg import *\n",
        );
        let modules: Vec<_> = file.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["os.path", "numpy", "utils.helpers", ".sibling", "..pkg"]);
        assert_eq!(file.imports[0].bindings[0].local, "os");
        assert_eq!(file.imports[1].bindings[0].local, "np");
        assert_eq!(file.imports[2].bindings[1].imported, "load");
        assert_eq!(file.imports[2].bindings[1].local, "ld");
        assert!(file.imports[4].bindings[0].namespace);
    }

    #[test]
    fn type_checking_block_imports_are_type_only() {
        let file = extract(
            "from typing import TYPE_CHECKING\nif TYPE_CHECKING:\n    from models import User\n",
        );
        assert_eq!(file.imports[1].import_type, ImportType::TypeOnly);
        assert!(file.imports[1].bindings[0].type_only);
    }

    #[test]
    fn methods_are_qualified_and_self_calls_resolve_to_class() {
        let file = extract(
            "class Service:\n    def run(self, job, retries=3, *args):\n        return self.step(job)\n\n    def step(self, job):\n        helper(job)\n\n    def _hidden(self):\n        pass\n",
        );
        let run = file
            .symbols
            .iter()
            .find(|s| s.qualified_name == "Service.run")
            .unwrap();
        assert_eq!(run.kind, SymbolKind::Method);
        assert_eq!(run.parent.as_deref(), Some("Service"));
        let sig = run.signature.as_ref().unwrap();
        assert_eq!(sig.params.len(), 3);
        assert!(sig.params[1].optional);
        assert!(sig.params[2].variadic);
        let hidden = file.symbols.iter().find(|s| s.name == "_hidden").unwrap();
        assert!(!hidden.is_exported);

        let self_call = file
            .references
            .iter()
            .find(|r| r.is_call && r.member.as_deref() == Some("step"))
            .unwrap();
        assert_eq!(self_call.name, "Service");
        assert_eq!(self_call.from.as_deref(), Some("Service.run"));
        assert!(
            file.references
                .iter()
                .any(|r| r.is_call && r.name == "helper" && r.from.as_deref() == Some("Service.step"))
        );
    }

    #[test]
    fn async_functions_and_annotations() {
        let file = extract("async def fetch(url: str) -> Response:\n    return await get(url)\n");
        let fetch = &file.symbols[0];
        let sig = fetch.signature.as_ref().unwrap();
        assert!(sig.is_async);
        assert_eq!(sig.params[0].type_name.as_deref(), Some("str"));
        assert_eq!(sig.return_type.as_deref(), Some("Response"));
        let response = file.references.iter().find(|r| r.name == "Response").unwrap();
        assert!(response.type_only);
    }

    #[test]
    fn dunder_all_controls_exports() {
        let file = extract("__all__ = ['public']\n\ndef public():\n    pass\n\ndef other():\n    pass\n");
        let exported: Vec<_> = file
            .symbols
            .iter()
            .filter(|s| s.is_exported)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(exported, vec!["public"]);
    }
}
