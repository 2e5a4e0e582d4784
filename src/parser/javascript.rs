use std::collections::HashSet;
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

pub struct JsExtractor {
    parser: Parser,
    language: Language,
}

impl JsExtractor {
    pub fn new(language: Language) -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        match language {
            Language::TypeScript => set_language(
                &mut parser,
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                "typescript",
            )?,
            Language::Tsx => {
                set_language(&mut parser, tree_sitter_typescript::LANGUAGE_TSX.into(), "tsx")?
            }
            _ => set_language(
                &mut parser,
                tree_sitter_javascript::LANGUAGE.into(),
                "javascript",
            )?,
        }
        Ok(Self { parser, language })
    }
}

impl LanguageExtractor for JsExtractor {
    fn extract(&mut self, source: &str) -> Option<ParsedFile> {
        let tree = self.parser.parse(source, None)?;
        let mut out = Output {
            file: ParsedFile {
                language: self.language,
                imports: Vec::new(),
                symbols: Vec::new(),
                references: Vec::new(),
            },
            exported_names: HashSet::new(),
        };
        walk_node(tree.root_node(), &Context::default(), source, &mut out);
        let Output {
            mut file,
            exported_names,
        } = out;
        for symbol in file.symbols.iter_mut() {
            if symbol.parent.is_none() && exported_names.contains(&symbol.name) {
                symbol.is_exported = true;
            }
        }
        Some(file)
    }
}

struct Output {
    file: ParsedFile,
    /// Names exported after declaration (`export { a }`, `module.exports`).
    exported_names: HashSet<String>,
}

#[derive(Clone, Default)]
struct Context {
    class: Option<String>,
    scope: Option<String>,
    exported: bool,
    in_function: bool,
    in_type: bool,
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

fn walk_node(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    match node.kind() {
        "import_statement" => {
            handle_import(node, source, out);
            return;
        }
        "export_statement" => {
            handle_export(node, ctx, source, out);
            return;
        }
        "function_declaration" | "generator_function_declaration" | "function_signature"
            if !ctx.in_function =>
        {
            handle_function(node, ctx, source, out);
            return;
        }
        "class_declaration" | "abstract_class_declaration" if !ctx.in_function => {
            handle_class(node, ctx, source, out);
            return;
        }
        "interface_declaration" => {
            handle_type_item(node, ctx, source, out, SymbolKind::Interface);
            return;
        }
        "type_alias_declaration" => {
            handle_type_item(node, ctx, source, out, SymbolKind::TypeAlias);
            return;
        }
        "enum_declaration" => {
            handle_type_item(node, ctx, source, out, SymbolKind::Enum);
            return;
        }
        "lexical_declaration" | "variable_declaration" => {
            handle_variable_declaration(node, ctx, source, out);
            return;
        }
        "call_expression" => {
            handle_call(node, ctx, source, out);
            return;
        }
        "new_expression" => {
            if let Some(ctor) = node.child_by_field_name("constructor") {
                push_callee(ctor, ctx, source, out, true);
            }
            if let Some(args) = node.child_by_field_name("arguments") {
                walk_node(args, ctx, source, out);
            }
            return;
        }
        "member_expression" => {
            push_callee(node, ctx, source, out, false);
            return;
        }
        "assignment_expression" => {
            record_commonjs_export(node, source, out);
        }
        "identifier" => {
            if !is_binding_identifier(node) {
                let name = node_text(node, source);
                out.file
                    .references
                    .push(ctx.reference(name, None, start_line(node), false));
            }
            return;
        }
        "type_identifier" => {
            let name = node_text(node, source);
            out.file
                .references
                .push(ctx.typed().reference(name, None, start_line(node), false));
            return;
        }
        "nested_type_identifier" => {
            let module = node.child_by_field_name("module");
            let name = node.child_by_field_name("name");
            if let (Some(module), Some(name)) = (module, name) {
                if module.kind() == "identifier" {
                    out.file.references.push(ctx.typed().reference(
                        node_text(module, source),
                        Some(node_text(name, source).to_string()),
                        start_line(node),
                        false,
                    ));
                }
            }
            return;
        }
        "type_annotation" | "type_arguments" | "constraint" => {
            walk_children(node, &ctx.typed(), source, out);
            return;
        }
        "arrow_function" | "function_expression" | "function" | "generator_function"
        | "function_declaration" | "generator_function_declaration" => {
            let inner = Context {
                in_function: true,
                ..ctx.clone()
            };
            walk_children(node, &inner, source, out);
            return;
        }
        "string" | "comment" | "regex" | "number" | "property_identifier"
        | "shorthand_property_identifier_pattern" | "statement_identifier" => return,
        _ => {}
    }
    walk_children(node, ctx, source, out);
}

fn walk_children(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, source, out);
    }
}

fn is_binding_identifier(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "variable_declarator" => is_field_of_parent(node, "name"),
        "required_parameter" | "optional_parameter" => is_field_of_parent(node, "pattern"),
        "arrow_function" => is_field_of_parent(node, "parameter"),
        "assignment_pattern" => is_field_of_parent(node, "left"),
        "function_declaration" | "function_expression" | "generator_function_declaration"
        | "class_declaration" | "class" | "method_definition" => is_field_of_parent(node, "name"),
        "catch_clause" => is_field_of_parent(node, "parameter"),
        "formal_parameters" | "rest_pattern" | "array_pattern" | "labeled_statement" => true,
        _ => false,
    }
}

fn handle_import(node: Node<'_>, source: &str, out: &mut Output) {
    let statement_type_only = has_child_kind(node, "type") || has_child_kind(node, "typeof");
    let mut bindings = Vec::new();
    let mut module = node
        .child_by_field_name("source")
        .and_then(|n| unquote(node_text(n, source)));
    let mut import_type = ImportType::Static;

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "import_clause" => collect_import_clause(child, source, statement_type_only, &mut bindings),
            "import_require_clause" => {
                import_type = ImportType::Require;
                if module.is_none() {
                    module = child
                        .child_by_field_name("source")
                        .and_then(|n| unquote(node_text(n, source)));
                }
                let mut inner = child.walk();
                if let Some(local) = child
                    .named_children(&mut inner)
                    .find(|n| n.kind() == "identifier")
                {
                    bindings.push(namespace_binding(node_text(local, source), false));
                }
            }
            _ => {}
        }
    }
    let Some(module) = module else {
        return;
    };
    if statement_type_only || (!bindings.is_empty() && bindings.iter().all(|b| b.type_only)) {
        import_type = ImportType::TypeOnly;
    }
    out.file.imports.push(ParsedImport {
        module,
        import_type,
        line: start_line(node),
        bindings,
    });
}

fn collect_import_clause(
    clause: Node<'_>,
    source: &str,
    type_only: bool,
    bindings: &mut Vec<ImportBinding>,
) {
    let mut cursor = clause.walk();
    for child in clause.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => bindings.push(ImportBinding {
                imported: "default".to_string(),
                local: node_text(child, source).to_string(),
                type_only,
                namespace: false,
            }),
            "namespace_import" => {
                let mut inner = child.walk();
                if let Some(local) = child
                    .named_children(&mut inner)
                    .find(|n| n.kind() == "identifier")
                {
                    bindings.push(namespace_binding(node_text(local, source), type_only));
                }
            }
            "named_imports" => {
                let mut inner = child.walk();
                for spec in child.named_children(&mut inner) {
                    if spec.kind() != "import_specifier" {
                        continue;
                    }
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    let imported = specifier_name(name, source);
                    let local = spec
                        .child_by_field_name("alias")
                        .map(|alias| node_text(alias, source).to_string())
                        .unwrap_or_else(|| imported.clone());
                    bindings.push(ImportBinding {
                        imported,
                        local,
                        type_only: type_only
                            || has_child_kind(spec, "type")
                            || has_child_kind(spec, "typeof"),
                        namespace: false,
                    });
                }
            }
            _ => {}
        }
    }
}

fn specifier_name(node: Node<'_>, source: &str) -> String {
    let raw = node_text(node, source);
    unquote(raw).unwrap_or_else(|| raw.to_string())
}

fn namespace_binding(local: &str, type_only: bool) -> ImportBinding {
    ImportBinding {
        imported: "*".to_string(),
        local: local.to_string(),
        type_only,
        namespace: true,
    }
}

fn handle_export(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    let type_only = has_child_kind(node, "type");
    if let Some(source_node) = node.child_by_field_name("source") {
        let Some(module) = unquote(node_text(source_node, source)) else {
            return;
        };
        let mut bindings = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "export_clause" => bindings.extend(export_specifiers(child, source, type_only)),
                "namespace_export" => {
                    let mut inner = child.walk();
                    if let Some(local) = child.named_children(&mut inner).next() {
                        bindings.push(namespace_binding(&specifier_name(local, source), type_only));
                    }
                }
                _ => {}
            }
        }
        if bindings.is_empty() {
            bindings.push(namespace_binding("*", type_only));
        }
        out.file.imports.push(ParsedImport {
            module,
            import_type: if type_only {
                ImportType::TypeOnly
            } else {
                ImportType::ReExport
            },
            line: start_line(node),
            bindings,
        });
        return;
    }

    let exported = Context {
        exported: true,
        ..ctx.clone()
    };
    if let Some(declaration) = node.child_by_field_name("declaration") {
        walk_node(declaration, &exported, source, out);
        return;
    }
    if let Some(value) = node.child_by_field_name("value") {
        if value.kind() == "identifier" {
            out.exported_names
                .insert(node_text(value, source).to_string());
        }
        walk_node(value, ctx, source, out);
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "export_clause" {
            for binding in export_specifiers(child, source, false) {
                out.exported_names.insert(binding.imported);
            }
        }
    }
}

fn export_specifiers(clause: Node<'_>, source: &str, type_only: bool) -> Vec<ImportBinding> {
    let mut bindings = Vec::new();
    let mut cursor = clause.walk();
    for spec in clause.named_children(&mut cursor) {
        if spec.kind() != "export_specifier" {
            continue;
        }
        let Some(name) = spec.child_by_field_name("name") else {
            continue;
        };
        let imported = specifier_name(name, source);
        let local = spec
            .child_by_field_name("alias")
            .map(|alias| specifier_name(alias, source))
            .unwrap_or_else(|| imported.clone());
        bindings.push(ImportBinding {
            imported,
            local,
            type_only: type_only || has_child_kind(spec, "type"),
            namespace: false,
        });
    }
    bindings
}

fn record_commonjs_export(node: Node<'_>, source: &str, out: &mut Output) {
    let (Some(left), Some(right)) = (
        node.child_by_field_name("left"),
        node.child_by_field_name("right"),
    ) else {
        return;
    };
    let target = node_text(left, source);
    if let Some(name) = target.strip_prefix("exports.") {
        out.exported_names.insert(name.to_string());
        return;
    }
    if let Some(name) = target.strip_prefix("module.exports.") {
        out.exported_names.insert(name.to_string());
        return;
    }
    if target != "module.exports" {
        return;
    }
    match right.kind() {
        "identifier" => {
            out.exported_names
                .insert(node_text(right, source).to_string());
        }
        "object" => {
            let mut cursor = right.walk();
            for prop in right.named_children(&mut cursor) {
                let key = match prop.kind() {
                    "shorthand_property_identifier" => Some(prop),
                    "pair" => prop.child_by_field_name("key"),
                    _ => None,
                };
                if let Some(key) = key {
                    out.exported_names
                        .insert(node_text(key, source).to_string());
                }
            }
        }
        _ => {}
    }
}

fn handle_call(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    let Some(function) = node.child_by_field_name("function") else {
        walk_children(node, ctx, source, out);
        return;
    };
    let args = node.child_by_field_name("arguments");
    if function.kind() == "import" {
        if let Some(module) = args.and_then(|a| first_string_argument(a, source)) {
            out.file.imports.push(ParsedImport {
                module,
                import_type: ImportType::Dynamic,
                line: start_line(node),
                bindings: Vec::new(),
            });
        }
        return;
    }
    if function.kind() == "identifier" && node_text(function, source) == "require" {
        if let Some(module) = args.and_then(|a| first_string_argument(a, source)) {
            out.file.imports.push(ParsedImport {
                module,
                import_type: ImportType::Require,
                line: start_line(node),
                bindings: Vec::new(),
            });
            return;
        }
    }
    push_callee(function, ctx, source, out, true);
    if let Some(type_args) = node.child_by_field_name("type_arguments") {
        walk_children(type_args, &ctx.typed(), source, out);
    }
    if let Some(args) = args {
        walk_node(args, ctx, source, out);
    }
}

/// Records `name(...)`, `obj.member(...)` and `this.member(...)` shapes; walks
/// anything more complex.
fn push_callee(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output, is_call: bool) {
    let line = start_line(node);
    match node.kind() {
        "identifier" => {
            out.file
                .references
                .push(ctx.reference(node_text(node, source), None, line, is_call));
        }
        "member_expression" => {
            let object = node.child_by_field_name("object");
            let property = node
                .child_by_field_name("property")
                .map(|p| node_text(p, source).to_string());
            match object {
                Some(object) if object.kind() == "identifier" => {
                    out.file.references.push(ctx.reference(
                        node_text(object, source),
                        property,
                        line,
                        is_call,
                    ));
                }
                Some(object) if object.kind() == "this" => {
                    if let (Some(class), Some(property)) = (ctx.class.as_deref(), property) {
                        out.file
                            .references
                            .push(ctx.reference(class, Some(property), line, is_call));
                    }
                }
                Some(object) => walk_node(object, ctx, source, out),
                None => {}
            }
        }
        _ => walk_node(node, ctx, source, out),
    }
}

fn first_string_argument(args: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    match first.kind() {
        "string" => unquote(node_text(first, source)),
        "template_string" if !has_child_kind(first, "template_substitution") => {
            unquote(node_text(first, source))
        }
        _ => None,
    }
}

fn handle_function(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    if name.is_empty() {
        return;
    }
    out.file.symbols.push(ParsedSymbol {
        qualified_name: name.clone(),
        name: name.clone(),
        kind: SymbolKind::Function,
        line: start_line(node),
        end_line: end_line(node),
        is_exported: ctx.exported,
        parent: None,
        signature: Some(extract_signature(node, source)),
    });
    let inner = Context {
        scope: Some(name),
        exported: false,
        in_function: true,
        ..ctx.clone()
    };
    walk_signature_types(node, &inner, source, out);
    if let Some(body) = node.child_by_field_name("body") {
        walk_node(body, &inner, source, out);
    }
}

fn walk_signature_types(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    if let Some(params) = node
        .child_by_field_name("parameters")
        .or_else(|| node.child_by_field_name("parameter"))
    {
        walk_node(params, ctx, source, out);
    }
    if let Some(ret) = node.child_by_field_name("return_type") {
        walk_children(ret, &ctx.typed(), source, out);
    }
}

fn handle_class(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let class_name = node_text(name_node, source).to_string();
    out.file.symbols.push(ParsedSymbol {
        name: class_name.clone(),
        qualified_name: class_name.clone(),
        kind: SymbolKind::Class,
        line: start_line(node),
        end_line: end_line(node),
        is_exported: ctx.exported,
        parent: None,
        signature: None,
    });
    let class_ctx = Context {
        class: Some(class_name.clone()),
        scope: Some(class_name.clone()),
        exported: false,
        in_function: false,
        in_type: false,
    };
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "class_heritage" => walk_node(child, &class_ctx, source, out),
            "class_body" => walk_class_body(child, &class_ctx, &class_name, ctx.exported, source, out),
            _ => {}
        }
    }
}

fn walk_class_body(
    body: Node<'_>,
    ctx: &Context,
    class_name: &str,
    class_exported: bool,
    source: &str,
    out: &mut Output,
) {
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        match member.kind() {
            "method_definition" | "abstract_method_signature" | "method_signature" => {
                handle_method(member, member, ctx, class_name, class_exported, source, out);
            }
            "public_field_definition" | "field_definition" => {
                let value = member.child_by_field_name("value");
                match value {
                    Some(value) if is_function_value(value) => {
                        handle_method(member, value, ctx, class_name, class_exported, source, out);
                    }
                    Some(value) => {
                        if let Some(ty) = member.child_by_field_name("type") {
                            walk_children(ty, &ctx.typed(), source, out);
                        }
                        walk_node(value, ctx, source, out);
                    }
                    None => {
                        if let Some(ty) = member.child_by_field_name("type") {
                            walk_children(ty, &ctx.typed(), source, out);
                        }
                    }
                }
            }
            _ => walk_node(member, ctx, source, out),
        }
    }
}

/// `decl` carries name and modifiers, `func` carries parameters and body;
/// they differ for arrow-function class fields.
fn handle_method(
    decl: Node<'_>,
    func: Node<'_>,
    ctx: &Context,
    class_name: &str,
    class_exported: bool,
    source: &str,
    out: &mut Output,
) {
    let Some(name_node) = decl
        .child_by_field_name("name")
        .or_else(|| decl.child_by_field_name("property"))
    else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    if name.is_empty() {
        return;
    }
    let private = name.starts_with('#') || accessibility(decl, source) == Some("private");
    let qualified = format!("{class_name}.{name}");
    let mut signature = extract_signature(func, source);
    signature.is_async |= has_child_kind(decl, "async");
    out.file.symbols.push(ParsedSymbol {
        name,
        qualified_name: qualified.clone(),
        kind: SymbolKind::Method,
        line: start_line(decl),
        end_line: end_line(decl),
        is_exported: class_exported && !private,
        parent: Some(class_name.to_string()),
        signature: Some(signature),
    });
    let inner = Context {
        scope: Some(qualified),
        in_function: true,
        ..ctx.clone()
    };
    walk_signature_types(func, &inner, source, out);
    if let Some(body) = func.child_by_field_name("body") {
        walk_node(body, &inner, source, out);
    }
}

fn accessibility<'a>(node: Node<'_>, source: &'a str) -> Option<&'a str> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|child| child.kind() == "accessibility_modifier")
        .map(|child| node_text(child, source));
    found
}

fn is_function_value(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

fn handle_type_item(
    node: Node<'_>,
    ctx: &Context,
    source: &str,
    out: &mut Output,
    kind: SymbolKind,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    if !ctx.in_function {
        out.file.symbols.push(ParsedSymbol {
            name: name.clone(),
            qualified_name: name.clone(),
            kind,
            line: start_line(node),
            end_line: end_line(node),
            is_exported: ctx.exported,
            parent: None,
            signature: None,
        });
    }
    if kind == SymbolKind::Enum {
        return;
    }
    let inner = Context {
        scope: if ctx.in_function {
            ctx.scope.clone()
        } else {
            Some(name)
        },
        in_type: true,
        exported: false,
        ..ctx.clone()
    };
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.id() != name_node.id() {
            walk_node(child, &inner, source, out);
        }
    }
}

fn handle_variable_declaration(node: Node<'_>, ctx: &Context, source: &str, out: &mut Output) {
    let is_const = node.kind() == "lexical_declaration" && node_text(node, source).starts_with("const");
    let mut cursor = node.walk();
    for declarator in node.named_children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name_node) = declarator.child_by_field_name("name") else {
            continue;
        };
        let value = declarator.child_by_field_name("value");
        if let Some(value) = value {
            if let Some(import) = require_import(value, name_node, source) {
                out.file.imports.push(import);
                continue;
            }
        }
        if ctx.in_function || name_node.kind() != "identifier" {
            if let Some(ty) = declarator.child_by_field_name("type") {
                walk_children(ty, &ctx.typed(), source, out);
            }
            if let Some(value) = value {
                walk_node(value, ctx, source, out);
            }
            continue;
        }

        let name = node_text(name_node, source).to_string();
        let function_value = value.filter(|v| is_function_value(*v));
        let kind = if function_value.is_some() {
            SymbolKind::Function
        } else if is_const {
            SymbolKind::Constant
        } else {
            SymbolKind::Variable
        };
        out.file.symbols.push(ParsedSymbol {
            name: name.clone(),
            qualified_name: name.clone(),
            kind,
            line: start_line(declarator),
            end_line: end_line(declarator),
            is_exported: ctx.exported,
            parent: None,
            signature: function_value.map(|f| extract_signature(f, source)),
        });
        let inner = Context {
            scope: Some(name),
            exported: false,
            in_function: function_value.is_some(),
            ..ctx.clone()
        };
        if let Some(ty) = declarator.child_by_field_name("type") {
            walk_children(ty, &inner.typed(), source, out);
        }
        if let Some(func) = function_value {
            walk_signature_types(func, &inner, source, out);
            if let Some(body) = func.child_by_field_name("body") {
                walk_node(body, &inner, source, out);
            }
        } else if let Some(value) = value {
            walk_node(value, &inner, source, out);
        }
    }
}

/// `const x = require('m')` / `const { a, b } = require('m')`.
fn require_import(value: Node<'_>, pattern: Node<'_>, source: &str) -> Option<ParsedImport> {
    if value.kind() != "call_expression" {
        return None;
    }
    let function = value.child_by_field_name("function")?;
    if function.kind() != "identifier" || node_text(function, source) != "require" {
        return None;
    }
    let module = first_string_argument(value.child_by_field_name("arguments")?, source)?;
    let mut bindings = Vec::new();
    match pattern.kind() {
        "identifier" => bindings.push(namespace_binding(node_text(pattern, source), false)),
        "object_pattern" => {
            let mut cursor = pattern.walk();
            for prop in pattern.named_children(&mut cursor) {
                match prop.kind() {
                    "shorthand_property_identifier_pattern" => {
                        let name = node_text(prop, source).to_string();
                        bindings.push(ImportBinding {
                            imported: name.clone(),
                            local: name,
                            type_only: false,
                            namespace: false,
                        });
                    }
                    "pair_pattern" => {
                        let key = prop.child_by_field_name("key");
                        let local = prop.child_by_field_name("value");
                        if let (Some(key), Some(local)) = (key, local) {
                            bindings.push(ImportBinding {
                                imported: node_text(key, source).to_string(),
                                local: node_text(local, source).to_string(),
                                type_only: false,
                                namespace: false,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Some(ParsedImport {
        module,
        import_type: ImportType::Require,
        line: start_line(value),
        bindings,
    })
}

fn extract_signature(node: Node<'_>, source: &str) -> Signature {
    let mut params = Vec::new();
    if let Some(list) = node.child_by_field_name("parameters") {
        let mut cursor = list.walk();
        for param in list.named_children(&mut cursor) {
            if let Some(parsed) = parse_param(param, source) {
                params.push(parsed);
            }
        }
    } else if let Some(single) = node.child_by_field_name("parameter") {
        params.push(Param {
            name: node_text(single, source).to_string(),
            type_name: None,
            optional: false,
            variadic: false,
        });
    }
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| strip_annotation(node_text(n, source)));
    Signature {
        params,
        return_type,
        is_async: has_child_kind(node, "async"),
    }
}

fn parse_param(param: Node<'_>, source: &str) -> Option<Param> {
    match param.kind() {
        "required_parameter" | "optional_parameter" => {
            let pattern = param.child_by_field_name("pattern")?;
            let variadic = pattern.kind() == "rest_pattern";
            let name = node_text(pattern, source).trim_start_matches("...").to_string();
            if name == "this" {
                return None;
            }
            Some(Param {
                name,
                type_name: param
                    .child_by_field_name("type")
                    .map(|t| strip_annotation(node_text(t, source))),
                optional: param.kind() == "optional_parameter"
                    || param.child_by_field_name("value").is_some(),
                variadic,
            })
        }
        "identifier" | "object_pattern" | "array_pattern" => Some(Param {
            name: node_text(param, source).to_string(),
            type_name: None,
            optional: false,
            variadic: false,
        }),
        "assignment_pattern" => Some(Param {
            name: param
                .child_by_field_name("left")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default(),
            type_name: None,
            optional: true,
            variadic: false,
        }),
        "rest_pattern" => Some(Param {
            name: node_text(param, source).trim_start_matches("...").to_string(),
            type_name: None,
            optional: false,
            variadic: true,
        }),
        _ => None,
    }
}

fn strip_annotation(raw: &str) -> String {
    raw.trim_start_matches(':').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(language: Language, source: &str) -> ParsedFile {
        JsExtractor::new(language).unwrap().extract(source).unwrap()
    }

    fn ts(source: &str) -> ParsedFile {
        extract(Language::TypeScript, source)
    }

    #[test]
    fn classifies_import_kinds() {
        let file = ts(r#"
import def, { a, type B as C } from './mod';
import type { T } from './types';
import * as ns from '../ns';
import './side-effect';
export { x } from './re';
export * from './all';
const lazy = () => import('./lazy');
const fs = require('fs');
"#);
        let kinds: Vec<_> = file
            .imports
            .iter()
            .map(|i| (i.module.as_str(), i.import_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("./mod", ImportType::Static),
                ("./types", ImportType::TypeOnly),
                ("../ns", ImportType::Static),
                ("./side-effect", ImportType::Static),
                ("./re", ImportType::ReExport),
                ("./all", ImportType::ReExport),
                ("./lazy", ImportType::Dynamic),
                ("fs", ImportType::Require),
            ]
        );
        let first = &file.imports[0].bindings;
        assert_eq!(first[0].imported, "default");
        assert_eq!(first[1].local, "a");
        assert_eq!(first[2].imported, "B");
        assert_eq!(first[2].local, "C");
        assert!(first[2].type_only);
        assert!(file.imports[2].bindings[0].namespace);
        assert!(file.imports[3].bindings.is_empty());
    }

    #[test]
    fn extracts_symbols_with_signatures() {
        let file = ts(r#"
export async function load(id: string, retries?: number, ...rest: any[]): Promise<Item> {
  return fetchItem(id);
}
export class Store {
  get(key: string): Item { return this.lookup(key); }
  private lookup(key: string) { return cache.read(key); }
}
interface Item { id: string }
export const handler = (req: Request) => load(req.id);
const LIMIT = 5;
"#);
        let load = file.symbols.iter().find(|s| s.name == "load").unwrap();
        assert!(load.is_exported);
        let sig = load.signature.as_ref().unwrap();
        assert!(sig.is_async);
        assert_eq!(sig.params.len(), 3);
        assert_eq!(sig.params[0].type_name.as_deref(), Some("string"));
        assert!(sig.params[1].optional);
        assert!(sig.params[2].variadic);
        assert_eq!(sig.return_type.as_deref(), Some("Promise<Item>"));

        let get = file
            .symbols
            .iter()
            .find(|s| s.qualified_name == "Store.get")
            .unwrap();
        assert_eq!(get.kind, SymbolKind::Method);
        assert!(get.is_exported);
        let lookup = file
            .symbols
            .iter()
            .find(|s| s.qualified_name == "Store.lookup")
            .unwrap();
        assert!(!lookup.is_exported);

        let handler = file.symbols.iter().find(|s| s.name == "handler").unwrap();
        assert_eq!(handler.kind, SymbolKind::Function);
        let limit = file.symbols.iter().find(|s| s.name == "LIMIT").unwrap();
        assert_eq!(limit.kind, SymbolKind::Constant);
        assert!(!limit.is_exported);
        assert!(file.symbols.iter().any(|s| s.name == "Item" && s.kind == SymbolKind::Interface));
    }

    #[test]
    fn records_calls_with_enclosing_scope() {
        let file = ts(r#"
function a() { b(); util.format(1); }
class K { run() { this.step(); } step() {} }
"#);
        let call = |name: &str, member: Option<&str>| {
            file.references.iter().find(|r| {
                r.is_call && r.name == name && r.member.as_deref() == member
            })
        };
        assert_eq!(call("b", None).unwrap().from.as_deref(), Some("a"));
        assert_eq!(call("util", Some("format")).unwrap().from.as_deref(), Some("a"));
        assert_eq!(call("K", Some("step")).unwrap().from.as_deref(), Some("K.run"));
    }

    #[test]
    fn type_positions_produce_type_only_references() {
        let file = ts("import type { Cfg } from './cfg';\nexport function f(c: Cfg): void {}\n");
        let reference = file.references.iter().find(|r| r.name == "Cfg").unwrap();
        assert!(reference.type_only);
        assert!(!reference.is_call);
    }

    #[test]
    fn late_exports_mark_symbols() {
        let file = extract(
            Language::JavaScript,
            "function a() {}\nfunction b() {}\nconst c = 1;\nexport { a };\nmodule.exports = { b };\n",
        );
        let exported: Vec<_> = file
            .symbols
            .iter()
            .filter(|s| s.is_exported)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(exported, vec!["a", "b"]);
    }

    #[test]
    fn destructured_require_yields_bindings() {
        let file = extract(Language::JavaScript, "const { join, resolve: r } = require('path');\n");
        let import = &file.imports[0];
        assert_eq!(import.import_type, ImportType::Require);
        assert_eq!(import.bindings[0].local, "join");
        assert_eq!(import.bindings[1].imported, "resolve");
        assert_eq!(import.bindings[1].local, "r");
        assert!(file.symbols.is_empty());
    }
}
