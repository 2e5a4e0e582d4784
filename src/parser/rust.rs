use tree_sitter::{Node, Parser};

use super::{
    LanguageExtractor, end_line, has_child_kind, is_field_of_parent, node_text, set_language,
    start_line,
};
use crate::error::ParseError;
use crate::model::{
    ImportBinding, ImportType, Language, Param, ParsedFile, ParsedImport, ParsedReference,
    ParsedSymbol, Signature, SymbolKind,
};

pub struct RustExtractor {
    parser: Parser,
}

impl RustExtractor {
    pub fn new() -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        set_language(&mut parser, tree_sitter_rust::LANGUAGE.into(), "rust")?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for RustExtractor {
    fn extract(&mut self, source: &str) -> Option<ParsedFile> {
        let tree = self.parser.parse(source, None)?;
        let mut file = ParsedFile {
            language: Language::Rust,
            imports: Vec::new(),
            symbols: Vec::new(),
            references: Vec::new(),
        };
        walk_node(tree.root_node(), &Context::default(), source, &mut file);
        Some(file)
    }
}

#[derive(Clone, Default)]
struct Context {
    /// Inline module path, `a.b` for `mod a { mod b { .. } }`.
    module: Option<String>,
    /// Self type of the enclosing impl or trait.
    owner: Option<String>,
    owner_exported: bool,
    /// Trait impls expose every method through the trait.
    trait_impl: bool,
    scope: Option<String>,
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

    fn qualify(&self, name: &str) -> String {
        match (&self.module, &self.owner) {
            (_, Some(owner)) => format!("{owner}.{name}"),
            (Some(module), None) => format!("{module}.{name}"),
            (None, None) => name.to_string(),
        }
    }
}

fn is_pub(node: Node<'_>, source: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| child.kind() == "visibility_modifier" && node_text(child, source) == "pub");
    found
}

fn walk_node(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    match node.kind() {
        "use_declaration" => {
            handle_use(node, source, file);
            return;
        }
        "extern_crate_declaration" | "line_comment" | "block_comment" | "string_literal"
        | "raw_string_literal" | "char_literal" | "integer_literal" | "attribute_item"
        | "inner_attribute_item" => return,
        "mod_item" => {
            handle_mod(node, ctx, source, file);
            return;
        }
        "function_item" | "function_signature_item" if !ctx.in_function => {
            handle_function(node, ctx, source, file);
            return;
        }
        "struct_item" | "enum_item" | "union_item" | "trait_item" | "type_item" | "const_item"
        | "static_item"
            if !ctx.in_function =>
        {
            handle_item(node, ctx, source, file);
            return;
        }
        "impl_item" if !ctx.in_function => {
            handle_impl(node, ctx, source, file);
            return;
        }
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                push_callee(function, ctx, source, file, true);
            }
            if let Some(args) = node.child_by_field_name("arguments") {
                walk_node(args, ctx, source, file);
            }
            return;
        }
        "field_expression" | "scoped_identifier" => {
            push_callee(node, ctx, source, file, false);
            return;
        }
        "struct_expression" => {
            if let Some(name) = node.child_by_field_name("name") {
                let runtime = Context {
                    in_type: false,
                    ..ctx.clone()
                };
                push_type_name(name, &runtime, source, file);
            }
            if let Some(body) = node.child_by_field_name("body") {
                walk_node(body, ctx, source, file);
            }
            return;
        }
        "type_identifier" | "scoped_type_identifier" => {
            push_type_name(node, &ctx.typed(), source, file);
            return;
        }
        "closure_expression" | "function_item" => {
            let inner = Context {
                in_function: true,
                ..ctx.clone()
            };
            walk_children(node, &inner, source, file);
            return;
        }
        "identifier" => {
            if !is_binding_identifier(node) {
                let is_call = node.parent().is_some_and(|p| p.kind() == "token_tree")
                    && node
                        .next_sibling()
                        .is_some_and(|s| s.kind() == "token_tree" && node_text(s, source).starts_with('('));
                file.references.push(ctx.reference(
                    node_text(node, source),
                    None,
                    start_line(node),
                    is_call,
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
        "let_declaration" | "parameter" | "for_expression" => is_field_of_parent(node, "pattern"),
        "function_item" | "function_signature_item" | "mod_item" | "macro_definition" => {
            is_field_of_parent(node, "name")
        }
        "closure_parameters" | "tuple_pattern" | "slice_pattern" | "ref_pattern"
        | "mut_pattern" | "captured_pattern" | "field_pattern" | "macro_invocation" | "label"
        | "lifetime" => true,
        "field_initializer" => is_field_of_parent(node, "field"),
        _ => false,
    }
}

fn push_type_name(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let line = start_line(node);
    match node.kind() {
        "type_identifier" => {
            let name = node_text(node, source);
            let name = if name == "Self" {
                ctx.owner.as_deref().unwrap_or(name)
            } else {
                name
            };
            file.references.push(ctx.reference(name, None, line, false));
        }
        "scoped_type_identifier" => {
            let path = node.child_by_field_name("path").map(|p| last_segment(node_text(p, source)));
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string());
            if let Some(path) = path {
                file.references.push(ctx.reference(&path, name, line, false));
            }
        }
        "generic_type" => {
            if let Some(inner) = node.child_by_field_name("type") {
                push_type_name(inner, ctx, source, file);
            }
            if let Some(args) = node.child_by_field_name("type_arguments") {
                walk_children(args, &ctx.typed(), source, file);
            }
        }
        _ => walk_node(node, ctx, source, file),
    }
}

fn last_segment(path: &str) -> String {
    path.rsplit("::").next().unwrap_or(path).trim().to_string()
}

/// Records `f(..)`, `module::f(..)`, `Type::f(..)`, `self.f(..)`, `x.f(..)`.
fn push_callee(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile, is_call: bool) {
    let line = start_line(node);
    let runtime = Context {
        in_type: false,
        ..ctx.clone()
    };
    match node.kind() {
        "identifier" => {
            file.references
                .push(runtime.reference(node_text(node, source), None, line, is_call));
        }
        "scoped_identifier" => {
            let member = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string());
            match node.child_by_field_name("path") {
                Some(path) => {
                    let owner = last_segment(node_text(path, source));
                    let owner = match owner.as_str() {
                        "Self" | "self" => ctx.owner.clone().unwrap_or(owner),
                        _ => owner,
                    };
                    file.references
                        .push(runtime.reference(&owner, member, line, is_call));
                }
                None => {
                    if let Some(member) = member {
                        file.references
                            .push(runtime.reference(&member, None, line, is_call));
                    }
                }
            }
        }
        "field_expression" => {
            let field = node
                .child_by_field_name("field")
                .map(|f| node_text(f, source).to_string());
            match node.child_by_field_name("value") {
                Some(value) if value.kind() == "self" => {
                    if let (Some(owner), Some(field)) = (ctx.owner.as_deref(), field) {
                        file.references
                            .push(runtime.reference(owner, Some(field), line, is_call));
                    }
                }
                Some(value) if value.kind() == "identifier" => {
                    file.references.push(runtime.reference(
                        node_text(value, source),
                        field,
                        line,
                        is_call,
                    ));
                }
                Some(value) => walk_node(value, ctx, source, file),
                None => {}
            }
        }
        "generic_function" => {
            if let Some(function) = node.child_by_field_name("function") {
                push_callee(function, ctx, source, file, is_call);
            }
            if let Some(args) = node.child_by_field_name("type_arguments") {
                walk_children(args, &ctx.typed(), source, file);
            }
        }
        _ => walk_node(node, ctx, source, file),
    }
}

struct UseLeaf {
    path: Vec<String>,
    alias: Option<String>,
    wildcard: bool,
}

fn split_path(raw: &str) -> Vec<String> {
    raw.split("::")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn flatten_use_tree(node: Node<'_>, prefix: &[String], source: &str, leaves: &mut Vec<UseLeaf>) {
    let joined = |extra: Vec<String>| {
        let mut path = prefix.to_vec();
        path.extend(extra);
        path
    };
    match node.kind() {
        "scoped_use_list" => {
            let path = node
                .child_by_field_name("path")
                .map(|p| joined(split_path(node_text(p, source))))
                .unwrap_or_else(|| prefix.to_vec());
            if let Some(list) = node.child_by_field_name("list") {
                flatten_use_tree(list, &path, source, leaves);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                flatten_use_tree(child, prefix, source, leaves);
            }
        }
        "use_as_clause" => {
            if let Some(path) = node.child_by_field_name("path") {
                leaves.push(UseLeaf {
                    path: joined(split_path(node_text(path, source))),
                    alias: node
                        .child_by_field_name("alias")
                        .map(|a| node_text(a, source).to_string()),
                    wildcard: false,
                });
            }
        }
        "use_wildcard" => {
            let raw = node_text(node, source);
            let raw = raw.trim_end_matches('*').trim_end_matches("::");
            leaves.push(UseLeaf {
                path: joined(split_path(raw)),
                alias: None,
                wildcard: true,
            });
        }
        _ => {
            let mut path = joined(split_path(node_text(node, source)));
            // `use a::b::{self}` imports `b` itself.
            if path.len() > 1 && path.last().is_some_and(|s| s == "self") {
                path.pop();
            }
            if !path.is_empty() {
                leaves.push(UseLeaf {
                    path,
                    alias: None,
                    wildcard: false,
                });
            }
        }
    }
}

/// One import per distinct parent path. A group with a single item keeps the
/// full path so the resolver can find `use a::b;` where `b` is a file.
fn handle_use(node: Node<'_>, source: &str, file: &mut ParsedFile) {
    let Some(argument) = node.child_by_field_name("argument") else {
        return;
    };
    let mut leaves = Vec::new();
    flatten_use_tree(argument, &[], source, &mut leaves);

    let mut groups: Vec<(Vec<String>, Vec<ImportBinding>)> = Vec::new();
    for leaf in leaves {
        let (module, binding) = if leaf.wildcard {
            (
                leaf.path,
                ImportBinding {
                    imported: "*".to_string(),
                    local: "*".to_string(),
                    type_only: false,
                    namespace: true,
                },
            )
        } else {
            let mut path = leaf.path;
            let Some(name) = path.pop() else {
                continue;
            };
            let namespace = name.chars().next().is_some_and(|c| c.is_lowercase());
            (
                path,
                ImportBinding {
                    local: leaf.alias.unwrap_or_else(|| name.clone()),
                    imported: name,
                    type_only: false,
                    namespace,
                },
            )
        };
        match groups.iter_mut().find(|(path, _)| *path == module) {
            Some((_, bindings)) => bindings.push(binding),
            None => groups.push((module, vec![binding])),
        }
    }

    for (mut path, bindings) in groups {
        if bindings.len() == 1 && bindings[0].imported != "*" {
            path.push(bindings[0].imported.clone());
        }
        if path.is_empty() {
            continue;
        }
        file.imports.push(ParsedImport {
            module: path.join("::"),
            import_type: ImportType::Static,
            line: start_line(node),
            bindings,
        });
    }
}

fn handle_mod(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let Some(body) = node.child_by_field_name("body") else {
        if ctx.module.is_none() {
            file.imports.push(ParsedImport {
                module: format!("self::{name}"),
                import_type: ImportType::ModuleDecl,
                line: start_line(node),
                bindings: vec![ImportBinding {
                    imported: name.clone(),
                    local: name,
                    type_only: false,
                    namespace: true,
                }],
            });
        }
        return;
    };
    let qualified = ctx.qualify(&name);
    file.symbols.push(ParsedSymbol {
        name,
        qualified_name: qualified.clone(),
        kind: SymbolKind::Module,
        line: start_line(node),
        end_line: end_line(node),
        is_exported: is_pub(node, source),
        parent: ctx.module.clone(),
        signature: None,
    });
    let inner = Context {
        module: Some(qualified),
        ..Context::default()
    };
    walk_node(body, &inner, source, file);
}

fn handle_function(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let qualified = ctx.qualify(&name);
    let is_method = ctx.owner.is_some();
    let exported = if is_method {
        ctx.trait_impl || (ctx.owner_exported && is_pub(node, source))
    } else {
        is_pub(node, source)
    };
    file.symbols.push(ParsedSymbol {
        name,
        qualified_name: qualified.clone(),
        kind: if is_method {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        },
        line: start_line(node),
        end_line: end_line(node),
        is_exported: exported,
        parent: ctx.owner.clone().or_else(|| ctx.module.clone()),
        signature: Some(extract_signature(node, source)),
    });
    let inner = Context {
        scope: Some(qualified),
        in_function: true,
        ..ctx.clone()
    };
    if let Some(params) = node.child_by_field_name("parameters") {
        walk_node(params, &inner, source, file);
    }
    if let Some(ret) = node.child_by_field_name("return_type") {
        push_type_name(ret, &inner.typed(), source, file);
    }
    if let Some(body) = node.child_by_field_name("body") {
        walk_node(body, &inner, source, file);
    }
}

fn item_kind(kind: &str) -> SymbolKind {
    match kind {
        "struct_item" | "union_item" => SymbolKind::Struct,
        "enum_item" => SymbolKind::Enum,
        "trait_item" => SymbolKind::Trait,
        "type_item" => SymbolKind::TypeAlias,
        _ => SymbolKind::Constant,
    }
}

fn handle_item(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let kind = item_kind(node.kind());
    let exported = is_pub(node, source);
    let qualified = ctx.qualify(&name);
    file.symbols.push(ParsedSymbol {
        name: name.clone(),
        qualified_name: qualified.clone(),
        kind,
        line: start_line(node),
        end_line: end_line(node),
        is_exported: exported,
        parent: ctx.module.clone(),
        signature: None,
    });
    let inner = Context {
        scope: Some(qualified),
        ..ctx.clone()
    };
    if kind == SymbolKind::Trait {
        if let Some(body) = node.child_by_field_name("body") {
            let trait_ctx = Context {
                owner: Some(name),
                owner_exported: exported,
                trait_impl: exported,
                ..inner
            };
            walk_node(body, &trait_ctx, source, file);
        }
        return;
    }
    let value_node = node.child_by_field_name("value");
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.id() == name_node.id() || value_node.is_some_and(|v| v.id() == child.id()) {
            continue;
        }
        walk_node(child, &inner.typed(), source, file);
    }
    if let Some(value) = value_node {
        walk_node(value, &inner, source, file);
    }
}

fn impl_type_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "type_identifier" => Some(node_text(node, source).to_string()),
        "generic_type" => impl_type_name(node.child_by_field_name("type")?, source),
        "scoped_type_identifier" => node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string()),
        "reference_type" => impl_type_name(node.child_by_field_name("type")?, source),
        _ => None,
    }
}

fn handle_impl(node: Node<'_>, ctx: &Context, source: &str, file: &mut ParsedFile) {
    let Some(type_node) = node.child_by_field_name("type") else {
        return;
    };
    let Some(owner) = impl_type_name(type_node, source) else {
        return;
    };
    let trait_node = node.child_by_field_name("trait");
    let owner_exported = file
        .symbols
        .iter()
        .find(|s| s.name == owner && s.parent.is_none())
        .map(|s| s.is_exported)
        .unwrap_or(true);
    let inner = Context {
        owner: Some(owner.clone()),
        owner_exported,
        trait_impl: trait_node.is_some(),
        scope: Some(owner),
        ..ctx.clone()
    };
    if let Some(trait_node) = trait_node {
        push_type_name(trait_node, &inner.typed(), source, file);
    }
    if let Some(body) = node.child_by_field_name("body") {
        walk_node(body, &inner, source, file);
    }
}

fn extract_signature(node: Node<'_>, source: &str) -> Signature {
    let mut params = Vec::new();
    if let Some(list) = node.child_by_field_name("parameters") {
        let mut cursor = list.walk();
        for param in list.named_children(&mut cursor) {
            match param.kind() {
                "parameter" => params.push(Param {
                    name: param
                        .child_by_field_name("pattern")
                        .map(|p| node_text(p, source).to_string())
                        .unwrap_or_default(),
                    type_name: param
                        .child_by_field_name("type")
                        .map(|t| node_text(t, source).to_string()),
                    optional: false,
                    variadic: false,
                }),
                "variadic_parameter" => params.push(Param {
                    name: "...".to_string(),
                    type_name: None,
                    optional: false,
                    variadic: true,
                }),
                _ => {}
            }
        }
    }
    let is_async = {
        let mut cursor = node.walk();
        let found = node
            .named_children(&mut cursor)
            .any(|child| child.kind() == "function_modifiers" && has_child_kind(child, "async"));
        found
    };
    Signature {
        params,
        return_type: node
            .child_by_field_name("return_type")
            .map(|n| node_text(n, source).to_string()),
        is_async,
    }
}
