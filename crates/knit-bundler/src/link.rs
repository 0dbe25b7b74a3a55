//! Linking ES modules into registry records.
//!
//! A record body runs inside `function (module, exports, require)`, where
//! `import` and `export` declarations do not parse. [`link_module`] rewrites
//! them against the helpers of the registry prelude:
//!
//! - import declarations become `require()` calls, hoisted to the top of the
//!   body in source order, with their bindings read off the returned exports;
//! - exports become getters on `exports`, so importers observe later
//!   assignments and cyclic imports see hoisted `var`s instead of throwing;
//! - `import()` of a bundled module becomes a promise of its exports;
//! - `new URL("x", import.meta.url)` of a bundled asset resolves the asset's
//!   public URL against the script URL, and any other `import.meta` reads the
//!   script URL.
//!
//! Scripts without module syntax come back unchanged. Rewritten bodies keep
//! every line where it was, so positions reported by the browser still match
//! the source.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::LazyLock;

use memchr::memmem;
use regex::Regex;
use thiserror::Error;

use crate::extract::{CommentStyle, blank_comments};

static NEW_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^new\s+URL\s*\(\s*(["'][^"'\n]+["'])\s*,\s*import\.meta\.url\s*\)"#)
        .unwrap_or_else(|e| unreachable!("new URL pattern: {e}"))
});

/// Module syntax the linker cannot express as a registry record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct LinkError {
    /// 1-based.
    pub line: usize,
    pub message: String,
}

/// Rewrite the module syntax of `source` into registry calls.
///
/// `is_bundled` says whether a specifier as written is linked to a module of
/// the bundle; dynamic imports and asset URLs of anything else stay as
/// written.
pub fn link_module<'a>(
    source: &'a str,
    is_bundled: impl Fn(&str) -> bool,
) -> Result<Cow<'a, str>, LinkError> {
    let bytes = source.as_bytes();
    if memmem::find(bytes, b"import").is_none() && memmem::find(bytes, b"export").is_none() {
        return Ok(Cow::Borrowed(source));
    }

    let code = blank_comments(source, CommentStyle::Script);
    let mut linker = Linker {
        code: &code,
        is_bundled,
        edits: Vec::new(),
        imports: Vec::new(),
        getters: Vec::new(),
        temps: 0,
        module_syntax: false,
    };
    linker.run()?;
    Ok(linker.finish(source))
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

struct Linker<'a, F> {
    /// `source` with comments blanked; byte offsets are shared.
    code: &'a str,
    is_bundled: F,
    edits: Vec<Edit>,
    /// Statements hoisted to the top of the body.
    imports: Vec<String>,
    /// Exported name and the expression its getter returns.
    getters: Vec<(String, String)>,
    temps: usize,
    module_syntax: bool,
}

impl<'a, F: Fn(&str) -> bool> Linker<'a, F> {
    fn run(&mut self) -> Result<(), LinkError> {
        let code = self.code;
        let bytes = code.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if matches!(b, b'"' | b'\'' | b'`') {
                i = skip_string(bytes, i);
                continue;
            }
            if !is_ident_start(b) {
                i += 1;
                continue;
            }

            let end = ident_end(bytes, i);
            let next = if is_member(bytes, i) {
                None
            } else {
                match &code[i..end] {
                    "import" => self.import(i)?,
                    "export" => self.export(i)?,
                    "new" => self.new_url(i),
                    _ => None,
                }
            };
            i = next.unwrap_or(end);
        }
        Ok(())
    }

    fn import(&mut self, start: usize) -> Result<Option<usize>, LinkError> {
        let mut c = Cursor::new(self.code, start + "import".len());
        c.skip_ws();
        match c.peek() {
            Some(b'(') => Ok(self.dynamic_import(start, c)),
            Some(b'.') => Ok(self.import_meta(start, c)),
            Some(b'{' | b'*' | b'"' | b'\'') => self.import_declaration(start, c).map(Some),
            Some(b) if is_ident_start(b) => self.import_declaration(start, c).map(Some),
            _ => Ok(None),
        }
    }

    fn dynamic_import(&mut self, start: usize, mut c: Cursor<'a>) -> Option<usize> {
        c.eat(b'(');
        let literal = c.string()?;
        if !c.eat(b')') || !(self.is_bundled)(unquote(literal)) {
            return None;
        }
        self.edit(
            start,
            c.pos,
            format!("Promise.resolve().then(function () {{ return require({literal}); }})"),
        );
        Some(c.pos)
    }

    fn import_meta(&mut self, start: usize, mut c: Cursor<'a>) -> Option<usize> {
        c.eat(b'.');
        if !c.keyword("meta") {
            return None;
        }
        let meta_end = c.pos;
        self.module_syntax = true;
        if c.eat(b'.') && c.keyword("url") {
            self.edit(start, c.pos, "__knit_base".to_string());
            Some(c.pos)
        } else {
            self.edit(start, meta_end, "({ url: __knit_base })".to_string());
            Some(meta_end)
        }
    }

    fn import_declaration(&mut self, start: usize, mut c: Cursor<'a>) -> Result<usize, LinkError> {
        self.module_syntax = true;
        if let Some(literal) = c.string() {
            skip_attributes(&mut c)?;
            self.imports.push(format!("require({literal});"));
            return Ok(self.remove_statement(start, c));
        }

        let mut default = None;
        let mut namespace = None;
        let mut named = Vec::new();
        c.skip_ws();
        let has_default = c.peek().is_some_and(is_ident_start);
        if has_default {
            default = c.ident();
        }
        if !has_default || c.eat(b',') {
            if c.eat(b'*') {
                if !c.keyword("as") {
                    return Err(c.error("expected `as` after `*` in import"));
                }
                namespace = Some(c.ident().ok_or_else(|| c.error("expected a namespace name"))?);
            } else if c.eat(b'{') {
                named = specifier_list(&mut c)?;
            } else {
                return Err(c.error("expected `*` or `{` in import"));
            }
        }
        if !c.keyword("from") {
            return Err(c.error("expected `from` in import"));
        }
        let literal = c.string().ok_or_else(|| c.error("expected a module specifier"))?;
        skip_attributes(&mut c)?;

        let require = format!("require({literal})");
        let statement = match (default, namespace) {
            (None, Some(namespace)) if named.is_empty() => format!("var {namespace} = {require};"),
            (Some(default), None) if named.is_empty() => {
                format!("var {default} = __knit_default({require});")
            }
            (default, namespace) => {
                let temp = self.temp();
                let mut declarators = vec![format!("{temp} = {require}")];
                if let Some(default) = default {
                    declarators.push(format!("{default} = __knit_default({temp})"));
                }
                if let Some(namespace) = namespace {
                    declarators.push(format!("{namespace} = {temp}"));
                }
                for (imported, local) in named {
                    declarators.push(format!("{local} = {}", member(&temp, imported)));
                }
                format!("var {};", declarators.join(", "))
            }
        };
        self.imports.push(statement);
        Ok(self.remove_statement(start, c))
    }

    fn export(&mut self, start: usize) -> Result<Option<usize>, LinkError> {
        let mut c = Cursor::new(self.code, start + "export".len());
        c.skip_ws();
        match c.peek() {
            Some(b'*') => {
                c.pos += 1;
                return self.export_star(start, c).map(Some);
            }
            Some(b'{') => {
                c.pos += 1;
                return self.export_list(start, c).map(Some);
            }
            Some(b) if is_ident_start(b) => {}
            // `{ export: 1 }`, `obj.export()` and friends.
            _ => return Ok(None),
        }

        let keyword_start = c.pos;
        let keyword = c.ident().unwrap_or_default();
        self.module_syntax = true;
        match keyword {
            "default" => Ok(Some(self.export_default(start, c))),
            "var" | "let" | "const" => {
                let mut declarators = c;
                let names = declared_names(&mut declarators)?;
                self.edit(start, c.pos, "var".to_string());
                for name in names {
                    self.getter(name, name);
                }
                Ok(Some(c.pos))
            }
            "function" | "async" | "class" => {
                let mut declaration = Cursor::new(self.code, keyword_start);
                let name = declaration_name(&mut declaration)
                    .ok_or_else(|| declaration.error("exported declarations need a name"))?;
                self.edit(start, keyword_start, String::new());
                self.getter(name, name);
                Ok(Some(keyword_start))
            }
            other => Err(c.error(format!("unsupported export form `export {other}`"))),
        }
    }

    fn export_default(&mut self, start: usize, c: Cursor<'a>) -> usize {
        let after_default = c.pos;
        let mut declaration = c;
        declaration.skip_ws();
        let declaration_start = declaration.pos;
        if let Some(name) = declaration_name(&mut declaration) {
            self.edit(start, declaration_start, String::new());
            self.getter("default", name);
            return declaration_start;
        }
        self.edit(start, after_default, "exports.default =".to_string());
        after_default
    }

    fn export_star(&mut self, start: usize, mut c: Cursor<'a>) -> Result<usize, LinkError> {
        self.module_syntax = true;
        let alias = if c.keyword("as") {
            Some(c.name().ok_or_else(|| c.error("expected a name after `as`"))?)
        } else {
            None
        };
        if !c.keyword("from") {
            return Err(c.error("expected `from` after `export *`"));
        }
        let literal = c.string().ok_or_else(|| c.error("expected a module specifier"))?;
        skip_attributes(&mut c)?;

        match alias {
            Some(alias) => {
                let temp = self.temp();
                self.imports.push(format!("var {temp} = require({literal});"));
                self.getter(alias, temp);
            }
            None => self
                .imports
                .push(format!("__knit_reexport(exports, require({literal}));")),
        }
        Ok(self.remove_statement(start, c))
    }

    fn export_list(&mut self, start: usize, mut c: Cursor<'a>) -> Result<usize, LinkError> {
        self.module_syntax = true;
        let list = specifier_list(&mut c)?;
        if c.keyword("from") {
            let literal = c.string().ok_or_else(|| c.error("expected a module specifier"))?;
            skip_attributes(&mut c)?;
            let temp = self.temp();
            self.imports.push(format!("var {temp} = require({literal});"));
            for (local, exported) in list {
                self.getter(exported, member(&temp, local));
            }
        } else {
            for (local, exported) in list {
                self.getter(exported, local);
            }
        }
        Ok(self.remove_statement(start, c))
    }

    fn new_url(&mut self, start: usize) -> Option<usize> {
        let code = self.code;
        let caps = NEW_URL.captures(&code[start..])?;
        let end = start + caps.get(0)?.end();
        let literal = caps.get(1)?.as_str();
        if !(self.is_bundled)(unquote(literal)) {
            return None;
        }
        self.module_syntax = true;
        self.edit(
            start,
            end,
            format!("new URL(__knit_default(require({literal})), __knit_base)"),
        );
        Some(end)
    }

    /// Blank a declaration moved into the header, through its `;`.
    fn remove_statement(&mut self, start: usize, mut c: Cursor<'a>) -> usize {
        c.eat(b';');
        self.edit(start, c.pos, String::new());
        c.pos
    }

    fn edit(&mut self, start: usize, end: usize, text: String) {
        self.edits.push(Edit { start, end, text });
    }

    fn getter(&mut self, exported: &str, value: impl Into<String>) {
        self.getters.push((exported.to_string(), value.into()));
    }

    fn temp(&mut self) -> String {
        let name = format!("__knit_m{}", self.temps);
        self.temps += 1;
        name
    }

    fn finish<'s>(mut self, source: &'s str) -> Cow<'s, str> {
        if !self.module_syntax && self.edits.is_empty() {
            return Cow::Borrowed(source);
        }

        let mut out = String::with_capacity(source.len() + 256);
        if self.module_syntax {
            out.push_str("\"use strict\"; __knit_export(exports, {");
            for (index, (exported, value)) in self.getters.iter().enumerate() {
                out.push_str(if index == 0 { " " } else { ", " });
                let _ = write!(out, "{exported}: function () {{ return {value}; }}");
            }
            out.push_str(if self.getters.is_empty() { "});" } else { " });" });
            for statement in &self.imports {
                out.push(' ');
                out.push_str(statement);
            }
            out.push(' ');
        }

        self.edits.sort_by_key(|edit| edit.start);
        let mut last = 0;
        for edit in &self.edits {
            out.push_str(&source[last..edit.start]);
            out.push_str(&edit.text);
            let lines = memchr::memchr_iter(b'\n', &source.as_bytes()[edit.start..edit.end]).count();
            out.push_str(&"\n".repeat(lines));
            last = edit.end;
        }
        out.push_str(&source[last..]);
        Cow::Owned(out)
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor<'a> {
    code: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(code: &'a str, pos: usize) -> Self {
        Self { code, pos }
    }

    fn bytes(&self) -> &'a [u8] {
        self.code.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, text: &str) -> bool {
        self.skip_ws();
        if self.bytes()[self.pos..].starts_with(text.as_bytes()) {
            self.pos += text.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let start = self.pos;
        if !self.peek().is_some_and(is_ident_start) {
            return None;
        }
        self.pos = ident_end(self.bytes(), start);
        Some(&self.code[start..self.pos])
    }

    /// Consume `word` only if it is the next identifier.
    fn keyword(&mut self, word: &str) -> bool {
        let mut ahead = *self;
        if ahead.ident() == Some(word) {
            *self = ahead;
            true
        } else {
            false
        }
    }

    /// A quoted string literal, quotes included.
    fn string(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let quote = self.peek().filter(|b| matches!(b, b'"' | b'\''))?;
        let start = self.pos;
        let end = skip_string(self.bytes(), start);
        if end < start + 2 || self.bytes().get(end - 1) != Some(&quote) {
            return None;
        }
        self.pos = end;
        Some(&self.code[start..end])
    }

    /// An identifier or a string literal, as in `{ "a-b" as ab }`.
    fn name(&mut self) -> Option<&'a str> {
        self.ident().or_else(|| self.string())
    }

    fn error(&self, message: impl Into<String>) -> LinkError {
        let consumed = &self.bytes()[..self.pos.min(self.bytes().len())];
        LinkError {
            line: memchr::memchr_iter(b'\n', consumed).count() + 1,
            message: message.into(),
        }
    }
}

/// `name` or `name as alias` pairs up to the closing brace.
fn specifier_list<'a>(c: &mut Cursor<'a>) -> Result<Vec<(&'a str, &'a str)>, LinkError> {
    let mut list = Vec::new();
    loop {
        if c.eat(b'}') {
            break;
        }
        let name = c.name().ok_or_else(|| c.error("expected a name in braces"))?;
        let alias = if c.keyword("as") {
            c.name().ok_or_else(|| c.error("expected a name after `as`"))?
        } else {
            name
        };
        list.push((name, alias));
        if !c.eat(b',') {
            if !c.eat(b'}') {
                return Err(c.error("expected `,` or `}`"));
            }
            break;
        }
    }
    Ok(list)
}

/// Skip `with { type: "json" }` after a module specifier.
fn skip_attributes(c: &mut Cursor<'_>) -> Result<(), LinkError> {
    let mut ahead = *c;
    if !(ahead.keyword("with") || ahead.keyword("assert")) || !ahead.eat(b'{') {
        return Ok(());
    }
    let rest = &ahead.bytes()[ahead.pos..];
    let close = memchr::memchr(b'}', rest).ok_or_else(|| ahead.error("unterminated import attributes"))?;
    c.pos = ahead.pos + close + 1;
    Ok(())
}

/// Name of a `function`, `async function` or `class` declaration at `c`.
fn declaration_name<'a>(c: &mut Cursor<'a>) -> Option<&'a str> {
    match c.ident()? {
        "class" => return c.ident().filter(|name| *name != "extends"),
        "function" => {}
        "async" => {
            if !c.keyword("function") {
                return None;
            }
        }
        _ => return None,
    }
    c.eat(b'*');
    c.ident()
}

/// Names bound by the declarator list after `var`, `let` or `const`.
fn declared_names<'a>(c: &mut Cursor<'a>) -> Result<Vec<&'a str>, LinkError> {
    let mut names = Vec::new();
    loop {
        binding_names(c, &mut names)?;
        if c.eat(b'=') {
            skip_expression(c);
        }
        if !c.eat(b',') {
            break;
        }
    }
    Ok(names)
}

fn binding_names<'a>(c: &mut Cursor<'a>, names: &mut Vec<&'a str>) -> Result<(), LinkError> {
    c.skip_ws();
    match c.peek() {
        Some(b'{') => {
            c.pos += 1;
            loop {
                if c.eat(b'}') {
                    break;
                }
                if c.eat_str("...") {
                    binding_names(c, names)?;
                } else if c.eat(b'[') {
                    skip_expression(c);
                    if !c.eat(b']') || !c.eat(b':') {
                        return Err(c.error("malformed computed key in pattern"));
                    }
                    binding_names(c, names)?;
                } else {
                    let key = c.name().ok_or_else(|| c.error("expected a property name"))?;
                    if c.eat(b':') {
                        binding_names(c, names)?;
                    } else {
                        names.push(key);
                    }
                }
                if c.eat(b'=') {
                    skip_expression(c);
                }
                if !c.eat(b',') {
                    if !c.eat(b'}') {
                        return Err(c.error("expected `,` or `}` in pattern"));
                    }
                    break;
                }
            }
        }
        Some(b'[') => {
            c.pos += 1;
            loop {
                if c.eat(b']') {
                    break;
                }
                if c.eat(b',') {
                    continue;
                }
                c.eat_str("...");
                binding_names(c, names)?;
                if c.eat(b'=') {
                    skip_expression(c);
                }
                if !c.eat(b',') {
                    if !c.eat(b']') {
                        return Err(c.error("expected `,` or `]` in pattern"));
                    }
                    break;
                }
            }
        }
        _ => names.push(c.ident().ok_or_else(|| c.error("expected a binding name"))?),
    }
    Ok(())
}

/// Move past one expression: up to a `,`, `;` or closing bracket at depth
/// zero, or a line break that ends the statement.
fn skip_expression(c: &mut Cursor<'_>) {
    let bytes = c.bytes();
    let mut depth = 0usize;
    let mut last = b'=';
    while let Some(&b) = bytes.get(c.pos) {
        match b {
            b'"' | b'\'' | b'`' => {
                c.pos = skip_string(bytes, c.pos);
                last = b;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' if depth == 0 => return,
            b')' | b']' | b'}' => depth -= 1,
            b',' | b';' if depth == 0 => return,
            b'\n' if depth == 0 && !continues(last, next_significant(bytes, c.pos)) => return,
            _ => {}
        }
        if !b.is_ascii_whitespace() {
            last = b;
        }
        c.pos += 1;
    }
}

fn continues(last: u8, next: Option<u8>) -> bool {
    b"=+-*/%&|^!?:<>,([{.".contains(&last)
        || next.is_some_and(|next| b".,?:+-*/%&|^=<>([`".contains(&next))
}

fn next_significant(bytes: &[u8], from: usize) -> Option<u8> {
    bytes[from..].iter().copied().find(|b| !b.is_ascii_whitespace())
}

/// Offset just past the string or template literal opening at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn member(object: &str, name: &str) -> String {
    if name == "default" {
        format!("__knit_default({object})")
    } else if name.starts_with(['"', '\'']) {
        format!("{object}[{name}]")
    } else {
        format!("{object}.{name}")
    }
}

fn unquote(literal: &str) -> &str {
    &literal[1..literal.len() - 1]
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| !(is_ident_start(b) || b.is_ascii_digit()))
        .map_or(bytes.len(), |p| start + p)
}

/// `obj.import` or `x.export`, but not `...import`.
fn is_member(bytes: &[u8], at: usize) -> bool {
    let before = bytes[..at].trim_ascii_end();
    before.ends_with(b".") && !before.ends_with(b"...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(source: &str) -> String {
        link_module(source, |_| true).unwrap().into_owned()
    }

    fn header(linked: &str) -> &str {
        linked.lines().next().unwrap()
    }

    #[test]
    fn plain_scripts_are_untouched() {
        let source = "const path = require('./path');\nmodule.exports = { importer: 1 };\n";
        assert!(matches!(link_module(source, |_| true), Ok(Cow::Borrowed(s)) if s == source));

        let keys = "const o = { import: 1, export: 2 };\no.import(); o.export;\n";
        assert!(matches!(link_module(keys, |_| true), Ok(Cow::Borrowed(_))));
    }

    #[test]
    fn import_forms_become_requires() {
        let linked = link(
            "import def from './a.js';\n\
             import { x, y as z, default as d } from \"./b.js\";\n\
             import * as ns from './c.js';\n\
             import './side.css';\n\
             import e, * as all from './e.js';\n\
             use(def, x, z, d, ns, e, all);\n",
        );
        let top = header(&linked);
        assert!(top.starts_with("\"use strict\"; __knit_export(exports, {});"));
        assert!(top.contains("var def = __knit_default(require('./a.js'));"));
        assert!(top.contains(
            "var __knit_m0 = require(\"./b.js\"), x = __knit_m0.x, z = __knit_m0.y, d = __knit_default(__knit_m0);"
        ));
        assert!(top.contains("var ns = require('./c.js');"));
        assert!(top.contains("require('./side.css');"));
        assert!(top.contains("var __knit_m1 = require('./e.js'), e = __knit_default(__knit_m1), all = __knit_m1;"));
        assert_eq!(linked.lines().nth(5), Some("use(def, x, z, d, ns, e, all);"));
    }

    #[test]
    fn imports_are_hoisted_in_source_order() {
        let linked = link("run();\nimport a from './a.js';\nimport './b.js';\n");
        let top = header(&linked);
        let a = top.find("'./a.js'").unwrap();
        let b = top.find("'./b.js'").unwrap();
        assert!(a < b);
        assert!(top.ends_with("run();"));
    }

    #[test]
    fn declarations_export_through_getters() {
        let linked = link(
            "export const a = 1, b = [2, 3];\n\
             export let { c, d: e, ...rest } = obj;\n\
             export function f() {}\n\
             export async function g() {}\n\
             export class H {}\n",
        );
        let top = header(&linked);
        for (name, value) in [("a", "a"), ("b", "b"), ("c", "c"), ("e", "e"), ("rest", "rest"), ("f", "f"), ("g", "g"), ("H", "H")] {
            assert!(top.contains(&format!("{name}: function () {{ return {value}; }}")), "{name}");
        }
        assert!(top.ends_with("var a = 1, b = [2, 3];"));
        assert!(linked.contains("\nvar { c, d: e, ...rest } = obj;\n"));
        assert!(linked.contains("\nfunction f() {}\nasync function g() {}\nclass H {}\n"));
    }

    #[test]
    fn default_exports() {
        let named = link("export default async function init() {}\n");
        assert!(named.contains("default: function () { return init; }"));
        assert!(named.ends_with("async function init() {}\n"));

        let expression = link("export default { answer: 42 };\n");
        assert!(expression.ends_with("exports.default = { answer: 42 };\n"));

        let anonymous = link("export default class extends Base {}\n");
        assert!(anonymous.ends_with("exports.default = class extends Base {}\n"));
    }

    #[test]
    fn export_lists_and_reexports() {
        let linked = link(
            "const a = 1, b = 2;\n\
             export { a, b as \"b-name\", a as default };\n\
             export { x as y, default as z } from './x.js';\n\
             export * from './all.js';\n\
             export * as ns from './ns.js';\n",
        );
        let top = header(&linked);
        assert!(top.contains("a: function () { return a; }"));
        assert!(top.contains("\"b-name\": function () { return b; }"));
        assert!(top.contains("default: function () { return a; }"));
        assert!(top.contains("y: function () { return __knit_m0.x; }"));
        assert!(top.contains("z: function () { return __knit_default(__knit_m0); }"));
        assert!(top.contains("ns: function () { return __knit_m1; }"));
        assert!(top.contains("var __knit_m0 = require('./x.js');"));
        assert!(top.contains("__knit_reexport(exports, require('./all.js'));"));
        assert!(top.contains("var __knit_m1 = require('./ns.js');"));
    }

    #[test]
    fn line_numbers_survive() {
        let source = "import {\n  a,\n  b,\n} from './a.js';\nexport {\n  a,\n};\nconsole.log(b);\n";
        let linked = link(source);
        assert_eq!(linked.lines().count(), source.lines().count());
        assert_eq!(linked.lines().nth(7), Some("console.log(b);"));
    }

    #[test]
    fn bundled_asset_urls_and_import_meta() {
        let source = "const wasm = new URL('app_bg.wasm', import.meta.url);\n\
                      const remote = new URL('https://cdn.example/x.wasm', import.meta.url);\n\
                      const meta = import.meta;\n";
        let linked = link_module(source, |specifier| specifier == "app_bg.wasm")
            .unwrap()
            .into_owned();
        assert!(linked.contains("new URL(__knit_default(require('app_bg.wasm')), __knit_base);"));
        assert!(linked.contains("new URL('https://cdn.example/x.wasm', __knit_base);"));
        assert!(linked.contains("const meta = ({ url: __knit_base });"));
        assert!(!linked.contains("import.meta"));
    }

    #[test]
    fn dynamic_imports_of_bundled_modules() {
        let source = "load(() => import('./lazy.js'));\nload(() => import('https://cdn.example/x.js'));\n";
        let linked = link_module(source, |specifier| specifier == "./lazy.js")
            .unwrap()
            .into_owned();
        assert!(linked.starts_with(
            "load(() => Promise.resolve().then(function () { return require('./lazy.js'); }));"
        ));
        assert!(linked.contains("import('https://cdn.example/x.js')"));
        // Only dynamic imports: still a plain script.
        assert!(!linked.contains("use strict"));
    }

    #[test]
    fn comments_and_strings_are_left_alone() {
        let linked = link("// import x from './nope.js';\nconst s = \"export default 1\";\nexport const t = 1;\n");
        assert!(linked.contains("// import x from './nope.js';"));
        assert!(linked.contains("const s = \"export default 1\";"));
        assert!(!header(&linked).contains("nope"));
    }

    #[test]
    fn statements_without_semicolons() {
        let linked = link("import a from './a.js'\nexport const b = a + 1\nexport const c = b\n  * 2\nconsole.log(c)\n");
        let top = header(&linked);
        assert!(top.contains("b: function () { return b; }"));
        assert!(top.contains("c: function () { return c; }"));
        assert!(!top.contains("console"));
        assert!(linked.contains("var b = a + 1\nvar c = b\n  * 2\n"));
    }

    #[test]
    fn import_attributes_are_dropped() {
        let top = link("import data from './data.json' with { type: 'json' };\n");
        assert!(header(&top).contains("var data = __knit_default(require('./data.json'));"));
        assert!(!top.contains("type:"));
    }

    #[test]
    fn malformed_declarations_report_their_line() {
        let err = link_module("const a = 1;\nimport { a b } from './a.js';\n", |_| true).unwrap_err();
        assert_eq!(err.line, 2);

        let err = link_module("export enum Color { Red }\n", |_| true).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("export enum"));
    }
}
