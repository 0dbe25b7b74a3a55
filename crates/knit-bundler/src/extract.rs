//! Dependency specifier extraction.
//!
//! Scripts: static `import`/`export ... from`, dynamic `import()`,
//! `require()` and `new URL(..., import.meta.url)`. Styles: `@import` and
//! `url(...)`. Comments are blanked out before matching, and data or remote
//! URLs are skipped. Results are in source order with duplicates removed.

use std::sync::LazyLock;

use knit_graph::ModuleKind;
use memchr::memmem;
use regex::Regex;

static STATIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:import|export)\s+(?:[^'"`;]*?\s+from\s+|[^'"`;]*?\bfrom)?\s*["']([^"'\n]+)["']"#)
        .unwrap_or_else(|e| unreachable!("static import pattern: {e}"))
});

static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*[,)]"#)
        .unwrap_or_else(|e| unreachable!("dynamic import pattern: {e}"))
});

static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*["']([^"'\n]+)["']\s*\)"#)
        .unwrap_or_else(|e| unreachable!("require pattern: {e}"))
});

static NEW_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bnew\s+URL\s*\(\s*["']([^"'\n]+)["']\s*,\s*import\.meta\.url\s*\)"#)
        .unwrap_or_else(|e| unreachable!("new URL pattern: {e}"))
});

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)"#)
        .unwrap_or_else(|e| unreachable!("css import pattern: {e}"))
});

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\burl\(\s*["']?([^"')]+?)["']?\s*\)"#)
        .unwrap_or_else(|e| unreachable!("css url pattern: {e}"))
});

/// Specifiers referenced by `content`, in source order.
pub fn extract_dependencies(kind: ModuleKind, content: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(content);
    match kind {
        ModuleKind::Script => extract_script(&text),
        ModuleKind::Style => extract_style(&text),
        ModuleKind::ForeignCompiled | ModuleKind::Asset => Vec::new(),
    }
}

fn extract_script(source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let has_keyword = [&b"import"[..], b"export", b"require", b"URL"]
        .iter()
        .any(|needle| memmem::find(bytes, needle).is_some());
    if !has_keyword {
        return Vec::new();
    }

    let code = blank_comments(source, CommentStyle::Script);
    let mut found: Vec<(usize, String)> = Vec::new();
    for pattern in [&*STATIC_IMPORT, &*DYNAMIC_IMPORT, &*REQUIRE, &*NEW_URL] {
        for caps in pattern.captures_iter(&code) {
            let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            // `obj.require(...)` and `x.import(...)` are member calls.
            if code[..whole.start()].ends_with('.') {
                continue;
            }
            found.push((spec.start(), spec.as_str().to_string()));
        }
    }
    ordered_unique(found)
}

fn extract_style(source: &str) -> Vec<String> {
    if memmem::find(source.as_bytes(), b"@import").is_none()
        && memmem::find(source.as_bytes(), b"url(").is_none()
    {
        return Vec::new();
    }

    let code = blank_comments(source, CommentStyle::Style);
    let mut found: Vec<(usize, String)> = Vec::new();
    for pattern in [&*CSS_IMPORT, &*CSS_URL] {
        for caps in pattern.captures_iter(&code) {
            if let Some(spec) = caps.get(1) {
                found.push((spec.start(), spec.as_str().trim().to_string()));
            }
        }
    }
    ordered_unique(found)
}

fn ordered_unique(mut found: Vec<(usize, String)>) -> Vec<String> {
    found.sort_by_key(|(offset, _)| *offset);
    let mut out: Vec<String> = Vec::with_capacity(found.len());
    for (_, spec) in found {
        if is_bundleable(&spec) && !out.contains(&spec) {
            out.push(spec);
        }
    }
    out
}

/// Data URLs, remote URLs and fragment-only references stay as written.
pub fn is_bundleable(specifier: &str) -> bool {
    let lower = specifier.trim().to_ascii_lowercase();
    !(lower.is_empty()
        || lower.starts_with('#')
        || lower.starts_with("//")
        || lower.starts_with("data:")
        || lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("blob:"))
}

/// Turn a specifier as written into one the resolver understands.
///
/// In stylesheets, `url(img.png)` and `@import "base.css"` are relative to
/// the stylesheet and `~pkg/x.css` names a package; scripts are unchanged.
pub fn request_for(kind: ModuleKind, specifier: &str) -> String {
    if kind != ModuleKind::Style {
        return specifier.to_string();
    }
    if let Some(package) = specifier.strip_prefix('~') {
        return package.to_string();
    }
    if crate::resolver::is_path_like(specifier) {
        specifier.to_string()
    } else {
        format!("./{specifier}")
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommentStyle {
    Script,
    Style,
}

/// Replace comments with spaces, keeping byte offsets and newlines intact.
/// String literals are left alone so `"//cdn"` survives.
pub(crate) fn blank_comments(source: &str, style: CommentStyle) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            out.push(b);
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' | b'\'' => {
                quote = Some(b);
                out.push(b);
                i += 1;
            }
            b'`' if style == CommentStyle::Script => {
                quote = Some(b);
                out.push(b);
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = memmem::find(&bytes[i + 2..], b"*/").map_or(bytes.len(), |p| i + 2 + p + 2);
                blank(&bytes[i..end], &mut out);
                i = end;
            }
            b'/' if style == CommentStyle::Script && bytes.get(i + 1) == Some(&b'/') => {
                let end = memchr::memchr(b'\n', &bytes[i..]).map_or(bytes.len(), |p| i + p);
                blank(&bytes[i..end], &mut out);
                i = end;
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn blank(span: &[u8], out: &mut Vec<u8>) {
    out.extend(span.iter().map(|&b| if b == b'\n' { b'\n' } else { b' ' }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(src: &str) -> Vec<String> {
        extract_dependencies(ModuleKind::Script, src.as_bytes())
    }

    fn style(src: &str) -> Vec<String> {
        extract_dependencies(ModuleKind::Style, src.as_bytes())
    }

    #[test]
    fn static_forms() {
        let deps = script(
            r#"
import def from "./a.js";
import { x, y } from './b.js';
import * as ns from "./c";
import "./side-effect.css";
export { z } from "./d.js";
export * from "./e.js";
import {
  multi,
  line,
} from "./f.js";
"#,
        );
        assert_eq!(
            deps,
            vec!["./a.js", "./b.js", "./c", "./side-effect.css", "./d.js", "./e.js", "./f.js"]
        );
    }

    #[test]
    fn dynamic_require_and_url() {
        let deps = script(
            r#"
const lazy = () => import("./lazy.js");
const fs = require('./node-dep');
const wasm = new URL("./app_bg.wasm", import.meta.url);
obj.require("./not-a-dep");
"#,
        );
        assert_eq!(deps, vec!["./lazy.js", "./node-dep", "./app_bg.wasm"]);
    }

    #[test]
    fn comments_and_strings() {
        let deps = script(
            r#"
// import "./commented.js";
/* import x from "./block.js"; */
const url = "https://example.com//x";
import real from "./real.js"; // trailing comment
"#,
        );
        assert_eq!(deps, vec!["./real.js"]);
    }

    #[test]
    fn exports_without_from_are_ignored() {
        let deps = script("export const name = \"./not-a-path\";\nexport default 1;\n");
        assert!(deps.is_empty());
    }

    #[test]
    fn duplicates_keep_first_position() {
        let deps = script("import a from './a.js';\nimport b from './b.js';\nimport('./a.js');\n");
        assert_eq!(deps, vec!["./a.js", "./b.js"]);
    }

    #[test]
    fn stylesheet_references() {
        let deps = style(
            r#"
@import "base.css";
@import url("./theme.css");
/* url(ignored.png) */
body { background: url(img/bg.png) no-repeat; }
.logo { background-image: url('data:image/png;base64,AAAA'); }
.remote { background: url(https://cdn.example.com/x.png); }
@font-face { src: url("../fonts/a.woff2?v=1") format("woff2"); }
"#,
        );
        assert_eq!(
            deps,
            vec!["base.css", "./theme.css", "img/bg.png", "../fonts/a.woff2?v=1"]
        );
    }

    #[test]
    fn style_requests_are_relative() {
        assert_eq!(request_for(ModuleKind::Style, "img/bg.png"), "./img/bg.png");
        assert_eq!(request_for(ModuleKind::Style, "../a.css"), "../a.css");
        assert_eq!(request_for(ModuleKind::Style, "~pkg/x.css"), "pkg/x.css");
        assert_eq!(request_for(ModuleKind::Script, "lodash"), "lodash");
    }

    #[test]
    fn assets_have_no_dependencies() {
        assert!(extract_dependencies(ModuleKind::Asset, b"import './x.js'").is_empty());
    }
}
