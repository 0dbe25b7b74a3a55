//! HTML shell injection.
//!
//! Inserts a `<link>` for each stylesheet and a `<script>` for each script in
//! a [`BuildManifest`] into an HTML template. Binary and other assets are
//! loaded by the bundle itself and never referenced from the shell.

use knit_config::InjectionPoint;
use miette::Diagnostic;
use thiserror::Error;

use crate::emitter::{AssetKind, BuildManifest};

/// Template used when no `html_template` is configured.
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>knit app</title>
  </head>
  <body>
  </body>
</html>
"#;

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum TemplateError {
    #[error("HTML template has no {tag} to inject before")]
    #[diagnostic(
        code(knit::html::missing_tag),
        help("Add the closing tag to the template or choose another html_injection_point")
    )]
    MissingTag { tag: &'static str },

    #[error("HTML template does not contain the marker '{marker}'")]
    #[diagnostic(
        code(knit::html::missing_marker),
        help("Place the marker where the asset tags should go, e.g. <!-- {{{{ASSETS}}}} -->")
    )]
    MissingMarker { marker: String },

    #[error("injection marker cannot be empty")]
    #[diagnostic(code(knit::html::empty_marker))]
    EmptyMarker,
}

/// Inject tags for `manifest` into `template` at `point`.
pub fn inject(
    template: &str,
    manifest: &BuildManifest,
    point: &InjectionPoint,
    public_path: &str,
) -> Result<String, TemplateError> {
    let tags = render_tags(manifest, public_path);

    let (at, replaced_len) = match point {
        InjectionPoint::Head => (closing_tag(template, "</head>")?, 0),
        InjectionPoint::Body => (closing_tag(template, "</body>")?, 0),
        InjectionPoint::Marker(marker) => {
            if marker.is_empty() {
                return Err(TemplateError::EmptyMarker);
            }
            let at = template
                .find(marker.as_str())
                .ok_or_else(|| TemplateError::MissingMarker {
                    marker: marker.clone(),
                })?;
            (at, marker.len())
        }
    };

    let mut html = String::with_capacity(template.len() + tags.len());
    html.push_str(&template[..at]);
    html.push_str(&tags);
    html.push_str(&template[at + replaced_len..]);
    Ok(html)
}

/// One tag per line, stylesheets first.
pub fn render_tags(manifest: &BuildManifest, public_path: &str) -> String {
    let mut tags = String::new();
    for asset in manifest.of_kind(AssetKind::Style) {
        let href = escape_attr(&format!("{public_path}{}", asset.filename));
        tags.push_str(&format!("<link rel=\"stylesheet\" href=\"{href}\">\n"));
    }
    for asset in manifest.of_kind(AssetKind::Script) {
        let src = escape_attr(&format!("{public_path}{}", asset.filename));
        tags.push_str(&format!("<script src=\"{src}\"></script>\n"));
    }
    tags
}

/// Escape a value for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn closing_tag(template: &str, tag: &'static str) -> Result<usize, TemplateError> {
    // ASCII lowercasing keeps byte offsets identical.
    template
        .to_ascii_lowercase()
        .find(tag)
        .ok_or(TemplateError::MissingTag { tag })
}
