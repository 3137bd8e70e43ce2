//! SVG symbol sprites
//!
//! Every icon becomes a `<symbol>` named after its file, keeping its
//! `viewBox`. Presentation attributes matching `strip_attrs` are dropped from
//! the icon shapes so the page can style them with CSS.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::SpriteConfig;
use crate::error::{Result, StagehandError};
use crate::paths;
use crate::task::{Operation, TaskContext, TaskOutput};

static PREAMBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<\?xml.*?\?>|<!--.*?-->|<!DOCTYPE[^>]*>").unwrap());
static SVG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<svg\b([^>]*)>(.*)</svg\s*>").unwrap());
static ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\s([A-Za-z_:][\w:.-]*)\s*=\s*("[^"]*"|'[^']*')"#).unwrap());

#[derive(Debug, Clone)]
pub struct Sprite {
    pub src: Vec<String>,
    pub dest: PathBuf,
    pub strip_attrs: Option<String>,
}

impl From<&SpriteConfig> for Sprite {
    fn from(config: &SpriteConfig) -> Self {
        Self {
            src: config.src.clone(),
            dest: config.dest.clone(),
            strip_attrs: config.strip_attrs.clone(),
        }
    }
}

fn attr_value<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    ATTR.captures_iter(attrs)
        .find(|c| &c[1] == name)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim_matches(|q: char| q == '"' || q == '\''))
}

fn view_box(attrs: &str) -> Option<String> {
    if let Some(vb) = attr_value(attrs, "viewBox") {
        return Some(vb.to_string());
    }
    let dimension = |name| {
        attr_value(attrs, name)
            .map(|v| v.trim_end_matches("px"))
            .and_then(|v| v.parse::<f64>().ok())
    };
    Some(format!("0 0 {} {}", dimension("width")?, dimension("height")?))
}

/// Turn one SVG document into a `<symbol>` element
pub fn symbol(id: &str, svg: &str, strip: Option<&Regex>, file: &Path) -> Result<String> {
    let cleaned = PREAMBLE.replace_all(svg, "");
    let caps = SVG.captures(&cleaned).ok_or_else(|| StagehandError::Sprite {
        file: file.to_path_buf(),
        reason: "no <svg> root element".to_string(),
    })?;

    let mut inner = caps[2].trim().to_string();
    if let Some(strip) = strip {
        inner = ATTR
            .replace_all(&inner, |c: &regex::Captures| {
                if strip.is_match(&c[1]) {
                    String::new()
                } else {
                    c[0].to_string()
                }
            })
            .into_owned();
    }

    let view_box = view_box(&caps[1])
        .map(|vb| format!(" viewBox=\"{}\"", vb))
        .unwrap_or_default();
    Ok(format!("<symbol id=\"{}\"{}>{}</symbol>", id, view_box, inner))
}

impl Sprite {
    fn strip_regex(&self) -> Result<Option<Regex>> {
        self.strip_attrs
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| StagehandError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    async fn build(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let strip = self.strip_regex()?;
        let mut symbols = Vec::new();

        for source in paths::expand(&ctx.root, &self.src)? {
            let id = source
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let svg = tokio::fs::read_to_string(&source.path).await?;
            symbols.push(symbol(&id, &svg, strip.as_ref(), &source.path)?);
        }

        let target = ctx.resolve(&self.dest);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let sprite = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\">{}</svg>\n",
            symbols.concat()
        );
        tokio::fs::write(&target, sprite).await?;

        debug!(icons = symbols.len(), sprite = %target.display(), "sprite built");
        Ok(TaskOutput::wrote(target))
    }
}

impl Operation for Sprite {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.build(ctx))
    }

    fn describe(&self) -> String {
        format!("sprite {} -> {}", self.src.join(", "), self.dest.display())
    }
}
