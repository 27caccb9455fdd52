//! Text-level rewriting of fetched documents for cross-origin embedding.
//!
//! Every transform is a plain `&str -> Option<String>` step. A step that has
//! nothing to do, or cannot run (no parseable origin), returns `None` and the
//! document passes through unchanged. Running the whole pass twice yields the
//! same output as running it once. Archive playback artifacts are only
//! stripped from documents that came from an archive snapshot.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::Url;
use tracing::trace;

use crate::strategy::SourceStrategy;

pub const VIEWPORT_META: &str = r#"<meta name="viewport" content="width=device-width, initial-scale=1">"#;

// Attribute values starting with a single `/`. Protocol-relative `//` is left alone.
static ROOT_RELATIVE_DQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(\s(?:href|src|action)\s*=\s*")/([^/"][^"]*)?""#).unwrap());
static ROOT_RELATIVE_SQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(\s(?:href|src|action)\s*=\s*')/([^/'][^']*)?'"#).unwrap());
static CSS_ROOT_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)url\(\s*(["']?)/([^/"')][^"')]*)"#).unwrap());

static ARCHIVE_TOOLBAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--\s*BEGIN WAYBACK TOOLBAR INSERT\s*-->.*?<!--\s*END WAYBACK TOOLBAR INSERT\s*-->")
        .unwrap()
});
static ARCHIVE_COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--\s*(?:FILE ARCHIVED ON|playback timings|End Wayback Rewrite JS Include|WAYBACK).*?-->")
        .unwrap()
});
static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static ARCHIVE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*(?:web\.archive\.org)?/_static/[^>]*>"#).unwrap()
});
static ARCHIVE_URL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?:)?(?://web\.archive\.org)?/web/\d{1,14}(?:[a-z]{2}_)?/(https?:)").unwrap()
});

static FRAME_BLOCKING_META: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*http-equiv\s*=\s*["']?(?:x-frame-options|content-security-policy)["']?[^>]*>"#)
        .unwrap()
});
static HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head\b[^>]*>").unwrap());
static HTML_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<html\b[^>]*>").unwrap());
static BASE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<base\b[^>]*>").unwrap());
static HREF_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\shref\s*=").unwrap());
static VIEWPORT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<meta\b[^>]*name\s*=\s*["']?viewport["']?[^>]*>"#).unwrap());

const ARCHIVE_SCRIPT_MARKERS: &[&str] = &[
    "__wm.",
    "wombat",
    "archive.org/_static",
    "/_static/js/",
    "bundle-playback",
    "wb_prefix",
    "archive.org/includes/",
    "RufflePlayer",
];

struct RewriteContext {
    origin: Option<String>,
    archival: bool,
}

type Transform = fn(&str, &RewriteContext) -> Option<String>;

// Archive artifacts go before rebasing so `/_static/...` and `/web/...`
// references are still recognisable.
const TRANSFORMS: &[(&str, Transform)] = &[
    ("strip-archive-artifacts", strip_archive_artifacts),
    ("strip-frame-blocking-meta", strip_frame_blocking_meta),
    ("rebase-attributes", rebase_attributes),
    ("rebase-css-urls", rebase_css_urls),
    ("ensure-base", ensure_base),
    ("ensure-viewport", ensure_viewport),
];

/// `scheme://host[:port]` of `source_url`, if it has one.
pub fn base_origin(source_url: &str) -> Option<String> {
    let url = Url::parse(source_url.trim()).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

pub fn rewrite(html: &str, source_url: &str, source: SourceStrategy) -> String {
    let ctx = RewriteContext {
        origin: base_origin(source_url),
        archival: source == SourceStrategy::Archival,
    };

    let mut doc = html.to_string();
    for (name, transform) in TRANSFORMS {
        match transform(&doc, &ctx) {
            Some(next) => doc = next,
            None => trace!(transform = *name, "Rewrite step skipped"),
        }
    }
    doc
}

fn changed(before: &str, after: String) -> Option<String> {
    (after != before).then_some(after)
}

fn strip_archive_artifacts(html: &str, ctx: &RewriteContext) -> Option<String> {
    if !ctx.archival {
        return None;
    }
    let out = ARCHIVE_TOOLBAR.replace_all(html, "");
    let out = ARCHIVE_COMMENTS.replace_all(&out, "");
    let out = SCRIPT_BLOCK.replace_all(&out, |caps: &Captures| {
        let block = &caps[0];
        if ARCHIVE_SCRIPT_MARKERS.iter().any(|m| block.contains(m)) {
            String::new()
        } else {
            block.to_string()
        }
    });
    let out = ARCHIVE_LINK.replace_all(&out, "");
    let out = ARCHIVE_URL_PREFIX.replace_all(&out, "$1");
    changed(html, out.into_owned())
}

fn strip_frame_blocking_meta(html: &str, _ctx: &RewriteContext) -> Option<String> {
    changed(html, FRAME_BLOCKING_META.replace_all(html, "").into_owned())
}

fn rebase_attributes(html: &str, ctx: &RewriteContext) -> Option<String> {
    let origin = ctx.origin.as_deref()?;
    let replacement_dq = format!("${{1}}{}/${{2}}\"", origin);
    let replacement_sq = format!("${{1}}{}/${{2}}'", origin);
    let out = ROOT_RELATIVE_DQ.replace_all(html, replacement_dq.as_str());
    let out = ROOT_RELATIVE_SQ.replace_all(&out, replacement_sq.as_str());
    changed(html, out.into_owned())
}

fn rebase_css_urls(html: &str, ctx: &RewriteContext) -> Option<String> {
    let origin = ctx.origin.as_deref()?;
    let replacement = format!("url(${{1}}{}/${{2}}", origin);
    changed(html, CSS_ROOT_URL.replace_all(html, replacement.as_str()).into_owned())
}

/// Keeps the first `<base>` when present (dropping extras) and gives it an
/// `href` if it lacks one; otherwise inserts one right after `<head>`.
fn ensure_base(html: &str, ctx: &RewriteContext) -> Option<String> {
    let href = ctx
        .origin
        .as_deref()
        .map(|origin| format!(r#"href="{}/""#, html_escape::encode_double_quoted_attribute(origin)));

    if BASE_TAG.is_match(html) {
        let mut seen = false;
        let out = BASE_TAG.replace_all(html, |caps: &Captures| {
            if seen {
                return String::new();
            }
            seen = true;
            let tag = &caps[0];
            match &href {
                // `<base target=...>` alone leaves relative URLs resolving against the relay.
                Some(href) if !HREF_ATTR.is_match(tag) => format!("<base {}{}", href, &tag["<base".len()..]),
                _ => tag.to_string(),
            }
        });
        return changed(html, out.into_owned());
    }

    let href = href?;
    Some(insert_into_head(html, &format!("<base {}>", href)))
}

fn ensure_viewport(html: &str, _ctx: &RewriteContext) -> Option<String> {
    if VIEWPORT_TAG.is_match(html) {
        let mut seen = false;
        let out = VIEWPORT_TAG.replace_all(html, |_: &Captures| {
            if seen {
                String::new()
            } else {
                seen = true;
                VIEWPORT_META.to_string()
            }
        });
        return changed(html, out.into_owned());
    }

    // Directly after <base> when there is one, so <base> stays first in <head>.
    if let Some(base) = BASE_TAG.find(html) {
        let mut out = String::with_capacity(html.len() + VIEWPORT_META.len());
        out.push_str(&html[..base.end()]);
        out.push_str(VIEWPORT_META);
        out.push_str(&html[base.end()..]);
        return Some(out);
    }
    Some(insert_into_head(html, VIEWPORT_META))
}

/// Inserts `snippet` right after the opening `<head>`, synthesising a head
/// when the document has none.
fn insert_into_head(html: &str, snippet: &str) -> String {
    if let Some(head) = HEAD_OPEN.find(html) {
        return format!("{}{}{}", &html[..head.end()], snippet, &html[head.end()..]);
    }
    if let Some(root) = HTML_OPEN.find(html) {
        return format!("{}<head>{}</head>{}", &html[..root.end()], snippet, &html[root.end()..]);
    }
    format!("<head>{}</head>{}", snippet, html)
}
