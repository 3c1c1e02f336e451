//! Post-processing: deterministic cleanup of VLM responses.
//!
//! Even well-prompted models add artefacts that have nothing to do with the
//! page: a ```` ```markdown ```` fence around the whole answer, Windows line
//! endings, zero-width characters, or LaTeX `\(…\)` delimiters that most
//! Markdown renderers do not understand. These rules run inside the
//! transcriber, before the text becomes an [`crate::Outcome`]; the formatter
//! then copies it verbatim.
//!
//! ## Rule Order
//!
//! Fences are stripped first so the line-ending pass sees the real content;
//! formula repair runs last because it only rewrites delimiters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply the cleanup rules to a raw model response.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Rewrite `\(`/`\)` to `$` and `\[`/`\]` to `$$` (when `repair_formulas`)
pub fn clean_response(input: &str, repair_formulas: bool) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    if repair_formulas {
        repair_formula_tags(&s)
    } else {
        s
    }
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Repair formula delimiters ────────────────────────────────────────
//
// Models trained on LaTeX sources answer with `\( x \)` and `\[ x \]`.
// Markdown math renderers (GitHub, Obsidian, Typora) expect `$ x $` and
// `$$ x $$`.

fn repair_formula_tags(input: &str) -> String {
    input
        .replace("\\(", "$")
        .replace("\\)", "$")
        .replace("\\[", "$$")
        .replace("\\]", "$$")
}
