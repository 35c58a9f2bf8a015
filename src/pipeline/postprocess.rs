//! Post-processing: deterministic cleanup of model output.
//!
//! ## Why is post-processing necessary?
//!
//! Narration goes straight into a TTS engine and into the narration cache,
//! so it has to be plain spoken text. Even well-prompted models slip:
//!
//! - Markdown emphasis, headers and bullet markers that a TTS engine reads
//!   aloud as "asterisk asterisk"
//! - LaTeX (`$c^T x \leq b$`) that must become "c transpose x less than or
//!   equal to b"
//! - Instructor and institution names copied from a title slide
//!
//! JSON answers from the analysis pass have their own quirks: code fences,
//! prose around the object, and LaTeX backslashes that are invalid JSON
//! escapes. [`parse_json`] handles those.
//!
//! ## Rule Order
//!
//! Fences come off before anything else. Markdown is stripped before LaTeX
//! conversion so `*` emphasis is not mistaken for multiplication. Identifying
//! strings are scrubbed after LaTeX conversion (`\text{Prof. X}` must be
//! unwrapped first). Whitespace is collapsed last.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;

/// Apply all narration cleanup rules to raw model output.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip markdown structure (headers, bullets, emphasis, backticks)
/// 4. Convert delimited math and stray LaTeX commands to spoken form
/// 5. Scrub identifying strings (titled names, institutions, configured terms)
/// 6. Strip invisible Unicode
/// 7. Collapse whitespace into single spaces
pub fn clean_narration(input: &str, redact_terms: &[String]) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = strip_markdown(&s);
    let s = latex_to_speech(&s);
    let s = scrub_identifying(&s, redact_terms);
    let s = remove_invisible_chars(&s);
    collapse_whitespace(&s)
}

/// True if `text` still carries markup a TTS engine would read literally.
pub fn has_residual_markup(text: &str) -> bool {
    text.contains('\\')
        || text.contains('$')
        || text.contains('{')
        || text.contains('}')
        || text.contains("**")
        || text.contains('`')
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
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

// ── Rule 3: Strip markdown structure ─────────────────────────────────────────

static RE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]*").unwrap());
static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*+•]|\d+[.)])[ \t]+").unwrap());
static RE_STRONG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\*\*|__)(.+?)(\*\*|__)").unwrap());
static RE_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[\s(])[*_]([^*_\s][^*_]*?)[*_]([\s.,;:!?)]|$)").unwrap());
// Left over once paired markers are gone: `x ** 2` or an unclosed `**Note`.
static RE_POWER_OP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9)])[ \t]*\*\*[ \t]*([A-Za-z0-9(])").unwrap());
static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").unwrap());

fn strip_markdown(input: &str) -> String {
    let s = RE_HEADER.replace_all(input, "");
    let s = RE_BULLET.replace_all(&s, "");
    let s = RE_LINK.replace_all(&s, "$1");
    let s = RE_STRONG.replace_all(&s, "$2");
    let s = RE_EMPHASIS.replace_all(&s, "$1$2$3");
    let s = RE_POWER_OP.replace_all(&s, "$1 to the power of $2");
    s.replace("**", "").replace("__", "").replace('`', "")
}

// ── Rule 4: LaTeX to speech ──────────────────────────────────────────────────

static RE_DISPLAY_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$\$(.+?)\$\$|\\\[(.+?)\\\]").unwrap());
static RE_INLINE_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$([^$]+?)\$|\\\((.+?)\\\)").unwrap());
static RE_FRAC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\[dt]?frac\s*\{([^{}]*)\}\s*\{([^{}]*)\}").unwrap());
static RE_SQRT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\sqrt\s*\{([^{}]*)\}").unwrap());
static RE_WRAPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:mathbb|mathbf|mathcal|mathrm|mathit|text|textbf|textit|operatorname|boldsymbol)\s*\{([^{}]*)\}")
        .unwrap()
});
static RE_TRANSPOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^\s*(?:\{\s*(?:T|\\top)\s*\}|T\b|\\top)").unwrap());
static RE_SQUARED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\^\s*(?:\{\s*2\s*\}|2)").unwrap());
static RE_POWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^\s*(?:\{([^{}]*)\}|([A-Za-z0-9]))").unwrap());
static RE_SUBSCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_\s*(?:\{([^{}]*)\}|([A-Za-z0-9]))").unwrap());
static RE_COMMAND: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\([A-Za-z]+)").unwrap());

/// Spoken form of a LaTeX command name, if it has one.
fn command_word(name: &str) -> Option<&'static str> {
    Some(match name {
        "leq" | "le" | "leqslant" => " less than or equal to ",
        "geq" | "ge" | "geqslant" => " greater than or equal to ",
        "neq" | "ne" => " not equal to ",
        "lt" => " less than ",
        "gt" => " greater than ",
        "approx" => " approximately ",
        "equiv" => " is equivalent to ",
        "in" => " in ",
        "notin" => " not in ",
        "subseteq" | "subset" => " is a subset of ",
        "cup" => " union ",
        "cap" => " intersection ",
        "sum" => " the sum of ",
        "prod" => " the product of ",
        "int" => " the integral of ",
        "infty" => " infinity ",
        "cdot" | "times" => " times ",
        "div" => " divided by ",
        "pm" => " plus or minus ",
        "to" | "rightarrow" => " to ",
        "Rightarrow" | "implies" => " implies ",
        "iff" | "Leftrightarrow" => " if and only if ",
        "forall" => " for all ",
        "exists" => " there exists ",
        "max" => " maximize ",
        "min" => " minimize ",
        "argmax" => " the arg max of ",
        "argmin" => " the arg min of ",
        "ldots" | "cdots" | "dots" | "vdots" => " and so on ",
        "partial" => " partial ",
        "nabla" => " the gradient of ",
        "mid" => " such that ",
        "top" => " transpose ",
        "emptyset" | "varnothing" => " the empty set ",
        "log" => " log ",
        "ln" => " natural log ",
        "lim" => " the limit of ",
        "quad" | "qquad" | "left" | "right" | "big" | "Big" | "displaystyle" => " ",
        _ => return None,
    })
}

const GREEK: [&str; 24] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    "lambda", "mu", "nu", "xi", "omicron", "pi", "rho", "sigma", "tau", "upsilon", "phi",
    "chi", "psi", "omega",
];

fn greek_word(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    let base = lower.strip_prefix("var").unwrap_or(&lower);
    GREEK.contains(&base).then(|| format!(" {base} "))
}

/// Convert a math expression (delimiters already removed) to spoken words.
fn math_to_speech(expr: &str) -> String {
    let mut s = expr.to_string();
    // Nested fractions resolve inside-out.
    for _ in 0..4 {
        let next = RE_FRAC.replace_all(&s, " $1 over $2 ").to_string();
        if next == s {
            break;
        }
        s = next;
    }
    s = RE_SQRT.replace_all(&s, " the square root of $1 ").to_string();
    s = RE_WRAPPER.replace_all(&s, "$1").to_string();
    s = RE_TRANSPOSE.replace_all(&s, " transpose ").to_string();
    s = RE_SQUARED.replace_all(&s, " squared ").to_string();
    s = RE_POWER
        .replace_all(&s, |c: &Captures<'_>| {
            let exp = c.get(1).or_else(|| c.get(2)).map_or("", |m| m.as_str());
            format!(" to the power of {exp} ")
        })
        .to_string();
    s = RE_SUBSCRIPT
        .replace_all(&s, |c: &Captures<'_>| {
            let sub = c.get(1).or_else(|| c.get(2)).map_or("", |m| m.as_str());
            format!(" sub {sub} ")
        })
        .to_string();
    s = commands_to_speech(&s);
    s = s
        .replace("<=", " less than or equal to ")
        .replace(">=", " greater than or equal to ")
        .replace("!=", " not equal to ")
        .replace('=', " equals ")
        .replace('<', " less than ")
        .replace('>', " greater than ")
        .replace('+', " plus ");
    s.replace(['{', '}'], " ")
}

fn commands_to_speech(input: &str) -> String {
    RE_COMMAND
        .replace_all(input, |c: &Captures<'_>| {
            let name = &c[1];
            command_word(name)
                .map(str::to_string)
                .or_else(|| greek_word(name))
                .unwrap_or_else(|| format!(" {name} "))
        })
        .to_string()
}

fn unicode_math_to_speech(input: &str) -> String {
    input
        .replace('≤', " less than or equal to ")
        .replace('≥', " greater than or equal to ")
        .replace('≠', " not equal to ")
        .replace('∈', " in ")
        .replace('∉', " not in ")
        .replace('⊆', " is a subset of ")
        .replace('∞', " infinity ")
        .replace('∑', " the sum of ")
        .replace('∀', " for all ")
        .replace('∃', " there exists ")
        .replace('⇒', " implies ")
        .replace('⇔', " if and only if ")
        .replace('→', " to ")
        .replace('×', " times ")
        .replace('·', " times ")
}

fn latex_to_speech(input: &str) -> String {
    let convert = |c: &Captures<'_>| {
        let inner = c.get(1).or_else(|| c.get(2)).map_or("", |m| m.as_str());
        math_to_speech(inner)
    };
    let s = RE_DISPLAY_MATH.replace_all(input, convert);
    let s = RE_INLINE_MATH.replace_all(&s, convert);
    // Undelimited commands still leak through in prose ("we \max the objective").
    let s = RE_WRAPPER.replace_all(&s, "$1");
    let s = commands_to_speech(&s);
    let s = unicode_math_to_speech(&s);
    s.replace(['$', '\\', '{', '}'], " ")
}

// ── Rule 5: Scrub identifying strings ────────────────────────────────────────

static RE_TITLED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:Professor|Prof\.|Dr\.|Instructor|Lecturer|TA)\s+[A-Z][A-Za-z'\-]+(?:\s+[A-Z]\.)?(?:\s+[A-Z][A-Za-z'\-]+)?",
    )
    .unwrap()
});
static RE_UNIVERSITY_OF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:University|College|Institute)\s+of\s+[A-Z][A-Za-z&'\-]*(?:\s+[A-Z][A-Za-z&'\-]*)*")
        .unwrap()
});
static RE_NAMED_UNIVERSITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[A-Z][A-Za-z&'\-]+\s+){1,3}(?:University|College|Institute of Technology|Polytechnic)\b")
        .unwrap()
});
static RE_DOUBLE_THE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(the)\s+the\b").unwrap());

fn scrub_identifying(input: &str, redact_terms: &[String]) -> String {
    let s = RE_TITLED_NAME.replace_all(input, "the instructor");
    let s = RE_UNIVERSITY_OF.replace_all(&s, "the university");
    let s = RE_NAMED_UNIVERSITY.replace_all(&s, |c: &Captures<'_>| {
        // "The University" on its own is generic; keep it.
        if c[0].trim_start().to_ascii_lowercase().starts_with("the ") && c[0].split_whitespace().count() == 2 {
            c[0].to_string()
        } else {
            "the university".to_string()
        }
    });
    let mut s = RE_DOUBLE_THE.replace_all(&s, "$1").to_string();

    for term in redact_terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))) {
            s = re.replace_all(&s, "").to_string();
        }
    }
    s
}

// ── Rule 6: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 7: Collapse whitespace ──────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r" ([.,;:!?])").unwrap());

fn collapse_whitespace(input: &str) -> String {
    let s = RE_WHITESPACE.replace_all(input.trim(), " ");
    RE_SPACE_BEFORE_PUNCT.replace_all(&s, "$1").to_string()
}

// ── JSON extraction ──────────────────────────────────────────────────────────

/// Pull the JSON object out of a model answer.
///
/// Prefers a fenced ```json block, then the outermost `{...}` span.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Double every backslash that does not start a valid JSON escape.
///
/// Models copy LaTeX (`\mathbb{R}`) into JSON strings verbatim.
pub fn repair_json_escapes(json: &str) -> String {
    let mut out = String::with_capacity(json.len() + 16);
    let mut chars = json.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                _ => out.push_str("\\\\"),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a model answer as JSON, repairing escapes if the first attempt fails.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let candidate = extract_json(raw);
    match serde_json::from_str(candidate) {
        Ok(v) => Ok(v),
        Err(first) => serde_json::from_str(&repair_json_escapes(candidate))
            .map_err(|_| format!("{first} (input starts: {:?})", truncate(candidate, 80))),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
