//! Template parameter extraction.
//!
//! [`ParameterExtractor`] is the seam to whatever understands the template
//! language. [`CueExtractor`] handles the subset of CUE used by capability
//! templates: a top-level struct whose fields are the parameters.
//!
//! ```cue
//! #Template: {
//!     apiVersion: "core.oam.dev/v1alpha2"
//!     kind:       "ContainerizedWorkload"
//! }
//! webservice: {
//!     // +usage=Which image would you like to use for your service
//!     // +short=i
//!     image: string
//!     port:  *6379 | int
//!     env?: [...string]
//! }
//! ```
//!
//! Block selection: definitions (`#Name`), hidden fields (`_name`) and the
//! reserved `output`, `outputs` and `context` fields are skipped. A
//! top-level `parameter` block wins; otherwise the first remaining struct is
//! used and its label becomes the canonical name.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{Parameter, ParameterType};

/// Labels that never hold parameters.
const RESERVED_LABELS: &[&str] = &["output", "outputs", "context"];

/// Label of an explicit parameter block.
const PARAMETER_LABEL: &str = "parameter";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("template declares no parameter block")]
    NoParameters,
}

/// Result of extracting a template: its canonical name and parameters in
/// declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub name: String,
    pub parameters: Vec<Parameter>,
}

/// Extracts the parameter schema from a persisted template.
pub trait ParameterExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError>;
}

/// Extractor for CUE capability templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CueExtractor;

impl ParameterExtractor for CueExtractor {
    fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let source = fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        parse_template(&source, stem)
    }
}

/// Parse template text. `fallback_name` names an explicit `parameter` block.
pub fn parse_template(source: &str, fallback_name: &str) -> Result<Extracted, ExtractError> {
    let fields = parse_fields(source)?;
    let (name, body) = select_block(&fields, fallback_name).ok_or(ExtractError::NoParameters)?;

    let parameters = parse_fields(body)?
        .into_iter()
        .filter(|f| !f.label.starts_with('#') && !f.label.starts_with('_'))
        .map(Field::into_parameter)
        .collect();

    Ok(Extracted { name, parameters })
}

/// One `label: value` entry of a struct body, with its doc comments.
#[derive(Debug)]
struct Field {
    label: String,
    optional: bool,
    value: String,
    comments: Vec<String>,
}

impl Field {
    fn into_parameter(self) -> Parameter {
        let mut usage = None;
        let mut short = None;
        for comment in &self.comments {
            if let Some(text) = comment.strip_prefix("+usage=") {
                usage = Some(text.trim().to_string());
            } else if let Some(text) = comment.strip_prefix("+short=") {
                short = Some(text.trim().to_string());
            }
        }

        let (param_type, default) = analyze_value(&self.value);
        Parameter {
            required: !self.optional && default.is_none(),
            name: self.label,
            param_type,
            default,
            usage,
            short,
        }
    }
}

fn struct_body(value: &str) -> Option<&str> {
    value
        .trim()
        .strip_prefix('{')
        .and_then(|v| v.strip_suffix('}'))
}

fn select_block<'a>(fields: &'a [Field], fallback_name: &str) -> Option<(String, &'a str)> {
    if let Some(field) = fields.iter().find(|f| f.label == PARAMETER_LABEL) {
        let value = field.value.trim();
        let body = match struct_body(value) {
            Some(body) => body,
            // `parameter: #Spec` refers to a definition elsewhere in the file.
            None => fields
                .iter()
                .find(|f| f.label == value)
                .and_then(|f| struct_body(&f.value))?,
        };
        return Some((fallback_name.to_string(), body));
    }

    fields
        .iter()
        .filter(|f| {
            !f.label.starts_with('#')
                && !f.label.starts_with('_')
                && !RESERVED_LABELS.contains(&f.label.as_str())
        })
        .find_map(|f| struct_body(&f.value).map(|body| (f.label.clone(), body)))
}

// --- Scanning ---

fn syntax(message: impl Into<String>) -> ExtractError {
    ExtractError::Syntax(message.into())
}

fn line_end(src: &str, from: usize) -> usize {
    src[from..].find('\n').map_or(src.len(), |off| from + off)
}

/// Return the index just past the string literal starting at `start`.
fn skip_string(src: &str, start: usize) -> Result<usize, ExtractError> {
    let bytes = src.as_bytes();
    let quote = bytes[start];
    if src[start..].starts_with("\"\"\"") {
        return src[start + 3..]
            .find("\"\"\"")
            .map(|off| start + 3 + off + 3)
            .ok_or_else(|| syntax("unterminated multi-line string"));
    }
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => break,
            b if b == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(syntax("unterminated string literal"))
}

/// Scan a field value up to the end of its line (or a `,`) at depth zero.
/// Returns the trimmed value and the index to resume scanning from.
fn scan_value(src: &str, start: usize) -> Result<(&str, usize), ExtractError> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    let mut end = None;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(src, i)?,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                if depth == 0 {
                    end = Some(i);
                    i = line_end(src, i);
                    break;
                }
                i = line_end(src, i);
            }
            b'{' | b'[' | b'(' => {
                depth += 1;
                i += 1;
            }
            b'}' | b']' | b')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| syntax("unexpected closing bracket"))?;
                i += 1;
            }
            // A trailing `|` or `&` continues the expression on the next line.
            b'\n' if depth == 0 && ends_with_operator(&src[start..i]) => i += 1,
            b'\n' | b',' if depth == 0 => break,
            _ => i += 1,
        }
    }
    if depth != 0 {
        return Err(syntax("unbalanced brackets"));
    }
    Ok((src[start..end.unwrap_or(i)].trim(), i))
}

fn ends_with_operator(value: &str) -> bool {
    value.trim_end().ends_with(['|', '&'])
}

fn read_label(src: &str, start: usize) -> Result<(String, usize), ExtractError> {
    let bytes = src.as_bytes();
    if bytes[start] == b'"' {
        let end = skip_string(src, start)?;
        let label = serde_json::from_str::<String>(&src[start..end])
            .unwrap_or_else(|_| src[start + 1..end - 1].to_string());
        return Ok((label, end));
    }
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() || b":?!,{}[]()\"".contains(&b) {
            break;
        }
        i += 1;
    }
    if i == start {
        let found = src[start..].chars().next().unwrap_or_default();
        return Err(syntax(format!("unexpected character {found:?}")));
    }
    Ok((src[start..i].to_string(), i))
}

fn skip_inline_space(src: &str, mut i: usize) -> usize {
    let bytes = src.as_bytes();
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    i
}

/// Parse the fields of a struct body (or a whole file).
fn parse_fields(src: &str) -> Result<Vec<Field>, ExtractError> {
    let bytes = src.as_bytes();
    let mut fields = Vec::new();
    let mut comments: Vec<String> = Vec::new();
    let mut newlines = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\n' {
            newlines += 1;
            // A blank line detaches comments from the next field.
            if newlines >= 2 {
                comments.clear();
            }
            i += 1;
            continue;
        }
        if b.is_ascii_whitespace() || b == b',' {
            i += 1;
            continue;
        }
        if src[i..].starts_with("//") {
            let end = line_end(src, i);
            comments.push(src[i + 2..end].trim().to_string());
            newlines = 0;
            i = end;
            continue;
        }

        let (label, next) = read_label(src, i)?;
        let mut j = skip_inline_space(src, next);

        if matches!(label.as_str(), "package" | "import") && bytes.get(j) != Some(&b':') {
            i = if bytes.get(j) == Some(&b'(') {
                let (_, after) = scan_value(src, j)?;
                after
            } else {
                line_end(src, j)
            };
            comments.clear();
            continue;
        }

        let mut optional = false;
        match bytes.get(j) {
            Some(b'?') => {
                optional = true;
                j += 1;
            }
            Some(b'!') => j += 1,
            _ => {}
        }
        j = skip_inline_space(src, j);
        if bytes.get(j) != Some(&b':') {
            return Err(syntax(format!("expected ':' after label {label:?}")));
        }

        let (value, after) = scan_value(src, j + 1)?;
        if value.is_empty() {
            return Err(syntax(format!("missing value for label {label:?}")));
        }
        fields.push(Field {
            label,
            optional,
            value: value.to_string(),
            comments: std::mem::take(&mut comments),
        });
        newlines = 0;
        i = after;
    }

    Ok(fields)
}

// --- Value analysis ---

/// Split `expr` on `sep` where it is not nested or quoted.
fn split_top_level(expr: &str, sep: u8) -> Vec<&str> {
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(expr, i).unwrap_or(bytes.len());
                continue;
            }
            b'{' | b'[' | b'(' => depth += 1,
            b'}' | b']' | b')' => depth = depth.saturating_sub(1),
            b if b == sep && depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

fn classify(term: &str) -> ParameterType {
    // `string & =~"^[a-z]+$"`: the first conjunct carries the type.
    let term = split_top_level(term, b'&')
        .into_iter()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    match term {
        "string" | "bytes" => ParameterType::String,
        "int" | "uint" | "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16" | "uint32"
        | "uint64" => ParameterType::Int,
        "float" | "float32" | "float64" => ParameterType::Float,
        "number" => ParameterType::Number,
        "bool" | "true" | "false" => ParameterType::Bool,
        _ if term.starts_with('[') => ParameterType::List,
        _ if term.starts_with('{') => ParameterType::Struct,
        _ if term.starts_with('"') || term.starts_with('\'') => ParameterType::String,
        _ if term.parse::<i64>().is_ok() => ParameterType::Int,
        _ if term.parse::<f64>().is_ok() => ParameterType::Float,
        _ => ParameterType::Unknown,
    }
}

fn parse_default(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        let unquoted = raw
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix('\''))
            .unwrap_or(raw);
        serde_json::Value::String(unquoted.to_string())
    })
}

/// Infer the parameter type and default from a field expression such as
/// `*8080 | int`.
fn analyze_value(expr: &str) -> (ParameterType, Option<serde_json::Value>) {
    let mut param_type = ParameterType::Unknown;
    let mut default = None;

    for alternative in split_top_level(expr, b'|') {
        let alternative = alternative.trim();
        let term = match alternative.strip_prefix('*') {
            Some(marked) => {
                let marked = marked.trim();
                if default.is_none() {
                    default = Some(parse_default(marked));
                }
                marked
            }
            None => alternative,
        };
        if param_type == ParameterType::Unknown {
            param_type = classify(term);
        }
    }

    (param_type, default)
}
