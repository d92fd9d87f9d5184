//! Indented source writer and literal formatting helpers.

/// A line-oriented output buffer with four-space indentation.
#[derive(Default)]
pub(crate) struct SourceWriter {
    out: String,
    indent: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Append pre-formatted text verbatim (used for the emulation library).
    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        debug_assert!(self.indent > 0);
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn into_string(self) -> String {
        self.out
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }
}

/// Format an `f32` for WGSL: shortest round-trip digits, `.0` suffix when
/// integral. NaN collapses to `0.0`, infinities clamp to the largest finite
/// `f32`.
pub(crate) fn fmt_f32(v: f32) -> String {
    if v.is_nan() {
        return "0.0".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "3.402823e+38" } else { "-3.402823e+38" }.to_string();
    }
    let s = format!("{v}");
    if s.contains('.') { s } else { format!("{s}.0") }
}

/// Sanitize a string into a valid WGSL identifier. Anything outside
/// `[A-Za-z0-9_]` becomes `_`, and a name that is empty or starts with a
/// digit gets a `_` prefix.
pub(crate) fn sanitize_wgsl_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 1);
    for (i, ch) in s.char_indices() {
        if i == 0 && ch.is_ascii_digit() {
            out.push('_');
        }
        out.push(if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' });
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}
