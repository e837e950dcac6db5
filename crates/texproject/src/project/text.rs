//
// project/text.rs
//
// Comment and verbatim stripping for directive scanning
//

/// Remove `%` comments. A `%` preceded by an odd number of backslashes is
/// a literal percent sign and is kept. Line structure is preserved.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&line[..comment_start(line).unwrap_or(line.len())]);
    }
    out
}

/// Byte offset of the first unescaped `%` in a line
fn comment_start(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut backslashes = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\\' => backslashes += 1,
            b'%' if backslashes % 2 == 0 => return Some(i),
            _ => backslashes = 0,
        }
    }
    None
}

/// Remove comments, inline `\verb` spans and the bodies of verbatim-like
/// environments. Environment bodies are replaced by their newlines so line
/// numbers in the result still match the source.
pub fn strip_comments_and_verbatim(text: &str, verbatim_envs: &[String]) -> String {
    let content = strip_comments(text);
    let content = strip_inline_verb(&content);
    strip_verbatim_envs(&content, verbatim_envs)
}

/// Drop `\verb<d>...<d>` and `\verb*<d>...<d>` spans. The delimiter is any
/// character other than an ASCII letter or digit, and the span must close on
/// the same line.
fn strip_inline_verb(text: &str) -> String {
    const VERB: &str = "\\verb";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(VERB) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + VERB.len()..];
        let after = after.strip_prefix('*').unwrap_or(after);

        let mut chars = after.char_indices();
        let span_end = match chars.next() {
            Some((_, delim)) if !delim.is_ascii_alphanumeric() && delim != '\n' => after
                [delim.len_utf8()..]
                .find(|c| c == delim || c == '\n')
                .filter(|&i| after[delim.len_utf8() + i..].starts_with(delim))
                .map(|i| delim.len_utf8() + i + delim.len_utf8()),
            _ => None,
        };

        match span_end {
            Some(end) => {
                rest = &after[end..];
            }
            None => {
                // Not a verb span; keep the command text and move on
                out.push_str(VERB);
                rest = &rest[pos + VERB.len()..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace `\begin{env}...\end{env}` blocks for the given environments with
/// the newlines they contained. Unterminated blocks are left untouched.
fn strip_verbatim_envs(text: &str, envs: &[String]) -> String {
    if envs.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    'scan: while let Some(pos) = rest.find("\\begin{") {
        let name_start = pos + "\\begin{".len();
        let Some(name_len) = rest[name_start..].find('}') else {
            break;
        };
        let name = &rest[name_start..name_start + name_len];
        if envs.iter().any(|e| e == name) {
            let end_tag = format!("\\end{{{}}}", name);
            let body_start = name_start + name_len + 1;
            if let Some(end_pos) = rest[body_start..].find(&end_tag) {
                let block_end = body_start + end_pos + end_tag.len();
                out.push_str(&rest[..pos]);
                let newlines = rest[pos..block_end].matches('\n').count();
                out.extend(std::iter::repeat('\n').take(newlines));
                rest = &rest[block_end..];
                continue 'scan;
            }
        }
        out.push_str(&rest[..name_start]);
        rest = &rest[name_start..];
    }
    out.push_str(rest);
    out
}
