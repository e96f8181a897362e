//! `relaxed` canonicalization, RFC 6376 section 3.4.

fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// `name:value\r\n` with the name lowercased, folding undone, whitespace
/// runs collapsed to one SP and the value trimmed at both ends.
pub fn relaxed_header(name: &str, value: &str) -> String {
    let mut out = String::with_capacity(name.len() + value.len() + 3);
    out.push_str(&name.trim_end().to_ascii_lowercase());
    out.push(':');

    let mut started = false;
    let mut pending_space = false;
    for c in value.chars() {
        if is_wsp(c) {
            pending_space = started;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
        started = true;
    }

    out.push_str("\r\n");
    out
}

/// Canonical body: CRLF line endings, SP/HTAB runs collapsed, trailing
/// whitespace removed from each line and trailing empty lines dropped.
/// A body with no content canonicalizes to nothing.
pub fn relaxed_body(body: &[u8]) -> Vec<u8> {
    let mut lines: Vec<Vec<u8>> = body
        .split(|b| *b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let mut out = Vec::with_capacity(line.len());
            let mut pending_space = false;
            for &b in line {
                if b == b' ' || b == b'\t' {
                    pending_space = true;
                    continue;
                }
                if pending_space {
                    out.push(b' ');
                    pending_space = false;
                }
                out.push(b);
            }
            out
        })
        .collect();

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let mut out = Vec::with_capacity(body.len() + 2);
    for line in lines {
        out.extend_from_slice(&line);
        out.extend_from_slice(b"\r\n");
    }
    out
}
