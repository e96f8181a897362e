use super::DkimError;

/// One header field. `value` is everything after the colon, continuation
/// lines included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Split an RFC 5322 message into its header fields and body.
pub fn split(message: &[u8]) -> Result<(Vec<HeaderField>, &[u8]), DkimError> {
    let (head, body) = split_at_blank_line(message);

    let head = std::str::from_utf8(head)
        .map_err(|_| DkimError::MalformedMessage("header section is not UTF-8".to_string()))?;

    let mut fields: Vec<HeaderField> = Vec::new();
    for line in head.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            let Some(field) = fields.last_mut() else {
                return Err(DkimError::MalformedMessage(
                    "continuation line before any header".to_string(),
                ));
            };
            field.value.push_str("\r\n");
            field.value.push_str(line);
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(DkimError::MalformedMessage(format!("header without colon: {}", line)));
        };
        fields.push(HeaderField {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    Ok((fields, body))
}

/// Split at the first empty line, whichever line ending it uses.
fn split_at_blank_line(message: &[u8]) -> (&[u8], &[u8]) {
    let mut start = 0;
    while start < message.len() {
        let end = message[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(message.len(), |i| start + i + 1);
        if matches!(&message[start..end], b"\n" | b"\r\n") {
            return (&message[..start], &message[end..]);
        }
        start = end;
    }
    (message, &[])
}

/// Pick the fields named in `names`, each name taking the bottom-most
/// occurrence not already picked. Names with no remaining occurrence
/// select nothing.
pub fn select<'a>(fields: &'a [HeaderField], names: &[String]) -> Vec<&'a HeaderField> {
    let mut used = vec![false; fields.len()];
    let mut selected = Vec::with_capacity(names.len());

    for name in names {
        let found = fields
            .iter()
            .enumerate()
            .rev()
            .find(|(i, f)| !used[*i] && f.name.trim().eq_ignore_ascii_case(name.trim()));
        if let Some((i, field)) = found {
            used[i] = true;
            selected.push(field);
        }
    }

    selected
}
