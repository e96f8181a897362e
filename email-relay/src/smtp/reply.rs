use std::fmt;

/// A server reply. Multi-line replies use `-` continuations on all but the
/// last line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn greeting(host: &str) -> Self {
        Self::new(220, format!("{} ESMTP ready", host))
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn start_data() -> Self {
        Self::new(354, "Start mail input; end with <CRLF>.<CRLF>")
    }

    pub fn go_ahead() -> Self {
        Self::new(220, "Go ahead")
    }

    pub fn closing() -> Self {
        Self::new(221, "Bye")
    }

    pub fn auth_succeeded() -> Self {
        Self::new(235, "Authentication successful")
    }

    pub fn auth_continue() -> Self {
        Self::new(334, "")
    }

    pub fn timeout() -> Self {
        Self::new(421, "Timeout, closing connection")
    }

    pub fn too_many_recipients() -> Self {
        Self::new(452, "Too many recipients")
    }

    pub fn tls_unavailable() -> Self {
        Self::new(454, "TLS not available")
    }

    pub fn line_too_long() -> Self {
        Self::new(500, "Line too long")
    }

    pub fn invalid_syntax() -> Self {
        Self::new(502, "Invalid syntax")
    }

    pub fn bad_sequence() -> Self {
        Self::new(502, "Bad sequence of commands")
    }

    pub fn unsupported() -> Self {
        Self::new(502, "Command not implemented")
    }

    pub fn auth_required() -> Self {
        Self::new(530, "Authentication required")
    }

    pub fn bad_credentials() -> Self {
        Self::new(535, "Authentication credentials invalid")
    }

    pub fn message_too_large() -> Self {
        Self::new(552, "Message too large")
    }

    pub fn is_positive(&self) -> bool {
        self.code < 400
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            if line.is_empty() && i == last {
                write!(f, "{}{}", self.code, sep)?;
            } else {
                write!(f, "{}{}{}", self.code, sep, line)?;
            }
            f.write_str("\r\n")?;
        }
        Ok(())
    }
}
