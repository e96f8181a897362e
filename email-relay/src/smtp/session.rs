/// A message as received: envelope addresses and the raw DATA payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Empty for the null sender.
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: Vec<u8>,
}

/// Per-connection protocol state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Client name from the last HELO/EHLO.
    pub helo: Option<String>,
    pub extended: bool,
    pub mail_from: Option<String>,
    pub recipients: Vec<String>,
    pub tls: bool,
    /// Authenticated user name.
    pub authed: Option<String>,
}

impl Session {
    pub fn new(tls: bool) -> Self {
        Self {
            tls,
            ..Self::default()
        }
    }

    /// Back to the post-greeting baseline: HELO and AUTH survive, the
    /// envelope does not.
    pub fn rset(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
    }

    pub fn greet(&mut self, host: String, extended: bool) {
        self.rset();
        self.helo = Some(host);
        self.extended = extended;
    }

    /// Take the envelope for a DATA transaction.
    pub fn envelope(&self, body: Vec<u8>) -> Envelope {
        Envelope {
            sender: self.mail_from.clone().unwrap_or_default(),
            recipients: self.recipients.clone(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rset_keeps_greeting_and_auth() {
        let mut session = Session::new(true);
        session.greet("client.test".into(), true);
        session.authed = Some("relay".into());
        session.mail_from = Some("a@b.test".into());
        session.recipients.push("c@d.test".into());

        session.rset();

        assert_eq!(session.helo.as_deref(), Some("client.test"));
        assert_eq!(session.authed.as_deref(), Some("relay"));
        assert!(session.tls);
        assert!(session.mail_from.is_none());
        assert!(session.recipients.is_empty());
    }

    #[test]
    fn test_repeated_helo_resets_envelope() {
        let mut session = Session::new(false);
        session.greet("one.test".into(), false);
        session.mail_from = Some("a@b.test".into());

        session.greet("two.test".into(), true);

        assert_eq!(session.helo.as_deref(), Some("two.test"));
        assert!(session.mail_from.is_none());
    }
}
