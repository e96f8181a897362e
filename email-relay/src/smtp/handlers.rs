//! Command semantics. Handlers mutate the [`Session`] and tell the engine
//! what to do next; they never touch the connection.

use base64::{engine::general_purpose::STANDARD, Engine};
use subtle::ConstantTimeEq;

use super::command::Command;
use super::reply::Reply;
use super::session::Session;
use crate::config::Credentials;

/// What the engine does after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(Reply),
    /// Answer 354 and read the message body.
    Data,
    /// Answer 220 and upgrade the connection.
    StartTls,
    /// Answer 334 and read the AUTH PLAIN response line.
    AuthChallenge,
    /// Answer 221 and close.
    Quit,
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub hostname: String,
    pub max_recipients: usize,
    pub max_message_bytes: usize,
    pub tls_available: bool,
    pub credentials: Option<Credentials>,
    pub require_auth: bool,
    pub allow_insecure_auth: bool,
}

#[derive(Debug, Clone)]
pub struct CommandHandler {
    policy: Policy,
}

impl CommandHandler {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn handle(&self, session: &mut Session, line: &str) -> Action {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected command");
                return Action::Reply(Reply::invalid_syntax());
            }
        };

        match command {
            Command::Helo(host) => {
                session.greet(host, false);
                Action::Reply(Reply::new(250, self.policy.hostname.clone()))
            }
            Command::Ehlo(host) => {
                session.greet(host, true);
                Action::Reply(self.ehlo_reply(session))
            }
            Command::Mail(sender) => Action::Reply(self.mail(session, sender)),
            Command::Rcpt(recipient) => Action::Reply(self.rcpt(session, recipient)),
            Command::Data => {
                if session.mail_from.is_none() || session.recipients.is_empty() {
                    Action::Reply(Reply::new(502, "Missing RCPT"))
                } else {
                    Action::Data
                }
            }
            Command::Rset => {
                session.rset();
                Action::Reply(Reply::ok())
            }
            Command::Noop => Action::Reply(Reply::ok()),
            Command::Quit => Action::Quit,
            Command::StartTls => {
                if !self.policy.tls_available {
                    Action::Reply(Reply::tls_unavailable())
                } else if session.tls {
                    Action::Reply(Reply::bad_sequence())
                } else {
                    Action::StartTls
                }
            }
            Command::Auth { mechanism, initial } => self.auth(session, &mechanism, initial),
            Command::Unknown(verb) => {
                tracing::debug!(verb = %verb, "Unsupported command");
                Action::Reply(Reply::unsupported())
            }
        }
    }

    /// Complete AUTH PLAIN with the line sent after a 334 challenge.
    pub fn auth_response(&self, session: &mut Session, line: &str) -> Reply {
        let line = line.trim();
        if line == "*" {
            return Reply::new(501, "Authentication cancelled");
        }
        self.check_plain(session, line)
    }

    fn auth_offered(&self, session: &Session) -> bool {
        self.policy.credentials.is_some() && (session.tls || self.policy.allow_insecure_auth)
    }

    fn ehlo_reply(&self, session: &Session) -> Reply {
        let mut lines = vec![
            self.policy.hostname.clone(),
            format!("SIZE {}", self.policy.max_message_bytes),
            "8BITMIME".to_string(),
        ];
        if self.policy.tls_available && !session.tls {
            lines.push("STARTTLS".to_string());
        }
        if self.auth_offered(session) && session.authed.is_none() {
            lines.push("AUTH PLAIN".to_string());
        }
        Reply::multiline(250, lines)
    }

    fn mail(&self, session: &mut Session, sender: String) -> Reply {
        if session.helo.is_none() || session.mail_from.is_some() {
            return Reply::bad_sequence();
        }
        if self.policy.require_auth && session.authed.is_none() {
            return Reply::auth_required();
        }
        session.mail_from = Some(sender);
        Reply::ok()
    }

    fn rcpt(&self, session: &mut Session, recipient: String) -> Reply {
        if session.mail_from.is_none() {
            return Reply::bad_sequence();
        }
        if session.recipients.len() >= self.policy.max_recipients {
            return Reply::too_many_recipients();
        }
        session.recipients.push(recipient);
        Reply::ok()
    }

    fn auth(&self, session: &mut Session, mechanism: &str, initial: Option<String>) -> Action {
        if self.policy.credentials.is_none() {
            return Action::Reply(Reply::unsupported());
        }
        if !self.auth_offered(session)
            || session.authed.is_some()
            || session.mail_from.is_some()
        {
            return Action::Reply(Reply::bad_sequence());
        }
        if mechanism != "PLAIN" {
            return Action::Reply(Reply::new(502, "Unsupported authentication mechanism"));
        }

        match initial {
            Some(response) => Action::Reply(self.check_plain(session, &response)),
            None => Action::AuthChallenge,
        }
    }

    /// Verify a base64 `authzid NUL authcid NUL passwd` response.
    fn check_plain(&self, session: &mut Session, response: &str) -> Reply {
        let Some(credentials) = &self.policy.credentials else {
            return Reply::unsupported();
        };

        // "=" is an empty initial response.
        let decoded = if response == "=" {
            Vec::new()
        } else {
            match STANDARD.decode(response) {
                Ok(bytes) => bytes,
                Err(_) => return Reply::invalid_syntax(),
            }
        };

        let mut parts = decoded.split(|b| *b == 0);
        let (Some(_authzid), Some(user), Some(pass), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Reply::invalid_syntax();
        };

        let user_ok = user.ct_eq(credentials.username.as_bytes());
        let pass_ok = pass.ct_eq(credentials.password.as_bytes());
        if bool::from(user_ok & pass_ok) {
            let name = String::from_utf8_lossy(user).into_owned();
            tracing::info!(user = %name, "SMTP client authenticated");
            session.authed = Some(name);
            Reply::auth_succeeded()
        } else {
            tracing::warn!("SMTP authentication failed");
            Reply::bad_credentials()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        Policy {
            hostname: "mx.test".into(),
            max_recipients: 2,
            max_message_bytes: 1024,
            tls_available: true,
            credentials: Some(Credentials {
                username: "relay".into(),
                password: "s3cret".into(),
            }),
            require_auth: false,
            allow_insecure_auth: false,
        }
    }

    fn reply(action: Action) -> Reply {
        match action {
            Action::Reply(reply) => reply,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    fn plain(user: &str, pass: &str) -> String {
        STANDARD.encode(format!("\0{}\0{}", user, pass))
    }

    #[test]
    fn test_mail_requires_helo_and_is_not_repeatable() {
        let handler = CommandHandler::new(policy());
        let mut session = Session::new(false);

        assert_eq!(reply(handler.handle(&mut session, "MAIL FROM:<a@b.test>")).code, 502);
        assert_eq!(reply(handler.handle(&mut session, "HELO client")).code, 250);
        assert_eq!(reply(handler.handle(&mut session, "MAIL FROM:<a@b.test>")).code, 250);
        assert_eq!(reply(handler.handle(&mut session, "MAIL FROM:<a@b.test>")).code, 502);
    }

    #[test]
    fn test_recipient_limit() {
        let handler = CommandHandler::new(policy());
        let mut session = Session::new(false);
        handler.handle(&mut session, "HELO client");
        handler.handle(&mut session, "MAIL FROM:<a@b.test>");

        assert_eq!(reply(handler.handle(&mut session, "RCPT TO:<c@d.test>")).code, 250);
        assert_eq!(reply(handler.handle(&mut session, "RCPT TO:<e@d.test>")).code, 250);
        assert_eq!(reply(handler.handle(&mut session, "RCPT TO:<f@d.test>")).code, 452);
        assert_eq!(reply(handler.handle(&mut session, "RCPT TO:broken")).code, 502);
    }

    #[test]
    fn test_data_needs_recipient() {
        let handler = CommandHandler::new(policy());
        let mut session = Session::new(false);
        handler.handle(&mut session, "HELO client");
        handler.handle(&mut session, "MAIL FROM:<a@b.test>");

        assert_eq!(reply(handler.handle(&mut session, "DATA")).code, 502);
        handler.handle(&mut session, "RCPT TO:<c@d.test>");
        assert_eq!(handler.handle(&mut session, "DATA"), Action::Data);
    }

    #[test]
    fn test_ehlo_advertises_starttls_before_tls_only() {
        let handler = CommandHandler::new(policy());

        let mut plain_session = Session::new(false);
        let lines = reply(handler.handle(&mut plain_session, "EHLO client")).lines;
        assert!(lines.contains(&"STARTTLS".to_string()));
        assert!(!lines.contains(&"AUTH PLAIN".to_string()));

        let mut tls_session = Session::new(true);
        let lines = reply(handler.handle(&mut tls_session, "EHLO client")).lines;
        assert!(!lines.contains(&"STARTTLS".to_string()));
        assert!(lines.contains(&"AUTH PLAIN".to_string()));
    }

    #[test]
    fn test_auth_plain_inline() {
        let handler = CommandHandler::new(policy());
        let mut session = Session::new(true);
        handler.handle(&mut session, "EHLO client");

        let bad = format!("AUTH PLAIN {}", plain("relay", "wrong"));
        assert_eq!(reply(handler.handle(&mut session, &bad)).code, 535);

        let good = format!("AUTH PLAIN {}", plain("relay", "s3cret"));
        assert_eq!(reply(handler.handle(&mut session, &good)).code, 235);
        assert_eq!(session.authed.as_deref(), Some("relay"));

        // Only once per session
        assert_eq!(reply(handler.handle(&mut session, &good)).code, 502);
    }

    #[test]
    fn test_auth_plain_continuation() {
        let handler = CommandHandler::new(policy());
        let mut session = Session::new(true);
        handler.handle(&mut session, "EHLO client");

        assert_eq!(handler.handle(&mut session, "AUTH PLAIN"), Action::AuthChallenge);
        assert_eq!(handler.auth_response(&mut session, &plain("relay", "s3cret")).code, 235);
    }

    #[test]
    fn test_auth_needs_tls() {
        let handler = CommandHandler::new(policy());
        let mut session = Session::new(false);
        handler.handle(&mut session, "EHLO client");

        let good = format!("AUTH PLAIN {}", plain("relay", "s3cret"));
        assert_eq!(reply(handler.handle(&mut session, &good)).code, 502);
        assert!(session.authed.is_none());
    }

    #[test]
    fn test_submission_mode_requires_auth() {
        let mut policy = policy();
        policy.require_auth = true;
        let handler = CommandHandler::new(policy);
        let mut session = Session::new(true);
        handler.handle(&mut session, "EHLO client");

        assert_eq!(reply(handler.handle(&mut session, "MAIL FROM:<a@b.test>")).code, 530);

        let good = format!("AUTH PLAIN {}", plain("relay", "s3cret"));
        handler.handle(&mut session, &good);
        assert_eq!(reply(handler.handle(&mut session, "MAIL FROM:<a@b.test>")).code, 250);
    }

    #[test]
    fn test_starttls_refused_without_tls_config() {
        let mut policy = policy();
        policy.tls_available = false;
        let handler = CommandHandler::new(policy);
        let mut session = Session::new(false);

        assert_eq!(reply(handler.handle(&mut session, "STARTTLS")).code, 454);
    }

    #[test]
    fn test_unknown_command() {
        let handler = CommandHandler::new(policy());
        let mut session = Session::new(false);
        assert_eq!(reply(handler.handle(&mut session, "VRFY root")), Reply::unsupported());
    }
}
