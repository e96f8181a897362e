//! Email templates with `{{BaseUrl}}`, `{{Token}}` and `{{Id}}` placeholders.
//!
//! The set is built once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use super::ServiceError;

pub const INVITE_TEMPLATE: &str = "invite.html";
pub const VERIFY_TEMPLATE: &str = "verify.html";
pub const FORGOT_TEMPLATE: &str = "forgot.html";
pub const ORG_INVITE_TEMPLATE: &str = "org_invite.html";

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        INVITE_TEMPLATE,
        "You have been invited",
        r#"<html><body>
<h2>You have been invited</h2>
<p><a href="{{BaseUrl}}/auth/register?id={{Id}}&token={{Token}}">Create your account</a></p>
</body></html>"#,
    ),
    (
        VERIFY_TEMPLATE,
        "Verify your email address",
        r#"<html><body>
<h2>Please verify your email</h2>
<p><a href="{{BaseUrl}}/auth/verify?id={{Id}}&token={{Token}}">Verify email</a></p>
</body></html>"#,
    ),
    (
        FORGOT_TEMPLATE,
        "Reset your password",
        r#"<html><body>
<h2>Password reset</h2>
<p><a href="{{BaseUrl}}/auth/reset?id={{Id}}&token={{Token}}">Choose a new password</a></p>
<p>If you did not request this, ignore this email.</p>
</body></html>"#,
    ),
    (
        ORG_INVITE_TEMPLATE,
        "You have been invited to an organization",
        r#"<html><body>
<h2>Organization invite</h2>
<p><a href="{{BaseUrl}}/org/invite/accept?id={{Id}}&token={{Token}}">Join the organization</a></p>
</body></html>"#,
    ),
];

#[derive(Debug, Clone)]
pub struct TemplateData {
    pub base_url: String,
    pub token: String,
    pub id: String,
}

#[derive(Debug, Clone)]
struct Template {
    subject: String,
    body: String,
}

#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<String, Template>,
}

impl TemplateSet {
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(|(name, subject, body)| {
                (
                    name.to_string(),
                    Template {
                        subject: subject.to_string(),
                        body: body.to_string(),
                    },
                )
            })
            .collect();
        Self { templates }
    }

    /// Built-in templates, each replaced by `<dir>/<name>` when that file exists.
    pub fn load(dir: Option<&str>) -> Result<Self, ServiceError> {
        let mut set = Self::builtin();
        let Some(dir) = dir else {
            return Ok(set);
        };

        for (name, template) in set.templates.iter_mut() {
            let path = Path::new(dir).join(name);
            if path.exists() {
                template.body = std::fs::read_to_string(&path).map_err(|e| {
                    ServiceError::Internal(anyhow::anyhow!(
                        "Failed to read template {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::info!(template = %name, "Loaded template override");
            }
        }
        Ok(set)
    }

    pub fn subject(&self, name: &str) -> Result<&str, ServiceError> {
        self.get(name).map(|t| t.subject.as_str())
    }

    pub fn render(&self, name: &str, data: &TemplateData) -> Result<String, ServiceError> {
        let template = self.get(name)?;
        Ok(template
            .body
            .replace("{{BaseUrl}}", &data.base_url)
            .replace("{{Token}}", &urlencoding::encode(&data.token))
            .replace("{{Id}}", &urlencoding::encode(&data.id)))
    }

    fn get(&self, name: &str) -> Result<&Template, ServiceError> {
        self.templates
            .get(name)
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Unknown template {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> TemplateData {
        TemplateData {
            base_url: "https://auth.example.com".to_string(),
            token: "tok en".to_string(),
            id: "42".to_string(),
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let html = TemplateSet::builtin().render(VERIFY_TEMPLATE, &data()).unwrap();
        assert!(html.contains("https://auth.example.com/auth/verify?id=42&token=tok%20en"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_unknown_template() {
        assert!(TemplateSet::builtin().render("nope.html", &data()).is_err());
    }

    #[test]
    fn test_directory_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FORGOT_TEMPLATE), "reset {{Id}} {{Token}}").unwrap();

        let set = TemplateSet::load(dir.path().to_str()).unwrap();
        assert_eq!(set.render(FORGOT_TEMPLATE, &data()).unwrap(), "reset 42 tok%20en");
        // untouched templates keep the built-in body
        assert!(set.render(INVITE_TEMPLATE, &data()).unwrap().contains("/auth/register"));
    }
}
