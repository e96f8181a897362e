//! Bare HTML forms for the browser flows.

use axum::response::Html;

use crate::models::Principal;
use crate::utils::{cookies::NoticeKind, Notification};

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, notice: Option<&Notification>, body: &str) -> Html<String> {
    let notice = notice
        .map(|n| {
            let class = match n.kind {
                NoticeKind::Success => "success",
                NoticeKind::Error => "error",
            };
            format!(r#"<p class="{}">{}</p>"#, class, escape(&n.message))
        })
        .unwrap_or_default();

    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1>{notice}{body}</body></html>",
        title = escape(title),
        notice = notice,
        body = body
    ))
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        r#"<input type="hidden" name="{}" value="{}">"#,
        name,
        escape(value)
    )
}

pub fn home(principal: Option<&Principal>, notice: Option<&Notification>) -> Html<String> {
    let body = match principal {
        Some(p) => format!(
            r#"<p>Signed in as {} &lt;{}&gt;</p><p><a href="/auth/logout">Sign out</a></p>"#,
            escape(&p.name),
            escape(&p.email)
        ),
        None => r#"<p><a href="/auth/login">Sign in</a></p>"#.to_string(),
    };
    layout("Account", notice, &body)
}

pub fn login(notice: Option<&Notification>) -> Html<String> {
    layout(
        "Sign in",
        notice,
        r#"<form method="post" action="/auth/login">
<input type="email" name="email" placeholder="Email" required>
<input type="password" name="password" placeholder="Password" required>
<button type="submit">Sign in</button>
</form>
<p><a href="/auth/forgot">Forgot password?</a></p>"#,
    )
}

pub fn register(invite_id: &str, invite_token: &str, notice: Option<&Notification>) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="/auth/register">{}{}
<input type="text" name="name" placeholder="Name" required>
<input type="email" name="email" placeholder="Email" required>
<input type="password" name="password" placeholder="Password" required>
<input type="password" name="confirm_password" placeholder="Confirm password" required>
<button type="submit">Create account</button>
</form>"#,
        hidden("invite_id", invite_id),
        hidden("invite_token", invite_token)
    );
    layout("Create account", notice, &body)
}

pub fn forgot(notice: Option<&Notification>) -> Html<String> {
    layout(
        "Reset password",
        notice,
        r#"<form method="post" action="/auth/forgot">
<input type="email" name="email" placeholder="Email" required>
<button type="submit">Send reset link</button>
</form>"#,
    )
}

pub fn reset(id: &str, token: &str, notice: Option<&Notification>) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="/auth/reset">{}{}
<input type="password" name="password" placeholder="New password" required>
<input type="password" name="confirm_password" placeholder="Confirm password" required>
<button type="submit">Change password</button>
</form>"#,
        hidden("id", id),
        hidden("token", token)
    );
    layout("Choose a new password", notice, &body)
}
