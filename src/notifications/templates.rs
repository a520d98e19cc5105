//! Down/up alert email rendering.

use once_cell::sync::Lazy;
use tera::{Context, Tera};

use super::mailer::OutgoingEmail;
use crate::db::models::AlertType;
use crate::queue::AlertCandidate;

const DOWN_HTML: &str = r#"<h3>🚨 Upwatch Alert — Monitor DOWN</h3>
<p><strong>Monitor:</strong> {{ monitor_name }}</p>
<p><strong>URL:</strong> <a href="{{ url }}">{{ url }}</a></p>
<p><strong>Checked at:</strong> {{ checked_at }}</p>
<p><strong>Status:</strong> DOWN (statusCode: {{ status_code }})</p>
<hr/>
<p>This is an automated alert from Upwatch.</p>
"#;

const UP_HTML: &str = r#"<h3>✅ Upwatch — Monitor UP</h3>
<p><strong>Monitor:</strong> {{ monitor_name }}</p>
<p><strong>URL:</strong> <a href="{{ url }}">{{ url }}</a></p>
<p><strong>Checked at:</strong> {{ checked_at }}</p>
<p><strong>Status:</strong> UP</p>
<hr/>
<p>This is an automated message from Upwatch.</p>
"#;

static TEMPLATES: Lazy<Tera> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![("alert_down.html", DOWN_HTML), ("alert_up.html", UP_HTML)])
        .expect("built-in alert templates must parse");
    tera
});

pub fn render(
    monitor_name: &str,
    url: &str,
    candidate: &AlertCandidate,
) -> Result<OutgoingEmail, tera::Error> {
    let checked_at = candidate
        .result
        .checked_at
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();
    let status_code = candidate
        .result
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut context = Context::new();
    context.insert("monitor_name", monitor_name);
    context.insert("url", url);
    context.insert("checked_at", &checked_at);
    context.insert("status_code", &status_code);

    let (subject, template, text) = match candidate.alert_type {
        AlertType::Down => (
            format!("ALERT: {monitor_name} is DOWN"),
            "alert_down.html",
            format!(
                "ALERT: {monitor_name} is DOWN\nURL: {url}\nChecked at: {checked_at}\nStatusCode: {status_code}"
            ),
        ),
        AlertType::Up => (
            format!("RECOVERY: {monitor_name} is UP"),
            "alert_up.html",
            format!("RECOVERY: {monitor_name} is UP\nURL: {url}\nChecked at: {checked_at}"),
        ),
    };

    let html = TEMPLATES.render(template, &context)?;
    Ok(OutgoingEmail {
        subject,
        html,
        text,
    })
}
