//! Message text for transition notifications

use tera::{Context, Tera};

use super::NotifyError;
use crate::model::{Monitor, MonitorStatus, TransitionEvent};

const EMAIL_SUBJECT: &str =
    "Monitor {{ name }} is {% if status == \"up\" %}back up{% else %}{{ status }}{% endif %}";

const EMAIL_BODY: &str = r#"<html>
<body>
  <h2>{{ name }} is {{ status | upper }}</h2>
  <table>
    <tr><td>Target</td><td>{{ target }}</td></tr>
    <tr><td>Previous status</td><td>{{ previous }}</td></tr>
    <tr><td>Time</td><td>{{ timestamp }}</td></tr>
    {% if reason %}<tr><td>Reason</td><td>{{ reason }}</td></tr>{% endif %}
    <tr><td>Details</td><td>{{ message }}</td></tr>
  </table>
</body>
</html>"#;

const PUSH_BODY: &str = "{{ name }} ({{ target }}) is {{ status }} since {{ timestamp }}\
{% if reason %} [{{ reason }}]{% endif %}: {{ message }}";

fn context(event: &TransitionEvent, monitor: &Monitor) -> Context {
    let mut context = Context::new();
    context.insert("name", &monitor.name);
    context.insert("target", &monitor.target);
    context.insert("status", &event.current.to_string());
    context.insert("previous", &event.previous.to_string());
    context.insert("timestamp", &event.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    context.insert("reason", &event.outcome.reason.map(|r| r.to_string()));
    context.insert("message", &event.outcome.message);
    context
}

fn render(template: &str, context: &Context, autoescape: bool) -> Result<String, NotifyError> {
    Tera::one_off(template, context, autoescape).map_err(|e| NotifyError::Template(e.to_string()))
}

/// Subject and HTML body of a transition email
pub fn email(event: &TransitionEvent, monitor: &Monitor) -> Result<(String, String), NotifyError> {
    let context = context(event, monitor);
    Ok((
        render(EMAIL_SUBJECT, &context, false)?,
        render(EMAIL_BODY, &context, true)?,
    ))
}

/// Title and plain-text body of a push message
pub fn push(event: &TransitionEvent, monitor: &Monitor) -> Result<(String, String), NotifyError> {
    let title = match event.current {
        MonitorStatus::Up => format!("{} is up", monitor.name),
        MonitorStatus::Down => format!("{} is down", monitor.name),
        MonitorStatus::Pending => format!("{} is pending", monitor.name),
    };
    Ok((title, render(PUSH_BODY, &context(event, monitor), false)?))
}
