use crate::errors::{AppError, AppResult};
use crate::models::{ChatMessage, Role};

pub fn load_template(name: &str) -> AppResult<String> {
    std::fs::read_to_string(format!("templates/{}", name)).map_err(|e| {
        tracing::error!("Failed to read template {}: {}", name, e);
        AppError::File(e)
    })
}

/// Fills `{{name}}` placeholders in a single pass. Inserted values are never
/// rescanned, so user text that looks like a placeholder stays literal.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut filled = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        filled.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            filled.push_str(&rest[start..]);
            return filled;
        };

        let name = &after[..end];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => filled.push_str(value),
            None => filled.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }

    filled.push_str(rest);
    filled
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_message(role: Role, content: &str) -> String {
    let (class, avatar) = match role {
        Role::User => ("user", "👨"),
        Role::Assistant => ("assistant", "🤖"),
    };
    format!(
        r#"<div class="chat-message {}"><span class="avatar">{}</span><div class="content">{}</div></div>"#,
        class,
        avatar,
        escape_html(content)
    )
}

pub fn render_history(username: &str, history: &[ChatMessage]) -> String {
    let greeting = format!("Hello! How can I help you today, {}?", username);
    std::iter::once(render_message(Role::Assistant, &greeting))
        .chain(history.iter().map(|m| render_message(m.role, &m.content)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_template_does_not_rescan_inserted_values() {
        let html = fill_template(
            "<title>{{username}}</title><p>{{messages}}</p><b>{{limit}}</b>",
            &[
                ("username", "{{messages}}"),
                ("messages", "my limit is {{limit}}"),
                ("limit", "3000"),
            ],
        );
        assert_eq!(
            html,
            "<title>{{messages}}</title><p>my limit is {{limit}}</p><b>3000</b>"
        );
    }

    #[test]
    fn test_fill_template_keeps_unknown_and_unclosed_placeholders() {
        assert_eq!(fill_template("a {{other}} b", &[("x", "1")]), "a {{other}} b");
        assert_eq!(fill_template("{{x}} {{x", &[("x", "1")]), "1 {{x");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>alert("x & 'y'")</script>"#),
            "&lt;script&gt;alert(&quot;x &amp; &#39;y&#39;&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_history_starts_with_greeting_and_escapes_content() {
        let html = render_history(
            "alice",
            &[ChatMessage::user("<b>hi</b>"), ChatMessage::assistant("hello")],
        );
        let lines: Vec<&str> = html.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("How can I help you today, alice?"));
        assert!(lines[1].contains("chat-message user"));
        assert!(lines[1].contains("&lt;b&gt;hi&lt;/b&gt;"));
        assert!(lines[2].contains("chat-message assistant"));
    }
}
