//! Placeholder substitution for action titles, messages and webhook bodies.
//!
//! Substitution is literal replacement of a fixed token set in a single
//! left-to-right pass, so substituted values are never expanded again.
//! Unknown `{{tokens}}` are left verbatim.

/// Values available to action templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderContext {
    pub incident_number: String,
    pub incident_title: String,
    pub priority: String,
    pub severity: String,
    pub transition_name: String,
    pub from_state: String,
    pub to_state: String,
    pub performed_by: String,
    pub assignee: String,
    pub current_state: String,
}

impl PlaceholderContext {
    /// Token/value pairs.
    fn pairs(&self) -> [(&'static str, &str); 10] {
        [
            ("{{incident_number}}", &self.incident_number),
            ("{{incident_title}}", &self.incident_title),
            ("{{priority}}", &self.priority),
            ("{{severity}}", &self.severity),
            ("{{transition_name}}", &self.transition_name),
            ("{{from_state}}", &self.from_state),
            ("{{to_state}}", &self.to_state),
            ("{{performed_by}}", &self.performed_by),
            ("{{assignee}}", &self.assignee),
            ("{{current_state}}", &self.current_state),
        ]
    }

    /// Substitute every known token in `template`.
    pub fn render(&self, template: &str) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }
        let pairs = self.pairs();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            rest = &rest[start..];
            match pairs.iter().find(|(token, _)| rest.starts_with(token)) {
                Some((token, value)) => {
                    out.push_str(value);
                    rest = &rest[token.len()..];
                }
                None => {
                    // Step past one brace so "{{{token}}" still matches.
                    out.push('{');
                    rest = &rest[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Render every string leaf of a JSON template, keys untouched.
    pub fn render_json(&self, template: &serde_json::Value) -> serde_json::Value {
        match template {
            serde_json::Value::String(s) => serde_json::Value::String(self.render(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.render_json(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx() -> PlaceholderContext {
        PlaceholderContext {
            incident_number: "INC-000007".into(),
            incident_title: "VPN down".into(),
            priority: "2".into(),
            severity: "3".into(),
            transition_name: "Start work".into(),
            from_state: "Open".into(),
            to_state: "In Progress".into(),
            performed_by: "dana".into(),
            assignee: "lee".into(),
            current_state: "In Progress".into(),
        }
    }

    #[test]
    fn substitutes_all_known_tokens() {
        let out = ctx().render(
            "{{incident_number}} {{incident_title}} p{{priority}} s{{severity}} \
             {{transition_name}}: {{from_state}} -> {{to_state}} by {{performed_by}} \
             for {{assignee}} now {{current_state}}",
        );
        assert_eq!(
            out,
            "INC-000007 VPN down p2 s3 Start work: Open -> In Progress by dana \
             for lee now In Progress"
        );
    }

    #[test]
    fn unknown_tokens_are_left_verbatim() {
        assert_eq!(ctx().render("{{nope}} {{priority}}"), "{{nope}} 2");
    }

    #[test]
    fn repeated_tokens_are_all_replaced() {
        assert_eq!(ctx().render("{{priority}}/{{priority}}"), "2/2");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let mut ctx = ctx();
        ctx.incident_title = "literal {{priority}} in title".into();
        assert_eq!(
            ctx.render("{{incident_title}} at p{{priority}}"),
            "literal {{priority}} in title at p2"
        );
    }

    #[test]
    fn token_after_a_stray_brace_is_replaced() {
        assert_eq!(ctx().render("{{{priority}}}"), "{2}");
        assert_eq!(ctx().render("open {{ brace"), "open {{ brace");
    }

    #[test]
    fn json_string_leaves_are_rendered() {
        let body = json!({
            "text": "{{incident_number}} moved",
            "{{priority}}": 1,
            "tags": ["{{to_state}}", true]
        });
        let out = ctx().render_json(&body);
        assert_eq!(out["text"], "INC-000007 moved");
        assert_eq!(out["{{priority}}"], 1);
        assert_eq!(out["tags"][0], "In Progress");
        assert_eq!(out["tags"][1], true);
    }
}
