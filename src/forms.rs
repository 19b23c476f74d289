//! Declared field rules for the HTML forms and their validation.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

/// Per-field messages, keyed by field name. `_form` holds form-level ones.
pub type FormErrors = BTreeMap<String, Vec<String>>;

pub const FORM_LEVEL: &str = "_form";

#[derive(Debug, Clone, Copy)]
pub enum Rule {
    /// Present and not blank.
    Required,
    /// Same value as another field of the form.
    EqualTo(&'static str),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub label: &'static str,
    /// Secret fields are never echoed back into a re-rendered form.
    pub secret: bool,
    pub rules: Vec<Rule>,
}

impl Field {
    fn new(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            label,
            secret: false,
            rules: vec![Rule::Required],
        }
    }

    fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    fn equal_to(mut self, other: &'static str) -> Self {
        self.rules.push(Rule::EqualTo(other));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Form {
    pub fields: Vec<Field>,
}

impl Form {
    pub fn validate(&self, data: &HashMap<String, String>) -> Result<(), FormErrors> {
        let mut errors = FormErrors::new();
        for field in &self.fields {
            let value = data.get(field.name).map(String::as_str).unwrap_or_default();
            for rule in &field.rules {
                let message = match rule {
                    Rule::Required if value.trim().is_empty() => {
                        format!("{} : this field is required", field.label)
                    }
                    Rule::EqualTo(other) if data.get(*other).map(String::as_str) != Some(value) => {
                        format!("{} do not match", field.label)
                    }
                    _ => continue,
                };
                errors.entry(field.name.to_string()).or_default().push(message);
                // one message per field is enough
                break;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Value of a field, empty when absent. Secret fields come back exactly
    /// as submitted; the others are trimmed.
    pub fn value<'d>(&self, data: &'d HashMap<String, String>, name: &str) -> &'d str {
        let raw = data.get(name).map(String::as_str).unwrap_or_default();
        if self.fields.iter().any(|f| f.name == name && f.secret) {
            raw
        } else {
            raw.trim()
        }
    }

    /// Submitted values to pre-fill a re-rendered form with.
    pub fn echo(&self, data: &HashMap<String, String>) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .filter(|f| !f.secret)
            .map(|f| {
                let value = data.get(f.name).cloned().unwrap_or_default();
                (f.name.to_string(), Value::String(value))
            })
            .collect();
        Value::Object(map)
    }
}

pub fn add_error(errors: &mut FormErrors, field: &str, message: impl Into<String>) {
    errors.entry(field.to_string()).or_default().push(message.into());
}

pub fn registration_form() -> Form {
    Form {
        fields: vec![
            Field::new("username", "Username"),
            Field::new("password", "Password").secret(),
            Field::new("password_", "Passwords").secret().equal_to("password"),
        ],
    }
}

pub fn login_form() -> Form {
    Form {
        fields: vec![
            Field::new("username", "Username"),
            Field::new("password", "Password").secret(),
        ],
    }
}

pub fn question_form() -> Form {
    Form {
        fields: vec![Field::new("title", "Title"), Field::new("content", "Content")],
    }
}

pub fn answer_form() -> Form {
    Form {
        fields: vec![Field::new("content", "Content")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn complete_registration_is_valid() {
        let form = registration_form();
        let submitted = data(&[("username", "alice"), ("password", "pw1"), ("password_", "pw1")]);
        assert!(form.validate(&submitted).is_ok());
    }

    #[test]
    fn missing_and_blank_fields_are_required() {
        let form = question_form();
        let errors = form.validate(&data(&[("title", "   ")])).unwrap_err();
        assert_eq!(errors["title"], vec!["Title : this field is required"]);
        assert_eq!(errors["content"], vec!["Content : this field is required"]);
    }

    #[test]
    fn mismatched_passwords_are_reported_once() {
        let form = registration_form();
        let errors = form
            .validate(&data(&[("username", "alice"), ("password", "pw1"), ("password_", "pw2")]))
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["password_"], vec!["Passwords do not match"]);
    }

    #[test]
    fn echo_leaves_out_secrets() {
        let form = login_form();
        let echoed = form.echo(&data(&[("username", "alice"), ("password", "pw1")]));
        assert_eq!(echoed, serde_json::json!({ "username": "alice" }));
    }

    #[test]
    fn value_is_trimmed() {
        let form = answer_form();
        assert_eq!(form.value(&data(&[("content", "  A1 ")]), "content"), "A1");
        assert_eq!(form.value(&data(&[]), "content"), "");
    }

    #[test]
    fn secret_values_keep_their_spaces() {
        let form = login_form();
        let submitted = data(&[("username", " alice "), ("password", " pw1 ")]);
        assert_eq!(form.value(&submitted, "username"), "alice");
        assert_eq!(form.value(&submitted, "password"), " pw1 ");
    }
}
