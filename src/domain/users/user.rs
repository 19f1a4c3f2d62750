use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserValidationError {
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("A password is required")]
    MissingPassword,
    #[error("'{0}' is not a valid id")]
    InvalidId(String),
    #[error("'{0}' is not a valid date of birth")]
    InvalidDate(String),
    #[error("Invalid value for '{0}'")]
    InvalidField(String),
    #[error("Unsupported update operator '{0}'")]
    UnsupportedOperator(String),
    #[error("Updating the path 'hobbies' would create a conflict")]
    ConflictingHobbies,
}

/// A stored user. `password` always holds a hash once persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub password: String,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub hobbies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn from_data(data: UserData, now: DateTime<Utc>) -> Self {
        Self {
            id: data.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            email: data.email,
            password: data.password,
            date_of_birth: data.date_of_birth,
            hobbies: data.hobbies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces every mutable field, keeping identity and creation time.
    pub fn replace(&mut self, data: UserData, now: DateTime<Utc>) {
        self.email = data.email;
        self.password = data.password;
        self.date_of_birth = data.date_of_birth;
        self.hobbies = data.hobbies;
        self.updated_at = now;
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Payload of `create` and `update`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, deserialize_with = "deserialize_date")]
    pub date_of_birth: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hobbies: Vec<String>,
}

impl UserData {
    pub fn validate(&self) -> Result<(), UserValidationError> {
        if let Some(id) = &self.id {
            if id.trim().is_empty() || id.len() > 128 {
                return Err(UserValidationError::InvalidId(id.clone()));
            }
        }
        validate_email(&self.email)?;
        if self.password.is_empty() {
            return Err(UserValidationError::MissingPassword);
        }
        Ok(())
    }
}

/// Partial update, including `$push` / `$pull` on hobbies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub email: Option<String>,
    pub password: Option<String>,
    pub date_of_birth: Option<Option<DateTime<Utc>>>,
    pub hobbies: Option<Vec<String>>,
    pub push_hobbies: Vec<String>,
    pub pull_hobbies: Vec<String>,
}

impl UserPatch {
    pub fn from_json(value: &Value) -> Result<Self, UserValidationError> {
        let obj = value
            .as_object()
            .ok_or_else(|| UserValidationError::InvalidField("data".into()))?;
        let mut patch = UserPatch::default();
        for (key, value) in obj {
            match key.as_str() {
                "email" => {
                    let email = string_field(key, value)?;
                    validate_email(&email)?;
                    patch.email = Some(email);
                }
                "password" => {
                    let password = string_field(key, value)?;
                    if password.is_empty() {
                        return Err(UserValidationError::MissingPassword);
                    }
                    patch.password = Some(password);
                }
                "dateOfBirth" => {
                    patch.date_of_birth = Some(match value {
                        Value::Null => None,
                        Value::String(s) => Some(
                            parse_date(s).ok_or_else(|| UserValidationError::InvalidDate(s.clone()))?,
                        ),
                        _ => return Err(UserValidationError::InvalidField(key.clone())),
                    });
                }
                "hobbies" => patch.hobbies = Some(string_list(key, value)?),
                "$push" => patch.push_hobbies = hobby_operand(value, "$each")?,
                "$pull" => patch.pull_hobbies = hobby_operand(value, "$in")?,
                op if op.starts_with('$') => {
                    return Err(UserValidationError::UnsupportedOperator(op.to_string()));
                }
                // identity and timestamps are not patchable; unknown fields are ignored
                _ => {}
            }
        }
        if patch.hobbies.is_some() && (!patch.push_hobbies.is_empty() || !patch.pull_hobbies.is_empty())
        {
            return Err(UserValidationError::ConflictingHobbies);
        }
        Ok(patch)
    }

    pub fn apply(&self, user: &mut User, now: DateTime<Utc>) {
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(password) = &self.password {
            user.password = password.clone();
        }
        if let Some(dob) = self.date_of_birth {
            user.date_of_birth = dob;
        }
        if let Some(hobbies) = &self.hobbies {
            user.hobbies = hobbies.clone();
        }
        user.hobbies.extend(self.push_hobbies.iter().cloned());
        if !self.pull_hobbies.is_empty() {
            user.hobbies.retain(|h| !self.pull_hobbies.contains(h));
        }
        user.updated_at = now;
    }
}

fn validate_email(email: &str) -> Result<(), UserValidationError> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(UserValidationError::InvalidEmail(email.to_string()))
    }
}

fn string_field(key: &str, value: &Value) -> Result<String, UserValidationError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| UserValidationError::InvalidField(key.to_string()))
}

fn string_list(key: &str, value: &Value) -> Result<Vec<String>, UserValidationError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items.iter().map(|v| string_field(key, v)).collect(),
        _ => Err(UserValidationError::InvalidField(key.to_string())),
    }
}

/// `{ hobbies: "x" }` or `{ hobbies: { <modifier>: [..] } }`
fn hobby_operand(value: &Value, modifier: &str) -> Result<Vec<String>, UserValidationError> {
    let fields: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| UserValidationError::InvalidField("hobbies".into()))?;
    let mut out = Vec::new();
    for (field, operand) in fields {
        if field != "hobbies" {
            return Err(UserValidationError::InvalidField(field.clone()));
        }
        match operand {
            Value::Object(inner) => {
                for (op, list) in inner {
                    if op != modifier {
                        return Err(UserValidationError::UnsupportedOperator(op.clone()));
                    }
                    out.extend(string_list(field, list)?);
                }
            }
            other => out.extend(string_list(field, other)?),
        }
    }
    Ok(out)
}

/// Accepts RFC 3339 timestamps, `YYYY-MM-DD` and `MM/DD/YYYY` dates.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("'{s}' is not a valid date of birth"))),
    }
}
