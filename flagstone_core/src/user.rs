use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user being evaluated against the spec catalog.
///
/// Every field except `user_id` is optional. `custom` and
/// `private_attributes` hold free-form JSON values; `private_attributes`
/// participate in evaluation but are stripped from anything the library
/// emits (client bootstrap payloads in particular).
///
/// # Examples
/// ```
/// # use flagstone_core::User;
/// let user = User {
///     user_id: Some("user-1".to_owned()),
///     email: Some("user-1@example.com".to_owned()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Primary identifier for the user.
    #[serde(rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Additional unit identifiers, keyed by ID type (e.g. `"companyID"`).
    #[serde(rename = "customIDs", skip_serializing_if = "Option::is_none")]
    pub custom_ids: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Free-form attributes consulted by `user_field` conditions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<HashMap<String, Value>>,
    /// Like `custom`, but never serialized out of the process.
    #[serde(skip_serializing, default)]
    pub private_attributes: Option<HashMap<String, Value>>,
    /// Environment the user is evaluated in, e.g. `{"tier": "staging"}`.
    #[serde(
        rename = "statsigEnvironment",
        skip_serializing_if = "Option::is_none"
    )]
    pub environment: Option<HashMap<String, String>>,
}

impl User {
    /// Create a user with only a `user_id` set.
    pub fn with_user_id(user_id: impl Into<String>) -> User {
        User {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// Resolve the unit ID for the given ID type. `"userID"` (in any casing)
    /// and an absent ID type resolve to `user_id`; anything else is looked up
    /// in `custom_ids` with a case-insensitive fallback.
    pub fn unit_id(&self, id_type: Option<&str>) -> Option<&str> {
        let id_type = match id_type {
            Some(t) if !t.eq_ignore_ascii_case("userid") => t,
            _ => return self.user_id.as_deref(),
        };
        let custom_ids = self.custom_ids.as_ref()?;
        if let Some(id) = custom_ids.get(id_type) {
            return Some(id);
        }
        custom_ids
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(id_type))
            .map(|(_, v)| v.as_str())
    }

    /// Look up a field for `ip_based` / `ua_based` / `user_field` conditions:
    /// well-known fields first (case-insensitively), then `custom`, then
    /// `private_attributes`.
    pub fn get_field(&self, field: &str) -> Option<Value> {
        let well_known = match field.to_lowercase().as_str() {
            "userid" | "user_id" => self.user_id.as_deref(),
            "email" => self.email.as_deref(),
            "ip" | "ip_address" => self.ip.as_deref(),
            "useragent" | "user_agent" => self.user_agent.as_deref(),
            "country" => self.country.as_deref(),
            "locale" => self.locale.as_deref(),
            "appversion" | "app_version" => self.app_version.as_deref(),
            _ => None,
        };
        if let Some(value) = well_known {
            return Some(Value::String(value.to_owned()));
        }

        if let Some(value) = lookup_ci(self.custom.as_ref(), field) {
            return Some(value);
        }
        lookup_ci(self.private_attributes.as_ref(), field)
    }

    /// Case-insensitive lookup in the user's environment map.
    pub fn get_environment_field(&self, field: &str) -> Option<String> {
        let environment = self.environment.as_ref()?;
        if let Some(value) = environment.get(field) {
            return Some(value.clone());
        }
        environment
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field))
            .map(|(_, v)| v.clone())
    }
}

fn lookup_ci(map: Option<&HashMap<String, Value>>, field: &str) -> Option<Value> {
    let map = map?;
    if let Some(value) = map.get(field) {
        return Some(value.clone());
    }
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(field))
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unit_id_defaults_to_user_id() {
        let user = User {
            user_id: Some("u1".to_owned()),
            custom_ids: Some(HashMap::from([("companyID".to_owned(), "c9".to_owned())])),
            ..Default::default()
        };
        assert_eq!(user.unit_id(None), Some("u1"));
        assert_eq!(user.unit_id(Some("userID")), Some("u1"));
        assert_eq!(user.unit_id(Some("USERID")), Some("u1"));
        assert_eq!(user.unit_id(Some("companyID")), Some("c9"));
        assert_eq!(user.unit_id(Some("companyid")), Some("c9"));
        assert_eq!(user.unit_id(Some("deviceID")), None);
    }

    #[test]
    fn field_lookup_falls_back_to_custom_then_private() {
        let user = User {
            user_id: Some("u1".to_owned()),
            email: Some("u1@example.com".to_owned()),
            custom: Some(HashMap::from([("Plan".to_owned(), json!("pro"))])),
            private_attributes: Some(HashMap::from([("secret".to_owned(), json!(7))])),
            ..Default::default()
        };
        assert_eq!(user.get_field("EMAIL"), Some(json!("u1@example.com")));
        assert_eq!(user.get_field("plan"), Some(json!("pro")));
        assert_eq!(user.get_field("secret"), Some(json!(7)));
        assert_eq!(user.get_field("missing"), None);
    }

    #[test]
    fn private_attributes_are_never_serialized() {
        let user = User {
            user_id: Some("u1".to_owned()),
            private_attributes: Some(HashMap::from([("ssn".to_owned(), json!("0-0-0"))])),
            ..Default::default()
        };
        let echoed = serde_json::to_value(&user).unwrap();
        assert_eq!(echoed, json!({"userID": "u1"}));
    }

    #[test]
    fn environment_lookup_is_case_insensitive() {
        let user = User {
            environment: Some(HashMap::from([("tier".to_owned(), "staging".to_owned())])),
            ..Default::default()
        };
        assert_eq!(user.get_environment_field("Tier").as_deref(), Some("staging"));
        assert_eq!(user.get_environment_field("region"), None);
    }
}
