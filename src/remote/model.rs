use chrono::{DateTime, Utc};
use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Article record as returned by the remote API.
///
/// Decoding never fails on individual fields: anything missing or of the
/// wrong shape falls back to an empty string or `None`. Only a payload that
/// is not a JSON object is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteArticle {
    pub id: i64,
    pub title: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author_name: String,
    pub body_markdown: Option<String>,
    pub body_html: Option<String>,
}

/// Element of a list page.
pub type ArticleSummary = RemoteArticle;
/// Single-article payload.
pub type ArticleDetail = RemoteArticle;

impl RemoteArticle {
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            id: obj.get("id").and_then(Value::as_i64).unwrap_or(0),
            title: string_field(obj, "title"),
            summary: string_field(obj, "description"),
            published_at: obj
                .get("published_at")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            author_name: obj
                .get("user")
                .and_then(Value::as_object)
                .map(|user| string_field(user, "name"))
                .unwrap_or_default(),
            body_markdown: optional_string(obj, "body_markdown"),
            body_html: optional_string(obj, "body_html"),
        }
    }

    /// Records without a numeric id decode with id 0 and cannot be cached.
    pub fn has_id(&self) -> bool {
        self.id > 0
    }

    /// Markdown body if present, then HTML, else empty.
    pub fn preferred_content(&self) -> String {
        [&self.body_markdown, &self.body_html]
            .into_iter()
            .flatten()
            .find(|body| !body.is_empty())
            .cloned()
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for RemoteArticle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Object(obj) => Ok(RemoteArticle::from_object(&obj)),
            other => Err(D::Error::custom(format!(
                "expected article object, found {}",
                kind_of(&other)
            ))),
        }
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    optional_string(obj, key).unwrap_or_default()
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn decodes_full_payload() {
        let dto: RemoteArticle = serde_json::from_value(json!({
            "id": 77,
            "title": "Realm on iOS",
            "description": "A short intro",
            "published_at": "2024-03-01T10:00:00Z",
            "user": { "name": "Ana", "username": "ana" },
            "body_markdown": "# Hello",
            "body_html": "<h1>Hello</h1>"
        }))
        .unwrap();
        assert_eq!(dto.id, 77);
        assert_eq!(dto.summary, "A short intro");
        assert_eq!(dto.author_name, "Ana");
        assert_eq!(
            dto.published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(dto.preferred_content(), "# Hello");
    }

    #[test]
    fn malformed_fields_fall_back() {
        let dto: RemoteArticle = serde_json::from_value(json!({
            "id": "not-a-number",
            "title": 12,
            "published_at": "yesterday",
            "user": "ana",
            "body_markdown": null
        }))
        .unwrap();
        assert_eq!(dto, RemoteArticle::default());
    }

    #[test]
    fn preferred_content_skips_empty_markdown() {
        let dto = RemoteArticle {
            body_markdown: Some(String::new()),
            body_html: Some("<p>only html</p>".into()),
            ..Default::default()
        };
        assert_eq!(dto.preferred_content(), "<p>only html</p>");

        let dto = RemoteArticle {
            body_markdown: Some(String::new()),
            body_html: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(dto.preferred_content(), "");
    }

    #[test]
    fn non_object_is_rejected() {
        let res: Result<Vec<RemoteArticle>, _> = serde_json::from_value(json!([{"id": 1}, 5]));
        let err = res.unwrap_err().to_string();
        assert!(err.contains("found number"), "{err}");
    }
}
