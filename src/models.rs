use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
}

/// The active authenticated identity and its bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: UserProfile,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_completed: bool,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Partial task update; absent fields are left untouched by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SignupRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Accepts ids sent either as JSON strings or numbers.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// RFC 3339 timestamps; naive ISO 8601 values are read as UTC.
pub mod timestamp {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::format_description::BorrowedFormatItem;
    use time::macros::format_description;
    use time::{OffsetDateTime, PrimitiveDateTime};

    const NAIVE: &[BorrowedFormatItem<'static>] = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );

    pub fn parse(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).or_else(|err| {
            PrimitiveDateTime::parse(value, NAIVE)
                .map(PrimitiveDateTime::assume_utc)
                .map_err(|_| err)
        })
    }

    pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(text) => parse(&text).map(Some).map_err(de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn user_id_may_be_numeric() {
        let user: UserProfile = serde_json::from_value(json!({
            "id": 42,
            "email": "a@example.com",
            "created_at": "2024-03-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.name, None);
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let user: UserProfile = serde_json::from_value(json!({
            "id": "u-1",
            "email": "a@example.com",
            "created_at": "2024-03-01T10:00:00.250000",
        }))
        .unwrap();
        assert_eq!(user.created_at, datetime!(2024-03-01 10:00:00.25 UTC));
    }

    #[test]
    fn task_without_updated_at() {
        let task: Task = serde_json::from_value(json!({
            "id": "7d6f3c1e-8a4b-4a53-9a55-2b1d4f0c9e11",
            "title": "Buy milk",
            "is_completed": false,
            "created_at": "2024-03-01T10:00:00+00:00",
        }))
        .unwrap();
        assert_eq!(task.title, "Buy milk");
        assert!(task.updated_at.is_none());
        assert!(task.description.is_none());
    }

    #[test]
    fn task_update_serializes_only_set_fields() {
        let update = TaskUpdate {
            is_completed: Some(true),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "is_completed": true })
        );
    }

    #[test]
    fn signup_omits_missing_name() {
        let body = SignupRequest {
            email: "a@example.com",
            password: "pw123456",
            name: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "email": "a@example.com", "password": "pw123456" })
        );
    }
}
