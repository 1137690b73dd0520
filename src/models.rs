use serde::{Deserialize, Deserializer, Serialize};

/// Body of `POST /api/update-sds`. The frontend sends camelCase keys.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSdsRequest {
    #[serde(deserialize_with = "coerce_product_id")]
    pub product_id: i64,
    pub pdf_url: String,
}

/// Body of `POST /api/debug-sds-parse`. This endpoint mirrors the backend's
/// own snake_case field names so payloads can be pasted back and forth.
#[derive(Debug, Deserialize)]
pub struct DebugParseRequest {
    #[serde(deserialize_with = "coerce_product_id")]
    pub product_id: i64,
    #[serde(default)]
    pub sds_url: Option<String>,
    #[serde(default)]
    pub force: Option<bool>,
}

/// Outbound body for `POST <backend>/parse-sds`.
#[derive(Debug, Serialize)]
pub struct ParsePayload {
    pub product_id: i64,
    pub sds_url: String,
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

/// Product identifiers arrive as a JSON number or a numeric string depending
/// on which UI form submitted them.
fn coerce_product_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Float(f) => Ok(f as i64),
        Raw::Text(s) => s.trim().parse::<i64>().map_err(|_| {
            serde::de::Error::custom(format!("product id is not an integer: {:?}", s))
        }),
    }
}
