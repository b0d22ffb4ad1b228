use serde_json::{Map, Value};

use crate::point::json_to_tag;
use crate::relay::DropReason;

#[derive(Debug, Clone)]
pub struct SensorReading {
    pub model: String,

    // Textual, so `49` and `"49"` compare equal
    pub id: Option<String>,

    pub time: Value,

    values: Map<String, Value>,
}

impl SensorReading {
    pub fn from_json(payload: &str) -> Result<Self, DropReason> {
        let Value::Object(values) = serde_json::from_str::<Value>(payload)? else {
            return Err(DropReason::NotAnObject);
        };

        let model = match values.get("model") {
            Some(Value::String(model)) => model.clone(),
            Some(_) => return Err(DropReason::InvalidModel),
            None => return Err(DropReason::MissingModel),
        };
        let id = values.get("id").and_then(json_to_tag);
        let time = values.get("time").cloned().ok_or(DropReason::MissingTime)?;

        Ok(Self {
            model,
            id,
            time,
            values,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}
