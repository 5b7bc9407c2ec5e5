// SPDX-License-Identifier: Apache-2.0

//! Optional per-line JSON decoding.
//!
//! Parsed fields land under the `json` key. When `message_key` is set, the
//! value at that key replaces the line content; otherwise the content is
//! emptied and the decoded object is all that remains. Decode problems are
//! reported under `json.error` when `add_error_key` is on.

use serde_json::{Map, Value};
use tracing::debug;

use crate::tail::config::JsonConfig;
use crate::tail::error::ReadError;
use crate::tail::reader::{Message, Reader};

pub struct JsonReader {
    reader: Box<dyn Reader>,
    config: JsonConfig,
}

impl JsonReader {
    pub fn new(reader: Box<dyn Reader>, config: JsonConfig) -> Self {
        Self { reader, config }
    }

    fn decode(&self, text: Vec<u8>) -> (Vec<u8>, Option<Map<String, Value>>) {
        let mut fields: Map<String, Value> = match serde_json::from_slice(&text) {
            Ok(fields) => fields,
            Err(e) => {
                debug!(error = %e, "error decoding json");
                if self.config.add_error_key {
                    let mut fields = Map::new();
                    fields.insert(
                        "error".to_string(),
                        json_error(format!("Error decoding JSON: {}", e)),
                    );
                    return (text, Some(fields));
                }
                return (text, None);
            }
        };

        if self.config.message_key.is_empty() {
            return (Vec::new(), Some(fields));
        }

        let content = match fields.get(&self.config.message_key) {
            Some(Value::String(s)) => s.clone().into_bytes(),
            Some(_) => {
                if self.config.add_error_key {
                    fields.insert(
                        "error".to_string(),
                        json_error(format!(
                            "Value of key '{}' is not a string",
                            self.config.message_key
                        )),
                    );
                }
                Vec::new()
            }
            None => {
                if self.config.add_error_key {
                    fields.insert(
                        "error".to_string(),
                        json_error(format!("Key '{}' not found", self.config.message_key)),
                    );
                }
                Vec::new()
            }
        };

        (content, Some(fields))
    }
}

impl Reader for JsonReader {
    fn next(&mut self) -> Result<Message, ReadError> {
        let mut message = self.reader.next()?;

        let (content, fields) = self.decode(std::mem::take(&mut message.content));
        message.content = content;
        if let Some(fields) = fields {
            let mut wrapped = Map::new();
            wrapped.insert("json".to_string(), Value::Object(fields));
            message.add_fields(wrapped);
        }

        Ok(message)
    }
}

fn json_error(message: String) -> Value {
    let mut detail = Map::new();
    detail.insert("message".to_string(), Value::String(message));
    detail.insert("type".to_string(), Value::String("json".to_string()));
    Value::Object(detail)
}
