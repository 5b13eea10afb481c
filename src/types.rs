use std::collections::BTreeMap;

use opentelemetry_proto::tonic::common::v1::any_value::Value;

/// Seconds, same unit as the timestamps of the input spans.
pub type TimePoint = f64;

/// Attribute value as it comes out of an OTLP export.
pub type AttributeValue = Value;

pub fn time_point_from_unix_nano(unix_nano: u64) -> TimePoint {
    unix_nano as f64 / 1_000_000_000.0
}

pub fn time_point_to_utc_string(time: TimePoint) -> String {
    let date_time = chrono::DateTime::from_timestamp_nanos((time * 1e9) as i64);
    date_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// One timed unit of work, as reported by the tracing backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub span_id: String,
    pub trace_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub payload: SpanPayload,
}

impl Interval {
    pub fn new(span_id: impl Into<String>, start_time: TimePoint, end_time: TimePoint) -> Interval {
        Interval {
            span_id: span_id.into(),
            trace_id: None,
            parent_span_id: None,
            start_time,
            end_time,
            payload: SpanPayload::default(),
        }
    }

    /// An empty parent id means "no parent".
    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Interval {
        let parent_span_id = parent_span_id.into();
        self.parent_span_id = if parent_span_id.is_empty() {
            None
        } else {
            Some(parent_span_id)
        };
        self
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Interval {
        self.payload.op = Some(op.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Interval {
        self.payload.description = Some(description.into());
        self
    }

    pub fn duration(&self) -> TimePoint {
        self.end_time - self.start_time
    }

    /// The tree builder assumes this holds for every input interval.
    pub fn is_well_formed(&self) -> bool {
        self.start_time.is_finite() && self.end_time.is_finite() && self.end_time >= self.start_time
    }

    /// Short human readable label, `op - description` when both are known.
    pub fn label(&self) -> String {
        match (&self.payload.op, &self.payload.description) {
            (Some(op), Some(description)) => format!("{} - {}", op, description),
            (Some(op), None) => op.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => self.span_id.clone(),
        }
    }
}

/// Data attached to a span. Keys that the tree code knows about get their own field,
/// everything else ends up in `extra`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanPayload {
    pub op: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub origin: Option<String>,
    pub extra: BTreeMap<String, Option<AttributeValue>>,
}

/// Attribute keys that are lifted out of `extra` into the typed payload fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownKey {
    Op,
    Description,
    Status,
    Origin,
}

impl KnownKey {
    pub fn from_attribute_name(name: &str) -> Option<KnownKey> {
        match name {
            "op" | "span.op" | "sentry.op" => Some(KnownKey::Op),
            "description" | "span.description" => Some(KnownKey::Description),
            "status" | "span.status" => Some(KnownKey::Status),
            "origin" | "sentry.origin" => Some(KnownKey::Origin),
            _ => None,
        }
    }
}

impl SpanPayload {
    pub fn from_attributes(
        attributes: impl IntoIterator<Item = (String, Option<AttributeValue>)>,
    ) -> SpanPayload {
        let mut payload = SpanPayload::default();
        for (key, value) in attributes {
            let Some(known_key) = KnownKey::from_attribute_name(&key) else {
                payload.extra.insert(key, value);
                continue;
            };
            let text = Some(value_to_text(&value));
            match known_key {
                KnownKey::Op => payload.op = text,
                KnownKey::Description => payload.description = text,
                KnownKey::Status => payload.status = text,
                KnownKey::Origin => payload.origin = text,
            }
        }
        payload
    }
}

pub fn value_to_text(value_opt: &Option<AttributeValue>) -> String {
    let Some(value) = value_opt else {
        return "empty".to_string();
    };

    match value {
        Value::StringValue(s) => s.clone(),
        Value::BoolValue(b) => b.to_string(),
        Value::IntValue(i) => i.to_string(),
        Value::DoubleValue(d) => d.to_string(),
        Value::ArrayValue(a) => format!(
            "[{}]",
            a.values
                .iter()
                .map(|v| value_to_text(&v.value))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::KvlistValue(kv) => format!(
            "{{{}}}",
            kv.values
                .iter()
                .map(|v| format!(
                    "{}: {}",
                    v.key,
                    value_to_text(match &v.value {
                        Some(opt) => &opt.value,
                        None => &None,
                    })
                ))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::BytesValue(b) => hex::encode(b),
    }
}

pub fn stringify_interval(interval: &Interval) -> String {
    let mut s = format!(
        "Interval {{ span_id: {}, parent_span_id: {}, start_time: {}, end_time: {}, label: {}",
        interval.span_id,
        interval.parent_span_id.as_deref().unwrap_or("-"),
        time_point_to_utc_string(interval.start_time),
        time_point_to_utc_string(interval.end_time),
        interval.label(),
    );
    if let Some(status) = &interval.payload.status {
        s.push_str(&format!(", status: {}", status));
    }
    for (key, value) in &interval.payload.extra {
        s.push_str(&format!(", {} = {}", key, value_to_text(value)));
    }
    s.push_str(" }");
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_splits_known_keys() {
        let payload = SpanPayload::from_attributes(vec![
            (
                "sentry.op".to_string(),
                Some(Value::StringValue("db".to_string())),
            ),
            ("thread.id".to_string(), Some(Value::IntValue(7))),
        ]);
        assert_eq!(payload.op.as_deref(), Some("db"));
        assert_eq!(payload.extra.len(), 1);
        assert_eq!(value_to_text(&payload.extra["thread.id"]), "7");
    }

    #[test]
    fn empty_parent_is_none() {
        let interval = Interval::new("a", 0.0, 1.0).with_parent("");
        assert_eq!(interval.parent_span_id, None);
        assert!(interval.is_well_formed());
        assert!(!Interval::new("b", 1.0, 0.5).is_well_formed());
    }
}
