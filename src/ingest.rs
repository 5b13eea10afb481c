//! Loading spans from OTLP trace exports (JSON, optionally gzip compressed).

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use tracing::{info, warn};

use crate::task_timer::TaskTimer;
use crate::types::{time_point_from_unix_nano, AttributeValue, Interval, SpanPayload};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn read_trace_file(path: &Path) -> Result<Vec<ExportTraceServiceRequest>> {
    let mut file_bytes = Vec::new();
    std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .read_to_end(&mut file_bytes)?;
    parse_trace_file(&file_bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Accepts either a JSON array of export requests or a single request.
pub fn parse_trace_file(file_bytes: &[u8]) -> Result<Vec<ExportTraceServiceRequest>> {
    let t = TaskTimer::new("Parsing trace file");

    let decompressed;
    let json_bytes = if file_bytes.starts_with(&GZIP_MAGIC) {
        let mut buffer = Vec::new();
        flate2::read::GzDecoder::new(file_bytes)
            .read_to_end(&mut buffer)
            .context("Failed to decompress gzip trace file")?;
        decompressed = buffer;
        decompressed.as_slice()
    } else {
        file_bytes
    };

    let file_str =
        std::str::from_utf8(json_bytes).map_err(|e| anyhow::anyhow!("File is not UTF8!: {}", e))?;
    let traces = match serde_json::from_str::<Vec<ExportTraceServiceRequest>>(file_str) {
        Ok(traces) => traces,
        Err(array_err) => {
            let single: ExportTraceServiceRequest = serde_json::from_str(file_str)
                .map_err(|_| array_err)
                .context("Trace file is neither a list of export requests nor a single one")?;
            vec![single]
        }
    };

    t.stop();
    Ok(traces)
}

/// Convert all spans in the export to intervals. Spans that end before they start are dropped.
pub fn extract_intervals(requests: &[ExportTraceServiceRequest]) -> Vec<Interval> {
    let t = TaskTimer::new("Extracting intervals");

    let mut intervals = Vec::new();
    let mut malformed = 0;
    for request in requests {
        for rs in &request.resource_spans {
            let service_name = rs.resource.as_ref().and_then(|resource| {
                resource
                    .attributes
                    .iter()
                    .find(|attribute| attribute.key == "service.name")
                    .and_then(attribute_value)
            });

            for ss in &rs.scope_spans {
                for span in &ss.spans {
                    let mut payload = SpanPayload::from_attributes(
                        span.attributes
                            .iter()
                            .map(|attribute| (attribute.key.clone(), attribute_value(attribute))),
                    );
                    if payload.description.is_none() {
                        payload.description = Some(span.name.clone());
                    }
                    if let Some(service_name) = &service_name {
                        payload
                            .extra
                            .insert("service.name".to_string(), Some(service_name.clone()));
                    }

                    let interval = Interval {
                        span_id: hex::encode(&span.span_id),
                        trace_id: Some(hex::encode(&span.trace_id)),
                        parent_span_id: if span.parent_span_id.is_empty() {
                            None
                        } else {
                            Some(hex::encode(&span.parent_span_id))
                        },
                        start_time: time_point_from_unix_nano(span.start_time_unix_nano),
                        end_time: time_point_from_unix_nano(span.end_time_unix_nano),
                        payload,
                    };

                    if !interval.is_well_formed() {
                        warn!(
                            "Dropping span {} ({}): ends before it starts",
                            interval.span_id, span.name
                        );
                        malformed += 1;
                        continue;
                    }
                    intervals.push(interval);
                }
            }
        }
    }

    info!(
        "Extracted {} spans, dropped {} malformed ones",
        intervals.len(),
        malformed
    );
    t.stop();
    intervals
}

fn attribute_value(attribute: &KeyValue) -> Option<AttributeValue> {
    attribute.value.clone().and_then(|v| v.value)
}

/// Group intervals by trace id. Intervals without a trace id are grouped under an empty string.
pub fn intervals_by_trace(intervals: Vec<Interval>) -> BTreeMap<String, Vec<Interval>> {
    let mut traces: BTreeMap<String, Vec<Interval>> = BTreeMap::new();
    for interval in intervals {
        traces
            .entry(interval.trace_id.clone().unwrap_or_default())
            .or_default()
            .push(interval);
    }
    traces
}

/// The span that stands for the whole trace: the longest span without a parent.
pub fn find_transaction(intervals: &[Interval]) -> Option<&Interval> {
    intervals
        .iter()
        .filter(|interval| interval.parent_span_id.is_none())
        .max_by(|a, b| a.duration().total_cmp(&b.duration()))
}
