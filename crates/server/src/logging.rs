//! Tracing setup and the access-log writer.
//!
//! Ordinary events go through the JSON formatter. Access-log events are
//! written by [`AccessLogLayer`] instead, one flat JSON object per line with
//! every extracted field as its own key.

use std::fmt;
use std::io::Write;

use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Target of access-log events.
pub const ACCESS_LOG_TARGET: &str = "access_log";

/// Event field holding the extracted fields as a JSON object.
const FIELDS_KEY: &str = "fields";

/// Install the global subscriber.
///
/// `plain` drops file, line and thread metadata from ordinary records.
pub fn init_tracing(log_level: &str, plain: bool) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_file(!plain)
        .with_line_number(!plain)
        .with_thread_ids(!plain)
        .with_thread_names(!plain)
        .with_filter(filter_fn(|meta: &Metadata<'_>| {
            meta.target() != ACCESS_LOG_TARGET
        }));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(AccessLogLayer::new(std::io::stdout))
        .init();
}

/// Writes access-log events as flat JSON lines.
///
/// The record carries `timestamp`, `level`, `target`, `message`, any numeric
/// or text fields of the event, and then each extracted field. An extracted
/// field never replaces one of the record's own keys.
pub struct AccessLogLayer<W> {
    make_writer: W,
}

impl<W> AccessLogLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    pub fn new(make_writer: W) -> Self {
        Self { make_writer }
    }
}

impl<S, W> Layer<S> for AccessLogLayer<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target() != ACCESS_LOG_TARGET {
            return;
        }

        let mut record = Map::new();
        record.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        record.insert("level".to_string(), Value::String(meta.level().to_string()));
        record.insert("target".to_string(), Value::String(meta.target().to_string()));

        let mut visitor = RecordVisitor {
            record: &mut record,
            fields: Map::new(),
        };
        event.record(&mut visitor);
        let fields = visitor.fields;
        for (name, value) in fields {
            record.entry(name).or_insert(value);
        }

        let Ok(mut line) = serde_json::to_vec(&Value::Object(record)) else {
            return;
        };
        line.push(b'\n');
        // Nowhere left to report a failed log write.
        let _ = self.make_writer.make_writer_for(meta).write_all(&line);
    }
}

struct RecordVisitor<'a> {
    record: &'a mut Map<String, Value>,
    fields: Map<String, Value>,
}

impl RecordVisitor<'_> {
    fn insert_text(&mut self, field: &Field, text: String) {
        if field.name() == FIELDS_KEY {
            if let Ok(Value::Object(fields)) = serde_json::from_str(&text) {
                self.fields = fields;
                return;
            }
        }
        self.record.insert(field.name().to_string(), Value::String(text));
    }
}

impl Visit for RecordVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(number) = Number::from_f64(value) {
            self.record
                .insert(field.name().to_string(), Value::Number(number));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert_text(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert_text(field, format!("{value:?}"));
    }
}
