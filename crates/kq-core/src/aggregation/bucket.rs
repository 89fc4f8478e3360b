//! Materialized buckets and their Elasticsearch JSON rendering.
//!
//! Rendering produces fragments, not documents: a bucket aggregation renders
//! as `"name":{"buckets":...}` so callers can splice it into an enclosing
//! object.

use chrono::{DateTime, Utc};

/// Textual key format dashboards expect next to the millisecond key.
const KEY_AS_STRING_FORMAT: &str = "%a %b %e %H:%M:%S UTC %Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketKey {
    /// Lower edge of a histogram interval.
    Time(DateTime<Utc>),
    /// Name of a filters entry.
    Name(String),
}

impl BucketKey {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            BucketKey::Time(t) => Some(*t),
            BucketKey::Name(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub key: BucketKey,
    pub doc_count: u64,
    pub sub_aggregation: Option<BucketAggregation>,
}

impl Bucket {
    pub fn new(key: BucketKey, doc_count: u64) -> Self {
        Self {
            key,
            doc_count,
            sub_aggregation: None,
        }
    }

    fn render_body(&self) -> String {
        let sub = self
            .sub_aggregation
            .as_ref()
            .map(BucketAggregation::render)
            .unwrap_or_default();
        if sub.is_empty() {
            format!("\"doc_count\":{}", self.doc_count)
        } else {
            format!("{},\"doc_count\":{}", sub, self.doc_count)
        }
    }

    pub fn render(&self) -> String {
        match &self.key {
            BucketKey::Name(name) => format!(
                "{}:{{{}}}",
                serde_json::Value::String(name.clone()),
                self.render_body()
            ),
            BucketKey::Time(time) => format!(
                "{{{},\"key_as_string\":\"{}\",\"key\":{}}}",
                self.render_body(),
                time.format(KEY_AS_STRING_FORMAT),
                time.timestamp_millis()
            ),
        }
    }
}

/// How the bucket list is laid out in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketsLayout {
    /// Object keyed by bucket name (filters).
    Object,
    /// Ordered array (histogram).
    Array,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAggregation {
    /// An empty name hides the aggregation from the response.
    pub name: String,
    pub layout: BucketsLayout,
    pub buckets: Vec<Bucket>,
}

impl BucketAggregation {
    pub fn new(name: impl Into<String>, layout: BucketsLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            buckets: Vec::new(),
        }
    }

    /// Documents counted by the top level buckets.
    pub fn doc_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.doc_count).sum()
    }

    pub fn render_buckets(&self) -> String {
        let buckets: Vec<String> = self.buckets.iter().map(Bucket::render).collect();
        match self.layout {
            BucketsLayout::Object => format!("{{{}}}", buckets.join(",")),
            BucketsLayout::Array => format!("[{}]", buckets.join(",")),
        }
    }

    pub fn render(&self) -> String {
        if self.name.is_empty() {
            return String::new();
        }
        format!(
            "{}:{{\"buckets\":{}}}",
            serde_json::Value::String(self.name.clone()),
            self.render_buckets()
        )
    }

    /// The rendered fragment as a JSON object, for embedding in responses.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&format!("{{{}}}", self.render()))
    }
}
