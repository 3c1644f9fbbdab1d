//! Distro span processors.

use opentelemetry::trace::{Span as _, SpanId, TraceContextExt, TraceId};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{Span, SpanData, SpanProcessor};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Attribute carrying the id of the local root span.
pub const TRANSACTION_ID: &str = "transaction.id";

/// Stamps every span with [`TRANSACTION_ID`]: the span id of the local root
/// span of its trace within this process.
///
/// A span is a local root when it has no parent or a remote parent.
#[derive(Debug, Default)]
pub struct TransactionIdProcessor {
    roots: Mutex<HashMap<TraceId, SpanId>>,
}

impl TransactionIdProcessor {
    /// Name reported in diagnostics.
    pub const NAME: &'static str = "TransactionIdProcessor";

    /// Creates the processor.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpanProcessor for TransactionIdProcessor {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        let span_context = span.span_context().clone();
        let parent = cx.span().span_context().clone();

        let Ok(mut roots) = self.roots.lock() else {
            return;
        };

        let transaction = if !parent.is_valid() || parent.is_remote() {
            roots.insert(span_context.trace_id(), span_context.span_id());
            span_context.span_id()
        } else {
            match roots.get(&span_context.trace_id()) {
                Some(root) => *root,
                None => return,
            }
        };
        drop(roots);

        span.set_attribute(KeyValue::new(TRANSACTION_ID, transaction.to_string()));
    }

    fn on_end(&self, span: SpanData) {
        let trace_id = span.span_context.trace_id();
        if let Ok(mut roots) = self.roots.lock()
            && roots.get(&trace_id) == Some(&span.span_context.span_id())
        {
            roots.remove(&trace_id);
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        if let Ok(mut roots) = self.roots.lock() {
            roots.clear();
        }
        Ok(())
    }
}
