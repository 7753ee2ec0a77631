use uuid::Uuid;

/// Generate an OpenTelemetry-compatible trace ID (32 hex characters).
pub fn generate_trace_id() -> String {
    // A UUID without hyphens is exactly 32 hex chars (128 bits).
    Uuid::new_v4().as_simple().to_string()
}

/// Generate a span ID (16 hex characters).
pub fn generate_span_id() -> String {
    Uuid::new_v4().as_simple().to_string()[..16].to_string()
}

/// Create the span that wraps one evaluation run, returning the span and its
/// trace ID so the caller can report it.
pub fn create_run_span(label: &str) -> (tracing::Span, String) {
    let trace_id = generate_trace_id();
    let span = tracing::info_span!(
        "evaluation_run",
        trace_id = %trace_id,
        label = %label,
    );
    (span, trace_id)
}

/// Create a child span for one sample under an existing run trace.
pub fn create_sample_span(trace_id: &str, sample_id: &str) -> tracing::Span {
    let span_id = generate_span_id();
    tracing::info_span!(
        "sample",
        trace_id = %trace_id,
        span_id = %span_id,
        sample_id = %sample_id,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_format() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_span_id_format() {
        let id = generate_span_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_trace_ids_are_unique() {
        assert_ne!(generate_trace_id(), generate_trace_id());
    }

    #[test]
    fn test_run_span_creation() {
        let (span, trace_id) = create_run_span("pdfplumber");
        assert_eq!(trace_id.len(), 32);
        let _guard = span.enter();
    }

    #[test]
    fn test_sample_span_creation() {
        let trace_id = generate_trace_id();
        let span = create_sample_span(&trace_id, "jefferies8");
        let _guard = span.enter();
    }
}
