use std::time::Duration;

use proptest::prelude::*;

use llm_loadbench::config::CollectorConfig;
use llm_loadbench::metrics::{MetricsCollector, RecentWindow, RequestOutcome, StreamCompletion};

// =============================================================================
// Recent windows keep exactly the newest `capacity` items
// =============================================================================

proptest! {
    #[test]
    fn window_keeps_last_capacity_items(capacity in 1usize..64, extra in 0usize..64) {
        let mut window = RecentWindow::new(capacity);
        let total = capacity + extra;
        for i in 0..total {
            window.push(i);
        }

        let expected: Vec<usize> = (extra..total).collect();
        prop_assert_eq!(window.to_vec(), expected);
    }

    #[test]
    fn latency_window_never_exceeds_capacity(capacity in 1usize..32, n in 0usize..128) {
        let metrics = MetricsCollector::with_config(CollectorConfig {
            latency_window_capacity: capacity,
            ..CollectorConfig::default()
        });
        for i in 0..n {
            metrics.record_request(RequestOutcome {
                endpoint: "/api/v1/books".into(),
                method: "GET".into(),
                status_code: 200,
                ttft: Some(Duration::from_millis(i as u64)),
                ttct: Duration::from_millis(i as u64 + 1),
                content_length: 1,
                is_stream: false,
                request_id: Some(i.to_string()),
            }).unwrap();
        }

        let view = metrics.snapshot();
        prop_assert_eq!(view.recent_ttcts.len(), n.min(capacity));
        prop_assert_eq!(view.recent_ttfts.len(), n.min(capacity));
        // FIFO: the newest sample is always last
        if n > 0 {
            let last = *view.recent_ttcts.last().unwrap();
            prop_assert!((last - n as f64 / 1000.0).abs() < 1e-9);
        }
    }

    // =========================================================================
    // Outcome accounting
    // =========================================================================

    #[test]
    fn regular_outcomes_sum_to_requests(codes in prop::collection::vec(100u16..600, 0..200)) {
        let metrics = MetricsCollector::new();
        for (i, code) in codes.iter().enumerate() {
            metrics.record_request(RequestOutcome {
                endpoint: "/api/v1/settings".into(),
                method: "GET".into(),
                status_code: *code,
                ttft: None,
                ttct: Duration::from_millis(10),
                content_length: 0,
                is_stream: false,
                request_id: Some(format!("id-{i}")),
            }).unwrap();
        }

        let view = metrics.snapshot();
        let successes = codes.iter().filter(|c| (200..300).contains(*c)).count() as u64;
        prop_assert_eq!(view.success_count + view.failure_count, codes.len() as u64);
        prop_assert_eq!(view.success_count, successes);

        let rate = metrics.aggregator().success_rate();
        prop_assert!((0.0..=1.0).contains(&rate));
    }

    #[test]
    fn stream_outcomes_count_distinct_ids(ids in prop::collection::vec(0u8..20, 0..100)) {
        let metrics = MetricsCollector::new();
        for id in &ids {
            metrics.record_stream_completion(StreamCompletion {
                endpoint: "/api/v1/expand_text".into(),
                status_code: 200,
                ttft: Duration::from_millis(100),
                ttct: Duration::from_millis(500),
                token_count: 5,
                request_id: Some(format!("s-{id}")),
            }).unwrap();
        }

        let distinct = ids.iter().collect::<std::collections::HashSet<_>>().len() as u64;
        let view = metrics.snapshot();
        prop_assert_eq!(view.success_count, distinct);
        prop_assert_eq!(view.total_tokens, ids.len() as u64 * 5);
        prop_assert_eq!(view.total_requests, 0);
    }
}
