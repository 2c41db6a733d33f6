use std::{collections::HashMap, fmt::Write as _};

use super::core::{MetricsState, METRICS_STATE};

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn render_metrics() -> String {
    let auth_failures = metrics_state()
        .auth_failures
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let rate_limit_hits = metrics_state()
        .rate_limit_hits
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    output.push_str("# HELP strand_auth_failures_total Count of auth-related failures by reason\n");
    output.push_str("# TYPE strand_auth_failures_total counter\n");
    let mut auth_entries: Vec<_> = auth_failures.into_iter().collect();
    auth_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in auth_entries {
        let _ = writeln!(
            output,
            "strand_auth_failures_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP strand_rate_limit_hits_total Count of rate-limit rejections by surface and policy\n",
    );
    output.push_str("# TYPE strand_rate_limit_hits_total counter\n");
    let mut rate_entries: Vec<_> = rate_limit_hits.into_iter().collect();
    rate_entries.sort_by_key(|((surface, policy), _)| (*surface, *policy));
    for ((surface, policy), value) in rate_entries {
        let _ = writeln!(
            output,
            "strand_rate_limit_hits_total{{surface=\"{surface}\",policy=\"{policy}\"}} {value}"
        );
    }

    output
}

pub(crate) fn record_auth_failure(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().auth_failures.lock() {
        let entry = counters.entry(reason).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_rate_limit_hit(surface: &'static str, policy: &'static str) {
    if let Ok(mut counters) = metrics_state().rate_limit_hits.lock() {
        let entry = counters.entry((surface, policy)).or_insert(0);
        *entry += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{metrics_state, record_auth_failure, record_rate_limit_hit, render_metrics};

    #[test]
    fn records_auth_failures_by_reason() {
        record_auth_failure("metrics_test_reason");

        let failures = metrics_state()
            .auth_failures
            .lock()
            .expect("auth failure metrics mutex should not be poisoned");
        assert!(failures.get("metrics_test_reason").copied() >= Some(1));
    }

    #[test]
    fn renders_rate_limit_hits_with_surface_and_policy_labels() {
        record_rate_limit_hit("http", "metrics_test_policy");

        let rendered = render_metrics();
        assert!(rendered.contains(
            "strand_rate_limit_hits_total{surface=\"http\",policy=\"metrics_test_policy\"}"
        ));
        assert!(rendered.contains("# TYPE strand_auth_failures_total counter"));
    }
}
