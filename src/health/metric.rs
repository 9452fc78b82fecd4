//! Metric-liveness health probe
//!
//! Scrapes a Prometheus text exposition and watches a single counter that
//! must keep increasing while the monitored target is alive. A value that
//! stops moving for `stale_limit` consecutive observations is treated as a
//! dead target even though the endpoint still answers.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{HealthCheck, HealthStatus};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct MetricHealthCheck {
    http: reqwest::Client,
    url: String,
    metric: String,
    stale_limit: u32,
    last_value: Option<f64>,
    stale_count: u32,
}

impl MetricHealthCheck {
    pub fn new(url: String, metric: String, stale_limit: u32, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::HealthProbeError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url,
            metric,
            stale_limit,
            last_value: None,
            stale_count: 0,
        })
    }

    async fn fetch(&self) -> Option<f64> {
        let response = match self.http.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %self.url, error = %e, "metric fetch failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "metric fetch rejected");
            return None;
        }
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(url = %self.url, error = %e, "metric body unreadable");
                return None;
            }
        };
        let value = parse_metric(&body, &self.metric);
        if value.is_none() {
            warn!(metric = %self.metric, "metric absent from exposition");
        }
        value
    }
}

#[async_trait]
impl HealthCheck for MetricHealthCheck {
    async fn check(&mut self) -> HealthStatus {
        // Fetch failures and absent metrics leave the counters untouched.
        let Some(value) = self.fetch().await else {
            return HealthStatus::Unknown;
        };

        match self.last_value {
            // First observation: give the target one interval to warm up.
            None => {
                self.last_value = Some(value);
                HealthStatus::Healthy
            }
            Some(last) if value > last => {
                self.stale_count = 0;
                self.last_value = Some(value);
                HealthStatus::Healthy
            }
            // Stale (or reset-downward) sample. last_value is kept so a
            // counter reset keeps reading as stale until it climbs back
            // past the old high-water mark.
            Some(last) => {
                self.stale_count += 1;
                debug!(
                    metric = %self.metric,
                    value,
                    last,
                    stale_count = self.stale_count,
                    "metric not advancing"
                );
                if self.stale_count < self.stale_limit {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                }
            }
        }
    }
}

/// Extract the value of the first sample of `name` from a Prometheus text
/// exposition. Accepts both bare samples (`name 42`) and labeled ones
/// (`name{job="x"} 42`).
fn parse_metric(body: &str, name: &str) -> Option<f64> {
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        let value_part = if let Some(after_labels) = rest.strip_prefix('{') {
            match after_labels.find('}') {
                Some(end) => &after_labels[end + 1..],
                None => continue,
            }
        } else if rest.starts_with(' ') || rest.starts_with('\t') {
            rest
        } else {
            // A longer metric name that merely shares this prefix.
            continue;
        };
        // `value [timestamp]` - the value is the first field.
        if let Some(value) = value_part.split_whitespace().next() {
            if let Ok(parsed) = value.parse::<f64>() {
                return Some(parsed);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EXPOSITION: &str = "\
# HELP scraped_points_total Data points scraped.
# TYPE scraped_points_total counter
scraped_points_total{site=\"primary\"} 1024
scrape_duration_seconds 0.2
";

    fn check_for(server_url: &str, metric: &str, stale_limit: u32) -> MetricHealthCheck {
        MetricHealthCheck::new(
            format!("{server_url}/metrics"),
            metric.to_string(),
            stale_limit,
            Duration::from_secs(2),
        )
        .unwrap()
    }

    async fn metrics_server(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn parses_labeled_and_bare_samples() {
        assert_eq!(parse_metric(EXPOSITION, "scraped_points_total"), Some(1024.0));
        assert_eq!(parse_metric(EXPOSITION, "scrape_duration_seconds"), Some(0.2));
    }

    #[test]
    fn prefix_collisions_do_not_match() {
        // `scrape_duration` is a prefix of `scrape_duration_seconds` but
        // names only match at a word boundary.
        assert_eq!(parse_metric(EXPOSITION, "scrape_duration"), None);
        assert_eq!(parse_metric(EXPOSITION, "missing_metric"), None);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let body = "# scraped_points_total 5\nscraped_points_total 7\n";
        assert_eq!(parse_metric(body, "scraped_points_total"), Some(7.0));
    }

    #[tokio::test]
    async fn first_observation_is_healthy() {
        let server = metrics_server(EXPOSITION).await;
        let mut check = check_for(&server.uri(), "scraped_points_total", 3);

        assert_eq!(check.check().await, HealthStatus::Healthy);
        assert_eq!(check.last_value, Some(1024.0));
        assert_eq!(check.stale_count, 0);
    }

    #[tokio::test]
    async fn stale_counter_goes_unhealthy_after_limit() {
        let server = metrics_server(EXPOSITION).await;
        let mut check = check_for(&server.uri(), "scraped_points_total", 3);

        // Warm-up, then three identical samples: stale 1, 2 stay healthy,
        // stale 3 crosses the limit.
        assert_eq!(check.check().await, HealthStatus::Healthy);
        assert_eq!(check.check().await, HealthStatus::Healthy);
        assert_eq!(check.check().await, HealthStatus::Healthy);
        assert_eq!(check.check().await, HealthStatus::Unhealthy);
        assert_eq!(check.stale_count, 3);
        // The high-water mark survives the stale run.
        assert_eq!(check.last_value, Some(1024.0));
    }

    #[tokio::test]
    async fn advancing_counter_resets_staleness() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("points_total 10\n"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("points_total 11\n"))
            .mount(&server)
            .await;

        let mut check = check_for(&server.uri(), "points_total", 3);
        assert_eq!(check.check().await, HealthStatus::Healthy); // warm-up at 10
        assert_eq!(check.check().await, HealthStatus::Healthy); // stale 1
        assert_eq!(check.stale_count, 1);
        assert_eq!(check.check().await, HealthStatus::Healthy); // 11 > 10
        assert_eq!(check.stale_count, 0);
        assert_eq!(check.last_value, Some(11.0));
    }

    #[tokio::test]
    async fn counter_reset_reads_as_stale() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("points_total 100\n"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("points_total 3\n"))
            .mount(&server)
            .await;

        let mut check = check_for(&server.uri(), "points_total", 2);
        assert_eq!(check.check().await, HealthStatus::Healthy); // warm-up at 100
        assert_eq!(check.check().await, HealthStatus::Healthy); // reset to 3: stale 1
        assert_eq!(check.check().await, HealthStatus::Unhealthy); // stale 2
        // The reset value never overwrites the high-water mark.
        assert_eq!(check.last_value, Some(100.0));
    }

    #[tokio::test]
    async fn fetch_failure_is_unknown_and_keeps_counters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut check = check_for(&server.uri(), "points_total", 3);
        check.last_value = Some(50.0);
        check.stale_count = 2;

        assert_eq!(check.check().await, HealthStatus::Unknown);
        assert_eq!(check.last_value, Some(50.0));
        assert_eq!(check.stale_count, 2);
    }

    #[tokio::test]
    async fn absent_metric_is_unknown() {
        let server = metrics_server("other_metric 9\n").await;
        let mut check = check_for(&server.uri(), "points_total", 3);
        assert_eq!(check.check().await, HealthStatus::Unknown);
        assert_eq!(check.last_value, None);
    }
}
