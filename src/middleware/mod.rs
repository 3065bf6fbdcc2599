pub mod http_metrics;
