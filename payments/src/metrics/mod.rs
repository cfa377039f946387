/// Process metrics (Prometheus text exposition)

pub mod prometheus;
