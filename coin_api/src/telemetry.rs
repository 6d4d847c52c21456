use crate::tally::CoinTally;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

const DETECTION_DURATION_BOUNDARIES: [f64; 10] = [
    25.0, 50.0, 100.0, 200.0, 400.0, 800.0, 1500.0, 3000.0, 6000.0, 12000.0,
];

pub struct Metrics {
    request_counter: Counter<u64>,
    detection_duration: Histogram<u64>,
    coins_detected: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("coin_api");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("detect_requests_total")
            .with_description("Total number of detection requests by outcome")
            .build();

        let detection_duration = meter
            .u64_histogram("detection_duration_ms")
            .with_boundaries(DETECTION_DURATION_BOUNDARIES.to_vec())
            .with_description("Duration of model inference in milliseconds")
            .build();

        let coins_detected = meter
            .u64_counter("coins_detected_total")
            .with_description("Coins detected by denomination")
            .build();

        Ok(Metrics {
            request_counter,
            detection_duration,
            coins_detected,
            registry,
        })
    }

    pub fn record_request(&self, outcome: &str) {
        let attributes = [KeyValue::new("outcome", outcome.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_detection_duration(&self, duration_ms: u64) {
        self.detection_duration.record(duration_ms, &[]);
    }

    pub fn record_coins(&self, tally: &CoinTally) {
        let details = tally.details;
        for (denomination, count) in [
            ("1baht", details.one_baht),
            ("5baht", details.five_baht),
            ("10baht", details.ten_baht),
        ] {
            if count > 0 {
                let attributes = [KeyValue::new("denomination", denomination)];
                self.coins_detected.add(count, &attributes);
            }
        }
    }
}
