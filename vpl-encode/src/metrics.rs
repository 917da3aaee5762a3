use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge};

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

pub fn get_metrics() -> &'static Metrics {
    &METRICS
}

#[derive(Debug)]
pub struct Metrics {
    pub encoded_frames: IntCounter,
    pub bitstream_bytes: IntCounter,
    pub dropped_frames: IntCounter,
    pub insufficient_buffer_events: IntCounter,
    pub frame_queue_depth: IntGauge,
    pub encoding_latency_ms: Histogram,
}

impl Metrics {
    fn new() -> Self {
        let encoded_frames =
            IntCounter::new("encoded_frames", "Number of encoded frames").unwrap();
        let bitstream_bytes =
            IntCounter::new("bitstream_bytes", "Bytes written to the output").unwrap();
        let dropped_frames = IntCounter::new(
            "dropped_frames",
            "Frames rejected before reaching the encoder",
        )
        .unwrap();
        let insufficient_buffer_events = IntCounter::new(
            "insufficient_buffer_events",
            "Encoded frames discarded because the bitstream buffer was too small",
        )
        .unwrap();
        let frame_queue_depth =
            IntGauge::new("frame_queue_depth", "Frames waiting to be encoded").unwrap();
        let encoding_latency_ms = Histogram::with_opts(
            HistogramOpts::new("encoding_latency_ms", "Encoding latency of frames")
                .buckets(vec![3.0, 4.0, 6.0, 8.0, 10.0, 20.0, 50.0, 100.0]),
        )
        .unwrap();

        let collectors: [Box<dyn prometheus::core::Collector>; 6] = [
            Box::new(encoded_frames.clone()),
            Box::new(bitstream_bytes.clone()),
            Box::new(dropped_frames.clone()),
            Box::new(insufficient_buffer_events.clone()),
            Box::new(frame_queue_depth.clone()),
            Box::new(encoding_latency_ms.clone()),
        ];
        for collector in collectors {
            // An embedding application may already own metrics with these names.
            if let Err(e) = prometheus::register(collector) {
                tracing::warn!(?e, "Failed to register metric");
            }
        }

        Self {
            encoded_frames,
            bitstream_bytes,
            dropped_frames,
            insufficient_buffer_events,
            frame_queue_depth,
            encoding_latency_ms,
        }
    }
}
