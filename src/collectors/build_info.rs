use prometheus::{IntGaugeVec, Opts};

const VERSION_LABEL: &str = "version";

/// Constant `<namespace>_build_info{version="..."} 1` gauge
pub fn build_info_gauge(namespace: &str) -> prometheus::Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "build_info",
            "A metric with a constant '1' value labeled by the exporter version.",
        )
        .namespace(namespace),
        &[VERSION_LABEL],
    )?;
    gauge
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1);
    Ok(gauge)
}
