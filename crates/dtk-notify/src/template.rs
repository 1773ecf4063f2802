use dtk_alert::AlertData;

/// Default message for the first anomaly in a sequence.
pub const DEFAULT_TEMPLATE_SINGLE: &str = "\
**Anomaly detected in {metric_name}!**
Time: {timestamp} ({timezone})
Value: {value}
Expected range: {confidence_interval}
Detector: {detector_name}
Direction: {direction}
Severity: {severity}";

/// Default message once the anomaly has been confirmed over several points.
pub const DEFAULT_TEMPLATE_CONSECUTIVE: &str = "\
**Anomaly detected in {metric_name}!**
{consecutive_count} consecutive anomalous points
Time: {timestamp} ({timezone})
Value: {value}
Expected range: {confidence_interval}
Detector: {detector_name}
Direction: {direction}
Severity: {severity}";

/// Default message for a missing-data alert.
pub const DEFAULT_TEMPLATE_NO_DATA: &str = "\
**No data for {metric_name}!**
No datapoints for the last {consecutive_count} intervals.
Last expected point: {timestamp} ({timezone})";

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:.2}"),
        None => "N/A".to_string(),
    }
}

fn fmt_interval(lower: Option<f64>, upper: Option<f64>) -> String {
    match (lower, upper) {
        (None, None) => "N/A".to_string(),
        (lo, hi) => format!("[{}, {}]", fmt_opt(lo), fmt_opt(hi)),
    }
}

/// Substitute `{variable}` placeholders with the alert event's fields.
///
/// Unknown placeholders are left untouched so a typo is visible in the
/// delivered message instead of silently vanishing.
pub fn render_message(template: &str, alert: &AlertData) -> String {
    template
        .replace("{metric_name}", &alert.metric_name)
        .replace("{timestamp}", &alert.local_time)
        .replace("{timezone}", &alert.timezone)
        .replace("{value}", &fmt_opt(alert.value))
        .replace(
            "{confidence_interval}",
            &fmt_interval(alert.confidence_lower, alert.confidence_upper),
        )
        .replace("{confidence_lower}", &fmt_opt(alert.confidence_lower))
        .replace("{confidence_upper}", &fmt_opt(alert.confidence_upper))
        .replace("{detector_name}", &alert.detector_name)
        .replace("{direction}", &alert.direction.to_string())
        .replace("{severity}", &format!("{:.2}", alert.severity))
        .replace("{consecutive_count}", &alert.consecutive_count.to_string())
}

/// Pick the template for an event: explicit overrides first, then the
/// built-in defaults keyed on event shape.
pub fn select_template<'a>(
    alert: &AlertData,
    template_single: Option<&'a str>,
    template_consecutive: Option<&'a str>,
) -> &'a str {
    if alert.is_no_data {
        DEFAULT_TEMPLATE_NO_DATA
    } else if alert.consecutive_count > 1 {
        template_consecutive.unwrap_or(DEFAULT_TEMPLATE_CONSECUTIVE)
    } else {
        template_single.unwrap_or(DEFAULT_TEMPLATE_SINGLE)
    }
}
