use chrono::NaiveDateTime;
use dtk_common::format_ts;

/// Render the user query for one time slice.
///
/// Recognized variables, in both short and spelled-out forms:
/// `{from_date}` / `{{ dtk_start_time }}`, `{to_date}` / `{{ dtk_end_time }}`,
/// and `{{ interval_seconds }}`. Datetimes render as
/// `YYYY-MM-DD HH:MM:SS` naive UTC; the query quotes them itself.
pub fn render_query(
    query: &str,
    from: NaiveDateTime,
    to: NaiveDateTime,
    interval_seconds: u64,
) -> String {
    let from_s = format_ts(from);
    let to_s = format_ts(to);
    let interval_s = interval_seconds.to_string();
    query
        .replace("{from_date}", &from_s)
        .replace("{to_date}", &to_s)
        .replace("{{ dtk_start_time }}", &from_s)
        .replace("{{dtk_start_time}}", &from_s)
        .replace("{{ dtk_end_time }}", &to_s)
        .replace("{{dtk_end_time}}", &to_s)
        .replace("{{ interval_seconds }}", &interval_s)
        .replace("{{interval_seconds}}", &interval_s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn short_form_variables() {
        let sql = render_query(
            "SELECT * FROM m WHERE ts >= '{from_date}' AND ts < '{to_date}'",
            ts(1),
            ts(2),
            600,
        );
        assert_eq!(
            sql,
            "SELECT * FROM m WHERE ts >= '2024-01-01 00:00:00' AND ts < '2024-01-02 00:00:00'"
        );
    }

    #[test]
    fn spelled_out_variables() {
        let sql = render_query(
            "WHERE ts >= '{{ dtk_start_time }}' AND ts < '{{ dtk_end_time }}' \
             AND step = {{ interval_seconds }}",
            ts(1),
            ts(2),
            600,
        );
        assert!(sql.contains("'2024-01-01 00:00:00'"));
        assert!(sql.contains("'2024-01-02 00:00:00'"));
        assert!(sql.contains("step = 600"));
    }

    #[test]
    fn queries_without_variables_pass_through() {
        assert_eq!(render_query("SELECT 1", ts(1), ts(2), 60), "SELECT 1");
    }
}
