use std::path::Path;

use dtk_config::MetricConfig;

/// Does one selector match a metric?
///
/// Three forms: exact metric name, `tag:<name>`, or a glob over the
/// metric file path relative to the project directory
/// (`metrics/db/*.yml`).
pub fn selector_matches(
    selector: &str,
    config: &MetricConfig,
    relative_path: &Path,
) -> bool {
    if let Some(tag) = selector.strip_prefix("tag:") {
        return config.tags.iter().any(|t| t == tag);
    }
    if selector == config.name {
        return true;
    }
    let path = relative_path.to_string_lossy().replace('\\', "/");
    glob_match::glob_match(selector, &path)
}

/// Apply `--select` / `--exclude` to the loaded project metrics.
pub fn filter_metrics<'a>(
    metrics: &'a [(std::path::PathBuf, MetricConfig)],
    project_dir: &Path,
    select: &[String],
    exclude: &[String],
) -> Vec<&'a (std::path::PathBuf, MetricConfig)> {
    metrics
        .iter()
        .filter(|(path, config)| {
            let relative = path.strip_prefix(project_dir).unwrap_or(path.as_path());
            let selected = select.is_empty()
                || select
                    .iter()
                    .any(|s| selector_matches(s, config, relative));
            let excluded = exclude
                .iter()
                .any(|s| selector_matches(s, config, relative));
            selected && !excluded
        })
        .collect()
}
