use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::metric::MetricConfig;
use crate::{ConfigError, Result};

/// All metric declaration files under `<project>/metrics/`, sorted for
/// stable iteration order.
pub fn discover_metric_files(project_dir: &Path) -> Result<Vec<PathBuf>> {
    let metrics_dir = project_dir.join("metrics");
    if !metrics_dir.is_dir() {
        return Err(ConfigError::Invalid(format!(
            "No metrics directory at {}",
            metrics_dir.display()
        )));
    }
    let mut files = Vec::new();
    collect_yaml_files(&metrics_dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

/// Load every metric file, enforcing unique metric names project-wide.
pub fn load_project_metrics(files: &[PathBuf]) -> Result<Vec<(PathBuf, MetricConfig)>> {
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut out = Vec::with_capacity(files.len());
    for path in files {
        let config = MetricConfig::from_yaml_file(path)?;
        if let Some(first) = seen.get(&config.name) {
            return Err(ConfigError::DuplicateMetric {
                name: config.name.clone(),
                first: first.display().to_string(),
                second: path.display().to_string(),
            });
        }
        seen.insert(config.name.clone(), path.clone());
        out.push((path.clone(), config));
    }
    Ok(out)
}
