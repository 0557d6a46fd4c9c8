//! Output-directory inspection: input probing, declared outputs, generated files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::descriptor::StageDescriptor;
use crate::core::prereq::{ArtifactProbe, matches_input_pattern};
use crate::core::run_state::StageOutputs;
use crate::core::template::{TemplateVars, render_path};

/// Run-state document kept in every output directory.
pub const STATE_FILE: &str = "state.json";
/// Machine-readable summary written after a run terminates.
pub const SUMMARY_FILE: &str = "execution_summary.json";

/// Orchestrator bookkeeping that never satisfies a stage input.
const BOOKKEEPING_FILES: [&str; 3] = [STATE_FILE, "state.json.tmp", SUMMARY_FILE];

/// Probes the top level of a run's output directory.
#[derive(Debug, Clone)]
pub struct OutDirProbe {
    out_dir: PathBuf,
}

impl OutDirProbe {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl ArtifactProbe for OutDirProbe {
    fn has_artifact(&self, input: &str) -> bool {
        let Ok(entries) = fs::read_dir(&self.out_dir) else {
            return false;
        };
        entries.filter_map(|entry| entry.ok()).any(|entry| {
            entry.path().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| {
                        !BOOKKEEPING_FILES.contains(&name) && matches_input_pattern(name, input)
                    })
        })
    }
}

/// Resolve each declared output and keep only paths that exist on disk.
///
/// Relative paths are resolved against `out_dir`. Declared-but-missing
/// outputs are omitted.
pub fn collect_declared_outputs(
    stage: &StageDescriptor,
    vars: TemplateVars<'_>,
    out_dir: &Path,
) -> Result<StageOutputs> {
    let mut outputs = StageOutputs::new();
    for decl in &stage.outputs {
        let rendered = render_path(&decl.path, vars)
            .with_context(|| format!("render output '{}' of stage {}", decl.name, stage.name))?;
        let mut path = PathBuf::from(rendered);
        if path.is_relative() {
            path = out_dir.join(path);
        }
        if path.exists() {
            info!(stage = %stage.name, output = %decl.name, path = %path.display(), "recorded output");
            outputs.insert(decl.name.clone(), path.display().to_string());
        } else {
            debug!(stage = %stage.name, output = %decl.name, path = %path.display(), "declared output missing");
        }
    }
    Ok(outputs)
}

/// A file found under the output directory after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub name: String,
    /// Path relative to the output directory, `/`-separated.
    pub path: String,
    pub size: u64,
}

/// Every regular file under `out_dir`, sorted by relative path.
pub fn list_generated_files(out_dir: &Path) -> Result<Vec<GeneratedFile>> {
    let mut files = Vec::new();
    if out_dir.is_dir() {
        walk(out_dir, out_dir, &mut files)?;
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn walk(root: &Path, dir: &Path, files: &mut Vec<GeneratedFile>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        let meta = entry
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?;
        if meta.is_dir() {
            walk(root, &path, files)?;
        } else if meta.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let rel = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(GeneratedFile {
                name: entry.file_name().to_string_lossy().to_string(),
                path: rel,
                size: meta.len(),
            });
        }
    }
    Ok(())
}

/// Expected output patterns with no matching generated file.
pub fn missing_expected_outputs(files: &[GeneratedFile], expected: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|pattern| !files.iter().any(|f| wildcard_match(pattern, &f.path)))
        .cloned()
        .collect()
}

/// `*` matches any run of characters (including `/`); everything else is literal.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };
    let last = rest[rest.len() - 1];
    for part in &rest[..rest.len() - 1] {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::stage;

    #[test]
    fn out_dir_matches_conventional_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("zones.geojson"), "{}").expect("write");
        let probe = OutDirProbe::new(temp.path());
        assert!(probe.has_artifact("zones"));
        assert!(!probe.has_artifact("ownership"));
        assert!(!OutDirProbe::new(temp.path().join("missing")).has_artifact("zones"));
    }

    #[test]
    fn bookkeeping_files_are_not_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in BOOKKEEPING_FILES {
            fs::write(temp.path().join(name), "{}").expect("write");
        }
        let probe = OutDirProbe::new(temp.path());
        assert!(!probe.has_artifact("state"));
        assert!(!probe.has_artifact("summary"));
        assert!(!probe.has_artifact("execution"));

        fs::write(temp.path().join("state_leases.csv"), "id").expect("write");
        assert!(probe.has_artifact("state"));
    }

    #[test]
    fn records_only_existing_outputs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out_dir = temp.path();
        fs::write(out_dir.join("zones.geojson"), "{}").expect("write");
        fs::write(out_dir.join("run-7.md"), "# r").expect("write");
        let descriptor = stage("geowiz")
            .output("zones", "${OUT_DIR}/zones.geojson")
            .output("summary", "${RUN_ID}.md")
            .output("missing", "${OUT_DIR}/nope.json")
            .build();
        let out = out_dir.display().to_string();
        let vars = TemplateVars {
            run_id: "run-7",
            out_dir: &out,
        };

        let outputs = collect_declared_outputs(&descriptor, vars, out_dir).expect("collect");
        assert_eq!(outputs.len(), 2);
        assert!(outputs["zones"].ends_with("zones.geojson"));
        assert!(outputs["summary"].ends_with("run-7.md"));
    }

    #[test]
    fn lists_files_recursively_and_reports_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out_dir = temp.path();
        fs::create_dir_all(out_dir.join("rfcs")).expect("mkdir");
        fs::write(out_dir.join("rfcs/001.md"), "x").expect("write");
        fs::write(out_dir.join("REPORT.md"), "xyz").expect("write");

        let files = list_generated_files(out_dir).expect("list");
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["REPORT.md", "rfcs/001.md"]);
        assert_eq!(files[0].size, 3);

        let missing = missing_expected_outputs(
            &files,
            &[
                "REPORT.md".to_string(),
                "rfcs/*.md".to_string(),
                "decision.json".to_string(),
            ],
        );
        assert_eq!(missing, vec!["decision.json"]);
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("*.md", "a.md"));
        assert!(wildcard_match("rfcs/*.md", "rfcs/x.md"));
        assert!(!wildcard_match("rfcs/*.md", "other/x.md"));
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b*c", "axxbyy"));
        assert!(!wildcard_match("ab*ba", "aba"));
    }
}
