//! Repository investigator: evidence from the audited source tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::collaborators::EvidenceProducer;
use crate::domain::error::{AuditError, Result};
use crate::domain::evidence::{AuditTarget, Evidence, EvidenceBatch, SECURITY_TAG};
use crate::git;

const SKIP_DIRS: [&str; 8] = [
    ".git",
    "target",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    "site-packages",
    "dist",
];
const SOURCE_EXTENSIONS: [&str; 9] = ["rs", "py", "ts", "js", "go", "java", "rb", "sh", "kt"];
const MAX_FILE_BYTES: u64 = 1 << 20;

/// Produces `repo.*` evidence from a local path or a cloned remote.
#[derive(Debug, Clone)]
pub struct RepoInvestigator {
    pub clone_depth: u32,
    pub max_commits: usize,
    /// Commits needed for `repo.git_narrative` to count as found.
    pub min_commits: usize,
}

impl Default for RepoInvestigator {
    fn default() -> Self {
        Self {
            clone_depth: 200,
            max_commits: 25,
            min_commits: 4,
        }
    }
}

struct SourceFile {
    rel: String,
    text: String,
}

/// Collect source files under `root`. Unreadable directories and entries
/// are skipped.
fn walk(root: &Path) -> Vec<SourceFile> {
    let mut files = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                debug!(path = %path.display(), "skipping entry without a file type");
                continue;
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if file_type.is_dir() {
                if !SKIP_DIRS.contains(&name.as_ref()) {
                    stack.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let is_source = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
            if !is_source {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if meta.len() > MAX_FILE_BYTES => continue,
                Ok(_) => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping file without metadata");
                    continue;
                }
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                debug!(path = %path.display(), "skipping unreadable or non-UTF-8 file");
                continue;
            };
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            files.push(SourceFile { rel, text });
        }
    }
    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    files
}

fn pattern(raw: &str) -> Result<Regex> {
    Regex::new(raw).map_err(|e| AuditError::Collaborator(format!("bad pattern {raw}: {e}")))
}

impl RepoInvestigator {
    fn investigate(&self, target: &AuditTarget) -> Result<EvidenceBatch> {
        let mut _checkout: Option<tempfile::TempDir> = None;
        let root = if target.is_remote() {
            let dir = tempfile::tempdir()?;
            let dest = dir.path().join("repo");
            if let Err(e) = git::clone_shallow(target.repo.trim(), &dest, self.clone_depth) {
                return Ok(EvidenceBatch::fatal(e.to_string()));
            }
            _checkout = Some(dir);
            dest
        } else {
            let path = PathBuf::from(&target.repo);
            if !path.is_dir() {
                return Ok(EvidenceBatch::fatal(
                    AuditError::Resolution {
                        target: target.repo.clone(),
                        reason: "repository path does not exist or is not a directory".to_string(),
                    }
                    .to_string(),
                ));
            }
            path
        };

        let files = walk(&root);
        debug!(files = files.len(), root = %root.display(), "repository walked");

        let evidences = vec![
            self.state_structure(&files)?,
            self.graph_wiring(&files)?,
            self.git_narrative(&root)?,
            self.security_scan(&files)?,
        ];
        Ok(EvidenceBatch::ok(evidences).with_detail(format!("scanned {} source files", files.len())))
    }

    fn state_structure(&self, files: &[SourceFile]) -> Result<Evidence> {
        let re = pattern(r"\b(?:struct|class|interface|enum|TypedDict|BaseModel)\b\s*\w*State\b")?;
        let hit = files.iter().find(|f| re.is_match(&f.text));
        let evidence = match hit {
            Some(file) => Evidence::new(
                "repo.state_structure",
                "Verify typed state definitions.",
                true,
                file.rel.as_str(),
                "Typed state declaration found.",
                0.9,
            )?,
            None => Evidence::new(
                "repo.state_structure",
                "Verify typed state definitions.",
                false,
                "",
                "No typed state declaration in any source file.",
                0.85,
            )?,
        };
        Ok(evidence.with_tag("orchestration").with_tag("state"))
    }

    fn graph_wiring(&self, files: &[SourceFile]) -> Result<Evidence> {
        let re = pattern(r"\.(?:add_edge|add_conditional_edges|edge|conditional)\s*\(")?;
        let mut total = 0usize;
        let mut busiest: Option<(&str, usize)> = None;
        for file in files {
            let count = re.find_iter(&file.text).count();
            total += count;
            if count > 0 && busiest.map_or(true, |(_, c)| count > c) {
                busiest = Some((file.rel.as_str(), count));
            }
        }
        let found = total >= 4;
        Ok(Evidence::new(
            "repo.graph_wiring",
            "Verify fan-out/fan-in graph topology.",
            found,
            busiest.map(|(rel, _)| rel).unwrap_or(""),
            "Edge and conditional-edge wiring calls counted; at least 4 required.",
            if found { 0.85 } else { 0.8 },
        )?
        .with_tag("orchestration")
        .with_tag("parallelism")
        .with_content(format!("edge_calls={total}")))
    }

    fn git_narrative(&self, root: &Path) -> Result<Evidence> {
        let goal = "Assess whether engineering happened in atomic increments.";
        let evidence = if !git::is_git_repo(root) {
            Evidence::new(
                "repo.git_narrative",
                goal,
                false,
                "git log",
                "Target is not a git work tree.",
                0.9,
            )?
        } else {
            let commits = git::commit_log(root, self.max_commits)?;
            let sample = commits
                .iter()
                .take(5)
                .map(|c| format!("{} {} {}", c.hash, c.timestamp, c.message))
                .collect::<Vec<_>>()
                .join("\n");
            Evidence::new(
                "repo.git_narrative",
                goal,
                commits.len() >= self.min_commits,
                "git log",
                format!(
                    "{} commit(s) inspected; at least {} treated as iterative development.",
                    commits.len(),
                    self.min_commits
                ),
                0.7,
            )?
            .with_content(sample)
        };
        Ok(evidence.with_tag("effort").with_tag("git"))
    }

    fn security_scan(&self, files: &[SourceFile]) -> Result<Evidence> {
        let rules = [
            ("os.system", pattern(r"\bos\.system\s*\(")?),
            ("shell=True", pattern(r"shell\s*=\s*True")?),
            ("eval", pattern(r"(?:^|[^.\w])eval\s*\(")?),
            ("exec", pattern(r"(?:^|[^.\w])exec\s*\(")?),
            ("sh -c", pattern(r#"Command::new\("(?:sh|bash)"\)"#)?),
        ];
        let mut hits = Vec::new();
        for file in files {
            for (lineno, line) in file.text.lines().enumerate() {
                for (label, re) in &rules {
                    if re.is_match(line) {
                        hits.push(format!("{}:{}:{label}", file.rel, lineno + 1));
                    }
                }
            }
        }
        let found = !hits.is_empty();
        let content = if found {
            hits.iter().take(20).cloned().collect::<Vec<_>>().join("\n")
        } else {
            "No risky patterns matched.".to_string()
        };
        Ok(Evidence::new(
            "repo.security_scan",
            "Identify risky command execution patterns.",
            found,
            hits.first().map(|h| h.as_str()).unwrap_or(""),
            "Pattern scan for shell and dynamic evaluation primitives; found means a risky call exists.",
            0.75,
        )?
        .with_tag(SECURITY_TAG)
        .with_content(content))
    }
}

#[async_trait]
impl EvidenceProducer for RepoInvestigator {
    fn name(&self) -> &str {
        "repo_investigator"
    }

    async fn produce(&self, target: &AuditTarget) -> Result<EvidenceBatch> {
        let investigator = self.clone();
        let target = target.clone();
        tokio::task::spawn_blocking(move || investigator.investigate(&target))
            .await
            .map_err(|e| AuditError::Collaborator(format!("repository scan aborted: {e}")))?
    }
}
