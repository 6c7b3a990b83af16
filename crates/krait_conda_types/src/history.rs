//! Readers and writers for `conda-meta/history` files.
//!
//! Every change made to an environment is recorded as a revision in the
//! append-only `conda-meta/history` file. Each revision starts with a header
//! line `==> <datetime> <==`, followed by comment lines (the command that was
//! run, the requested specs) and package distribution strings prefixed with
//! `+` (linked) or `-` (unlinked).

use std::{
    collections::BTreeSet,
    io::Write,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// A single revision in a history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRevision {
    /// The datetime string from the revision header.
    pub timestamp: String,

    /// The package distribution strings of this revision, with their `+`/`-`
    /// prefix.
    pub packages: BTreeSet<String>,

    /// Raw comment lines (including the leading `#`).
    pub comments: Vec<String>,
}

impl HistoryRevision {
    /// The distribution strings linked in this revision.
    pub fn link_dists(&self) -> impl Iterator<Item = &str> {
        self.packages
            .iter()
            .filter_map(|dist| dist.strip_prefix('+'))
    }

    /// The distribution strings unlinked in this revision.
    pub fn unlink_dists(&self) -> impl Iterator<Item = &str> {
        self.packages
            .iter()
            .filter_map(|dist| dist.strip_prefix('-'))
    }
}

/// A structured representation of a user request extracted from the comment
/// lines of a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRequest {
    /// The datetime string from the revision header.
    pub date: String,

    /// The command line that was run (from `# cmd: ...`).
    pub cmd: Option<String>,

    /// The action that was performed (from `# <action> specs: ...`).
    pub action: Option<String>,

    /// Specs for install/update/create actions.
    pub update_specs: Vec<String>,

    /// Specs for remove actions.
    pub remove_specs: Vec<String>,

    /// Distribution strings that were linked.
    pub link_dists: Vec<String>,

    /// Distribution strings that were unlinked.
    pub unlink_dists: Vec<String>,
}

/// Errors that can occur when working with history files.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The history file contents could not be parsed.
    #[error("failed to parse history: {0}")]
    ParseError(String),
}

/// A revision to be appended to a history file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revision {
    /// Timestamp string, typically `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,

    /// The command line that triggered this revision.
    pub cmd: Option<String>,

    /// The specs the user requested to install or update.
    pub update_specs: Vec<String>,

    /// The specs the user requested to remove.
    pub remove_specs: Vec<String>,

    /// Distribution strings that were unlinked in this revision.
    pub removed: BTreeSet<String>,

    /// Distribution strings that were linked in this revision.
    pub added: BTreeSet<String>,
}

/// The parsed contents of a `conda-meta/history` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHistory {
    /// The list of revisions parsed from the file.
    pub revisions: Vec<HistoryRevision>,
}

impl ParsedHistory {
    /// Returns a reference to the latest revision, if any.
    pub fn latest(&self) -> Option<&HistoryRevision> {
        self.revisions.last()
    }

    /// Extracts structured [`UserRequest`]s from the parsed revisions. A
    /// request is produced for every revision that carries a `# cmd:`
    /// comment.
    pub fn user_requests(&self) -> Vec<UserRequest> {
        let cmd_re = lazy_regex::regex!(r"^#\s*cmd:\s*(.+)$");
        let spec_re = lazy_regex::regex!(r"^#\s*(\w+)\s*specs:\s*(.+)?$");

        let mut requests = Vec::new();
        for rev in &self.revisions {
            let mut req = UserRequest {
                date: rev.timestamp.clone(),
                link_dists: rev.link_dists().map(ToOwned::to_owned).collect(),
                unlink_dists: rev.unlink_dists().map(ToOwned::to_owned).collect(),
                ..Default::default()
            };

            for comment in &rev.comments {
                if let Some(caps) = cmd_re.captures(comment) {
                    req.cmd = Some(caps[1].to_string());
                }
                if let Some(caps) = spec_re.captures(comment) {
                    let action = caps[1].to_string();
                    let specs_str = caps.get(2).map_or("", |m| m.as_str());
                    let specs = parse_specs_string(specs_str);
                    match action.as_str() {
                        "install" | "create" | "update" => {
                            req.action = Some(action);
                            req.update_specs = specs;
                        }
                        "remove" | "uninstall" => {
                            req.action = Some(action);
                            req.remove_specs = specs;
                        }
                        _ => req.action = Some(action),
                    }
                }
            }

            if req.cmd.is_some() {
                requests.push(req);
            }
        }
        requests
    }
}

/// Provides read and append access to the `conda-meta/history` file of an
/// environment prefix.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    /// Creates a new `History` pointing at `<prefix>/conda-meta/history`.
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self {
            path: prefix.as_ref().join("conda-meta").join("history"),
        }
    }

    /// Creates a `History` from an explicit path to a history file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path to the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the history file. A missing file parses as an empty history.
    pub fn parse(&self) -> Result<ParsedHistory, HistoryError> {
        if !self.path.exists() {
            return Ok(ParsedHistory::default());
        }
        let contents = fs_err::read_to_string(&self.path)?;
        Self::parse_str(&contents)
    }

    /// Parses a history string. Comments appearing before the first revision
    /// header are ignored, which matches conda's behaviour.
    pub fn parse_str(contents: &str) -> Result<ParsedHistory, HistoryError> {
        let header_re = lazy_regex::regex!(r"^==>\s*(.+?)\s*<==$");

        let mut revisions: Vec<HistoryRevision> = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(caps) = header_re.captures(line) {
                revisions.push(HistoryRevision {
                    timestamp: caps[1].to_string(),
                    packages: BTreeSet::new(),
                    comments: Vec::new(),
                });
            } else if let Some(revision) = revisions.last_mut() {
                if line.starts_with('#') {
                    revision.comments.push(line.to_owned());
                } else {
                    revision.packages.insert(line.to_owned());
                }
            }
        }

        Ok(ParsedHistory { revisions })
    }

    /// Appends a revision to the history file, creating the file (and the
    /// `conda-meta` directory) if necessary. The write goes to a temporary
    /// sibling holding the previous contents plus the new entry, which is
    /// then renamed over the history file.
    pub fn write_revision(&self, revision: &Revision) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let previous = match fs_err::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut temp = tempfile::NamedTempFile::new_in(
            self.path.parent().expect("history path always has a parent"),
        )
        .map_err(HistoryError::from_io)?;

        temp.write_all(previous.as_bytes())
            .map_err(HistoryError::from_io)?;
        write!(temp, "{}", format_revision(revision)).map_err(HistoryError::from_io)?;
        temp.flush().map_err(HistoryError::from_io)?;
        temp.as_file().sync_all().map_err(HistoryError::from_io)?;
        temp.persist(&self.path)
            .map_err(|e| HistoryError::IoError(e.error))?;
        Ok(())
    }
}

impl HistoryError {
    fn from_io(e: std::io::Error) -> Self {
        HistoryError::IoError(e)
    }
}

fn format_revision(revision: &Revision) -> String {
    let mut out = String::new();
    out.push_str(&format!("==> {} <==\n", revision.timestamp));
    if let Some(cmd) = &revision.cmd {
        out.push_str(&format!("# cmd: {cmd}\n"));
    }
    if !revision.update_specs.is_empty() {
        out.push_str(&format!(
            "# update specs: [{}]\n",
            revision
                .update_specs
                .iter()
                .map(|spec| format!("'{spec}'"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if !revision.remove_specs.is_empty() {
        out.push_str(&format!(
            "# remove specs: [{}]\n",
            revision
                .remove_specs
                .iter()
                .map(|spec| format!("'{spec}'"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    for dist in &revision.removed {
        out.push_str(&format!("-{dist}\n"));
    }
    for dist in &revision.added {
        out.push_str(&format!("+{dist}\n"));
    }
    out
}

/// Parses a conda-style spec list: either `['a', 'b']` or a comma separated
/// list.
fn parse_specs_string(specs: &str) -> Vec<String> {
    specs
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|spec| spec.trim().trim_matches('\'').trim_matches('"').to_owned())
        .filter(|spec| !spec.is_empty())
        .collect()
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::{History, Revision};

    #[test]
    fn test_parse() {
        let contents = r#"==> 2023-01-01 10:00:00 <==
# cmd: krait install python
# update specs: ['python >=3.10']
+https://conda.anaconda.org/conda-forge::python-3.10.9-h7a1cb2a_0
==> 2023-02-01 11:00:00 <==
# cmd: krait remove python
# remove specs: ['python']
-https://conda.anaconda.org/conda-forge::python-3.10.9-h7a1cb2a_0
"#;
        let parsed = History::parse_str(contents).unwrap();
        assert_eq!(parsed.revisions.len(), 2);

        let requests = parsed.user_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].cmd.as_deref(), Some("krait install python"));
        assert_eq!(requests[0].update_specs, vec!["python >=3.10".to_owned()]);
        assert_eq!(requests[0].link_dists.len(), 1);
        assert_eq!(requests[1].remove_specs, vec!["python".to_owned()]);
        assert_eq!(requests[1].unlink_dists.len(), 1);
    }

    #[test]
    fn test_append_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let history = History::new(temp_dir.path());

        history
            .write_revision(&Revision {
                timestamp: "2023-01-01 10:00:00".to_owned(),
                cmd: Some("krait install foo".to_owned()),
                update_specs: vec!["foo >=1.0".to_owned()],
                remove_specs: Vec::new(),
                removed: BTreeSet::new(),
                added: BTreeSet::from(["conda-forge::foo-1.0-0".to_owned()]),
            })
            .unwrap();
        history
            .write_revision(&Revision {
                timestamp: "2023-01-02 10:00:00".to_owned(),
                cmd: Some("krait remove foo".to_owned()),
                update_specs: Vec::new(),
                remove_specs: vec!["foo".to_owned()],
                removed: BTreeSet::from(["conda-forge::foo-1.0-0".to_owned()]),
                added: BTreeSet::new(),
            })
            .unwrap();

        let parsed = history.parse().unwrap();
        assert_eq!(parsed.revisions.len(), 2);
        let requests = parsed.user_requests();
        assert_eq!(requests[0].update_specs, vec!["foo >=1.0".to_owned()]);
        assert_eq!(
            requests[1].unlink_dists,
            vec!["conda-forge::foo-1.0-0".to_owned()]
        );
        assert_eq!(
            parsed.latest().unwrap().timestamp,
            "2023-01-02 10:00:00"
        );
    }
}
