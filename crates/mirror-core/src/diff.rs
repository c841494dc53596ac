//! Diff engine: classify the changes between two snapshots.

use crate::snapshot::{file_name, parent_dir, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default name of the file whose lines are run remotely when it changes.
pub const DEFAULT_COMMAND_FILE: &str = ".command";

/// Default suffixes of editor scratch files that are never mirrored.
pub const DEFAULT_TEMP_SUFFIXES: &[&str] = &[".swp"];

/// Classification policy applied on top of the raw timestamp comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffPolicy {
    /// Basename that marks a command file.
    pub command_file: String,
    /// Basename suffixes excluded from created/modified classification.
    pub temp_suffixes: Vec<String>,
    /// Also exclude temp files from deletion classification.
    ///
    /// Temp files are never transferred, so deleting them remotely would only
    /// touch files the mirror does not own.
    pub exclude_temp_on_delete: bool,
}

impl Default for DiffPolicy {
    fn default() -> Self {
        Self {
            command_file: DEFAULT_COMMAND_FILE.to_string(),
            temp_suffixes: DEFAULT_TEMP_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            exclude_temp_on_delete: true,
        }
    }
}

impl DiffPolicy {
    pub fn is_command_file(&self, path: &str) -> bool {
        file_name(path) == self.command_file
    }

    pub fn is_temp_file(&self, path: &str) -> bool {
        let name = file_name(path);
        self.temp_suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }
}

/// A single dispatch signal derived from a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created { path: String, dir: String },
    Modified { path: String, dir: String },
    Deleted { path: String, dir: String },
    CommandTriggered { path: String, dir: String },
}

impl Event {
    fn new(make: fn(String, String) -> Event, path: &str) -> Self {
        make(path.to_string(), parent_dir(path).to_string())
    }

    pub fn path(&self) -> &str {
        match self {
            Event::Created { path, .. }
            | Event::Modified { path, .. }
            | Event::Deleted { path, .. }
            | Event::CommandTriggered { path, .. } => path,
        }
    }

    /// Directory containing the path (`""` at the top level).
    pub fn dir(&self) -> &str {
        match self {
            Event::Created { dir, .. }
            | Event::Modified { dir, .. }
            | Event::Deleted { dir, .. }
            | Event::CommandTriggered { dir, .. } => dir,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Event::Created { .. } => "created",
            Event::Modified { .. } => "modified",
            Event::Deleted { .. } => "deleted",
            Event::CommandTriggered { .. } => "command",
        }
    }
}

/// Changes between a previous and a current snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub created: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// Command files seen for the first time. Logged, never executed.
    pub new_command_files: BTreeSet<String>,
    /// Command files that existed before and have a newer timestamp.
    pub triggered_command_files: BTreeSet<String>,
}

impl Diff {
    /// True when nothing needs to be dispatched or reported.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.new_command_files.is_empty()
            && self.triggered_command_files.is_empty()
    }

    /// Dispatch order: all deletions, then creations, modifications and
    /// command triggers, each group in path order.
    pub fn events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.deleted.len()
                + self.created.len()
                + self.modified.len()
                + self.triggered_command_files.len(),
        );
        let groups: [(&BTreeSet<String>, fn(String, String) -> Event); 4] = [
            (&self.deleted, |path, dir| Event::Deleted { path, dir }),
            (&self.created, |path, dir| Event::Created { path, dir }),
            (&self.modified, |path, dir| Event::Modified { path, dir }),
            (&self.triggered_command_files, |path, dir| {
                Event::CommandTriggered { path, dir }
            }),
        ];
        for (paths, make) in groups {
            events.extend(paths.iter().map(|path| Event::new(make, path)));
        }
        events
    }
}

/// Compare two snapshots.
///
/// A path counts as modified only when its timestamp is strictly greater than
/// before, so `compute(s, s)` is always empty.
pub fn compute(prev: &Snapshot, cur: &Snapshot, policy: &DiffPolicy) -> Diff {
    let mut diff = Diff::default();

    for path in prev.paths() {
        if cur.contains(path) {
            continue;
        }
        if policy.exclude_temp_on_delete && policy.is_temp_file(path) {
            continue;
        }
        diff.deleted.insert(path.to_string());
    }

    for (path, mtime) in cur.iter() {
        let is_command = policy.is_command_file(path);
        if !is_command && policy.is_temp_file(path) {
            continue;
        }
        match prev.get(path) {
            None if is_command => {
                diff.new_command_files.insert(path.to_string());
            }
            None => {
                diff.created.insert(path.to_string());
            }
            Some(before) if mtime > before => {
                if is_command {
                    diff.triggered_command_files.insert(path.to_string());
                } else {
                    diff.modified.insert(path.to_string());
                }
            }
            Some(_) => {}
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, u64)]) -> Snapshot {
        entries.iter().map(|(p, t)| (*p, *t)).collect()
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_created_from_empty() {
        let diff = compute(&snap(&[]), &snap(&[("a.txt", 100)]), &DiffPolicy::default());
        assert_eq!(diff.created, set(&["a.txt"]));
        assert!(diff.modified.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn test_modified_when_newer() {
        let diff = compute(
            &snap(&[("a.txt", 100)]),
            &snap(&[("a.txt", 150)]),
            &DiffPolicy::default(),
        );
        assert_eq!(diff.modified, set(&["a.txt"]));
        assert!(diff.created.is_empty());
    }

    #[test]
    fn test_deleted_when_missing() {
        let diff = compute(
            &snap(&[("a.txt", 100), ("b.txt", 50)]),
            &snap(&[("b.txt", 50)]),
            &DiffPolicy::default(),
        );
        assert_eq!(diff.deleted, set(&["a.txt"]));
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn test_equal_and_older_timestamps_are_not_modified() {
        let diff = compute(
            &snap(&[("same.txt", 100), ("older.txt", 100)]),
            &snap(&[("same.txt", 100), ("older.txt", 40)]),
            &DiffPolicy::default(),
        );
        assert!(diff.is_empty());
    }

    #[test]
    fn test_compute_against_itself_is_empty() {
        let cur = snap(&[
            ("p/a.txt", 1),
            ("p/.command", 2),
            ("p/x.swp", 3),
            ("p/sub/b", 4),
        ]);
        assert!(compute(&cur, &cur, &DiffPolicy::default()).is_empty());
    }

    #[test]
    fn test_sets_are_disjoint_and_modified_in_both() {
        let prev = snap(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let cur = snap(&[("b", 2), ("c", 9), ("d", 1), ("e", 5), ("f", 6)]);
        let diff = compute(&prev, &cur, &DiffPolicy::default());

        assert!(diff.created.is_disjoint(&diff.deleted));
        for path in &diff.modified {
            assert!(prev.contains(path) && cur.contains(path));
        }
        assert_eq!(diff.created, set(&["e", "f"]));
        assert_eq!(diff.modified, set(&["c"]));
        assert_eq!(diff.deleted, set(&["a"]));
    }

    #[test]
    fn test_temp_files_are_excluded() {
        let prev = snap(&[("p/old.swp", 1), ("p/edit.swp", 1)]);
        let cur = snap(&[("p/new.swp", 1), ("p/edit.swp", 5)]);

        let diff = compute(&prev, &cur, &DiffPolicy::default());
        assert!(diff.is_empty());

        let asymmetric = DiffPolicy {
            exclude_temp_on_delete: false,
            ..DiffPolicy::default()
        };
        let diff = compute(&prev, &cur, &asymmetric);
        assert_eq!(diff.deleted, set(&["p/old.swp"]));
        assert!(diff.created.is_empty());
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn test_new_command_file_is_only_detected() {
        let diff = compute(
            &snap(&[]),
            &snap(&[("p/.command", 10)]),
            &DiffPolicy::default(),
        );
        assert_eq!(diff.new_command_files, set(&["p/.command"]));
        assert!(diff.created.is_empty());
        assert!(diff.triggered_command_files.is_empty());
        assert!(diff.events().is_empty());
    }

    #[test]
    fn test_touched_command_file_is_triggered() {
        let diff = compute(
            &snap(&[("p/sub/.command", 10)]),
            &snap(&[("p/sub/.command", 11)]),
            &DiffPolicy::default(),
        );
        assert_eq!(diff.triggered_command_files, set(&["p/sub/.command"]));
        assert!(diff.modified.is_empty());
        assert_eq!(
            diff.events(),
            vec![Event::CommandTriggered {
                path: "p/sub/.command".into(),
                dir: "p/sub".into(),
            }]
        );
    }

    #[test]
    fn test_removed_command_file_is_deleted_remotely() {
        let diff = compute(
            &snap(&[("proj/.command", 10), ("proj/b.txt", 5)]),
            &snap(&[("proj/b.txt", 5)]),
            &DiffPolicy::default(),
        );
        assert_eq!(diff.deleted, set(&["proj/.command"]));
        assert!(diff.triggered_command_files.is_empty());
    }

    #[test]
    fn test_custom_command_file_name() {
        let policy = DiffPolicy {
            command_file: "RUNME".into(),
            ..DiffPolicy::default()
        };
        let diff = compute(
            &snap(&[("p/RUNME", 1), ("p/.command", 1)]),
            &snap(&[("p/RUNME", 2), ("p/.command", 2)]),
            &policy,
        );
        assert_eq!(diff.triggered_command_files, set(&["p/RUNME"]));
        assert_eq!(diff.modified, set(&["p/.command"]));
    }

    #[test]
    fn test_events_put_deletions_first() {
        let prev = snap(&[("p/z_gone", 1), ("p/a_mod", 1), ("p/.command", 1)]);
        let cur = snap(&[("p/a_new", 1), ("p/a_mod", 2), ("p/.command", 2)]);
        let labels: Vec<_> = compute(&prev, &cur, &DiffPolicy::default())
            .events()
            .iter()
            .map(|e| (e.label(), e.path().to_string()))
            .collect();

        assert_eq!(
            labels,
            vec![
                ("deleted", "p/z_gone".to_string()),
                ("created", "p/a_new".to_string()),
                ("modified", "p/a_mod".to_string()),
                ("command", "p/.command".to_string()),
            ]
        );
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: DiffPolicy = serde_json::from_str(r#"{"temp_suffixes": [".swp", "~"]}"#).unwrap();
        assert_eq!(policy.command_file, DEFAULT_COMMAND_FILE);
        assert!(policy.is_temp_file("notes.txt~"));
        assert!(policy.exclude_temp_on_delete);
    }
}
