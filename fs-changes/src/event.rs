//! Change events and the batches they are delivered in.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// A single detected change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Absolute path of the affected file or directory.
    pub path: PathBuf,

    /// What happened to it.
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Create a new change event.
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// The `(path, kind)` pair handed to callers that want plain strings.
    pub fn as_pair(&self) -> (String, &'static str) {
        (self.path.to_string_lossy().into_owned(), self.kind.as_str())
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.kind, self.path.display())
    }
}

/// Kind of change.
///
/// The set a backend can produce differs: polling only reports
/// `Created`, `Deleted` and `Updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Path appeared.
    #[serde(rename = "created")]
    Created,

    /// Path disappeared.
    #[serde(rename = "deleted")]
    Deleted,

    /// File content changed.
    #[serde(rename = "updated")]
    Updated,

    /// Old side of a rename.
    #[serde(rename = "renamed from")]
    RenamedFrom,

    /// New side of a rename.
    #[serde(rename = "renamed to")]
    RenamedTo,

    /// Renamed without the platform telling which side.
    #[serde(rename = "moved")]
    Moved,

    /// Metadata or otherwise unspecified change.
    #[serde(rename = "changed")]
    Changed,
}

impl ChangeKind {
    /// External string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::Updated => "updated",
            Self::RenamedFrom => "renamed from",
            Self::RenamedTo => "renamed to",
            Self::Moved => "moved",
            Self::Changed => "changed",
        }
    }

    /// Map a raw notify kind. `None` for kinds that are not reported.
    ///
    /// `Modify(Name(Both))` maps to `RenamedFrom`; the caller pairs the second
    /// path with `RenamedTo`.
    pub fn from_notify(kind: notify::EventKind) -> Option<Self> {
        use notify::EventKind;
        use notify::event::{ModifyKind, RenameMode};

        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Remove(_) => Some(Self::Deleted),
            EventKind::Modify(ModifyKind::Data(_)) => Some(Self::Updated),
            EventKind::Modify(ModifyKind::Name(rename)) => match rename {
                RenameMode::From | RenameMode::Both => Some(Self::RenamedFrom),
                RenameMode::To => Some(Self::RenamedTo),
                RenameMode::Any | RenameMode::Other => Some(Self::Moved),
            },
            EventKind::Modify(_) => Some(Self::Changed),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }

    /// Whether the path may now be a directory that needs registering.
    pub fn may_introduce_path(self) -> bool {
        matches!(self, Self::Created | Self::RenamedTo | Self::Moved)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "deleted" => Ok(Self::Deleted),
            "updated" => Ok(Self::Updated),
            "renamed from" => Ok(Self::RenamedFrom),
            "renamed to" => Ok(Self::RenamedTo),
            "moved" => Ok(Self::Moved),
            "changed" => Ok(Self::Changed),
            other => Err(WatcherError::Config(format!("unknown change kind: {other}"))),
        }
    }
}

/// Events detected in one pump pass or one polling scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Events in detection order.
    pub events: Vec<ChangeEvent>,

    /// When the batch was started.
    pub detected_at: DateTime<Utc>,
}

impl ChangeBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            detected_at: Utc::now(),
        }
    }

    /// Add an event to the batch.
    pub fn push(&mut self, event: ChangeEvent) {
        self.events.push(event);
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Iterate over the events.
    pub fn iter(&self) -> std::slice::Iter<'_, ChangeEvent> {
        self.events.iter()
    }

    /// Whether any event in the batch concerns `path`.
    pub fn touches(&self, path: &Path) -> bool {
        self.events.iter().any(|e| e.path == path)
    }

    /// Drop repeated `(path, kind)` pairs, keeping the first of each in order.
    pub fn deduplicate(&mut self) {
        let mut seen: HashSet<(PathBuf, ChangeKind)> = HashSet::new();
        self.events
            .retain(|event| seen.insert((event.path.clone(), event.kind)));
    }
}

impl Default for ChangeBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for ChangeBatch {
    type Item = ChangeEvent;
    type IntoIter = std::vec::IntoIter<ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeBatch {
    type Item = &'a ChangeEvent;
    type IntoIter = std::slice::Iter<'a, ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl Extend<ChangeEvent> for ChangeBatch {
    fn extend<T: IntoIterator<Item = ChangeEvent>>(&mut self, iter: T) {
        self.events.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::EventKind;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, ModifyKind, RenameMode};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_strings_round_trip() {
        for kind in [
            ChangeKind::Created,
            ChangeKind::Deleted,
            ChangeKind::Updated,
            ChangeKind::RenamedFrom,
            ChangeKind::RenamedTo,
            ChangeKind::Moved,
            ChangeKind::Changed,
        ] {
            assert_eq!(kind.as_str().parse::<ChangeKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
        assert!("touched".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn test_notify_kind_mapping() {
        assert_eq!(
            ChangeKind::from_notify(EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            ChangeKind::from_notify(EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeKind::Updated)
        );
        assert_eq!(
            ChangeKind::from_notify(EventKind::Modify(ModifyKind::Metadata(
                MetadataKind::Permissions
            ))),
            Some(ChangeKind::Changed)
        );
        assert_eq!(
            ChangeKind::from_notify(EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(ChangeKind::RenamedTo)
        );
        assert_eq!(
            ChangeKind::from_notify(EventKind::Modify(ModifyKind::Name(RenameMode::Any))),
            Some(ChangeKind::Moved)
        );
        assert_eq!(
            ChangeKind::from_notify(EventKind::Access(AccessKind::Any)),
            None
        );
        assert_eq!(ChangeKind::from_notify(EventKind::Other), None);
    }

    #[test]
    fn test_event_pair_shape() {
        let event = ChangeEvent::new(ChangeKind::RenamedFrom, "/srv/app/a.txt");
        assert_eq!(
            event.as_pair(),
            ("/srv/app/a.txt".to_string(), "renamed from")
        );
        assert_eq!(event.to_string(), "renamed from\t/srv/app/a.txt");
    }

    #[test]
    fn test_batch_dedup_keeps_order() {
        let mut batch = ChangeBatch::new();
        batch.push(ChangeEvent::new(ChangeKind::Created, "/t/a.txt"));
        batch.push(ChangeEvent::new(ChangeKind::Updated, "/t/a.txt"));
        batch.push(ChangeEvent::new(ChangeKind::Created, "/t/b.txt"));
        batch.push(ChangeEvent::new(ChangeKind::Updated, "/t/a.txt"));
        batch.push(ChangeEvent::new(ChangeKind::Created, "/t/a.txt"));

        batch.deduplicate();

        let kinds: Vec<_> = batch.iter().map(ChangeEvent::as_pair).collect();
        assert_eq!(
            kinds,
            vec![
                ("/t/a.txt".to_string(), "created"),
                ("/t/a.txt".to_string(), "updated"),
                ("/t/b.txt".to_string(), "created"),
            ]
        );
        assert!(batch.touches(Path::new("/t/b.txt")));
    }
}
