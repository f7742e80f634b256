//! Process-wide registries: opened files and MCA labels.

use crate::error::{MxfError, Result};
use crate::metadata::{InstanceUid, McaLabel, McaLabelKind};
use std::collections::{HashMap, HashSet};

/// Numeric id of a registered file.
pub type FileId = usize;

/// One registered file.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute URI of the file.
    pub absolute_uri: String,
    /// URI relative to the registration origin, when known.
    pub relative_uri: String,
    /// The filename as passed by the caller.
    pub filename: String,
}

/// Registry of every file opened for a clip, including companion files.
///
/// Readers register themselves on open; peers resolve external references
/// through this table. Append-only during open, read-only thereafter.
#[derive(Debug, Default)]
pub struct FileIndex {
    entries: Vec<FileEntry>,
}

impl FileIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file, reusing the id of an already-registered absolute
    /// URI.
    pub fn register_file(&mut self, absolute_uri: String, relative_uri: String, filename: String) -> FileId {
        if let Some(id) = self
            .entries
            .iter()
            .position(|e| !e.absolute_uri.is_empty() && e.absolute_uri == absolute_uri)
        {
            return id;
        }
        self.entries.push(FileEntry {
            absolute_uri,
            relative_uri,
            filename,
        });
        self.entries.len() - 1
    }

    /// Fetch an entry by id.
    pub fn entry(&self, id: FileId) -> Option<&FileEntry> {
        self.entries.get(id)
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no file was registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry mapping MCA label link ids to their sub-descriptors, used to
/// dereference soundfield-group parents from channel labels.
#[derive(Debug, Default)]
pub struct McaLabelIndex {
    labels: HashMap<InstanceUid, McaLabel>,
    referenced: HashSet<InstanceUid>,
}

impl McaLabelIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a label by its link id.
    pub fn register_label(&mut self, label: &McaLabel) {
        self.labels.insert(label.link_id, label.clone());
    }

    /// Look up a label by link id.
    pub fn label(&self, link_id: &InstanceUid) -> Option<&McaLabel> {
        self.labels.get(link_id)
    }

    /// Whether a soundfield group label was referenced by a channel label.
    pub fn is_referenced(&self, link_id: &InstanceUid) -> bool {
        self.referenced.contains(link_id)
    }

    /// Check that the references out of `label` resolve, and record them.
    pub fn check_references(&mut self, label: &McaLabel) -> Result<()> {
        if let Some(group_link_id) = label.soundfield_group_link_id {
            let group = self.labels.get(&group_link_id).ok_or_else(|| {
                MxfError::InvalidHeaderMetadata(format!(
                    "MCA label '{}' references an unknown soundfield group",
                    label.tag_symbol
                ))
            })?;
            if group.kind != McaLabelKind::SoundfieldGroup {
                return Err(MxfError::InvalidHeaderMetadata(format!(
                    "MCA label '{}' group reference is not a soundfield group",
                    label.tag_symbol
                )));
            }
            self.referenced.insert(group_link_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ul::Ul;

    #[test]
    fn test_file_index_dedupes() {
        let mut index = FileIndex::new();
        let a = index.register_file("file:///a.mxf".into(), "a.mxf".into(), "a.mxf".into());
        let b = index.register_file("file:///b.mxf".into(), "b.mxf".into(), "b.mxf".into());
        let a_again = index.register_file("file:///a.mxf".into(), String::new(), "a.mxf".into());
        assert_ne!(a, b);
        assert_eq!(a, a_again);
        assert_eq!(index.len(), 2);
        assert_eq!(index.entry(b).unwrap().filename, "b.mxf");
    }

    fn label(kind: McaLabelKind, link_id: u8, group: Option<u8>) -> McaLabel {
        McaLabel {
            kind,
            dictionary_id: Ul::null(),
            link_id: {
                let mut id = [0u8; 16];
                id[0] = link_id;
                id
            },
            tag_symbol: "chL".into(),
            tag_name: None,
            channel_id: Some(1),
            soundfield_group_link_id: group.map(|g| {
                let mut id = [0u8; 16];
                id[0] = g;
                id
            }),
        }
    }

    #[test]
    fn test_mca_label_references() {
        let mut index = McaLabelIndex::new();
        let group = label(McaLabelKind::SoundfieldGroup, 2, None);
        let channel = label(McaLabelKind::AudioChannel, 1, Some(2));

        index.register_label(&group);
        index.register_label(&channel);
        index.check_references(&channel).unwrap();
        assert!(index.is_referenced(&group.link_id));
    }

    #[test]
    fn test_mca_label_unresolved_reference() {
        let mut index = McaLabelIndex::new();
        let channel = label(McaLabelKind::AudioChannel, 1, Some(9));
        index.register_label(&channel);
        assert!(index.check_references(&channel).is_err());
    }
}
