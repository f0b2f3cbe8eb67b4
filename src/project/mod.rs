// Project persistence - RON serialization of the whole data model

use crate::sequencer::manager::PatternManager;
use crate::sequencer::pattern::Pattern;
use crate::sequencer::sequence::Sequence;
use crate::sequencer::song::Song;
use crate::sequencer::{PatternId, SequenceId, SongId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("serialization error: {0}")]
    Serialize(#[from] ron::Error),
    #[error("unsupported project version {0}")]
    UnsupportedVersion(u32),
}

/// On-disk form of the data model. Maps are ordered, so re-serializing an
/// unchanged model reproduces the file byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: u32,
    pub trigger_channel: u8,
    pub input_channel: Option<u8>,
    pub current_song: SongId,
    pub patterns: BTreeMap<PatternId, Pattern>,
    pub sequences: BTreeMap<SequenceId, Sequence>,
    pub songs: BTreeMap<SongId, Song>,
}

impl ProjectFile {
    pub fn capture(manager: &PatternManager) -> Self {
        Self {
            version: FORMAT_VERSION,
            trigger_channel: manager.trigger_channel(),
            input_channel: manager.input_channel(),
            current_song: manager.current_song(),
            patterns: manager
                .patterns()
                .iter()
                .map(|(id, pattern)| (*id, (**pattern).clone()))
                .collect(),
            sequences: manager.sequences().clone(),
            songs: manager.songs().clone(),
        }
    }

    pub fn apply(self, manager: &mut PatternManager) {
        manager.restore(
            self.patterns,
            self.sequences,
            self.songs,
            self.current_song,
            self.trigger_channel,
            self.input_channel,
        );
    }
}

/// Serializes the whole model to a RON file. Runs on the control thread;
/// the realtime engine keeps playing from its snapshot meanwhile.
pub fn save(manager: &PatternManager, path: &Path) -> Result<(), ProjectError> {
    let file = ProjectFile::capture(manager);
    let text = ron::ser::to_string_pretty(&file, ron::ser::PrettyConfig::default())?;
    std::fs::write(path, text)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<ProjectFile, ProjectError> {
    let text = std::fs::read_to_string(path)?;
    let file: ProjectFile = ron::from_str(&text)?;
    if file.version > FORMAT_VERSION {
        return Err(ProjectError::UnsupportedVersion(file.version));
    }
    Ok(file)
}
