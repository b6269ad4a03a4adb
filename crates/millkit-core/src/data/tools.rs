//! Tool offset library
//!
//! Each instrument mounted on the gantry sits at a fixed offset from the
//! machine reference point. The library maps a normalised tool name to that
//! offset and re-persists the whole list after every mutation.

use super::Coordinates;
use crate::error::{ConfigError, Error, Result, ToolError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the reference tool that must always exist
pub const CENTER_TOOL: &str = "center";

/// Normalise a tool name into the library key
pub fn normalize_tool_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Anything that can name a tool
pub trait ToolIdentifier {
    /// Raw tool name; normalised by the library
    fn name(&self) -> &str;
}

impl ToolIdentifier for str {
    fn name(&self) -> &str {
        self
    }
}

impl ToolIdentifier for String {
    fn name(&self) -> &str {
        self.as_str()
    }
}

impl<T: ToolIdentifier + ?Sized> ToolIdentifier for &T {
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Tool identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolId(
    /// Normalised tool name.
    String,
);

impl ToolId {
    /// Build an identifier, normalising the name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(normalize_tool_name(name.as_ref()))
    }

    /// The normalised name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolIdentifier for ToolId {
    fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Standard instruments fitted to the gantry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    /// Machine reference point
    Center,
    /// Liquid handling pipette
    Pipette,
    /// Electrochemistry electrode
    Electrode,
    /// Camera lens
    Lens,
    /// Vial decapper
    Decapper,
}

impl Instrument {
    /// Every standard instrument, in default library order
    pub fn all() -> &'static [Instrument] {
        &[
            Instrument::Center,
            Instrument::Pipette,
            Instrument::Electrode,
            Instrument::Decapper,
            Instrument::Lens,
        ]
    }
}

impl ToolIdentifier for Instrument {
    fn name(&self) -> &str {
        match self {
            Instrument::Center => "center",
            Instrument::Pipette => "pipette",
            Instrument::Electrode => "electrode",
            Instrument::Lens => "lens",
            Instrument::Decapper => "decapper",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ToolIdentifier::name(self))
    }
}

/// A named offset vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ToolRecord", into = "ToolRecord")]
pub struct ToolOffset {
    /// Normalised tool name
    pub name: String,
    /// Offset from the machine reference point
    pub offset: Coordinates,
}

/// On-disk shape: `{name, x, y, z}`
#[derive(Serialize, Deserialize)]
struct ToolRecord {
    name: String,
    x: f64,
    y: f64,
    z: f64,
}

impl From<ToolRecord> for ToolOffset {
    fn from(r: ToolRecord) -> Self {
        ToolOffset::new(&r.name, Coordinates::new(r.x, r.y, r.z))
    }
}

impl From<ToolOffset> for ToolRecord {
    fn from(t: ToolOffset) -> Self {
        ToolRecord {
            name: t.name,
            x: t.offset.x(),
            y: t.offset.y(),
            z: t.offset.z(),
        }
    }
}

impl ToolOffset {
    /// Create a tool offset, normalising the name
    pub fn new(name: &str, offset: Coordinates) -> Self {
        Self {
            name: normalize_tool_name(name),
            offset,
        }
    }
}

/// Default tool set written when no usable file exists
pub fn default_tools() -> Vec<ToolOffset> {
    Instrument::all()
        .iter()
        .map(|i| ToolOffset::new(ToolIdentifier::name(i), Coordinates::zero()))
        .collect()
}

/// Ordered, persisted tool offset library
#[derive(Debug, Clone)]
pub struct ToolLibrary {
    tools: Vec<ToolOffset>,
    path: Option<PathBuf>,
}

impl ToolLibrary {
    /// Library with the default tools that never touches disk
    pub fn in_memory() -> Self {
        Self {
            tools: default_tools(),
            path: None,
        }
    }

    /// Load the library from `path`.
    ///
    /// A missing or unreadable file is replaced by the default tool set,
    /// which is written back immediately.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tools = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<ToolOffset>>(&content) {
                Ok(tools) => Some(tools),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Tool file corrupt, restoring defaults");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No tool file, creating defaults");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let mut library = Self {
            tools: tools.clone().unwrap_or_else(default_tools),
            path: Some(path),
        };
        let repaired = library.ensure_center();
        if tools.is_none() || repaired {
            library.save()?;
        }
        tracing::debug!(count = library.tools.len(), "Loaded tool library");
        Ok(library)
    }

    fn ensure_center(&mut self) -> bool {
        if self.tools.iter().any(|t| t.name == CENTER_TOOL) {
            return false;
        }
        self.tools
            .insert(0, ToolOffset::new(CENTER_TOOL, Coordinates::zero()));
        true
    }

    /// Backing file, if persisted
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the full list
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.tools).map_err(|e| {
            Error::from(ConfigError::SaveFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::SaveFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn key(tool: &impl ToolIdentifier) -> Result<String> {
        let key = normalize_tool_name(tool.name());
        if key.is_empty() {
            return Err(ToolError::InvalidName(tool.name().to_string()).into());
        }
        Ok(key)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.tools.iter().position(|t| t.name == key)
    }

    /// Look up a tool
    pub fn get(&self, tool: impl ToolIdentifier) -> Option<&ToolOffset> {
        let key = normalize_tool_name(tool.name());
        self.tools.iter().find(|t| t.name == key)
    }

    /// Offset for a tool, failing if it is unknown
    pub fn offset(&self, tool: impl ToolIdentifier) -> Result<Coordinates> {
        let key = Self::key(&tool)?;
        self.get(key.as_str())
            .map(|t| t.offset)
            .ok_or_else(|| ToolError::NotFound(key).into())
    }

    /// Insert a tool or replace an existing one
    pub fn add_tool(&mut self, tool: impl ToolIdentifier, offset: Coordinates) -> Result<()> {
        let key = Self::key(&tool)?;
        match self.position(&key) {
            Some(idx) => self.tools[idx].offset = offset,
            None => self.tools.push(ToolOffset::new(&key, offset)),
        }
        tracing::info!(tool = %key, %offset, "Tool offset stored");
        self.save()
    }

    /// Replace the offset of an existing tool
    pub fn update_tool(&mut self, tool: impl ToolIdentifier, offset: Coordinates) -> Result<()> {
        let key = Self::key(&tool)?;
        let idx = self
            .position(&key)
            .ok_or_else(|| ToolError::NotFound(key.clone()))?;
        self.tools[idx].offset = offset;
        tracing::info!(tool = %key, %offset, "Tool offset updated");
        self.save()
    }

    /// Add a delta to an existing tool's offset and return the new offset
    pub fn adjust_offset(
        &mut self,
        tool: impl ToolIdentifier,
        delta: Coordinates,
    ) -> Result<Coordinates> {
        let key = Self::key(&tool)?;
        let idx = self
            .position(&key)
            .ok_or_else(|| ToolError::NotFound(key.clone()))?;
        let updated = self.tools[idx].offset.offset_by(&delta);
        self.tools[idx].offset = updated;
        self.save()?;
        Ok(updated)
    }

    /// Remove a tool. The center tool cannot be removed.
    pub fn delete_tool(&mut self, tool: impl ToolIdentifier) -> Result<ToolOffset> {
        let key = Self::key(&tool)?;
        if key == CENTER_TOOL {
            return Err(ToolError::Protected(key).into());
        }
        let idx = self
            .position(&key)
            .ok_or_else(|| ToolError::NotFound(key.clone()))?;
        let removed = self.tools.remove(idx);
        tracing::info!(tool = %key, "Tool removed");
        self.save()?;
        Ok(removed)
    }

    /// Tool names in library order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// All tools in library order
    pub fn tools(&self) -> &[ToolOffset] {
        &self.tools
    }

    /// Number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the library holds no tools
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolLibrary {
    fn default() -> Self {
        Self::in_memory()
    }
}
