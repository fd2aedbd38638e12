//! Operator commands — the small slash-command language read from
//! stdin, plus the tracked-file list the upload commands operate on.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use thiserror::Error;

pub const HELP: &str = "\
Available commands:
  /add <file>                  Add a file to the tracked list
  /ls                          List tracked files
  /up <file> or #<number>      Upload a file to the peer
  /w <file> or #<number>       Watch a file for changes
  /woff <file> or #<number>    Stop watching a file
  /cl                          Clear the console
";

/// A file argument, either a path or a `#N` index into the tracked
/// list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Path(PathBuf),
    Index(usize),
}

impl FromStr for FileRef {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('#') {
            Some(digits) => digits
                .parse()
                .map(FileRef::Index)
                .map_err(|_| CommandError::BadIndex(s.to_string())),
            None => Ok(FileRef::Path(PathBuf::from(s))),
        }
    }
}

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Add(PathBuf),
    List,
    Upload(FileRef),
    Watch(FileRef),
    Unwatch(FileRef),
    Clear,
}

impl Intent {
    /// Parse one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Intent>, CommandError> {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Ok(None);
        };
        let mut arg = |usage: &'static str| {
            parts
                .next()
                .ok_or(CommandError::MissingArgument { usage })
        };
        let intent = match command {
            "/add" => Intent::Add(PathBuf::from(arg("/add <file>")?)),
            "/ls" => Intent::List,
            "/up" => Intent::Upload(arg("/up <file> or /up #<number>")?.parse()?),
            "/w" => Intent::Watch(arg("/w <file> or /w #<number>")?.parse()?),
            "/woff" => Intent::Unwatch(arg("/woff <file> or /woff #<number>")?.parse()?),
            "/cl" => Intent::Clear,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(intent))
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("usage: {usage}")]
    MissingArgument { usage: &'static str },
    #[error("invalid index {0:?}")]
    BadIndex(String),
    #[error("index {0} is out of range")]
    IndexOutOfRange(usize),
    #[error("unknown command {0:?}\n{HELP}")]
    Unknown(String),
    #[error("cannot access {path}: {source}")]
    Inaccessible {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub size: u64,
    pub watched: bool,
}

/// The operator's list of files available for upload by index.
/// Cheap to clone and shared between the stdin loop and the session.
#[derive(Clone, Default)]
pub struct FileTracker {
    files: Arc<Mutex<Vec<TrackedFile>>>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a file, recording its current size. Re-adding an already
    /// tracked path refreshes the size instead of duplicating it.
    pub fn add(&self, path: &Path) -> Result<u64, CommandError> {
        let meta = std::fs::metadata(path).map_err(|source| CommandError::Inaccessible {
            path: path.to_path_buf(),
            source,
        })?;
        let mut files = self.files.lock().expect("tracker lock poisoned");
        if let Some(existing) = files.iter_mut().find(|f| f.path == path) {
            existing.size = meta.len();
        } else {
            files.push(TrackedFile {
                path: path.to_path_buf(),
                size: meta.len(),
                watched: false,
            });
        }
        Ok(meta.len())
    }

    /// Resolve a file reference to a concrete path. A path reference
    /// is tracked on first use; an index must already exist.
    pub fn resolve(&self, file_ref: &FileRef) -> Result<PathBuf, CommandError> {
        match file_ref {
            FileRef::Index(index) => {
                let files = self.files.lock().expect("tracker lock poisoned");
                files
                    .get(*index)
                    .map(|f| f.path.clone())
                    .ok_or(CommandError::IndexOutOfRange(*index))
            }
            FileRef::Path(path) => {
                self.add(path)?;
                Ok(path.clone())
            }
        }
    }

    pub fn set_watched(&self, path: &Path, watched: bool) {
        let mut files = self.files.lock().expect("tracker lock poisoned");
        if let Some(entry) = files.iter_mut().find(|f| f.path == path) {
            entry.watched = watched;
        }
    }

    /// The tracked path whose file name matches `name`, if any. Used
    /// to find the source of an explicitly uploaded file when the peer
    /// asks for a chunk again.
    pub fn source_for_name(&self, name: &str) -> Option<PathBuf> {
        let files = self.files.lock().expect("tracker lock poisoned");
        files
            .iter()
            .find(|f| f.path.file_name().is_some_and(|n| n == name))
            .map(|f| f.path.clone())
    }

    pub fn render_list(&self) -> String {
        let files = self.files.lock().expect("tracker lock poisoned");
        let mut out = String::from("Index | Watched | Size | Path\n");
        for (index, file) in files.iter().enumerate() {
            let watched = if file.watched { "YES" } else { "NO" };
            let _ = writeln!(
                out,
                "{index:5} | {watched:7} | {:4} | {}",
                file.size,
                file.path.display()
            );
        }
        out
    }
}
