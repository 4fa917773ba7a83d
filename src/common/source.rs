use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    rc::Rc,
};

/// `Source` represents some literal source code: a REPL line, a file on
/// disk, or an imported module. It's essentially a string with a path,
/// the path serving as the source's name for diagnostics. Sources
/// without a path point to `./source`.
#[derive(Debug, PartialEq, Eq)]
pub struct Source {
    pub contents: String,
    pub path: PathBuf,
}

impl Source {
    /// Creates a new `Source` from a string and a path. Does not check
    /// that the contents match the file at `path` — use `Source::path`
    /// to load from disk instead.
    pub fn new(contents: &str, path: &Path) -> Rc<Source> {
        Rc::new(Source { contents: contents.to_string(), path: path.to_owned() })
    }

    /// Reads a file from disk into a new `Source`.
    pub fn path(path: &Path) -> std::io::Result<Rc<Source>> {
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        Ok(Source::new(&contents, path))
    }

    /// Builds a `Source` from a bare string, for the REPL and tests.
    pub fn source(contents: &str) -> Rc<Source> {
        Source::new(contents, &PathBuf::from("./source"))
    }
}
