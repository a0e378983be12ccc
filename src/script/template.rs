//! Built-in scaffolds for a fresh script directory

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::script::VERSIONS_DIR;

/// Template used when none is named
pub const DEFAULT_TEMPLATE: &str = "git-generic";

/// A named set of files written into a new script directory
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub name: &'static str,
    pub description: &'static str,
    /// (relative path, contents)
    pub files: &'static [(&'static str, &'static str)],
}

const GIT_GENERIC_README: &str = "\
Branch-aware migration scripts.

Every descriptor in versions/ records the source-control branch that was
active when it was created. When two branches both add scripts, the
directory ends up with several heads; run `migraph merge` to pick the pair
to join before creating or applying anything else.

Descriptor fields:
  id          revision id (generated)
  parents     parent revision id, or a list of ids for a merge
  branch      branch tag recorded at creation
  sequence    creation counter
  upgrade     SQL statements applied on upgrade
  downgrade   SQL statements that revert them
";

const TEMPLATES: &[Template] = &[
    Template {
        name: "git-generic",
        description: "Script directory with branch-tagging notes",
        files: &[("README", GIT_GENERIC_README)],
    },
    Template {
        name: "empty",
        description: "Bare script directory",
        files: &[],
    },
];

pub fn find(name: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.name == name)
}

pub fn all() -> &'static [Template] {
    TEMPLATES
}

/// Create `dir` and populate it from the named template
pub fn materialize(dir: &Path, name: &str) -> Result<()> {
    if dir.exists() {
        return Err(Error::AlreadyInitialized(dir.to_path_buf()));
    }
    let template = find(name).ok_or_else(|| Error::UnknownTemplate(name.to_string()))?;

    fs::create_dir_all(dir.join(VERSIONS_DIR))?;
    for (relative, contents) in template.files {
        fs::write(dir.join(relative), contents)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_materialize_git_generic() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("migrations");
        materialize(&dir, DEFAULT_TEMPLATE).unwrap();

        assert!(dir.join(VERSIONS_DIR).is_dir());
        assert!(dir.join("README").is_file());
    }

    #[test]
    fn test_materialize_existing_directory() {
        let temp = TempDir::new().unwrap();
        let err = materialize(temp.path(), "empty").unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized(_)));
    }

    #[test]
    fn test_unknown_template_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("migrations");
        let err = materialize(&dir, "mako").unwrap_err();

        assert!(matches!(err, Error::UnknownTemplate(name) if name == "mako"));
        assert!(!dir.exists());
    }
}
