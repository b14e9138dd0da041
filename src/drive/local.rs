use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{FeederError, FeederResult};
use crate::feeder::destination::{
    AccessControl, Append, ArtifactRef, Destination, DestinationStyle, FolderRef,
};
use crate::feeder::model::Timestamp;

/// File-style destination on the local disk: one directory per conversation.
#[derive(Debug, Clone)]
pub struct LocalDestination {
    root: PathBuf,
}

impl LocalDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, folder: &FolderRef, name: &str) -> FeederResult<PathBuf> {
        if name.contains('/') || name.contains('\\') || name == ".." {
            return Err(FeederError::validation(format!(
                "artifact name `{name}` is not a plain file name"
            )));
        }
        Ok(PathBuf::from(&folder.id).join(name))
    }
}

/// Write through a sibling temp file so readers never see a partial artifact.
fn write_atomic(path: &Path, content: &str) -> FeederResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| FeederError::validation(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| FeederError::Io(err.error))?;
    Ok(())
}

impl Destination for LocalDestination {
    fn style(&self) -> DestinationStyle {
        DestinationStyle::File
    }

    fn ensure_folder(&mut self, name: &str) -> FeederResult<FolderRef> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        Ok(FolderRef {
            id: dir.to_string_lossy().into_owned(),
            name: name.to_string(),
        })
    }

    fn find(&mut self, folder: &FolderRef, name: &str) -> FeederResult<Option<ArtifactRef>> {
        let path = self.artifact_path(folder, name)?;
        Ok(path.is_file().then(|| ArtifactRef {
            id: path.to_string_lossy().into_owned(),
            name: name.to_string(),
        }))
    }

    fn create(
        &mut self,
        folder: &FolderRef,
        name: &str,
        content: &str,
        _marker: Option<Timestamp>,
    ) -> FeederResult<ArtifactRef> {
        let path = self.artifact_path(folder, name)?;
        write_atomic(&path, content)?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "wrote local artifact");
        Ok(ArtifactRef {
            id: path.to_string_lossy().into_owned(),
            name: name.to_string(),
        })
    }

    fn read_text(&mut self, artifact: &ArtifactRef) -> FeederResult<String> {
        Ok(fs::read_to_string(&artifact.id)?)
    }

    fn overwrite(&mut self, artifact: &ArtifactRef, content: &str) -> FeederResult<()> {
        write_atomic(Path::new(&artifact.id), content)
    }

    fn appender(&mut self) -> Option<&mut dyn Append> {
        None
    }

    fn access(&mut self) -> Option<&mut dyn AccessControl> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn artifacts_round_trip_through_conversation_directories() {
        let tmp = tempdir().expect("tempdir");
        let mut dest = LocalDestination::new(tmp.path());

        let folder = dest.ensure_folder("general").expect("folder");
        assert!(tmp.path().join("general").is_dir());
        assert!(dest.find(&folder, "a.txt").expect("find").is_none());

        let created = dest.create(&folder, "a.txt", "one", None).expect("create");
        assert_eq!(dest.find(&folder, "a.txt").expect("find"), Some(created.clone()));
        dest.overwrite(&created, "two").expect("overwrite");
        assert_eq!(dest.read_text(&created).expect("read"), "two");

        let leftovers = fs::read_dir(tmp.path().join("general"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn local_destination_has_no_optional_capabilities() {
        let tmp = tempdir().expect("tempdir");
        let mut dest = LocalDestination::new(tmp.path());
        assert_eq!(dest.style(), DestinationStyle::File);
        assert!(dest.appender().is_none());
        assert!(dest.access().is_none());
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let tmp = tempdir().expect("tempdir");
        let mut dest = LocalDestination::new(tmp.path());
        let folder = dest.ensure_folder("general").expect("folder");
        assert!(dest.create(&folder, "../escape.txt", "x", None).is_err());
    }
}
