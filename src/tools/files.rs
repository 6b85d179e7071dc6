use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tokio::fs;
use tracing::info;

/// Creates, reads and lists `.tf` files under one directory.
#[derive(Debug, Clone)]
pub struct TerraformFiles {
    base: PathBuf,
}

impl TerraformFiles {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Write `content` to `name`, replacing any existing file. Returns the path.
    pub async fn create_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.resolve(name)?;
        fs::create_dir_all(&self.base)
            .await
            .with_context(|| format!("Failed to create {}", self.base.display()))?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Created Terraform file {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }

    pub async fn read_file(&self, name: &str) -> Result<String> {
        let path = self.resolve(name)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            bail!("File {} not found", path.display());
        }
        fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Names of the `.tf` files in the directory, sorted.
    pub async fn list_files(&self) -> Result<Vec<String>> {
        if !fs::try_exists(&self.base).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut read_dir = fs::read_dir(&self.base)
            .await
            .with_context(|| format!("Failed to read {}", self.base.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".tf") && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.base.join(name)),
            _ => bail!("Invalid file name '{name}': expected a plain file name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let files = TerraformFiles::new(dir.path().join("terraform"));
        assert!(files.list_files().await.unwrap().is_empty());

        let path = files
            .create_file("main.tf", "resource \"aws_vpc\" \"main\" {}\n")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("terraform").join("main.tf"));
        files.create_file("variables.tf", "variable \"region\" {}\n").await.unwrap();
        files.create_file("notes.md", "not terraform").await.unwrap();

        assert_eq!(files.list_files().await.unwrap(), vec!["main.tf", "variables.tf"]);
        assert!(files.read_file("main.tf").await.unwrap().contains("aws_vpc"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let files = TerraformFiles::new(dir.path());
        let err = files.read_file("outputs.tf").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn rejects_paths_outside_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let files = TerraformFiles::new(dir.path());
        for name in ["../escape.tf", "nested/main.tf", "/etc/passwd", ""] {
            assert!(files.create_file(name, "x").await.is_err(), "{name}");
        }
    }
}
