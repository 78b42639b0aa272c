use std::path::PathBuf;

/// High-water mark persisted as a single ASCII integer.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> anyhow::Result<Option<u64>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let height = content.trim().parse::<u64>()?;
                Ok(Some(height))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn store(&self, height: u64) -> anyhow::Result<()> {
        tokio::fs::write(&self.path, height.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_the_height() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("head"));
        assert_eq!(checkpoint.load().await.unwrap(), None);

        checkpoint.store(18_446_744).await.unwrap();
        assert_eq!(checkpoint.load().await.unwrap(), Some(18_446_744));

        checkpoint.store(18_446_745).await.unwrap();
        assert_eq!(checkpoint.load().await.unwrap(), Some(18_446_745));
    }

    #[tokio::test]
    async fn garbage_content_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head");
        tokio::fs::write(&path, "not a number").await.unwrap();
        assert!(Checkpoint::new(path).load().await.is_err());
    }
}
