//! Content persistence sink.
//!
//! Successfully extracted articles are handed to a [`ContentSink`]. What
//! happens downstream (generation, publishing) is not this crate's concern.
//!
//! # Output Structure
//!
//! [`JsonDirSink`] writes one file per article:
//! ```text
//! output_dir/
//! └── {outlet_id}/
//!     ├── council-approves-budget-3f2a9c1e04b7.json
//!     └── ...
//! ```

use crate::models::ExtractedArticle;
use crate::utils::{slugify_title, url_fingerprint};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, instrument};

#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn store(&self, article: &ExtractedArticle) -> std::io::Result<()>;
}

/// Writes each article as pretty JSON under `{output_dir}/{outlet_id}/`.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    output_dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn path_for(&self, article: &ExtractedArticle) -> PathBuf {
        let mut slug = slugify_title(&article.content.title);
        slug.truncate(
            slug.char_indices()
                .nth(80)
                .map(|(i, _)| i)
                .unwrap_or(slug.len()),
        );
        let name = format!("{}-{}.json", slug, url_fingerprint(&article.source_url));
        self.output_dir.join(&article.outlet_id).join(name)
    }
}

#[async_trait]
impl ContentSink for JsonDirSink {
    #[instrument(level = "debug", skip_all, fields(url = %article.source_url))]
    async fn store(&self, article: &ExtractedArticle) -> std::io::Result<()> {
        let path = self.path_for(article);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(article)?;
        fs::write(&path, json).await?;
        debug!(path = %path.display(), "Wrote extracted article");
        Ok(())
    }
}
