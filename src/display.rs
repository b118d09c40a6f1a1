//! Display collaborator boundary.

use std::path::Path;

use anyhow::Result;
use tracing::info;

/// Presents a processed image on the physical panel. Implementations are
/// free to fail; the rotation task logs and keeps going.
pub trait DisplayDriver: Send + Sync {
    fn render(&self, path: &Path) -> Result<()>;
}

/// Stand-in driver until hardware support lands: logs the frame it would
/// have pushed to the panel.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplayDriver for LogDisplay {
    fn render(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "display placeholder: would render");
        Ok(())
    }
}
