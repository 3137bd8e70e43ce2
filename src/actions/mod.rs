//! Built-in task operations
//!
//! Each `kind` in a task definition maps to one operation here. External
//! tools are spawned through [`command`]; everything else is plain file I/O.

use std::sync::Arc;

use crate::config::ActionConfig;
use crate::task::Operation;

pub mod bundle;
pub mod clean;
pub mod command;
pub mod copy;
pub mod exec;
pub mod render;
pub mod sprite;
pub mod style;

pub use bundle::Bundle;
pub use clean::Clean;
pub use copy::CopyFiles;
pub use exec::Exec;
pub use render::Render;
pub use sprite::Sprite;
pub use style::Style;

/// Build the operation for a configured action
pub fn operation_for(action: &ActionConfig) -> Arc<dyn Operation> {
    match action {
        ActionConfig::Clean(c) => Arc::new(Clean::from(c)),
        ActionConfig::Copy(c) => Arc::new(CopyFiles::from(c)),
        ActionConfig::Render(c) => Arc::new(Render::from(c)),
        ActionConfig::Style(c) => Arc::new(Style::from(c)),
        ActionConfig::Bundle(c) => Arc::new(Bundle::from(c)),
        ActionConfig::Sprite(c) => Arc::new(Sprite::from(c)),
        ActionConfig::Exec(c) => Arc::new(Exec::from(c)),
    }
}
