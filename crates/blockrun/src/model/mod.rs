pub mod config;
pub mod events;
pub mod ids;
pub mod run;
pub mod tree;

pub use config::{PtyMode, RunnerConfig, TerminalSize};
pub use events::{
    ErrorEvent, FilesCapturedEvent, LogEvent, OutputsEvent, RunEvent, StatusEvent,
};
pub use ids::RunId;
pub use run::*;
pub use tree::{FileTreeNode, NodeKind, TreeFile};
