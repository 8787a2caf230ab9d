//! Built-in tool implementations.

mod bash;
mod edit;
mod glob;
mod list;
mod read;
mod write;

pub use bash::BashTool;
pub use edit::EditTool;
pub use glob::GlobTool;
pub use list::ListTool;
pub use read::ReadTool;
pub use write::WriteTool;
