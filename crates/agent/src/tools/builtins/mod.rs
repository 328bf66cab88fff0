//! Built-in tools bound to every dialog.

mod delete_file;
mod list_files;
mod read_file;
mod replace_in_file;
mod search_files;
mod set_dialog_title;
mod web_fetch;
mod write_file;

pub use delete_file::DeleteFileTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use replace_in_file::ReplaceInFileTool;
pub use search_files::SearchFilesTool;
pub use set_dialog_title::SetDialogTitleTool;
pub use web_fetch::WebFetchTool;
pub use write_file::WriteFileTool;

use std::sync::Arc;

use super::registry::ToolRegistry;

/// Register the standard tool-set.
///
/// The title setter is conditional: it is only offered while the dialog has
/// no title, so the model names fresh dialogs exactly once.
pub fn register_builtins(registry: &mut ToolRegistry, include_title_tool: bool) {
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ReplaceInFileTool));
    registry.register(Arc::new(DeleteFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(SearchFilesTool));
    registry.register(Arc::new(WebFetchTool));
    if include_title_tool {
        registry.register(Arc::new(SetDialogTitleTool));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_tool_is_conditional() {
        let mut with_title = ToolRegistry::new();
        register_builtins(&mut with_title, false);
        assert!(!with_title.has_tool("set_dialog_title"));

        let mut without_title = ToolRegistry::new();
        register_builtins(&mut without_title, true);
        assert!(without_title.has_tool("set_dialog_title"));
        assert!(without_title.is_ephemeral("set_dialog_title"));
    }
}
