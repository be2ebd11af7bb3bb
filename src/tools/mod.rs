pub mod catalog;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod vector_search;
pub mod web_search;

pub use catalog::build_executor;
pub use executor::{ToolExecutor, ToolPolicy};
pub use registry::{DuplicateToolError, Tool, ToolDescriptor, ToolError, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use vector_search::VectorSearchTool;
pub use web_search::WebSearchTool;
