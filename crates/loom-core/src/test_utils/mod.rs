pub mod mock_model;
pub mod mock_model_server;

pub use mock_model::{completion, tool_call_completion, MockModel};
pub use mock_model_server::{MockModelServer, MockReply};
