pub mod error;
pub mod history;
pub mod usernames;

pub use error::ParleyError;
pub use history::{ConversationHistory, HistoryMessage};
pub use usernames::{NoOpUsernamesMapper, UsernamesMapper};
