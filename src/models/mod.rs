mod user;
mod forms;

pub use user::{User, NewUser, ChatMessage, Role, word_count};
pub use forms::{LoginForm, RegisterForm, ChatForm};
